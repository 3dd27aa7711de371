// src/exec/backend.rs

//! Pluggable cluster backend abstraction.
//!
//! The runtime talks to a `ClusterBackend` instead of spawning anything
//! itself. A backend plays three collaborator roles:
//!
//! - resource allocator: `request_worker`, `cancel_worker_request`,
//!   `release_worker`; grants come back as `RuntimeEvent::WorkerAllocated`;
//! - worker runtime: `launch_attempt`, `cancel_attempt`; the worker reports
//!   `LaunchConfirmed`, `StatusUpdate` and `Completed` per attempt, in the
//!   order they happened;
//! - committer: `commit_vertex`, answered with `CommitFinished`.
//!
//! Every method only *starts* the work. Results re-enter the runtime as
//! events on the channel the backend was built with.
//!
//! - [`LocalBackend`](crate::exec::LocalBackend) runs attempts as local
//!   processes.
//! - Tests provide their own backend that answers immediately.

use std::future::Future;
use std::pin::Pin;

use crate::dag::CommitSpec;
use crate::engine::LaunchSpec;
use crate::errors::Result;
use crate::ids::{AttemptId, VertexId, WorkerRef};
use crate::types::ResourceSpec;

pub type BackendFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

pub trait ClusterBackend: Send {
    fn request_worker(
        &mut self,
        attempt: AttemptId,
        resource: ResourceSpec,
        priority: u32,
    ) -> BackendFuture<'_>;

    fn cancel_worker_request(&mut self, attempt: AttemptId) -> BackendFuture<'_>;

    fn release_worker(&mut self, worker: WorkerRef) -> BackendFuture<'_>;

    fn launch_attempt(
        &mut self,
        attempt: AttemptId,
        worker: WorkerRef,
        launch: LaunchSpec,
    ) -> BackendFuture<'_>;

    /// Best-effort. The engine has already marked the attempt KILLED.
    fn cancel_attempt(&mut self, attempt: AttemptId, worker: WorkerRef) -> BackendFuture<'_>;

    fn commit_vertex(
        &mut self,
        vertex: VertexId,
        vertex_name: String,
        commit: CommitSpec,
    ) -> BackendFuture<'_>;
}
