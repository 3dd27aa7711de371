// src/exec/local.rs

//! Backend that runs every attempt as a process on this machine.

use tokio::sync::mpsc;
use tracing::debug;

use crate::dag::CommitSpec;
use crate::engine::{LaunchSpec, RuntimeEvent};
use crate::errors::Error;
use crate::exec::backend::{BackendFuture, ClusterBackend};
use crate::exec::executor_loop::{spawn_executor, ExecutorCommand};
use crate::exec::task_runner::run_commit;
use crate::ids::{AttemptId, VertexId, WorkerRef};
use crate::types::ResourceSpec;

/// Local "cluster": every worker request is granted at once with a fresh
/// `local-worker-N` slot. Concurrency is bounded by the engine's
/// `max_concurrent_workers`, not here.
pub struct LocalBackend {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    exec_tx: mpsc::Sender<ExecutorCommand>,
    next_worker: u64,
}

impl LocalBackend {
    /// Create the backend and spawn its executor loop.
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        let exec_tx = spawn_executor(runtime_tx.clone());
        Self {
            runtime_tx,
            exec_tx,
            next_worker: 1,
        }
    }

    /// Post an event back to the runtime without waiting on it: the runtime
    /// is the one awaiting this backend call.
    fn post(&self, event: RuntimeEvent) {
        let tx = self.runtime_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(event).await;
        });
    }
}

impl ClusterBackend for LocalBackend {
    fn request_worker(
        &mut self,
        attempt: AttemptId,
        resource: ResourceSpec,
        _priority: u32,
    ) -> BackendFuture<'_> {
        let worker = WorkerRef::new(format!("local-worker-{}", self.next_worker));
        self.next_worker += 1;
        debug!(%attempt, %worker, memory_mb = resource.memory_mb, vcores = resource.vcores, "granting local worker");
        self.post(RuntimeEvent::WorkerAllocated { attempt, worker });
        Box::pin(async { Ok(()) })
    }

    fn cancel_worker_request(&mut self, attempt: AttemptId) -> BackendFuture<'_> {
        // Grants are immediate; a late grant is released by the scheduler.
        debug!(%attempt, "worker request cancelled");
        Box::pin(async { Ok(()) })
    }

    fn release_worker(&mut self, worker: WorkerRef) -> BackendFuture<'_> {
        debug!(%worker, "worker released");
        Box::pin(async { Ok(()) })
    }

    fn launch_attempt(
        &mut self,
        attempt: AttemptId,
        worker: WorkerRef,
        launch: LaunchSpec,
    ) -> BackendFuture<'_> {
        let tx = self.exec_tx.clone();
        Box::pin(async move {
            tx.send(ExecutorCommand::Launch {
                attempt,
                worker,
                launch,
            })
            .await
            .map_err(Error::from)?;
            Ok(())
        })
    }

    fn cancel_attempt(&mut self, attempt: AttemptId, _worker: WorkerRef) -> BackendFuture<'_> {
        let tx = self.exec_tx.clone();
        Box::pin(async move {
            tx.send(ExecutorCommand::Cancel { attempt })
                .await
                .map_err(Error::from)?;
            Ok(())
        })
    }

    fn commit_vertex(
        &mut self,
        vertex: VertexId,
        vertex_name: String,
        commit: CommitSpec,
    ) -> BackendFuture<'_> {
        let tx = self.runtime_tx.clone();
        tokio::spawn(async move {
            let result = run_commit(&vertex_name, &commit.command).await;
            let _ = tx.send(RuntimeEvent::CommitFinished { vertex, result }).await;
        });
        Box::pin(async { Ok(()) })
    }
}
