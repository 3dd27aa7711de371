// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for actually running attempt commands, using
//! `tokio::process::Command`, and reporting back to the orchestration
//! runtime via `RuntimeEvent`s.
//!
//! - [`backend`] provides the `ClusterBackend` trait the runtime talks to.
//! - [`local`] is the backend used by the `rundag` binary.
//! - [`executor_loop`] owns the loop that tracks running attempt processes.
//! - [`task_runner`] handles individual attempt and commit processes.
//! - [`status_lines`] turns worker stdout into status updates.

pub mod backend;
pub mod executor_loop;
pub mod local;
pub mod status_lines;
pub mod task_runner;

pub use backend::{BackendFuture, ClusterBackend};
pub use executor_loop::{spawn_executor, ExecutorCommand};
pub use local::LocalBackend;
