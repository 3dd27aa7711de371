// src/engine/mod.rs

//! Orchestration engine for rundag.
//!
//! This module ties together:
//! - the per-DAG scheduler that hands out worker requests
//! - the internal event queue and the dispatcher that routes events to the
//!   Dag / Vertex / Task / Attempt state machines
//! - the main runtime event loop that reacts to:
//!   - worker allocations from the cluster backend
//!   - launch confirmations, status updates and completions from workers
//!   - lost workers
//!   - scheduling timeouts and speculation ticks
//!   - kill and shutdown requests
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use crate::ids::{AttemptId, DagId, VertexId, WorkerRef};
use crate::types::Counters;

/// Events flowing into the runtime from the backend, timers and the user.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// The resource allocator granted a worker for an attempt.
    WorkerAllocated {
        attempt: AttemptId,
        worker: WorkerRef,
    },
    /// The worker started the attempt.
    LaunchConfirmed { attempt: AttemptId },
    /// Progress heartbeat from a running attempt.
    StatusUpdate {
        attempt: AttemptId,
        progress: f32,
        counters: Counters,
    },
    /// The attempt's process finished.
    Completed {
        attempt: AttemptId,
        success: bool,
        diagnostic: Option<String>,
        counters: Counters,
    },
    /// The worker running the attempt went away (preempted, node lost).
    /// The attempt is killed and its task tries again without charging the
    /// failed-attempt budget.
    WorkerLost { attempt: AttemptId },
    /// No worker arrived in time for the attempt.
    SchedulingTimeout { attempt: AttemptId },
    /// A vertex output commit finished.
    CommitFinished {
        vertex: VertexId,
        result: std::result::Result<(), String>,
    },
    KillDag { dag: DagId },
    /// Look for slow tasks in every running DAG.
    SpeculationTick,
    /// Graceful shutdown requested.
    ShutdownRequested,
}

pub mod clock;
pub mod core;
pub mod dispatcher;
pub mod event;
pub mod options;
pub mod queue;
pub mod run;
pub mod runtime;
pub mod scheduler;
pub mod status;

pub use clock::{Clock, ManualClock, SystemClock};
pub use core::{CoreRuntime, EngineStats};
pub use event::{
    AttemptEvent, Context, CoreCommand, CoreStep, DagEvent, Effects, Event, LaunchSpec,
    SchedulerEvent, TaskEvent, VertexEvent,
};
pub use options::{EngineConfig, RuntimeOptions, SpeculationConfig};
pub use queue::EventQueue;
pub use run::DagRun;
pub use runtime::Runtime;
pub use scheduler::Scheduler;
pub use status::{DagStatus, StateSnapshot, VertexStatus};
