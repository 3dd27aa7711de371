// src/state/mod.rs

//! The four coupled state machines.
//!
//! - [`attempt`]: one execution attempt of a task on one worker.
//! - [`task`]: owns the attempts of a task; decides retry and speculation.
//! - [`vertex`]: owns the tasks of a stage; applies edge semantics.
//! - [`dag`]: owns the vertices; aggregates a terminal DAG outcome.
//!
//! Every machine exposes `handle(&mut self, event, ctx) -> Effects`. A
//! handler only touches its own entity; anything it wants from another
//! entity (or from the outside world) leaves as an event or a command in
//! the returned [`Effects`](crate::engine::Effects).

pub mod attempt;
pub mod dag;
pub mod diagnostic;
pub mod task;
pub mod vertex;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use attempt::{Attempt, AttemptSpec};
pub use dag::Dag;
pub use diagnostic::{Diagnostic, FailureKind};
pub use task::{Task, TaskSpec};
pub use vertex::{DestinationEdge, SourceEdge, SourceProgress, SourceStatus, Vertex, VertexSpec};

use crate::errors::DagError;

/// Common surface the dispatcher needs from every state machine.
pub trait StateMachine {
    type State: Copy + PartialEq + fmt::Display;
    type Event: fmt::Debug;

    fn state(&self) -> Self::State;

    /// Latest diagnostic worth recording alongside a transition.
    fn last_diagnostic(&self) -> Option<&Diagnostic>;

    fn handle(
        &mut self,
        event: Self::Event,
        ctx: &crate::engine::Context<'_>,
    ) -> crate::engine::Effects;
}

macro_rules! state_labels {
    ($ty:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $ty {
            pub const fn as_label(&self) -> &'static str {
                match self {
                    $($ty::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_label())
            }
        }

        impl FromStr for $ty {
            type Err = DagError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($label => Ok($ty::$variant),)+
                    other => Err(DagError::InternalInvariant(format!(
                        "unknown {} state '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DagState {
    New,
    Inited,
    Running,
    /// Waiting for vertices to drain after a kill or a fail-fast failure.
    Terminating,
    Succeeded,
    Failed,
    Killed,
    Error,
}

state_labels!(DagState {
    New => "NEW",
    Inited => "INITED",
    Running => "RUNNING",
    Terminating => "TERMINATING",
    Succeeded => "SUCCEEDED",
    Failed => "FAILED",
    Killed => "KILLED",
    Error => "ERROR",
});

impl DagState {
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            DagState::Succeeded | DagState::Failed | DagState::Killed | DagState::Error
        )
    }

    /// Process exit code mirroring the terminal state.
    pub const fn exit_code(&self) -> i32 {
        match self {
            DagState::Succeeded => 0,
            DagState::Failed => 1,
            DagState::Error => 2,
            DagState::Killed => 3,
            // Non-terminal: the caller exited before the DAG finished.
            DagState::New | DagState::Inited | DagState::Running | DagState::Terminating => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VertexState {
    New,
    /// Waiting for parallelism to be resolved.
    Initializing,
    Inited,
    Running,
    /// All tasks succeeded; waiting for the output commit to finish.
    Committing,
    /// Waiting for tasks to drain after a terminate request.
    Terminating,
    Succeeded,
    Failed,
    Killed,
    Error,
}

state_labels!(VertexState {
    New => "NEW",
    Initializing => "INITIALIZING",
    Inited => "INITED",
    Running => "RUNNING",
    Committing => "COMMITTING",
    Terminating => "TERMINATING",
    Succeeded => "SUCCEEDED",
    Failed => "FAILED",
    Killed => "KILLED",
    Error => "ERROR",
});

impl VertexState {
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            VertexState::Succeeded | VertexState::Failed | VertexState::Killed | VertexState::Error
        )
    }

    pub const fn is_failure(&self) -> bool {
        matches!(self, VertexState::Failed | VertexState::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    New,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Killed,
}

state_labels!(TaskState {
    New => "NEW",
    Scheduled => "SCHEDULED",
    Running => "RUNNING",
    Succeeded => "SUCCEEDED",
    Failed => "FAILED",
    Killed => "KILLED",
});

impl TaskState {
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Killed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptState {
    /// Created; a worker request is outstanding with the scheduler.
    New,
    /// Worker assigned and launch requested.
    Scheduled,
    /// The worker acknowledged the attempt started.
    Running,
    Succeeded,
    Failed,
    Killed,
}

state_labels!(AttemptState {
    New => "NEW",
    Scheduled => "SCHEDULED",
    Running => "RUNNING",
    Succeeded => "SUCCEEDED",
    Failed => "FAILED",
    Killed => "KILLED",
});

impl AttemptState {
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Succeeded | AttemptState::Failed | AttemptState::Killed
        )
    }
}

/// Why an entity is being asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The user killed the DAG.
    DagKilled,
    /// Another vertex failed under the fail-fast policy.
    DagFailed,
    /// A source vertex ended without succeeding.
    UpstreamFailed,
    /// Too many of the vertex's own tasks failed.
    OwnTaskFailed,
    /// The vertex's output commit failed.
    CommitFailed,
    /// A sibling attempt of the same task succeeded first.
    TaskSucceeded,
    /// The owning task failed; remaining attempts are cleaned up.
    TaskFailed,
    /// The worker was lost or reclaimed; not counted as an attempt failure.
    Preempted,
    /// The engine restarted while this attempt was in flight.
    Recovery,
    /// The engine hit an inconsistency it cannot resolve.
    InternalError,
}

impl TerminationReason {
    /// Terminal vertex state a terminate request with this reason ends in.
    pub const fn vertex_outcome(&self) -> VertexState {
        match self {
            TerminationReason::OwnTaskFailed | TerminationReason::CommitFailed => {
                VertexState::Failed
            }
            TerminationReason::InternalError => VertexState::Error,
            _ => VertexState::Killed,
        }
    }

    /// Kills for these reasons leave the task free to try again.
    pub const fn allows_reschedule(&self) -> bool {
        matches!(
            self,
            TerminationReason::Preempted | TerminationReason::Recovery
        )
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationReason::DagKilled => "dag_killed",
            TerminationReason::DagFailed => "dag_failed",
            TerminationReason::UpstreamFailed => "upstream_failed",
            TerminationReason::OwnTaskFailed => "own_task_failed",
            TerminationReason::CommitFailed => "commit_failed",
            TerminationReason::TaskSucceeded => "task_succeeded",
            TerminationReason::TaskFailed => "task_failed",
            TerminationReason::Preempted => "preempted",
            TerminationReason::Recovery => "recovery",
            TerminationReason::InternalError => "internal_error",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_labels_parse_back() {
        for s in [
            VertexState::New,
            VertexState::Committing,
            VertexState::Terminating,
            VertexState::Error,
        ] {
            assert_eq!(s.as_label().parse::<VertexState>().unwrap(), s);
        }
        assert!("BOGUS".parse::<AttemptState>().is_err());
    }

    #[test]
    fn exit_codes_distinguish_outcomes() {
        assert_eq!(DagState::Succeeded.exit_code(), 0);
        assert_ne!(DagState::Failed.exit_code(), 0);
        assert_ne!(DagState::Killed.exit_code(), DagState::Failed.exit_code());
        assert_ne!(DagState::Error.exit_code(), 0);
    }

    #[test]
    fn termination_reason_maps_to_vertex_outcome() {
        assert_eq!(
            TerminationReason::OwnTaskFailed.vertex_outcome(),
            VertexState::Failed
        );
        assert_eq!(
            TerminationReason::DagKilled.vertex_outcome(),
            VertexState::Killed
        );
        assert_eq!(
            TerminationReason::InternalError.vertex_outcome(),
            VertexState::Error
        );
    }
}
