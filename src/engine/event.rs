// src/engine/event.rs

//! Internal event vocabulary of the engine.
//!
//! Every state change is driven by an [`Event`] addressed to exactly one
//! entity (or to the per-DAG scheduler). Handlers never call each other;
//! they return [`Effects`]: follow-up events that go back on the queue, and
//! [`CoreCommand`]s for the IO shell.

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

use crate::dag::CommitSpec;
use crate::engine::options::EngineConfig;
use crate::ids::{AttemptId, DagId, EntityId, TaskId, VertexId, WorkerRef};
use crate::state::{
    AttemptSpec, AttemptState, DagState, Diagnostic, TaskSpec, TaskState, TerminationReason,
    VertexSpec, VertexState,
};
use crate::types::{Counters, ResourceSpec};

#[derive(Debug, Clone)]
pub enum Event {
    Dag(DagId, DagEvent),
    Vertex(VertexId, VertexEvent),
    Task(TaskId, TaskEvent),
    Attempt(AttemptId, AttemptEvent),
    Scheduler(DagId, SchedulerEvent),
}

impl Event {
    /// DAG the event belongs to; each DAG has its own queue.
    pub fn dag(&self) -> DagId {
        match self {
            Event::Dag(id, _) | Event::Scheduler(id, _) => *id,
            Event::Vertex(id, _) => id.dag(),
            Event::Task(id, _) => id.dag(),
            Event::Attempt(id, _) => id.dag(),
        }
    }

    /// Addressed entity, if any. Scheduler events address the DAG's
    /// scheduler rather than a state machine.
    pub fn target(&self) -> Option<EntityId> {
        match self {
            Event::Dag(id, _) => Some((*id).into()),
            Event::Vertex(id, _) => Some((*id).into()),
            Event::Task(id, _) => Some((*id).into()),
            Event::Attempt(id, _) => Some((*id).into()),
            Event::Scheduler(..) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum DagEvent {
    /// Validate the plan and create every vertex.
    Init,
    /// Initialize the root vertices.
    Start,
    VertexCompleted {
        vertex: VertexId,
        outcome: VertexState,
        diagnostics: Vec<Diagnostic>,
    },
    Kill,
    /// Periodic prompt to look for slow tasks.
    SpeculationTick,
}

#[derive(Debug, Clone)]
pub enum VertexEvent {
    Create(Box<VertexSpec>),
    Init,
    /// A source vertex resolved its parallelism and created its tasks.
    SourceInited {
        source: VertexId,
        parallelism: u32,
    },
    /// A source vertex started scheduling its tasks.
    SourceRunning {
        source: VertexId,
    },
    /// A source vertex completed enough tasks to size this vertex.
    SourceParallelism {
        source: VertexId,
        partitions: u32,
    },
    UpstreamVertexCompleted {
        source: VertexId,
        outcome: VertexState,
    },
    /// Re-evaluate whether the vertex may start scheduling its tasks.
    StartScheduling,
    TaskCompleted {
        task: TaskId,
        outcome: TaskState,
        attempt: Option<AttemptId>,
        duration: Option<TimeDelta>,
        counters: Counters,
        diagnostics: Vec<Diagnostic>,
    },
    /// Accounting for every attempt that reaches a terminal state.
    AttemptCompleted {
        attempt: AttemptId,
        outcome: AttemptState,
    },
    CheckSpeculation,
    CommitCompleted {
        result: std::result::Result<(), String>,
    },
    Terminate(TerminationReason),
}

#[derive(Debug, Clone)]
pub enum TaskEvent {
    Create(Box<TaskSpec>),
    Schedule,
    AttemptLaunched {
        attempt: AttemptId,
        at: DateTime<Utc>,
    },
    AttemptSucceeded {
        attempt: AttemptId,
        counters: Counters,
        duration: Option<TimeDelta>,
    },
    AttemptFailed {
        attempt: AttemptId,
        diagnostic: Diagnostic,
    },
    AttemptKilled {
        attempt: AttemptId,
        reason: TerminationReason,
    },
    /// Launch a speculative attempt if the running one has exceeded
    /// `threshold`.
    SpeculateIfSlow {
        threshold: TimeDelta,
    },
    Terminate(TerminationReason),
}

#[derive(Debug, Clone)]
pub enum AttemptEvent {
    Create(Box<AttemptSpec>),
    WorkerAssigned(WorkerRef),
    LaunchConfirmed,
    StatusUpdate {
        progress: f32,
        counters: Counters,
    },
    Completed {
        success: bool,
        diagnostic: Option<String>,
        counters: Counters,
    },
    SchedulingTimeout,
    Terminate(TerminationReason),
}

#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// Queue a worker request for a new attempt.
    Schedule {
        attempt: AttemptId,
        resource: ResourceSpec,
        priority: u32,
    },
    WorkerAllocated {
        attempt: AttemptId,
        worker: WorkerRef,
    },
    /// The attempt reached a terminal state; give back whatever it held.
    AttemptEnded {
        attempt: AttemptId,
    },
}

/// Everything a worker needs to run one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub dag_name: String,
    pub vertex_name: String,
    pub task_index: u32,
    pub attempt_number: u32,
    pub command: Option<String>,
    pub resource: ResourceSpec,
    pub speculative: bool,
}

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreCommand {
    RequestWorker {
        attempt: AttemptId,
        resource: ResourceSpec,
        priority: u32,
    },
    CancelWorkerRequest {
        attempt: AttemptId,
    },
    LaunchAttempt {
        attempt: AttemptId,
        worker: WorkerRef,
        launch: LaunchSpec,
    },
    CancelAttempt {
        attempt: AttemptId,
        worker: WorkerRef,
    },
    ReleaseWorker {
        worker: WorkerRef,
    },
    /// Report `SchedulingTimeout` for the attempt after `after` unless the
    /// attempt has moved on by then.
    StartSchedulingTimer {
        attempt: AttemptId,
        after: Duration,
    },
    CommitVertexOutput {
        vertex: VertexId,
        vertex_name: String,
        commit: CommitSpec,
    },
    DagFinished {
        dag: DagId,
        state: DagState,
    },
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone, Default)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in emission order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// What a handler wants to happen next.
#[derive(Debug, Default)]
pub struct Effects {
    pub events: Vec<Event>,
    pub commands: Vec<CoreCommand>,
    /// The event did not apply to the entity's current state.
    pub dropped: bool,
}

impl Effects {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn dropped() -> Self {
        Self {
            dropped: true,
            ..Self::default()
        }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn command(&mut self, command: CoreCommand) {
        self.commands.push(command);
    }

    pub fn extend(&mut self, other: Effects) {
        self.events.extend(other.events);
        self.commands.extend(other.commands);
        self.dropped |= other.dropped;
    }
}

/// Read-only inputs every handler gets.
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    pub now: DateTime<Utc>,
    pub config: &'a EngineConfig,
}

impl<'a> Context<'a> {
    pub fn new(now: DateTime<Utc>, config: &'a EngineConfig) -> Self {
        Self { now, config }
    }
}

impl DagEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DagEvent::Init => "init",
            DagEvent::Start => "start",
            DagEvent::VertexCompleted { .. } => "vertex_completed",
            DagEvent::Kill => "kill",
            DagEvent::SpeculationTick => "speculation_tick",
        }
    }
}

impl VertexEvent {
    pub fn name(&self) -> &'static str {
        match self {
            VertexEvent::Create(_) => "create",
            VertexEvent::Init => "init",
            VertexEvent::SourceInited { .. } => "source_inited",
            VertexEvent::SourceRunning { .. } => "source_running",
            VertexEvent::SourceParallelism { .. } => "source_parallelism",
            VertexEvent::UpstreamVertexCompleted { .. } => "upstream_vertex_completed",
            VertexEvent::StartScheduling => "start_scheduling",
            VertexEvent::TaskCompleted { .. } => "task_completed",
            VertexEvent::AttemptCompleted { .. } => "attempt_completed",
            VertexEvent::CheckSpeculation => "check_speculation",
            VertexEvent::CommitCompleted { .. } => "commit_completed",
            VertexEvent::Terminate(_) => "terminate",
        }
    }
}

impl TaskEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::Create(_) => "create",
            TaskEvent::Schedule => "schedule",
            TaskEvent::AttemptLaunched { .. } => "attempt_launched",
            TaskEvent::AttemptSucceeded { .. } => "attempt_succeeded",
            TaskEvent::AttemptFailed { .. } => "attempt_failed",
            TaskEvent::AttemptKilled { .. } => "attempt_killed",
            TaskEvent::SpeculateIfSlow { .. } => "speculate_if_slow",
            TaskEvent::Terminate(_) => "terminate",
        }
    }
}

impl AttemptEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AttemptEvent::Create(_) => "create",
            AttemptEvent::WorkerAssigned(_) => "worker_assigned",
            AttemptEvent::LaunchConfirmed => "launch_confirmed",
            AttemptEvent::StatusUpdate { .. } => "status_update",
            AttemptEvent::Completed { .. } => "completed",
            AttemptEvent::SchedulingTimeout => "scheduling_timeout",
            AttemptEvent::Terminate(_) => "terminate",
        }
    }
}
