// src/state/vertex.rs

//! Vertex state machine.
//!
//! A vertex learns about its neighbours only through events:
//!
//! - sources send `SourceInited`, `SourceRunning`, `SourceParallelism` and
//!   `UpstreamVertexCompleted`;
//! - it sends the same events to its own destinations.
//!
//! Readiness to schedule is decided from that local view: every SEQUENTIAL
//! source must have SUCCEEDED and every CONCURRENT source must at least be
//! RUNNING.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, error, info, warn};

use crate::dag::{Parallelism, VertexPlan};
use crate::engine::event::{Context, CoreCommand, DagEvent, Effects, Event, TaskEvent, VertexEvent};
use crate::ids::{TaskId, VertexId};
use crate::state::{
    AttemptState, Diagnostic, FailureKind, StateMachine, TaskSpec, TaskState, TerminationReason,
    VertexState,
};
use crate::types::{Counters, DataMovement, OUTPUT_PARTITIONS_COUNTER, SchedulingPolicy};

/// Incoming edge as seen by the destination vertex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEdge {
    pub vertex: VertexId,
    pub name: String,
    pub data_movement: DataMovement,
    pub scheduling: SchedulingPolicy,
}

/// Outgoing edge as seen by the source vertex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationEdge {
    pub vertex: VertexId,
    pub name: String,
    pub data_movement: DataMovement,
    pub scheduling: SchedulingPolicy,
    /// The destination takes its parallelism from this edge.
    pub sizes_destination: bool,
}

/// Inputs a vertex is created with.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexSpec {
    pub index: u32,
    pub dag_name: String,
    pub plan: VertexPlan,
    pub sources: Vec<SourceEdge>,
    pub destinations: Vec<DestinationEdge>,
    /// Distance from the nearest root; lower is scheduled first.
    pub depth: u32,
    /// Source whose edge determines a derived parallelism.
    pub parallelism_source: Option<VertexId>,
}

/// What this vertex knows about one of its sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SourceProgress {
    Pending,
    Inited,
    Running,
    Succeeded,
    /// Ended without succeeding.
    Lost,
}

#[derive(Debug, Clone)]
pub struct SourceStatus {
    pub edge: SourceEdge,
    pub progress: SourceProgress,
    pub parallelism: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Vertex {
    pub id: VertexId,
    pub state: VertexState,
    pub spec: VertexSpec,
    pub sources: BTreeMap<VertexId, SourceStatus>,
    pub parallelism: Option<u32>,
    pub tasks: Vec<TaskId>,
    /// Last reported state of every task; NEW until the task reports.
    pub task_states: BTreeMap<TaskId, TaskState>,
    pub succeeded_tasks: u32,
    pub failed_tasks: u32,
    pub killed_tasks: u32,
    pub failed_attempts: u32,
    pub killed_attempts: u32,
    pub task_durations: Vec<TimeDelta>,
    /// Partition count reported through task counters.
    pub reported_partitions: Option<u32>,
    /// Partition count announced by the source that sizes this vertex.
    pub announced_partitions: Option<u32>,
    pub parallelism_announced: bool,
    pub termination: Option<TerminationReason>,
    /// Chain of failures, outermost first.
    pub diagnostics: Vec<Diagnostic>,
    pub inited_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Vertex {
    pub fn new(id: VertexId, spec: VertexSpec) -> Self {
        let sources = spec
            .sources
            .iter()
            .map(|edge| {
                (
                    edge.vertex,
                    SourceStatus {
                        edge: edge.clone(),
                        progress: SourceProgress::Pending,
                        parallelism: None,
                    },
                )
            })
            .collect();

        Self {
            id,
            state: VertexState::New,
            spec,
            sources,
            parallelism: None,
            tasks: Vec::new(),
            task_states: BTreeMap::new(),
            succeeded_tasks: 0,
            failed_tasks: 0,
            killed_tasks: 0,
            failed_attempts: 0,
            killed_attempts: 0,
            task_durations: Vec::new(),
            reported_partitions: None,
            announced_partitions: None,
            parallelism_announced: false,
            termination: None,
            diagnostics: Vec::new(),
            inited_at: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.plan.name
    }

    pub fn task_spec(&self, index: u32) -> TaskSpec {
        let plan = &self.spec.plan;
        TaskSpec {
            index,
            dag_name: self.spec.dag_name.clone(),
            vertex_name: plan.name.clone(),
            command: plan.command.clone(),
            resource: plan.resource,
            max_failed_attempts: plan.max_failed_attempts,
            speculation: plan.speculation,
            priority: self.spec.depth,
        }
    }

    pub fn completed_tasks(&self) -> u32 {
        self.succeeded_tasks + self.failed_tasks + self.killed_tasks
    }

    /// Fraction of tasks that are terminal; 1.0 once the vertex is done.
    pub fn progress(&self) -> f32 {
        match self.parallelism {
            Some(0) => 1.0,
            Some(n) => self.completed_tasks() as f32 / n as f32,
            None if self.state.is_terminal() => 1.0,
            None => 0.0,
        }
    }

    fn all_tasks_terminal(&self) -> bool {
        self.task_states.values().all(TaskState::is_terminal)
    }

    fn is_ready(&self) -> bool {
        self.sources.values().all(|s| match s.edge.scheduling {
            SchedulingPolicy::Sequential => s.progress == SourceProgress::Succeeded,
            SchedulingPolicy::Concurrent => matches!(
                s.progress,
                SourceProgress::Running | SourceProgress::Succeeded
            ),
        })
    }

    /// Parallelism for a `FromSource` vertex, once it can be known.
    fn derived_parallelism(&self) -> Option<u32> {
        let source = self.sources.get(&self.spec.parallelism_source?)?;
        match source.edge.data_movement {
            DataMovement::OneToOne => source.parallelism,
            DataMovement::Broadcast | DataMovement::ScatterGather => self.announced_partitions,
        }
    }

    fn on_init(&mut self, ctx: &Context<'_>) -> Effects {
        if self.state != VertexState::New {
            return self.stale("init");
        }

        let mut fx = Effects::none();
        self.state = VertexState::Initializing;
        self.inited_at = Some(ctx.now);

        match self.spec.plan.parallelism {
            Parallelism::Fixed(n) => self.create_tasks(n, ctx, &mut fx),
            Parallelism::FromSource => match self.derived_parallelism() {
                Some(n) => self.create_tasks(n, ctx, &mut fx),
                None => debug!(vertex = %self.id, "waiting for source to determine parallelism"),
            },
        }
        fx
    }

    /// A ONE_TO_ONE source whose task count differs from `n`.
    fn one_to_one_mismatch(&self, n: u32) -> Option<(VertexId, u32)> {
        self.sources
            .iter()
            .find_map(|(id, s)| match (s.edge.data_movement, s.parallelism) {
                (DataMovement::OneToOne, Some(theirs)) if theirs != n => Some((*id, theirs)),
                _ => None,
            })
    }

    fn create_tasks(&mut self, n: u32, ctx: &Context<'_>, fx: &mut Effects) {
        // Derived sources are only sized at runtime, so planning cannot
        // catch every mismatch.
        if let Some((source, theirs)) = self.one_to_one_mismatch(n) {
            error!(vertex = %self.id, %source, theirs, ours = n, "ONE_TO_ONE parallelism mismatch");
            self.diagnostics.push(Diagnostic::new(
                FailureKind::InternalInvariant,
                self.id,
                format!("ONE_TO_ONE source {source} has {theirs} tasks but this vertex has {n}"),
            ));
            fx.extend(self.on_terminate(TerminationReason::InternalError, ctx));
            return;
        }

        info!(vertex = %self.id, name = %self.name(), parallelism = n, "vertex initialized");
        self.parallelism = Some(n);
        self.state = VertexState::Inited;

        for index in 0..n {
            let task = self.id.task(index);
            self.tasks.push(task);
            self.task_states.insert(task, TaskState::New);
            fx.emit(Event::Task(
                task,
                TaskEvent::Create(Box::new(self.task_spec(index))),
            ));
        }

        for dst in &self.spec.destinations {
            fx.emit(Event::Vertex(
                dst.vertex,
                VertexEvent::SourceInited {
                    source: self.id,
                    parallelism: n,
                },
            ));
        }

        if n == 0 {
            self.finish(VertexState::Succeeded, ctx, fx);
        } else {
            self.try_start(ctx, fx);
        }
    }

    fn try_start(&mut self, ctx: &Context<'_>, fx: &mut Effects) {
        if self.state != VertexState::Inited || !self.is_ready() {
            return;
        }

        info!(vertex = %self.id, name = %self.name(), tasks = self.tasks.len(), "vertex running");
        self.state = VertexState::Running;
        self.started_at = Some(ctx.now);

        for task in &self.tasks {
            fx.emit(Event::Task(*task, TaskEvent::Schedule));
        }
        for dst in &self.spec.destinations {
            fx.emit(Event::Vertex(
                dst.vertex,
                VertexEvent::SourceRunning { source: self.id },
            ));
        }
    }

    fn on_source_inited(&mut self, source: VertexId, parallelism: u32, ctx: &Context<'_>) -> Effects {
        let Some(status) = self.sources.get_mut(&source) else {
            return self.stale("source_inited");
        };
        status.parallelism = Some(parallelism);
        status.progress = status.progress.max(SourceProgress::Inited);

        let mut fx = Effects::none();
        match self.state {
            VertexState::New
                if self
                    .sources
                    .values()
                    .all(|s| s.progress >= SourceProgress::Inited) =>
            {
                fx.extend(self.on_init(ctx));
            }
            VertexState::Initializing => {
                if let Some(n) = self.derived_parallelism() {
                    self.create_tasks(n, ctx, &mut fx);
                }
            }
            _ => {}
        }
        fx
    }

    fn on_source_running(&mut self, source: VertexId, ctx: &Context<'_>) -> Effects {
        let Some(status) = self.sources.get_mut(&source) else {
            return self.stale("source_running");
        };
        status.progress = status.progress.max(SourceProgress::Running);

        let mut fx = Effects::none();
        self.try_start(ctx, &mut fx);
        fx
    }

    fn on_source_parallelism(&mut self, source: VertexId, partitions: u32, ctx: &Context<'_>) -> Effects {
        if self.spec.parallelism_source != Some(source) || self.announced_partitions.is_some() {
            return self.stale("source_parallelism");
        }
        debug!(vertex = %self.id, %source, partitions, "parallelism announced by source");
        self.announced_partitions = Some(partitions);

        let mut fx = Effects::none();
        if self.state == VertexState::Initializing {
            self.create_tasks(partitions, ctx, &mut fx);
        }
        fx
    }

    fn on_upstream_completed(&mut self, source: VertexId, outcome: VertexState, ctx: &Context<'_>) -> Effects {
        let Some(status) = self.sources.get_mut(&source) else {
            return self.stale("upstream_vertex_completed");
        };

        let mut fx = Effects::none();
        if outcome == VertexState::Succeeded {
            status.progress = SourceProgress::Succeeded;
            self.try_start(ctx, &mut fx);
            return fx;
        }

        status.progress = SourceProgress::Lost;
        if self.state.is_terminal() {
            return fx;
        }
        info!(vertex = %self.id, %source, %outcome, "source vertex did not succeed; terminating");
        self.diagnostics.push(Diagnostic::new(
            FailureKind::UpstreamFailed,
            self.id,
            format!("source vertex {source} ended {outcome}"),
        ));
        fx.extend(self.on_terminate(TerminationReason::UpstreamFailed, ctx));
        fx
    }

    fn on_task_completed(
        &mut self,
        task: TaskId,
        outcome: TaskState,
        duration: Option<TimeDelta>,
        counters: Counters,
        diagnostics: Vec<Diagnostic>,
        ctx: &Context<'_>,
    ) -> Effects {
        let previous = self.task_states.get(&task).copied();
        if self.state.is_terminal() || previous.is_none_or(|s| s.is_terminal()) {
            return self.stale("task_completed");
        }
        self.task_states.insert(task, outcome);

        let mut fx = Effects::none();
        match outcome {
            TaskState::Succeeded => {
                self.succeeded_tasks += 1;
                if let Some(d) = duration {
                    self.task_durations.push(d);
                }
                if let Some(&p) = counters.get(OUTPUT_PARTITIONS_COUNTER) {
                    let p = u32::try_from(p.max(0)).unwrap_or(u32::MAX);
                    self.reported_partitions = Some(self.reported_partitions.map_or(p, |r| r.max(p)));
                }
                self.announce_parallelism(ctx, &mut fx);
            }
            TaskState::Failed => {
                self.failed_tasks += 1;
                self.diagnostics.extend(diagnostics);
                if self.failed_tasks > self.spec.plan.max_failed_tasks
                    && self.termination.is_none()
                {
                    warn!(
                        vertex = %self.id,
                        failed_tasks = self.failed_tasks,
                        "too many failed tasks; failing vertex"
                    );
                    fx.extend(self.on_terminate(TerminationReason::OwnTaskFailed, ctx));
                    return fx;
                }
            }
            TaskState::Killed => self.killed_tasks += 1,
            TaskState::New | TaskState::Scheduled | TaskState::Running => {}
        }

        self.check_completion(ctx, &mut fx);
        fx
    }

    fn announce_parallelism(&mut self, ctx: &Context<'_>, fx: &mut Effects) {
        if self.parallelism_announced
            || !self.spec.destinations.iter().any(|d| d.sizes_destination)
        {
            return;
        }
        let n = self.parallelism.unwrap_or(0);
        let threshold = ctx.config.dynamic_parallelism_threshold.clamp(0.0, 1.0);
        // Never fewer than one completed task, whatever the threshold.
        let needed = ((threshold * n as f64).ceil() as u32).max(1);
        if self.succeeded_tasks < needed {
            return;
        }
        self.publish_partitions(fx);
    }

    fn publish_partitions(&mut self, fx: &mut Effects) {
        if self.parallelism_announced {
            return;
        }
        self.parallelism_announced = true;
        let n = self.parallelism.unwrap_or(0);

        let partitions = self
            .reported_partitions
            .or(self.spec.plan.output_partitions)
            .unwrap_or(n);
        for dst in self.spec.destinations.iter().filter(|d| d.sizes_destination) {
            fx.emit(Event::Vertex(
                dst.vertex,
                VertexEvent::SourceParallelism {
                    source: self.id,
                    partitions,
                },
            ));
        }
    }

    fn check_completion(&mut self, ctx: &Context<'_>, fx: &mut Effects) {
        if !self.all_tasks_terminal() {
            return;
        }

        match self.state {
            VertexState::Terminating => {
                let outcome = self
                    .termination
                    .map_or(VertexState::Killed, |r| r.vertex_outcome());
                self.finish(outcome, ctx, fx);
            }
            VertexState::Running => {
                if self.failed_tasks > self.spec.plan.max_failed_tasks {
                    self.finish(VertexState::Failed, ctx, fx);
                } else if let Some(commit) = self.spec.plan.commit.clone() {
                    info!(vertex = %self.id, name = %self.name(), "committing vertex output");
                    self.state = VertexState::Committing;
                    fx.command(CoreCommand::CommitVertexOutput {
                        vertex: self.id,
                        vertex_name: self.name().to_string(),
                        commit,
                    });
                } else {
                    self.finish(VertexState::Succeeded, ctx, fx);
                }
            }
            _ => {}
        }
    }

    fn on_attempt_completed(&mut self, outcome: AttemptState) -> Effects {
        match outcome {
            AttemptState::Failed => self.failed_attempts += 1,
            AttemptState::Killed => self.killed_attempts += 1,
            _ => {}
        }
        Effects::none()
    }

    fn on_check_speculation(&mut self, ctx: &Context<'_>) -> Effects {
        let speculation = &ctx.config.speculation;
        if self.state != VertexState::Running
            || !speculation.enabled
            || !self.spec.plan.speculation
            || self.task_durations.is_empty()
        {
            return Effects::none();
        }

        let n = self.parallelism.unwrap_or(0) as f64;
        if (self.succeeded_tasks as f64) < speculation.min_completed_fraction * n {
            return Effects::none();
        }

        let total: TimeDelta = self.task_durations.iter().copied().sum();
        let mean_ms = total.num_milliseconds() as f64 / self.task_durations.len() as f64;
        let threshold = TimeDelta::milliseconds((mean_ms * speculation.slow_task_factor) as i64);

        let mut fx = Effects::none();
        for (task, state) in &self.task_states {
            if !state.is_terminal() {
                fx.emit(Event::Task(*task, TaskEvent::SpeculateIfSlow { threshold }));
            }
        }
        fx
    }

    fn on_commit_completed(&mut self, result: Result<(), String>, ctx: &Context<'_>) -> Effects {
        if self.state != VertexState::Committing {
            return self.stale("commit_completed");
        }

        let mut fx = Effects::none();
        match result {
            Ok(()) => self.finish(VertexState::Succeeded, ctx, &mut fx),
            Err(message) => {
                warn!(vertex = %self.id, %message, "vertex commit failed");
                self.termination = Some(TerminationReason::CommitFailed);
                self.diagnostics.push(Diagnostic::new(FailureKind::Commit, self.id, message));
                self.finish(VertexState::Failed, ctx, &mut fx);
            }
        }
        fx
    }

    fn on_terminate(&mut self, reason: TerminationReason, ctx: &Context<'_>) -> Effects {
        if self.state.is_terminal() {
            return self.stale("terminate");
        }
        if self.termination.is_none() {
            self.termination = Some(reason);
        }

        let mut fx = Effects::none();
        if self.state == VertexState::Committing {
            self.finish(reason.vertex_outcome(), ctx, &mut fx);
            return fx;
        }

        debug!(vertex = %self.id, %reason, "terminating vertex");
        self.state = VertexState::Terminating;
        for (task, state) in &self.task_states {
            if !state.is_terminal() {
                fx.emit(Event::Task(*task, TaskEvent::Terminate(reason)));
            }
        }
        self.check_completion(ctx, &mut fx);
        fx
    }

    fn finish(&mut self, outcome: VertexState, ctx: &Context<'_>, fx: &mut Effects) {
        self.state = outcome;
        self.finished_at = Some(ctx.now);

        // Destinations sized by this vertex must not wait forever on a
        // vertex that finished below the threshold (e.g. with zero tasks).
        if outcome == VertexState::Succeeded {
            self.publish_partitions(fx);
        }

        if outcome.is_failure() {
            let message = match self.termination {
                Some(TerminationReason::CommitFailed) => "output commit failed".to_string(),
                Some(TerminationReason::InternalError) => "internal error".to_string(),
                _ => format!(
                    "{} of {} tasks failed",
                    self.failed_tasks,
                    self.parallelism.unwrap_or(0)
                ),
            };
            let kind = self
                .diagnostics
                .first()
                .map_or(FailureKind::InternalInvariant, |d| d.kind);
            self.diagnostics.insert(
                0,
                Diagnostic::new(kind, self.id, format!("vertex '{}' failed: {message}", self.name())),
            );
        }

        info!(vertex = %self.id, name = %self.name(), state = %outcome, "vertex finished");

        fx.emit(Event::Dag(
            self.id.dag(),
            DagEvent::VertexCompleted {
                vertex: self.id,
                outcome,
                diagnostics: if outcome.is_failure() {
                    self.diagnostics.clone()
                } else {
                    Vec::new()
                },
            },
        ));
        for dst in &self.spec.destinations {
            fx.emit(Event::Vertex(
                dst.vertex,
                VertexEvent::UpstreamVertexCompleted {
                    source: self.id,
                    outcome,
                },
            ));
        }
    }

    fn stale(&self, event: &str) -> Effects {
        debug!(vertex = %self.id, state = %self.state, event, "dropping stale vertex event");
        Effects::dropped()
    }
}

impl StateMachine for Vertex {
    type State = VertexState;
    type Event = VertexEvent;

    fn state(&self) -> VertexState {
        self.state
    }

    fn last_diagnostic(&self) -> Option<&Diagnostic> {
        self.diagnostics.first()
    }

    fn handle(&mut self, event: VertexEvent, ctx: &Context<'_>) -> Effects {
        match event {
            VertexEvent::Create(_) => Effects::none(),
            VertexEvent::Init => self.on_init(ctx),
            VertexEvent::SourceInited { source, parallelism } => {
                self.on_source_inited(source, parallelism, ctx)
            }
            VertexEvent::SourceRunning { source } => self.on_source_running(source, ctx),
            VertexEvent::SourceParallelism { source, partitions } => {
                self.on_source_parallelism(source, partitions, ctx)
            }
            VertexEvent::UpstreamVertexCompleted { source, outcome } => {
                self.on_upstream_completed(source, outcome, ctx)
            }
            VertexEvent::StartScheduling => {
                let mut fx = Effects::none();
                self.try_start(ctx, &mut fx);
                fx
            }
            VertexEvent::TaskCompleted {
                task,
                outcome,
                attempt: _,
                duration,
                counters,
                diagnostics,
            } => self.on_task_completed(task, outcome, duration, counters, diagnostics, ctx),
            VertexEvent::AttemptCompleted { attempt: _, outcome } => {
                self.on_attempt_completed(outcome)
            }
            VertexEvent::CheckSpeculation => self.on_check_speculation(ctx),
            VertexEvent::CommitCompleted { result } => self.on_commit_completed(result, ctx),
            VertexEvent::Terminate(reason) => self.on_terminate(reason, ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::options::EngineConfig;
    use crate::ids::DagId;

    fn ids() -> (VertexId, VertexId) {
        let dag = DagId::new(1, 1);
        (dag.vertex(0), dag.vertex(1))
    }

    fn spec_with_source(scheduling: SchedulingPolicy, plan: VertexPlan) -> VertexSpec {
        let (src, _) = ids();
        VertexSpec {
            index: 1,
            dag_name: "d".to_string(),
            plan,
            sources: vec![SourceEdge {
                vertex: src,
                name: "src".to_string(),
                data_movement: DataMovement::ScatterGather,
                scheduling,
            }],
            destinations: Vec::new(),
            depth: 1,
            parallelism_source: Some(src),
        }
    }

    fn scheduled_tasks(fx: &Effects) -> usize {
        fx.events
            .iter()
            .filter(|e| matches!(e, Event::Task(_, TaskEvent::Schedule)))
            .count()
    }

    #[test]
    fn sequential_edge_waits_for_source_success() {
        let config = EngineConfig::default();
        let ctx = Context::new(Utc::now(), &config);
        let (src, dst) = ids();
        let mut v = Vertex::new(
            dst,
            spec_with_source(SchedulingPolicy::Sequential, VertexPlan::fixed("dst", 2)),
        );

        v.handle(VertexEvent::SourceInited { source: src, parallelism: 2 }, &ctx);
        assert_eq!(v.state, VertexState::Inited);

        let fx = v.handle(VertexEvent::SourceRunning { source: src }, &ctx);
        assert_eq!(scheduled_tasks(&fx), 0);
        assert_eq!(v.state, VertexState::Inited);

        let fx = v.handle(
            VertexEvent::UpstreamVertexCompleted {
                source: src,
                outcome: VertexState::Succeeded,
            },
            &ctx,
        );
        assert_eq!(scheduled_tasks(&fx), 2);
        assert_eq!(v.state, VertexState::Running);
    }

    #[test]
    fn concurrent_edge_starts_once_source_runs() {
        let config = EngineConfig::default();
        let ctx = Context::new(Utc::now(), &config);
        let (src, dst) = ids();
        let mut v = Vertex::new(
            dst,
            spec_with_source(SchedulingPolicy::Concurrent, VertexPlan::fixed("dst", 3)),
        );

        v.handle(VertexEvent::SourceInited { source: src, parallelism: 1 }, &ctx);
        let fx = v.handle(VertexEvent::SourceRunning { source: src }, &ctx);
        assert_eq!(scheduled_tasks(&fx), 3);
        assert_eq!(v.state, VertexState::Running);
    }

    #[test]
    fn derived_parallelism_waits_for_announcement() {
        let config = EngineConfig::default();
        let ctx = Context::new(Utc::now(), &config);
        let (src, dst) = ids();
        let mut v = Vertex::new(
            dst,
            spec_with_source(
                SchedulingPolicy::Sequential,
                VertexPlan::new("dst", Parallelism::FromSource),
            ),
        );

        v.handle(VertexEvent::SourceInited { source: src, parallelism: 4 }, &ctx);
        assert_eq!(v.state, VertexState::Initializing);
        assert!(v.tasks.is_empty());

        v.handle(
            VertexEvent::SourceParallelism {
                source: src,
                partitions: 7,
            },
            &ctx,
        );
        assert_eq!(v.state, VertexState::Inited);
        assert_eq!(v.parallelism, Some(7));
        assert_eq!(v.tasks.len(), 7);
    }

    #[test]
    fn zero_tasks_succeeds_on_init() {
        let config = EngineConfig::default();
        let ctx = Context::new(Utc::now(), &config);
        let (root, _) = ids();
        let mut v = Vertex::new(
            root,
            VertexSpec {
                index: 0,
                dag_name: "d".to_string(),
                plan: VertexPlan::fixed("empty", 0),
                sources: Vec::new(),
                destinations: Vec::new(),
                depth: 0,
                parallelism_source: None,
            },
        );

        let fx = v.handle(VertexEvent::Init, &ctx);
        assert_eq!(v.state, VertexState::Succeeded);
        assert!(fx.events.iter().any(|e| matches!(
            e,
            Event::Dag(_, DagEvent::VertexCompleted { outcome: VertexState::Succeeded, .. })
        )));
    }

    #[test]
    fn failed_source_kills_unscheduled_vertex() {
        let config = EngineConfig::default();
        let ctx = Context::new(Utc::now(), &config);
        let (src, dst) = ids();
        let mut v = Vertex::new(
            dst,
            spec_with_source(SchedulingPolicy::Sequential, VertexPlan::fixed("dst", 2)),
        );
        v.handle(VertexEvent::SourceInited { source: src, parallelism: 2 }, &ctx);

        let fx = v.handle(
            VertexEvent::UpstreamVertexCompleted {
                source: src,
                outcome: VertexState::Failed,
            },
            &ctx,
        );
        assert_eq!(v.state, VertexState::Terminating);
        let terminates: Vec<_> = fx
            .events
            .iter()
            .filter(|e| matches!(e, Event::Task(_, TaskEvent::Terminate(_))))
            .collect();
        assert_eq!(terminates.len(), 2);

        for task in v.tasks.clone() {
            v.handle(
                VertexEvent::TaskCompleted {
                    task,
                    outcome: TaskState::Killed,
                    attempt: None,
                    duration: None,
                    counters: Counters::new(),
                    diagnostics: Vec::new(),
                },
                &ctx,
            );
        }
        assert_eq!(v.state, VertexState::Killed);
    }

    #[test]
    fn failed_commit_fails_vertex() {
        let config = EngineConfig::default();
        let ctx = Context::new(Utc::now(), &config);
        let (root, _) = ids();
        let mut plan = VertexPlan::fixed("out", 1);
        plan.commit = Some(crate::dag::CommitSpec {
            command: "false".to_string(),
        });
        let mut v = Vertex::new(
            root,
            VertexSpec {
                index: 0,
                dag_name: "d".to_string(),
                plan,
                sources: Vec::new(),
                destinations: Vec::new(),
                depth: 0,
                parallelism_source: None,
            },
        );
        v.handle(VertexEvent::Init, &ctx);
        let task = v.tasks[0];
        let fx = v.handle(
            VertexEvent::TaskCompleted {
                task,
                outcome: TaskState::Succeeded,
                attempt: None,
                duration: None,
                counters: Counters::new(),
                diagnostics: Vec::new(),
            },
            &ctx,
        );
        assert_eq!(v.state, VertexState::Committing);
        assert!(
            fx.commands
                .iter()
                .any(|c| matches!(c, CoreCommand::CommitVertexOutput { .. }))
        );

        v.handle(
            VertexEvent::CommitCompleted {
                result: Err("disk full".to_string()),
            },
            &ctx,
        );
        assert_eq!(v.state, VertexState::Failed);
        assert_eq!(v.diagnostics.last().map(|d| d.kind), Some(FailureKind::Commit));
    }
}
