// src/state/task.rs

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::engine::event::{
    AttemptEvent, Context, Effects, Event, LaunchSpec, SchedulerEvent, TaskEvent, VertexEvent,
};
use crate::ids::{AttemptId, TaskId};
use crate::state::{Diagnostic, FailureKind, StateMachine, TaskState, TerminationReason};
use crate::types::{Counters, ResourceSpec};

/// Inputs a task is created with, copied from its vertex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub index: u32,
    pub dag_name: String,
    pub vertex_name: String,
    pub command: Option<String>,
    pub resource: ResourceSpec,
    pub max_failed_attempts: u32,
    pub speculation: bool,
    /// Scheduling priority; lower runs first.
    pub priority: u32,
}

/// One unit of parallel work in a vertex.
///
/// A task owns its attempts. Outside a speculation window at most one
/// attempt is live; during one, exactly two are.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub state: TaskState,
    pub spec: TaskSpec,
    /// Every attempt created, in creation order.
    pub attempts: Vec<AttemptId>,
    /// Attempts not yet known to be terminal.
    pub live: BTreeSet<AttemptId>,
    /// Launch time of live attempts that reached RUNNING.
    pub running_since: BTreeMap<AttemptId, DateTime<Utc>>,
    pub failed_attempts: u32,
    pub killed_attempts: u32,
    pub successful_attempt: Option<AttemptId>,
    pub speculated: bool,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Chain of failures, outermost first.
    pub diagnostics: Vec<Diagnostic>,
}

impl Task {
    pub fn new(id: TaskId, spec: TaskSpec) -> Self {
        Self {
            id,
            state: TaskState::New,
            spec,
            attempts: Vec::new(),
            live: BTreeSet::new(),
            running_since: BTreeMap::new(),
            failed_attempts: 0,
            killed_attempts: 0,
            successful_attempt: None,
            speculated: false,
            scheduled_at: None,
            finished_at: None,
            diagnostics: Vec::new(),
        }
    }

    /// Spec of the attempt with the given sequence number.
    pub fn attempt_spec(&self, seq: u32, speculative: bool) -> LaunchSpec {
        LaunchSpec {
            dag_name: self.spec.dag_name.clone(),
            vertex_name: self.spec.vertex_name.clone(),
            task_index: self.spec.index,
            attempt_number: seq,
            command: self.spec.command.clone(),
            resource: self.spec.resource,
            speculative,
        }
    }

    fn spawn_attempt(&mut self, speculative: bool, fx: &mut Effects) -> AttemptId {
        let seq = self.attempts.len() as u32;
        let attempt = self.id.attempt(seq);
        self.attempts.push(attempt);
        self.live.insert(attempt);

        fx.emit(Event::Attempt(
            attempt,
            AttemptEvent::Create(Box::new(self.attempt_spec(seq, speculative))),
        ));
        fx.emit(Event::Scheduler(
            self.id.dag(),
            SchedulerEvent::Schedule {
                attempt,
                resource: self.spec.resource,
                priority: self.spec.priority,
            },
        ));
        attempt
    }

    fn on_schedule(&mut self, ctx: &Context<'_>) -> Effects {
        if self.state != TaskState::New {
            return self.stale("schedule");
        }
        let mut fx = Effects::none();
        self.state = TaskState::Scheduled;
        self.scheduled_at = Some(ctx.now);
        let attempt = self.spawn_attempt(false, &mut fx);
        debug!(task = %self.id, %attempt, "task scheduled");
        fx
    }

    fn on_attempt_launched(&mut self, attempt: AttemptId, at: DateTime<Utc>) -> Effects {
        if !self.live.contains(&attempt) {
            return self.stale("attempt_launched");
        }
        self.running_since.insert(attempt, at);
        if self.state == TaskState::Scheduled {
            self.state = TaskState::Running;
        }
        Effects::none()
    }

    fn on_attempt_succeeded(
        &mut self,
        attempt: AttemptId,
        counters: Counters,
        duration: Option<TimeDelta>,
        ctx: &Context<'_>,
    ) -> Effects {
        self.live.remove(&attempt);
        self.running_since.remove(&attempt);

        if self.state.is_terminal() {
            debug!(task = %self.id, %attempt, state = %self.state, "late success ignored");
            return Effects::none();
        }

        info!(task = %self.id, %attempt, "task succeeded");
        self.state = TaskState::Succeeded;
        self.successful_attempt = Some(attempt);
        self.finished_at = Some(ctx.now);

        let mut fx = Effects::none();
        self.terminate_live(TerminationReason::TaskSucceeded, &mut fx);
        fx.emit(Event::Vertex(
            self.id.vertex(),
            VertexEvent::TaskCompleted {
                task: self.id,
                outcome: TaskState::Succeeded,
                attempt: Some(attempt),
                duration,
                counters,
                diagnostics: Vec::new(),
            },
        ));
        fx
    }

    fn on_attempt_failed(
        &mut self,
        attempt: AttemptId,
        diagnostic: Diagnostic,
        ctx: &Context<'_>,
    ) -> Effects {
        self.live.remove(&attempt);
        self.running_since.remove(&attempt);
        self.failed_attempts += 1;

        if self.state.is_terminal() {
            return Effects::none();
        }

        let kind = diagnostic.kind;
        self.diagnostics.push(diagnostic);

        let mut fx = Effects::none();
        if self.failed_attempts > self.spec.max_failed_attempts {
            warn!(
                task = %self.id,
                failed_attempts = self.failed_attempts,
                "task failed; attempt budget exhausted"
            );
            self.state = TaskState::Failed;
            self.finished_at = Some(ctx.now);
            self.diagnostics.insert(
                0,
                Diagnostic::new(
                    kind,
                    self.id,
                    format!("task failed after {} failed attempts", self.failed_attempts),
                ),
            );
            self.terminate_live(TerminationReason::TaskFailed, &mut fx);
            fx.emit(Event::Vertex(
                self.id.vertex(),
                VertexEvent::TaskCompleted {
                    task: self.id,
                    outcome: TaskState::Failed,
                    attempt: Some(attempt),
                    duration: None,
                    counters: Counters::new(),
                    diagnostics: self.diagnostics.clone(),
                },
            ));
        } else if self.live.is_empty() {
            let retry = self.spawn_attempt(false, &mut fx);
            info!(task = %self.id, failed = %attempt, %retry, "retrying task");
        }
        fx
    }

    fn on_attempt_killed(
        &mut self,
        attempt: AttemptId,
        reason: TerminationReason,
        ctx: &Context<'_>,
    ) -> Effects {
        self.live.remove(&attempt);
        self.running_since.remove(&attempt);
        self.killed_attempts += 1;

        if self.state.is_terminal() || !self.live.is_empty() {
            return Effects::none();
        }

        if !reason.allows_reschedule() {
            // The last attempt was killed from outside the task; so is the task.
            return self.on_terminate(reason, ctx);
        }

        let mut fx = Effects::none();
        let retry = self.spawn_attempt(false, &mut fx);
        info!(task = %self.id, killed = %attempt, %reason, %retry, "rescheduling killed attempt");
        fx
    }

    fn on_speculate_if_slow(&mut self, threshold: TimeDelta, ctx: &Context<'_>) -> Effects {
        if self.state != TaskState::Running
            || !self.spec.speculation
            || !ctx.config.speculation.enabled
            || self.speculated
            || self.live.len() != 1
        {
            return Effects::none();
        }

        let Some((&running, &since)) = self.running_since.iter().next() else {
            return Effects::none();
        };
        if ctx.now - since <= threshold {
            return Effects::none();
        }

        let mut fx = Effects::none();
        self.speculated = true;
        let spare = self.spawn_attempt(true, &mut fx);
        info!(
            task = %self.id,
            %running,
            speculative = %spare,
            "attempt running slower than peers; launching speculative attempt"
        );
        fx
    }

    fn on_terminate(&mut self, reason: TerminationReason, ctx: &Context<'_>) -> Effects {
        if self.state.is_terminal() {
            return self.stale("terminate");
        }

        debug!(task = %self.id, %reason, state = %self.state, "killing task");
        self.state = TaskState::Killed;
        self.finished_at = Some(ctx.now);
        self.diagnostics.insert(
            0,
            Diagnostic::new(FailureKind::Killed, self.id, format!("task killed: {reason}")),
        );

        let mut fx = Effects::none();
        self.terminate_live(reason, &mut fx);
        fx.emit(Event::Vertex(
            self.id.vertex(),
            VertexEvent::TaskCompleted {
                task: self.id,
                outcome: TaskState::Killed,
                attempt: None,
                duration: None,
                counters: Counters::new(),
                diagnostics: Vec::new(),
            },
        ));
        fx
    }

    fn terminate_live(&self, reason: TerminationReason, fx: &mut Effects) {
        for attempt in &self.live {
            fx.emit(Event::Attempt(*attempt, AttemptEvent::Terminate(reason)));
        }
    }

    fn stale(&self, event: &str) -> Effects {
        debug!(task = %self.id, state = %self.state, event, "dropping stale task event");
        Effects::dropped()
    }
}

impl StateMachine for Task {
    type State = TaskState;
    type Event = TaskEvent;

    fn state(&self) -> TaskState {
        self.state
    }

    fn last_diagnostic(&self) -> Option<&Diagnostic> {
        self.diagnostics.first()
    }

    fn handle(&mut self, event: TaskEvent, ctx: &Context<'_>) -> Effects {
        match event {
            TaskEvent::Create(_) => Effects::none(),
            TaskEvent::Schedule => self.on_schedule(ctx),
            TaskEvent::AttemptLaunched { attempt, at } => self.on_attempt_launched(attempt, at),
            TaskEvent::AttemptSucceeded {
                attempt,
                counters,
                duration,
            } => self.on_attempt_succeeded(attempt, counters, duration, ctx),
            TaskEvent::AttemptFailed {
                attempt,
                diagnostic,
            } => self.on_attempt_failed(attempt, diagnostic, ctx),
            TaskEvent::AttemptKilled { attempt, reason } => {
                self.on_attempt_killed(attempt, reason, ctx)
            }
            TaskEvent::SpeculateIfSlow { threshold } => self.on_speculate_if_slow(threshold, ctx),
            TaskEvent::Terminate(reason) => self.on_terminate(reason, ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::options::EngineConfig;
    use crate::ids::DagId;

    fn task(max_failed_attempts: u32, speculation: bool) -> Task {
        let id = DagId::new(1, 1).vertex(0).task(0);
        Task::new(
            id,
            TaskSpec {
                index: 0,
                dag_name: "d".to_string(),
                vertex_name: "v".to_string(),
                command: None,
                resource: ResourceSpec::default(),
                max_failed_attempts,
                speculation,
                priority: 0,
            },
        )
    }

    fn failure(attempt: AttemptId) -> TaskEvent {
        TaskEvent::AttemptFailed {
            attempt,
            diagnostic: Diagnostic::new(FailureKind::WorkerExecution, attempt, "boom"),
        }
    }

    fn created_attempts(fx: &Effects) -> Vec<AttemptId> {
        fx.events
            .iter()
            .filter_map(|e| match e {
                Event::Attempt(id, AttemptEvent::Create(_)) => Some(*id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn retries_until_budget_is_exhausted() {
        let config = EngineConfig::default();
        let ctx = Context::new(Utc::now(), &config);
        let mut t = task(1, false);

        let fx = t.handle(TaskEvent::Schedule, &ctx);
        let first = created_attempts(&fx)[0];

        let fx = t.handle(failure(first), &ctx);
        let second = created_attempts(&fx);
        assert_eq!(second.len(), 1);
        assert_eq!(t.state, TaskState::Scheduled);

        let fx = t.handle(failure(second[0]), &ctx);
        assert_eq!(t.state, TaskState::Failed);
        assert!(created_attempts(&fx).is_empty());
        assert_eq!(t.attempts.len(), 2);
        assert_eq!(t.diagnostics.len(), 3);
    }

    #[test]
    fn preempted_kill_reschedules_without_charging_budget() {
        let config = EngineConfig::default();
        let ctx = Context::new(Utc::now(), &config);
        let mut t = task(0, false);

        let fx = t.handle(TaskEvent::Schedule, &ctx);
        let first = created_attempts(&fx)[0];
        let fx = t.handle(
            TaskEvent::AttemptKilled {
                attempt: first,
                reason: TerminationReason::Preempted,
            },
            &ctx,
        );
        assert_eq!(created_attempts(&fx).len(), 1);
        assert_eq!(t.failed_attempts, 0);
        assert!(!t.state.is_terminal());
    }

    #[test]
    fn other_kills_end_the_task() {
        let config = EngineConfig::default();
        let ctx = Context::new(Utc::now(), &config);
        let mut t = task(3, false);

        let fx = t.handle(TaskEvent::Schedule, &ctx);
        let first = created_attempts(&fx)[0];
        let fx = t.handle(
            TaskEvent::AttemptKilled {
                attempt: first,
                reason: TerminationReason::DagKilled,
            },
            &ctx,
        );
        assert!(created_attempts(&fx).is_empty());
        assert_eq!(t.state, TaskState::Killed);
        assert!(fx.events.iter().any(|e| matches!(
            e,
            Event::Vertex(_, VertexEvent::TaskCompleted { outcome: TaskState::Killed, .. })
        )));
    }

    #[test]
    fn speculation_launches_one_spare_attempt_for_slow_runner() {
        let mut config = EngineConfig::default();
        config.speculation.enabled = true;
        let start = Utc::now();
        let ctx = Context::new(start, &config);
        let mut t = task(3, true);

        let fx = t.handle(TaskEvent::Schedule, &ctx);
        let first = created_attempts(&fx)[0];
        t.handle(
            TaskEvent::AttemptLaunched {
                attempt: first,
                at: start,
            },
            &ctx,
        );

        let early = Context::new(start + TimeDelta::seconds(5), &config);
        let fx = t.handle(
            TaskEvent::SpeculateIfSlow {
                threshold: TimeDelta::seconds(10),
            },
            &early,
        );
        assert!(created_attempts(&fx).is_empty());

        let late = Context::new(start + TimeDelta::seconds(11), &config);
        let fx = t.handle(
            TaskEvent::SpeculateIfSlow {
                threshold: TimeDelta::seconds(10),
            },
            &late,
        );
        assert_eq!(created_attempts(&fx).len(), 1);
        assert_eq!(t.live.len(), 2);

        // Never more than one spare.
        let fx = t.handle(
            TaskEvent::SpeculateIfSlow {
                threshold: TimeDelta::seconds(10),
            },
            &late,
        );
        assert!(created_attempts(&fx).is_empty());
    }

    #[test]
    fn first_success_kills_the_other_live_attempt() {
        let mut config = EngineConfig::default();
        config.speculation.enabled = true;
        let start = Utc::now();
        let ctx = Context::new(start, &config);
        let mut t = task(3, true);

        let fx = t.handle(TaskEvent::Schedule, &ctx);
        let first = created_attempts(&fx)[0];
        t.handle(TaskEvent::AttemptLaunched { attempt: first, at: start }, &ctx);
        let late = Context::new(start + TimeDelta::seconds(60), &config);
        let fx = t.handle(
            TaskEvent::SpeculateIfSlow {
                threshold: TimeDelta::seconds(1),
            },
            &late,
        );
        let spare = created_attempts(&fx)[0];

        let fx = t.handle(
            TaskEvent::AttemptSucceeded {
                attempt: spare,
                counters: Counters::new(),
                duration: None,
            },
            &late,
        );
        assert_eq!(t.state, TaskState::Succeeded);
        assert_eq!(t.successful_attempt, Some(spare));
        assert!(fx.events.iter().any(|e| matches!(
            e,
            Event::Attempt(id, AttemptEvent::Terminate(TerminationReason::TaskSucceeded)) if *id == first
        )));
    }

    #[test]
    fn terminate_before_scheduling_kills_without_attempts() {
        let config = EngineConfig::default();
        let ctx = Context::new(Utc::now(), &config);
        let mut t = task(3, false);

        let fx = t.handle(TaskEvent::Terminate(TerminationReason::UpstreamFailed), &ctx);
        assert_eq!(t.state, TaskState::Killed);
        assert!(t.attempts.is_empty());
        assert!(fx.events.iter().any(|e| matches!(
            e,
            Event::Vertex(_, VertexEvent::TaskCompleted { outcome: TaskState::Killed, .. })
        )));
    }
}
