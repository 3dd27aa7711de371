// src/state/attempt.rs

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::engine::event::{
    AttemptEvent, Context, CoreCommand, Effects, Event, LaunchSpec, SchedulerEvent, TaskEvent,
    VertexEvent,
};
use crate::ids::{AttemptId, WorkerRef};
use crate::state::{AttemptState, Diagnostic, FailureKind, StateMachine, TerminationReason};
use crate::types::Counters;

/// Inputs an attempt is created with.
pub type AttemptSpec = LaunchSpec;

/// One execution of a task on one worker.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub id: AttemptId,
    pub state: AttemptState,
    pub spec: AttemptSpec,
    pub worker: Option<WorkerRef>,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub launched_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub progress: f32,
    pub last_status_at: Option<DateTime<Utc>>,
    pub counters: Counters,
    pub diagnostic: Option<Diagnostic>,
}

impl Attempt {
    pub fn new(id: AttemptId, spec: AttemptSpec, now: DateTime<Utc>) -> Self {
        Self {
            id,
            state: AttemptState::New,
            spec,
            worker: None,
            created_at: now,
            scheduled_at: None,
            launched_at: None,
            finished_at: None,
            progress: 0.0,
            last_status_at: None,
            counters: Counters::new(),
            diagnostic: None,
        }
    }

    /// Time from launch (or assignment, if never confirmed) to finish.
    pub fn duration(&self) -> Option<TimeDelta> {
        let start = self.launched_at.or(self.scheduled_at)?;
        self.finished_at.map(|end| end - start)
    }

    fn on_create(&mut self, ctx: &Context<'_>) -> Effects {
        let mut fx = Effects::none();
        fx.command(CoreCommand::StartSchedulingTimer {
            attempt: self.id,
            after: ctx.config.scheduling_timeout,
        });
        fx
    }

    fn on_worker_assigned(&mut self, worker: WorkerRef, ctx: &Context<'_>) -> Effects {
        if self.state != AttemptState::New {
            return self.stale("worker_assigned");
        }

        debug!(attempt = %self.id, %worker, "worker assigned; launching attempt");
        self.state = AttemptState::Scheduled;
        self.scheduled_at = Some(ctx.now);
        self.worker = Some(worker.clone());

        let mut fx = Effects::none();
        fx.command(CoreCommand::LaunchAttempt {
            attempt: self.id,
            worker,
            launch: self.spec.clone(),
        });
        fx
    }

    fn on_launch_confirmed(&mut self, ctx: &Context<'_>) -> Effects {
        if self.state != AttemptState::Scheduled {
            return self.stale("launch_confirmed");
        }

        self.state = AttemptState::Running;
        self.launched_at = Some(ctx.now);

        let mut fx = Effects::none();
        fx.emit(Event::Task(
            self.id.task(),
            TaskEvent::AttemptLaunched {
                attempt: self.id,
                at: ctx.now,
            },
        ));
        fx
    }

    fn on_status_update(&mut self, progress: f32, counters: Counters, ctx: &Context<'_>) -> Effects {
        if !matches!(self.state, AttemptState::Scheduled | AttemptState::Running) {
            return self.stale("status_update");
        }

        self.progress = progress.clamp(0.0, 1.0);
        self.counters.extend(counters);
        self.last_status_at = Some(ctx.now);
        Effects::none()
    }

    fn on_completed(
        &mut self,
        success: bool,
        message: Option<String>,
        counters: Counters,
        ctx: &Context<'_>,
    ) -> Effects {
        if !matches!(self.state, AttemptState::Scheduled | AttemptState::Running) {
            // Includes the losing attempt of a speculative race, which was
            // killed before its completion arrived.
            return self.stale("completed");
        }

        self.counters.extend(counters);
        self.finished_at = Some(ctx.now);

        let mut fx = Effects::none();
        fx.emit(Event::Scheduler(
            self.id.dag(),
            SchedulerEvent::AttemptEnded { attempt: self.id },
        ));

        if success {
            self.state = AttemptState::Succeeded;
            self.progress = 1.0;
            info!(attempt = %self.id, "attempt succeeded");
            fx.emit(self.accounting());
            fx.emit(Event::Task(
                self.id.task(),
                TaskEvent::AttemptSucceeded {
                    attempt: self.id,
                    counters: self.counters.clone(),
                    duration: self.duration(),
                },
            ));
        } else {
            let message = message.unwrap_or_else(|| "attempt exited unsuccessfully".to_string());
            warn!(attempt = %self.id, %message, "attempt failed");
            let diagnostic = Diagnostic::new(FailureKind::WorkerExecution, self.id, message);
            self.fail(diagnostic, &mut fx);
        }
        fx
    }

    fn on_scheduling_timeout(&mut self, ctx: &Context<'_>) -> Effects {
        if self.state != AttemptState::New {
            // The timer raced a worker assignment.
            return self.stale("scheduling_timeout");
        }

        warn!(
            attempt = %self.id,
            timeout = ?ctx.config.scheduling_timeout,
            "no worker assigned in time; failing attempt"
        );
        self.finished_at = Some(ctx.now);

        let mut fx = Effects::none();
        fx.emit(Event::Scheduler(
            self.id.dag(),
            SchedulerEvent::AttemptEnded { attempt: self.id },
        ));
        let diagnostic = Diagnostic::new(
            FailureKind::SchedulingTimeout,
            self.id,
            format!(
                "no worker assigned within {:?}",
                ctx.config.scheduling_timeout
            ),
        );
        self.fail(diagnostic, &mut fx);
        fx
    }

    fn on_terminate(&mut self, reason: TerminationReason, ctx: &Context<'_>) -> Effects {
        if self.state.is_terminal() {
            return self.stale("terminate");
        }

        debug!(attempt = %self.id, %reason, state = %self.state, "killing attempt");
        self.state = AttemptState::Killed;
        self.finished_at = Some(ctx.now);
        self.diagnostic = Some(Diagnostic::new(
            FailureKind::Killed,
            self.id,
            format!("attempt killed: {reason}"),
        ));

        let mut fx = Effects::none();
        if let Some(worker) = self.worker.clone() {
            fx.command(CoreCommand::CancelAttempt {
                attempt: self.id,
                worker,
            });
        }
        fx.emit(Event::Scheduler(
            self.id.dag(),
            SchedulerEvent::AttemptEnded { attempt: self.id },
        ));
        fx.emit(self.accounting());
        fx.emit(Event::Task(
            self.id.task(),
            TaskEvent::AttemptKilled {
                attempt: self.id,
                reason,
            },
        ));
        fx
    }

    fn fail(&mut self, diagnostic: Diagnostic, fx: &mut Effects) {
        self.state = AttemptState::Failed;
        self.diagnostic = Some(diagnostic.clone());
        fx.emit(self.accounting());
        fx.emit(Event::Task(
            self.id.task(),
            TaskEvent::AttemptFailed {
                attempt: self.id,
                diagnostic,
            },
        ));
    }

    fn accounting(&self) -> Event {
        Event::Vertex(
            self.id.vertex(),
            VertexEvent::AttemptCompleted {
                attempt: self.id,
                outcome: self.state,
            },
        )
    }

    fn stale(&self, event: &str) -> Effects {
        debug!(attempt = %self.id, state = %self.state, event, "dropping stale attempt event");
        Effects::dropped()
    }
}

impl StateMachine for Attempt {
    type State = AttemptState;
    type Event = AttemptEvent;

    fn state(&self) -> AttemptState {
        self.state
    }

    fn last_diagnostic(&self) -> Option<&Diagnostic> {
        self.diagnostic.as_ref()
    }

    fn handle(&mut self, event: AttemptEvent, ctx: &Context<'_>) -> Effects {
        match event {
            AttemptEvent::Create(_) => self.on_create(ctx),
            AttemptEvent::WorkerAssigned(worker) => self.on_worker_assigned(worker, ctx),
            AttemptEvent::LaunchConfirmed => self.on_launch_confirmed(ctx),
            AttemptEvent::StatusUpdate { progress, counters } => {
                self.on_status_update(progress, counters, ctx)
            }
            AttemptEvent::Completed {
                success,
                diagnostic,
                counters,
            } => self.on_completed(success, diagnostic, counters, ctx),
            AttemptEvent::SchedulingTimeout => self.on_scheduling_timeout(ctx),
            AttemptEvent::Terminate(reason) => self.on_terminate(reason, ctx),
        }
    }
}
