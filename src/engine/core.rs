// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - updated entity state in one [`DagRun`] arena per submitted DAG
//! - a list of [`CoreCommand`]s describing what the IO shell should do next
//!
//! Every external signal becomes exactly one entity event. That event and
//! everything it cascades into are processed to quiescence, in FIFO order,
//! before `step` returns. Two competing signals (for example two successful
//! completions of a speculative pair) are therefore resolved by the order
//! in which they were stepped: the first one processed wins.
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for
//! reading events from channels, talking to the cluster backend and
//! handling Ctrl-C. The core has no Tokio types and performs no IO besides
//! handing transition records to the history sink.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::dag::DagPlan;
use crate::engine::clock::{Clock, SystemClock};
use crate::engine::dispatcher::dispatch;
use crate::engine::event::{
    AttemptEvent, Context, CoreCommand, CoreStep, DagEvent, Event, SchedulerEvent, VertexEvent,
};
use crate::engine::options::EngineConfig;
use crate::engine::run::DagRun;
use crate::engine::status::{DagStatus, StateSnapshot};
use crate::engine::RuntimeEvent;
use crate::errors::{DagError, Result};
use crate::history::{HistorySink, NoopHistory, TransitionRecord};
use crate::ids::DagId;
use crate::state::TerminationReason;

/// Counters across every run of the core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub dags_submitted: u64,
    pub external_events: u64,
    pub events_processed: u64,
    /// Events whose target was unknown or did not accept them.
    pub dropped_events: u64,
    pub history_errors: u64,
}

/// Pure core runtime state.
#[derive(Debug)]
pub struct CoreRuntime {
    session: u64,
    config: EngineConfig,
    clock: Box<dyn Clock>,
    history: Box<dyn HistorySink>,
    pub(crate) runs: BTreeMap<DagId, DagRun>,
    next_dag_seq: u32,
    outbox: Vec<CoreCommand>,
    stats: EngineStats,
}

impl CoreRuntime {
    pub fn new(config: EngineConfig) -> Self {
        let clock: Box<dyn Clock> = Box::new(SystemClock);
        let session = clock.now().timestamp_millis().max(0) as u64;
        Self {
            session,
            config,
            clock,
            history: Box::new(NoopHistory),
            runs: BTreeMap::new(),
            next_dag_seq: 1,
            outbox: Vec::new(),
            stats: EngineStats::default(),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_history(mut self, history: impl HistorySink + 'static) -> Self {
        self.history = Box::new(history);
        self
    }

    pub fn with_session(mut self, session: u64) -> Self {
        self.session = session;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn run(&self, dag: DagId) -> Option<&DagRun> {
        self.runs.get(&dag)
    }

    pub fn dag_ids(&self) -> impl Iterator<Item = DagId> + '_ {
        self.runs.keys().copied()
    }

    /// True once every submitted DAG is terminal.
    pub fn all_finished(&self) -> bool {
        self.runs.values().all(DagRun::is_finished)
    }

    /// Commands produced outside of `step` (submission, kill, resume).
    pub fn take_commands(&mut self) -> Vec<CoreCommand> {
        std::mem::take(&mut self.outbox)
    }

    /// Validate a plan, create its run and start it.
    ///
    /// Commands the start produces are buffered; collect them with
    /// [`take_commands`](Self::take_commands).
    pub fn submit_dag(&mut self, plan: DagPlan) -> Result<DagId> {
        plan.validate()?;

        let id = DagId::new(self.session, self.next_dag_seq);
        self.next_dag_seq += 1;
        self.stats.dags_submitted += 1;

        info!(dag = %id, name = %plan.name, vertices = plan.vertices.len(), "DAG submitted");
        self.insert_run(id, plan);
        self.post(Event::Dag(id, DagEvent::Init));
        self.post(Event::Dag(id, DagEvent::Start));
        Ok(id)
    }

    fn insert_run(&mut self, id: DagId, plan: DagPlan) {
        let now = self.clock.now();
        let run = DagRun::new(id, plan, self.config.max_concurrent_workers, now);
        let record = TransitionRecord::new(id.into(), None, run.dag.state.to_string(), now, "submit");
        self.write_history(&record);
        self.adopt_run(run);
    }

    /// Take ownership of an already built run (used by recovery).
    pub(crate) fn adopt_run(&mut self, run: DagRun) {
        let id = run.id();
        if id.session == self.session {
            self.next_dag_seq = self.next_dag_seq.max(id.seq + 1);
        }
        self.runs.insert(id, run);
    }

    pub fn kill_dag(&mut self, dag: DagId) -> Result<()> {
        if !self.runs.contains_key(&dag) {
            return Err(DagError::DagNotFound(dag));
        }
        self.post(Event::Dag(dag, DagEvent::Kill));
        Ok(())
    }

    pub fn dag_status(&self, dag: DagId) -> Result<DagStatus> {
        self.runs
            .get(&dag)
            .map(DagRun::status)
            .ok_or(DagError::DagNotFound(dag))
    }

    pub fn snapshot(&self, dag: DagId) -> Result<StateSnapshot> {
        self.runs
            .get(&dag)
            .map(DagRun::snapshot)
            .ok_or(DagError::DagNotFound(dag))
    }

    /// Handle a single external signal and return the resulting commands.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        self.stats.external_events += 1;
        debug!(?event, "core received event");

        let mut keep_running = true;
        match event {
            RuntimeEvent::WorkerAllocated { attempt, worker } => self.post(Event::Scheduler(
                attempt.dag(),
                SchedulerEvent::WorkerAllocated { attempt, worker },
            )),
            RuntimeEvent::LaunchConfirmed { attempt } => {
                self.post(Event::Attempt(attempt, AttemptEvent::LaunchConfirmed))
            }
            RuntimeEvent::StatusUpdate {
                attempt,
                progress,
                counters,
            } => self.post(Event::Attempt(
                attempt,
                AttemptEvent::StatusUpdate { progress, counters },
            )),
            RuntimeEvent::Completed {
                attempt,
                success,
                diagnostic,
                counters,
            } => self.post(Event::Attempt(
                attempt,
                AttemptEvent::Completed {
                    success,
                    diagnostic,
                    counters,
                },
            )),
            RuntimeEvent::WorkerLost { attempt } => self.post(Event::Attempt(
                attempt,
                AttemptEvent::Terminate(TerminationReason::Preempted),
            )),
            RuntimeEvent::SchedulingTimeout { attempt } => {
                self.post(Event::Attempt(attempt, AttemptEvent::SchedulingTimeout))
            }
            RuntimeEvent::CommitFinished { vertex, result } => self.post(Event::Vertex(
                vertex,
                VertexEvent::CommitCompleted { result },
            )),
            RuntimeEvent::KillDag { dag } => {
                if let Err(err) = self.kill_dag(dag) {
                    warn!(%dag, error = %err, "kill requested for unknown DAG");
                }
            }
            RuntimeEvent::SpeculationTick => {
                let live: Vec<DagId> = self
                    .runs
                    .values()
                    .filter(|r| !r.is_finished())
                    .map(DagRun::id)
                    .collect();
                for dag in live {
                    self.post(Event::Dag(dag, DagEvent::SpeculationTick));
                }
            }
            RuntimeEvent::ShutdownRequested => keep_running = false,
        }

        CoreStep {
            commands: self.take_commands(),
            keep_running,
        }
    }

    /// Queue an event on its DAG and drain that DAG's queue.
    pub(crate) fn post(&mut self, event: Event) {
        let dag = event.dag();
        let Some(run) = self.runs.get_mut(&dag) else {
            warn!(%dag, ?event, "event for unknown DAG dropped");
            self.stats.dropped_events += 1;
            return;
        };
        run.queue.push(event);

        while let Some(event) = run.queue.pop() {
            let ctx = Context::new(self.clock.now(), &self.config);
            let mut records = Vec::new();
            let target = event.target();
            let fx = dispatch(run, event, &ctx, &mut records);

            self.stats.events_processed += 1;
            if fx.dropped {
                run.dropped_events += 1;
                self.stats.dropped_events += 1;
                debug!(
                    %dag,
                    target = ?target,
                    queued = run.queue.len(),
                    "event dropped by its target"
                );
            }
            run.queue.extend(fx.events);
            self.outbox.extend(fx.commands);

            for record in &records {
                if let Err(err) = self.history.record(record) {
                    self.stats.history_errors += 1;
                    warn!(error = %err, entity = %record.entity, "failed to write history record");
                }
            }
        }
    }

    fn write_history(&mut self, record: &TransitionRecord) {
        if let Err(err) = self.history.record(record) {
            self.stats.history_errors += 1;
            warn!(error = %err, entity = %record.entity, "failed to write history record");
        }
    }

    pub fn flush_history(&mut self) {
        if let Err(err) = self.history.flush() {
            warn!(error = %err, "failed to flush history");
        }
    }
}
