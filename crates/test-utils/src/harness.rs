#![allow(dead_code)]

//! Synchronous driver for `CoreRuntime`.
//!
//! The harness plays every collaborator by hand: it keeps track of the
//! worker requests and launches the core asked for, and tests decide which
//! signals to inject and in which order. Time only moves through
//! [`Harness::advance`].

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use rundag::dag::DagPlan;
use rundag::engine::{
    CoreCommand, CoreRuntime, DagRun, DagStatus, EngineConfig, ManualClock, RuntimeEvent,
    StateSnapshot,
};
use rundag::history::{MemoryHistory, TransitionRecord};
use rundag::ids::{AttemptId, DagId, TaskId, VertexId, WorkerRef};
use rundag::state::{AttemptState, DagState, TaskState, VertexState};
use rundag::types::Counters;

/// Fixed session so ids are stable across test runs.
pub const TEST_SESSION: u64 = 1_700_000_000_000;

pub struct Harness {
    core: CoreRuntime,
    clock: ManualClock,
    history: MemoryHistory,
    dag: Option<DagId>,
    /// Attempts with a worker request the "cluster" has not answered.
    outstanding: BTreeSet<AttemptId>,
    /// Attempts launched on a "worker" that have not reported completion.
    launched: BTreeSet<AttemptId>,
    pending_commits: BTreeSet<VertexId>,
    timers: Vec<(AttemptId, Duration)>,
    finished: Vec<(DagId, DagState)>,
    commands: Vec<CoreCommand>,
    next_worker: u64,
}

impl Harness {
    pub fn new(config: EngineConfig) -> Self {
        let clock = ManualClock::new(start_time());
        let history = MemoryHistory::new();
        let core = CoreRuntime::new(config)
            .with_session(TEST_SESSION)
            .with_clock(clock.clone())
            .with_history(history.clone());
        Self {
            core,
            clock,
            history,
            dag: None,
            outstanding: BTreeSet::new(),
            launched: BTreeSet::new(),
            pending_commits: BTreeSet::new(),
            timers: Vec::new(),
            finished: Vec::new(),
            commands: Vec::new(),
            next_worker: 1,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default())
    }

    pub fn submit(&mut self, plan: DagPlan) -> DagId {
        let dag = self.core.submit_dag(plan).expect("plan should be accepted");
        self.dag = Some(dag);
        let commands = self.core.take_commands();
        self.absorb(commands);
        dag
    }

    /// Rebuild a run from history and resume it.
    pub fn recover(&mut self, plan: DagPlan, records: &[TransitionRecord]) -> DagId {
        let dag = self
            .core
            .recover(plan, records)
            .expect("history should replay");
        self.dag = Some(dag);
        self.core.resume(dag).expect("recovered DAG should resume");
        let commands = self.core.take_commands();
        self.absorb(commands);
        dag
    }

    /// Rebuild a run from history without resuming it.
    pub fn replay_only(&mut self, plan: DagPlan, records: &[TransitionRecord]) -> DagId {
        let dag = self
            .core
            .recover(plan, records)
            .expect("history should replay");
        self.dag = Some(dag);
        dag
    }

    pub fn dag(&self) -> DagId {
        self.dag.expect("no DAG submitted")
    }

    pub fn core(&self) -> &CoreRuntime {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut CoreRuntime {
        &mut self.core
    }

    pub fn run(&self) -> &DagRun {
        self.core.run(self.dag()).expect("run exists")
    }

    pub fn status(&self) -> DagStatus {
        self.core.dag_status(self.dag()).expect("status exists")
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.core.snapshot(self.dag()).expect("snapshot exists")
    }

    pub fn records(&self) -> Vec<TransitionRecord> {
        self.history.records()
    }

    /// Every command the core has issued so far.
    pub fn commands(&self) -> &[CoreCommand] {
        &self.commands
    }

    pub fn finished(&self) -> &[(DagId, DagState)] {
        &self.finished
    }

    pub fn timers(&self) -> &[(AttemptId, Duration)] {
        &self.timers
    }

    pub fn now(&self) -> DateTime<Utc> {
        use rundag::engine::Clock;
        self.clock.now()
    }

    pub fn advance(&self, by: TimeDelta) {
        self.clock.advance(by);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(TimeDelta::seconds(secs));
    }

    // ---- signals -------------------------------------------------------

    pub fn step(&mut self, event: RuntimeEvent) -> Vec<CoreCommand> {
        let step = self.core.step(event);
        self.absorb(step.commands.clone());
        step.commands
    }

    pub fn allocate(&mut self, attempt: AttemptId) -> Vec<CoreCommand> {
        self.outstanding.remove(&attempt);
        let worker = WorkerRef::new(format!("worker-{}", self.next_worker));
        self.next_worker += 1;
        self.step(RuntimeEvent::WorkerAllocated { attempt, worker })
    }

    pub fn launch(&mut self, attempt: AttemptId) -> Vec<CoreCommand> {
        self.step(RuntimeEvent::LaunchConfirmed { attempt })
    }

    /// Allocate a worker and confirm the launch.
    pub fn start(&mut self, attempt: AttemptId) {
        self.allocate(attempt);
        self.launch(attempt);
    }

    pub fn succeed(&mut self, attempt: AttemptId) -> Vec<CoreCommand> {
        self.succeed_with(attempt, Counters::new())
    }

    pub fn succeed_with(&mut self, attempt: AttemptId, counters: Counters) -> Vec<CoreCommand> {
        self.launched.remove(&attempt);
        self.step(RuntimeEvent::Completed {
            attempt,
            success: true,
            diagnostic: None,
            counters,
        })
    }

    pub fn fail(&mut self, attempt: AttemptId, message: &str) -> Vec<CoreCommand> {
        self.launched.remove(&attempt);
        self.step(RuntimeEvent::Completed {
            attempt,
            success: false,
            diagnostic: Some(message.to_string()),
            counters: Counters::new(),
        })
    }

    pub fn status_update(&mut self, attempt: AttemptId, progress: f32, counters: Counters) {
        self.step(RuntimeEvent::StatusUpdate {
            attempt,
            progress,
            counters,
        });
    }

    /// Report the attempt's worker as gone.
    pub fn lose_worker(&mut self, attempt: AttemptId) -> Vec<CoreCommand> {
        self.launched.remove(&attempt);
        self.step(RuntimeEvent::WorkerLost { attempt })
    }

    pub fn scheduling_timeout(&mut self, attempt: AttemptId) -> Vec<CoreCommand> {
        self.step(RuntimeEvent::SchedulingTimeout { attempt })
    }

    pub fn finish_commit(&mut self, vertex: VertexId, result: Result<(), String>) {
        self.pending_commits.remove(&vertex);
        self.step(RuntimeEvent::CommitFinished { vertex, result });
    }

    pub fn kill(&mut self) -> Vec<CoreCommand> {
        let dag = self.dag();
        self.step(RuntimeEvent::KillDag { dag })
    }

    pub fn speculation_tick(&mut self) -> Vec<CoreCommand> {
        self.step(RuntimeEvent::SpeculationTick)
    }

    /// Attempts waiting for a worker, in id order.
    pub fn requested(&self) -> Vec<AttemptId> {
        self.outstanding.iter().copied().collect()
    }

    /// Attempts launched and not yet completed, in id order.
    pub fn launched(&self) -> Vec<AttemptId> {
        self.launched.iter().copied().collect()
    }

    pub fn pending_commits(&self) -> Vec<VertexId> {
        self.pending_commits.iter().copied().collect()
    }

    /// Start every requested attempt; returns them.
    pub fn start_all(&mut self) -> Vec<AttemptId> {
        let requested = self.requested();
        for attempt in &requested {
            self.start(*attempt);
        }
        requested
    }

    /// Grant, launch and succeed everything (commits included) until the
    /// core stops asking for work.
    pub fn run_to_completion(&mut self) {
        self.settle(true);
    }

    /// Like [`run_to_completion`](Self::run_to_completion) but leaves
    /// requested commits unanswered.
    pub fn run_to_completion_without_commits(&mut self) {
        self.settle(false);
    }

    fn settle(&mut self, commit: bool) {
        for _ in 0..10_000 {
            self.start_all();
            let launched = self.launched();
            let commits = if commit {
                self.pending_commits()
            } else {
                Vec::new()
            };
            if launched.is_empty() && commits.is_empty() && self.outstanding.is_empty() {
                return;
            }
            for attempt in launched {
                self.succeed(attempt);
            }
            for vertex in commits {
                self.finish_commit(vertex, Ok(()));
            }
        }
        panic!("DAG did not settle");
    }

    // ---- lookups -------------------------------------------------------

    pub fn vertex_id(&self, name: &str) -> VertexId {
        self.run()
            .vertex_by_name(name)
            .map(|v| v.id)
            .unwrap_or_else(|| panic!("no vertex named {name}"))
    }

    pub fn task_id(&self, vertex: &str, index: u32) -> TaskId {
        self.vertex_id(vertex).task(index)
    }

    pub fn attempt_id(&self, vertex: &str, index: u32, seq: u32) -> AttemptId {
        self.task_id(vertex, index).attempt(seq)
    }

    pub fn dag_state(&self) -> DagState {
        self.run().dag().state
    }

    pub fn vertex_state(&self, name: &str) -> VertexState {
        let id = self.vertex_id(name);
        self.run().vertex(id).map(|v| v.state).expect("vertex exists")
    }

    pub fn task_state(&self, vertex: &str, index: u32) -> TaskState {
        let id = self.task_id(vertex, index);
        self.run().task(id).map(|t| t.state).expect("task exists")
    }

    pub fn attempt_state(&self, attempt: AttemptId) -> AttemptState {
        self.run()
            .attempt(attempt)
            .map(|a| a.state)
            .expect("attempt exists")
    }

    /// Attempts of one task, in creation order.
    pub fn attempts_of(&self, vertex: &str, index: u32) -> Vec<(AttemptId, AttemptState)> {
        let id = self.task_id(vertex, index);
        let run = self.run();
        run.task(id)
            .map(|t| {
                t.attempts
                    .iter()
                    .filter_map(|a| run.attempt(*a).map(|att| (*a, att.state)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Tasks of a vertex that ever had an attempt created.
    pub fn scheduled_tasks(&self, vertex: &str) -> usize {
        let id = self.vertex_id(vertex);
        self.run()
            .tasks()
            .filter(|t| t.id.vertex() == id && !t.attempts.is_empty())
            .count()
    }

    fn absorb(&mut self, commands: Vec<CoreCommand>) {
        for command in commands {
            match &command {
                CoreCommand::RequestWorker { attempt, .. } => {
                    self.outstanding.insert(*attempt);
                }
                CoreCommand::CancelWorkerRequest { attempt } => {
                    self.outstanding.remove(attempt);
                }
                CoreCommand::LaunchAttempt { attempt, .. } => {
                    self.launched.insert(*attempt);
                }
                CoreCommand::CancelAttempt { attempt, .. } => {
                    self.launched.remove(attempt);
                }
                CoreCommand::ReleaseWorker { .. } => {}
                CoreCommand::StartSchedulingTimer { attempt, after } => {
                    self.timers.push((*attempt, *after));
                }
                CoreCommand::CommitVertexOutput { vertex, .. } => {
                    self.pending_commits.insert(*vertex);
                }
                CoreCommand::DagFinished { dag, state } => {
                    self.finished.push((*dag, *state));
                }
            }
            self.commands.push(command);
        }
    }
}

fn start_time() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(TEST_SESSION as i64 / 1000, 0).unwrap_or_default()
}
