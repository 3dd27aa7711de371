// src/history/recovery.rs

//! Rebuilding a DAG run from its transition records.
//!
//! Replay only sets states; it never runs handlers, so nothing is emitted
//! while records are applied. Entities are created the first time a record
//! names them, using the same specs their parents would have produced.
//! A record for an entity that is already terminal changes nothing, which
//! makes replaying a stream twice (or a stream with duplicates) harmless.
//!
//! After replay the parent summaries (attempt sets, task counts, vertex
//! counts, source progress) are recomputed from the child states, and
//! [`CoreRuntime::resume`] picks the run back up.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::dag::DagPlan;
use crate::engine::event::{AttemptEvent, DagEvent, Event, VertexEvent};
use crate::engine::run::DagRun;
use crate::engine::CoreRuntime;
use crate::errors::{DagError, Result};
use crate::history::TransitionRecord;
use crate::ids::{AttemptId, DagId, EntityId, TaskId, VertexId};
use crate::state::{
    Attempt, AttemptState, DagState, Diagnostic, FailureKind, SourceProgress, Task, TaskState,
    TerminationReason, Vertex, VertexState,
};

impl CoreRuntime {
    /// Rebuild the run recorded in `records` without resuming it.
    ///
    /// A history file may hold several runs; the latest one that never
    /// reached a terminal state is recovered (see [`latest_unfinished_dag`]).
    /// Records of other DAGs are skipped. The recovered run keeps its
    /// recorded id.
    pub fn recover(&mut self, plan: DagPlan, records: &[TransitionRecord]) -> Result<DagId> {
        let dag = latest_unfinished_dag(records)
            .ok_or_else(|| DagError::Config("history contains no records".to_string()))?;
        let first = records
            .iter()
            .find(|r| r.dag == dag)
            .ok_or(DagError::DagNotFound(dag))?;
        if self.runs.contains_key(&dag) {
            return Err(DagError::InternalInvariant(format!(
                "{dag} is already loaded"
            )));
        }
        plan.validate()?;

        let mut run = DagRun::new(dag, plan, self.config().max_concurrent_workers, first.at);
        let mut applied = 0usize;
        for record in records.iter().filter(|r| r.dag == dag) {
            if replay(&mut run, record)? {
                applied += 1;
            }
        }
        rebuild_summaries(&mut run, self.config().dynamic_parallelism_threshold);

        info!(
            %dag,
            records = records.len(),
            applied,
            state = %run.dag.state,
            "DAG recovered from history"
        );
        self.adopt_run(run);
        Ok(dag)
    }

    /// Continue a recovered run.
    ///
    /// Attempts that were in flight are gone with the previous process: they
    /// are killed (not counted as failures) and their tasks reschedule.
    /// A vertex caught mid-commit cannot know whether its output landed, so
    /// it fails with a commit diagnostic. INITED vertices re-check their
    /// sources, and a DAG that never started is started.
    pub fn resume(&mut self, dag: DagId) -> Result<()> {
        let run = self.runs.get(&dag).ok_or(DagError::DagNotFound(dag))?;
        if run.is_finished() {
            debug!(%dag, "recovered DAG already finished; nothing to resume");
            return Ok(());
        }

        let in_flight: Vec<AttemptId> = run
            .attempts
            .values()
            .filter(|a| !a.state.is_terminal())
            .map(|a| a.id)
            .collect();
        let inited: Vec<VertexId> = run
            .vertices
            .values()
            .filter(|v| v.state == VertexState::Inited)
            .map(|v| v.id)
            .collect();
        let committing: Vec<VertexId> = run
            .vertices
            .values()
            .filter(|v| v.state == VertexState::Committing)
            .map(|v| v.id)
            .collect();
        let dag_state = run.dag.state;

        info!(
            %dag,
            attempts = in_flight.len(),
            committing = committing.len(),
            "resuming recovered DAG"
        );
        for vertex in committing {
            warn!(%vertex, "output commit was interrupted; failing the vertex");
            self.post(Event::Vertex(
                vertex,
                VertexEvent::CommitCompleted {
                    result: Err(INTERRUPTED_COMMIT.to_string()),
                },
            ));
        }
        for attempt in in_flight {
            self.post(Event::Attempt(
                attempt,
                AttemptEvent::Terminate(TerminationReason::Recovery),
            ));
        }
        for vertex in inited {
            self.post(Event::Vertex(vertex, VertexEvent::StartScheduling));
        }
        match dag_state {
            DagState::New => {
                self.post(Event::Dag(dag, DagEvent::Init));
                self.post(Event::Dag(dag, DagEvent::Start));
            }
            DagState::Inited => self.post(Event::Dag(dag, DagEvent::Start)),
            _ => {}
        }
        Ok(())
    }
}

const INTERRUPTED_COMMIT: &str = "output commit was in progress when the engine stopped";

/// The DAG a recovery should pick up from an appended history.
///
/// That is the most recently submitted DAG with no terminal DAG record, or
/// the most recent DAG at all when every run finished. `None` for an empty
/// history.
pub fn latest_unfinished_dag(records: &[TransitionRecord]) -> Option<DagId> {
    let mut order: Vec<DagId> = Vec::new();
    let mut finished: Vec<DagId> = Vec::new();
    for record in records {
        if !order.contains(&record.dag) {
            order.push(record.dag);
        }
        let terminal = matches!(record.entity, EntityId::Dag(_))
            && DagState::from_str(&record.to).is_ok_and(|s| s.is_terminal());
        if terminal && !finished.contains(&record.dag) {
            finished.push(record.dag);
        }
    }
    order
        .iter()
        .rev()
        .find(|dag| !finished.contains(dag))
        .or_else(|| order.last())
        .copied()
}

/// Apply one record. Returns whether it changed anything.
fn replay(run: &mut DagRun, record: &TransitionRecord) -> Result<bool> {
    let at = record.at;
    let diagnostic = record
        .diagnostic
        .as_deref()
        .map(|text| parse_diagnostic(record.entity, text));

    match record.entity {
        EntityId::Dag(_) => {
            let dag = &mut run.dag;
            if dag.state.is_terminal() {
                return Ok(false);
            }
            dag.state = DagState::from_str(&record.to)?;
            match dag.state {
                DagState::Running => dag.started_at = Some(at),
                s if s.is_terminal() => dag.finished_at = Some(at),
                _ => {}
            }
            if let Some(d) = diagnostic {
                set_chain(&mut dag.diagnostics, d);
            }
        }
        EntityId::Vertex(id) => {
            let Some(vertex) = ensure_vertex(run, id) else {
                return Ok(false);
            };
            if vertex.state.is_terminal() {
                return Ok(false);
            }
            vertex.state = VertexState::from_str(&record.to)?;
            match vertex.state {
                VertexState::Inited => vertex.inited_at = Some(at),
                VertexState::Running => vertex.started_at = Some(at),
                s if s.is_terminal() => vertex.finished_at = Some(at),
                _ => {}
            }
            if let Some(d) = diagnostic {
                set_chain(&mut vertex.diagnostics, d);
            }
        }
        EntityId::Task(id) => {
            let Some(task) = ensure_task(run, id) else {
                return Ok(false);
            };
            if task.state.is_terminal() {
                return Ok(false);
            }
            task.state = TaskState::from_str(&record.to)?;
            match task.state {
                TaskState::Scheduled => task.scheduled_at = Some(at),
                s if s.is_terminal() => task.finished_at = Some(at),
                _ => {}
            }
            if let Some(d) = diagnostic {
                set_chain(&mut task.diagnostics, d);
            }
        }
        EntityId::Attempt(id) => {
            let Some(attempt) = ensure_attempt(run, id, at) else {
                return Ok(false);
            };
            if attempt.state.is_terminal() {
                return Ok(false);
            }
            attempt.state = AttemptState::from_str(&record.to)?;
            match attempt.state {
                AttemptState::Scheduled => attempt.scheduled_at = Some(at),
                AttemptState::Running => attempt.launched_at = Some(at),
                s if s.is_terminal() => attempt.finished_at = Some(at),
                _ => {}
            }
            if diagnostic.is_some() {
                attempt.diagnostic = diagnostic;
            }
        }
    }
    Ok(true)
}

fn parse_diagnostic(entity: EntityId, text: &str) -> Diagnostic {
    text.parse()
        .unwrap_or_else(|_| Diagnostic::new(FailureKind::InternalInvariant, entity, text))
}

/// A recorded diagnostic is the head of the entity's chain.
fn set_chain(chain: &mut Vec<Diagnostic>, head: Diagnostic) {
    if chain.first() != Some(&head) {
        chain.insert(0, head);
    }
}

fn ensure_vertex(run: &mut DagRun, id: VertexId) -> Option<&mut Vertex> {
    if !run.vertices.contains_key(&id) {
        let Some(spec) = run.dag.vertex_spec(id.seq as usize) else {
            warn!(vertex = %id, "history names a vertex the plan does not have; skipped");
            return None;
        };
        run.vertices.insert(id, Vertex::new(id, spec));
    }
    run.vertices.get_mut(&id)
}

fn ensure_task(run: &mut DagRun, id: TaskId) -> Option<&mut Task> {
    if !run.tasks.contains_key(&id) {
        let spec = ensure_vertex(run, id.vertex())?.task_spec(id.seq);
        run.tasks.insert(id, Task::new(id, spec));
    }
    run.tasks.get_mut(&id)
}

fn ensure_attempt(run: &mut DagRun, id: AttemptId, at: DateTime<Utc>) -> Option<&mut Attempt> {
    if !run.attempts.contains_key(&id) {
        let spec = ensure_task(run, id.task())?.attempt_spec(id.seq, false);
        run.attempts.insert(id, Attempt::new(id, spec, at));
    }
    run.attempts.get_mut(&id)
}

fn source_progress(state: VertexState) -> SourceProgress {
    match state {
        VertexState::New | VertexState::Initializing => SourceProgress::Pending,
        VertexState::Inited => SourceProgress::Inited,
        VertexState::Running | VertexState::Committing | VertexState::Terminating => {
            SourceProgress::Running
        }
        VertexState::Succeeded => SourceProgress::Succeeded,
        VertexState::Failed | VertexState::Killed | VertexState::Error => SourceProgress::Lost,
    }
}

fn rebuild_summaries(run: &mut DagRun, threshold: f64) {
    // Tasks from their attempts.
    let mut by_task: BTreeMap<TaskId, Vec<&Attempt>> = BTreeMap::new();
    for attempt in run.attempts.values() {
        by_task.entry(attempt.id.task()).or_default().push(attempt);
    }
    for task in run.tasks.values_mut() {
        let attempts = by_task.remove(&task.id).unwrap_or_default();
        task.attempts = attempts.iter().map(|a| a.id).collect();
        task.live = attempts
            .iter()
            .filter(|a| !a.state.is_terminal())
            .map(|a| a.id)
            .collect();
        task.running_since = attempts
            .iter()
            .filter(|a| a.state == AttemptState::Running)
            .filter_map(|a| a.launched_at.map(|t| (a.id, t)))
            .collect();
        task.failed_attempts = count(&attempts, AttemptState::Failed);
        task.killed_attempts = count(&attempts, AttemptState::Killed);
        task.successful_attempt = attempts
            .iter()
            .find(|a| a.state == AttemptState::Succeeded)
            .map(|a| a.id);
        task.speculated = task.live.len() > 1;
    }

    // Vertices from their tasks.
    let mut by_vertex: BTreeMap<VertexId, Vec<&Task>> = BTreeMap::new();
    for task in run.tasks.values() {
        by_vertex.entry(task.id.vertex()).or_default().push(task);
    }
    let attempts = &run.attempts;
    for vertex in run.vertices.values_mut() {
        let tasks = by_vertex.remove(&vertex.id).unwrap_or_default();
        vertex.tasks = tasks.iter().map(|t| t.id).collect();
        vertex.task_states = tasks.iter().map(|t| (t.id, t.state)).collect();
        vertex.succeeded_tasks = tasks.iter().filter(|t| t.state == TaskState::Succeeded).count() as u32;
        vertex.failed_tasks = tasks.iter().filter(|t| t.state == TaskState::Failed).count() as u32;
        vertex.killed_tasks = tasks.iter().filter(|t| t.state == TaskState::Killed).count() as u32;
        vertex.failed_attempts = tasks.iter().map(|t| t.failed_attempts).sum();
        vertex.killed_attempts = tasks.iter().map(|t| t.killed_attempts).sum();
        vertex.task_durations = tasks
            .iter()
            .filter_map(|t| t.successful_attempt)
            .filter_map(|a| attempts.get(&a).and_then(Attempt::duration))
            .collect();
        if !matches!(vertex.state, VertexState::New | VertexState::Initializing) {
            vertex.parallelism = Some(vertex.tasks.len() as u32);
        }
    }

    // Each vertex's view of its sources, and the partitions they announced.
    let views: BTreeMap<VertexId, (VertexState, Option<u32>, Option<u32>)> = run
        .vertices
        .values()
        .map(|v| (v.id, (v.state, v.parallelism, announced(v, threshold))))
        .collect();
    for vertex in run.vertices.values_mut() {
        for (source, status) in vertex.sources.iter_mut() {
            let Some(&(state, parallelism, _)) = views.get(source) else {
                continue;
            };
            status.progress = source_progress(state);
            status.parallelism = parallelism;
        }
        if let Some(source) = vertex.spec.parallelism_source {
            vertex.announced_partitions = views.get(&source).and_then(|(_, _, p)| *p);
        }
        vertex.parallelism_announced = announced(vertex, threshold).is_some();

        if vertex.state == VertexState::Terminating {
            let lost = vertex
                .sources
                .values()
                .any(|s| s.progress == SourceProgress::Lost);
            vertex.termination = Some(if lost {
                TerminationReason::UpstreamFailed
            } else if vertex.failed_tasks > vertex.spec.plan.max_failed_tasks {
                TerminationReason::OwnTaskFailed
            } else {
                TerminationReason::DagKilled
            });
        }
    }

    // The DAG from its vertices.
    let dag = &mut run.dag;
    dag.vertex_states = run.vertices.values().map(|v| (v.id, v.state)).collect();
    let states = || dag.vertex_states.values().copied();
    let succeeded = states().filter(|s| *s == VertexState::Succeeded).count() as u32;
    let failed = states().filter(|s| *s == VertexState::Failed).count() as u32;
    let killed = states().filter(|s| *s == VertexState::Killed).count() as u32;
    let errored = states().filter(|s| *s == VertexState::Error).count() as u32;
    dag.succeeded_vertices = succeeded;
    dag.failed_vertices = failed;
    dag.killed_vertices = killed;
    dag.errored_vertices = errored;
    dag.killed_by_user = matches!(dag.state, DagState::Terminating | DagState::Killed)
        && failed == 0
        && errored == 0;
}

fn count(attempts: &[&Attempt], state: AttemptState) -> u32 {
    attempts.iter().filter(|a| a.state == state).count() as u32
}

/// Partition count a sizing vertex has already sent to its destinations.
///
/// Counters are not part of the history, so a reported `OUTPUT_PARTITIONS`
/// is lost; the declared count or the parallelism stands in for it.
fn announced(vertex: &Vertex, threshold: f64) -> Option<u32> {
    if !vertex.spec.destinations.iter().any(|d| d.sizes_destination) {
        return None;
    }
    let n = vertex.parallelism?;
    let needed = ((threshold.clamp(0.0, 1.0) * n as f64).ceil() as u32).max(1);
    if vertex.state == VertexState::Succeeded || vertex.succeeded_tasks >= needed {
        Some(vertex.spec.plan.output_partitions.unwrap_or(n))
    } else {
        None
    }
}
