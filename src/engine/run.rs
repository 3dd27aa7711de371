// src/engine/run.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::dag::DagPlan;
use crate::engine::queue::EventQueue;
use crate::engine::scheduler::Scheduler;
use crate::engine::status::{DagStatus, StateSnapshot, VertexStatus};
use crate::ids::{AttemptId, DagId, EntityId, TaskId, VertexId};
use crate::state::{Attempt, Dag, Task, TaskState, Vertex};

/// Arena holding every entity of one submitted DAG.
///
/// Nothing here is shared between runs: each DAG gets its own scheduler and
/// its own internal event queue.
#[derive(Debug)]
pub struct DagRun {
    pub(crate) dag: Dag,
    pub(crate) vertices: BTreeMap<VertexId, Vertex>,
    pub(crate) tasks: BTreeMap<TaskId, Task>,
    pub(crate) attempts: BTreeMap<AttemptId, Attempt>,
    pub(crate) scheduler: Scheduler,
    pub(crate) queue: EventQueue,
    pub(crate) dropped_events: u64,
}

impl DagRun {
    pub fn new(
        id: DagId,
        plan: DagPlan,
        max_concurrent_workers: Option<usize>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            dag: Dag::new(id, plan, now),
            vertices: BTreeMap::new(),
            tasks: BTreeMap::new(),
            attempts: BTreeMap::new(),
            scheduler: Scheduler::new(max_concurrent_workers),
            queue: EventQueue::new(),
            dropped_events: 0,
        }
    }

    pub fn id(&self) -> DagId {
        self.dag.id
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    pub fn vertex(&self, id: VertexId) -> Option<&Vertex> {
        self.vertices.get(&id)
    }

    pub fn vertex_by_name(&self, name: &str) -> Option<&Vertex> {
        self.vertices.values().find(|v| v.name() == name)
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.vertices.values()
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn attempt(&self, id: AttemptId) -> Option<&Attempt> {
        self.attempts.get(&id)
    }

    pub fn attempts(&self) -> impl Iterator<Item = &Attempt> {
        self.attempts.values()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Events that did not apply to their target.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }

    pub fn events_processed(&self) -> u64 {
        self.queue.processed()
    }

    pub fn is_finished(&self) -> bool {
        self.dag.state.is_terminal()
    }

    pub fn status(&self) -> DagStatus {
        let vertices: Vec<VertexStatus> = self
            .vertices
            .values()
            .map(|v| {
                let running = v
                    .tasks
                    .iter()
                    .filter_map(|t| self.tasks.get(t))
                    .filter(|t| t.state == TaskState::Running)
                    .count() as u32;
                VertexStatus {
                    id: v.id,
                    name: v.name().to_string(),
                    state: v.state,
                    parallelism: v.parallelism,
                    succeeded_tasks: v.succeeded_tasks,
                    failed_tasks: v.failed_tasks,
                    killed_tasks: v.killed_tasks,
                    running_tasks: running,
                    failed_attempts: v.failed_attempts,
                    killed_attempts: v.killed_attempts,
                    progress: v.progress(),
                }
            })
            .collect();

        let progress = if vertices.is_empty() {
            if self.is_finished() { 1.0 } else { 0.0 }
        } else {
            vertices.iter().map(|v| v.progress).sum::<f32>() / vertices.len() as f32
        };

        DagStatus {
            dag: self.dag.id,
            name: self.dag.name().to_string(),
            state: self.dag.state,
            progress,
            vertices,
            diagnostics: self.dag.diagnostics.clone(),
            started_at: self.dag.started_at,
            finished_at: self.dag.finished_at,
        }
    }

    /// State label of every entity in the run.
    pub fn snapshot(&self) -> StateSnapshot {
        let mut states = BTreeMap::new();
        states.insert(EntityId::from(self.dag.id), self.dag.state.to_string());
        for v in self.vertices.values() {
            states.insert(v.id.into(), v.state.to_string());
        }
        for t in self.tasks.values() {
            states.insert(t.id.into(), t.state.to_string());
        }
        for a in self.attempts.values() {
            states.insert(a.id.into(), a.state.to_string());
        }
        StateSnapshot(states)
    }
}
