// src/engine/scheduler.rs

//! Per-DAG worker scheduler.
//!
//! Tasks never talk to the cluster directly. A new attempt is queued here
//! with a priority (the vertex's depth; lower first, FIFO within a depth)
//! and admitted as a `RequestWorker` command while the concurrency cap
//! allows. Allocations come back as `WorkerAllocated` and are forwarded to
//! the attempt; allocations for attempts that ended meanwhile are released.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::engine::event::{AttemptEvent, CoreCommand, Effects, Event, SchedulerEvent};
use crate::ids::{AttemptId, WorkerRef};
use crate::types::ResourceSpec;

#[derive(Debug, Clone)]
pub struct Scheduler {
    max_concurrent: Option<usize>,
    /// Waiting requests keyed by (priority, arrival).
    waiting: BTreeMap<(u32, u64), (AttemptId, ResourceSpec)>,
    /// Requests handed to the backend and not yet answered.
    requested: BTreeMap<AttemptId, ResourceSpec>,
    /// Workers currently held by live attempts.
    held: BTreeMap<AttemptId, WorkerRef>,
    next_arrival: u64,
}

impl Scheduler {
    pub fn new(max_concurrent: Option<usize>) -> Self {
        Self {
            max_concurrent,
            waiting: BTreeMap::new(),
            requested: BTreeMap::new(),
            held: BTreeMap::new(),
            next_arrival: 0,
        }
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn requested_len(&self) -> usize {
        self.requested.len()
    }

    pub fn held_len(&self) -> usize {
        self.held.len()
    }

    pub fn worker_of(&self, attempt: &AttemptId) -> Option<&WorkerRef> {
        self.held.get(attempt)
    }

    pub fn handle(&mut self, event: SchedulerEvent) -> Effects {
        let mut fx = Effects::none();
        match event {
            SchedulerEvent::Schedule {
                attempt,
                resource,
                priority,
            } => {
                let arrival = self.next_arrival;
                self.next_arrival += 1;
                self.waiting.insert((priority, arrival), (attempt, resource));
                debug!(%attempt, priority, "queued worker request");
            }
            SchedulerEvent::WorkerAllocated { attempt, worker } => {
                if self.requested.remove(&attempt).is_some() {
                    self.held.insert(attempt, worker.clone());
                    fx.emit(Event::Attempt(attempt, AttemptEvent::WorkerAssigned(worker)));
                } else {
                    warn!(%attempt, %worker, "worker allocated for an attempt that no longer needs it; releasing");
                    fx.command(CoreCommand::ReleaseWorker { worker });
                    fx.dropped = true;
                }
            }
            SchedulerEvent::AttemptEnded { attempt } => {
                if self.requested.remove(&attempt).is_some() {
                    fx.command(CoreCommand::CancelWorkerRequest { attempt });
                } else if let Some(worker) = self.held.remove(&attempt) {
                    fx.command(CoreCommand::ReleaseWorker { worker });
                } else {
                    self.waiting.retain(|_, (a, _)| *a != attempt);
                }
            }
        }
        self.admit(&mut fx);
        fx
    }

    fn has_capacity(&self) -> bool {
        self.max_concurrent
            .is_none_or(|max| self.requested.len() + self.held.len() < max)
    }

    fn admit(&mut self, fx: &mut Effects) {
        while self.has_capacity() {
            let Some(((priority, _), (attempt, resource))) = self.waiting.pop_first() else {
                break;
            };
            self.requested.insert(attempt, resource);
            fx.command(CoreCommand::RequestWorker {
                attempt,
                resource,
                priority,
            });
        }
    }
}
