// src/engine/queue.rs

use std::collections::VecDeque;

use tracing::trace;

use crate::engine::event::Event;

/// FIFO of internal events for one DAG.
///
/// Every event emitted while handling another is appended here and
/// processed before the next external signal is accepted, so a cascade
/// always runs to quiescence in emission order.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<Event>,
    processed: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        trace!(?event, "queued event");
        self.events.push_back(event);
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.push(event);
        }
    }

    pub fn pop(&mut self) -> Option<Event> {
        let event = self.events.pop_front()?;
        self.processed += 1;
        Some(event)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Total events handed out so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }
}
