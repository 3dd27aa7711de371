// src/engine/dispatcher.rs

//! Routing of internal events to their target entity.
//!
//! One match maps (entity kind, event) to the entity's transition function.
//! Around each call the dispatcher compares the state before and after and
//! produces a [`TransitionRecord`] for every creation and state change.

use tracing::{debug, warn};

use crate::engine::event::{
    AttemptEvent, Context, Effects, Event, TaskEvent, VertexEvent,
};
use crate::engine::run::DagRun;
use crate::history::TransitionRecord;
use crate::ids::EntityId;
use crate::state::{Attempt, StateMachine, Task, Vertex};

/// Deliver one event to its target and return what it asks for next.
pub fn dispatch(
    run: &mut DagRun,
    event: Event,
    ctx: &Context<'_>,
    records: &mut Vec<TransitionRecord>,
) -> Effects {
    match event {
        Event::Dag(id, ev) => {
            let name = ev.name();
            apply(&mut run.dag, id.into(), ev, name, ctx, records)
        }

        Event::Vertex(id, VertexEvent::Create(spec)) => {
            if run.vertices.contains_key(&id) {
                return duplicate_create(id.into());
            }
            let vertex = Vertex::new(id, *spec);
            records.push(created(id.into(), vertex.state.to_string(), ctx));
            run.vertices.insert(id, vertex);
            Effects::none()
        }
        Event::Vertex(id, ev) => match run.vertices.get_mut(&id) {
            Some(vertex) => {
                let name = ev.name();
                apply(vertex, id.into(), ev, name, ctx, records)
            }
            None => unknown_target(id.into(), ev.name()),
        },

        Event::Task(id, TaskEvent::Create(spec)) => {
            if run.tasks.contains_key(&id) {
                return duplicate_create(id.into());
            }
            let task = Task::new(id, *spec);
            records.push(created(id.into(), task.state.to_string(), ctx));
            run.tasks.insert(id, task);
            Effects::none()
        }
        Event::Task(id, ev) => match run.tasks.get_mut(&id) {
            Some(task) => {
                let name = ev.name();
                apply(task, id.into(), ev, name, ctx, records)
            }
            None => unknown_target(id.into(), ev.name()),
        },

        Event::Attempt(id, AttemptEvent::Create(spec)) => {
            if run.attempts.contains_key(&id) {
                return duplicate_create(id.into());
            }
            let mut attempt = Attempt::new(id, (*spec).clone(), ctx.now);
            records.push(created(id.into(), attempt.state.to_string(), ctx));
            // Creation starts the scheduling timer.
            let fx = attempt.handle(AttemptEvent::Create(spec), ctx);
            run.attempts.insert(id, attempt);
            fx
        }
        Event::Attempt(id, ev) => match run.attempts.get_mut(&id) {
            Some(attempt) => {
                let name = ev.name();
                apply(attempt, id.into(), ev, name, ctx, records)
            }
            None => unknown_target(id.into(), ev.name()),
        },

        Event::Scheduler(_, ev) => run.scheduler.handle(ev),
    }
}

fn apply<M: StateMachine>(
    entity: &mut M,
    id: EntityId,
    event: M::Event,
    event_name: &str,
    ctx: &Context<'_>,
    records: &mut Vec<TransitionRecord>,
) -> Effects {
    let before = entity.state();
    let fx = entity.handle(event, ctx);
    let after = entity.state();

    if before != after {
        debug!(entity = %id, from = %before, to = %after, event = event_name, "transition");
        records.push(
            TransitionRecord::new(
                id,
                Some(before.to_string()),
                after.to_string(),
                ctx.now,
                event_name,
            )
            .with_diagnostic(entity.last_diagnostic().map(|d| d.to_string())),
        );
    }
    fx
}

fn created(id: EntityId, state: String, ctx: &Context<'_>) -> TransitionRecord {
    debug!(entity = %id, to = %state, "created");
    TransitionRecord::new(id, None, state, ctx.now, "create")
}

fn unknown_target(id: EntityId, event: &str) -> Effects {
    warn!(entity = %id, event, "event for unknown entity dropped");
    Effects::dropped()
}

fn duplicate_create(id: EntityId) -> Effects {
    warn!(entity = %id, "entity already exists; duplicate create dropped");
    Effects::dropped()
}
