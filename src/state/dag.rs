// src/state/dag.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::dag::{DagGraph, DagPlan, Parallelism};
use crate::engine::event::{Context, CoreCommand, DagEvent, Effects, Event, VertexEvent};
use crate::ids::{DagId, VertexId};
use crate::state::{
    DagState, DestinationEdge, Diagnostic, FailureKind, SourceEdge, StateMachine,
    TerminationReason, VertexSpec, VertexState,
};
use crate::types::{DataMovement, FailurePolicy};

/// Root of the entity tree: owns the vertices of one submitted plan.
#[derive(Debug, Clone)]
pub struct Dag {
    pub id: DagId,
    pub state: DagState,
    pub plan: DagPlan,
    graph: DagGraph,
    /// Last reported state of every vertex, keyed in plan order.
    pub vertex_states: BTreeMap<VertexId, VertexState>,
    pub succeeded_vertices: u32,
    pub failed_vertices: u32,
    pub killed_vertices: u32,
    pub errored_vertices: u32,
    pub killed_by_user: bool,
    /// Chain of failures, outermost first.
    pub diagnostics: Vec<Diagnostic>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Dag {
    pub fn new(id: DagId, plan: DagPlan, now: DateTime<Utc>) -> Self {
        let graph = DagGraph::from_plan(&plan);
        Self {
            id,
            state: DagState::New,
            plan,
            graph,
            vertex_states: BTreeMap::new(),
            succeeded_vertices: 0,
            failed_vertices: 0,
            killed_vertices: 0,
            errored_vertices: 0,
            killed_by_user: false,
            diagnostics: Vec::new(),
            created_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.plan.name
    }

    pub fn vertex_id(&self, index: usize) -> VertexId {
        self.id.vertex(index as u32)
    }

    /// Spec for the vertex at plan position `index`: its edges resolved to
    /// ids, its depth, and which source sizes it.
    pub fn vertex_spec(&self, index: usize) -> Option<VertexSpec> {
        let plan = self.plan.vertices.get(index)?.clone();

        let sources: Vec<SourceEdge> = self
            .graph
            .sources_of(index)
            .into_iter()
            .map(|(src, edge)| SourceEdge {
                vertex: self.vertex_id(src),
                name: edge.from.clone(),
                data_movement: edge.data_movement,
                scheduling: edge.scheduling,
            })
            .collect();

        // The first incoming edge in plan order determines a derived
        // parallelism.
        let parallelism_source = match plan.parallelism {
            Parallelism::FromSource => sources.first().map(|s| s.vertex),
            Parallelism::Fixed(_) => None,
        };

        let destinations = self
            .graph
            .destinations_of(index)
            .into_iter()
            .map(|(dst, edge)| DestinationEdge {
                vertex: self.vertex_id(dst),
                name: edge.to.clone(),
                data_movement: edge.data_movement,
                scheduling: edge.scheduling,
                sizes_destination: self.sizes(index, dst, edge.data_movement),
            })
            .collect();

        Some(VertexSpec {
            index: index as u32,
            dag_name: self.plan.name.clone(),
            plan,
            sources,
            destinations,
            depth: self.graph.depth_of(index),
            parallelism_source,
        })
    }

    fn sizes(&self, src: usize, dst: usize, movement: DataMovement) -> bool {
        if movement == DataMovement::OneToOne {
            return false;
        }
        let Some(plan) = self.plan.vertices.get(dst) else {
            return false;
        };
        plan.parallelism == Parallelism::FromSource
            && self.graph.sources_of(dst).first().map(|(s, _)| *s) == Some(src)
    }

    fn on_init(&mut self, ctx: &Context<'_>) -> Effects {
        if self.state != DagState::New {
            return self.stale("init");
        }

        let mut fx = Effects::none();
        if let Err(err) = self.plan.validate() {
            self.diagnostics
                .push(Diagnostic::new(FailureKind::InvalidDag, self.id, err.to_string()));
            self.finish(DagState::Error, ctx, &mut fx);
            return fx;
        }

        for index in 0..self.plan.vertices.len() {
            let Some(spec) = self.vertex_spec(index) else {
                continue;
            };
            let vertex = self.vertex_id(index);
            self.vertex_states.insert(vertex, VertexState::New);
            fx.emit(Event::Vertex(vertex, VertexEvent::Create(Box::new(spec))));
        }

        self.state = DagState::Inited;
        info!(dag = %self.id, name = %self.name(), vertices = self.vertex_states.len(), "DAG initialized");
        fx
    }

    fn on_start(&mut self, ctx: &Context<'_>) -> Effects {
        if self.state != DagState::Inited {
            return self.stale("start");
        }

        let mut fx = Effects::none();
        let roots = self.graph.roots();
        if roots.is_empty() {
            self.diagnostics.push(Diagnostic::new(
                FailureKind::InternalInvariant,
                self.id,
                "DAG has no root vertex",
            ));
            self.finish(DagState::Error, ctx, &mut fx);
            return fx;
        }

        self.state = DagState::Running;
        self.started_at = Some(ctx.now);
        info!(dag = %self.id, name = %self.name(), roots = roots.len(), "DAG running");
        for root in roots {
            fx.emit(Event::Vertex(self.vertex_id(root), VertexEvent::Init));
        }
        fx
    }

    fn on_vertex_completed(
        &mut self,
        vertex: VertexId,
        outcome: VertexState,
        diagnostics: Vec<Diagnostic>,
        ctx: &Context<'_>,
    ) -> Effects {
        let known = self.vertex_states.get(&vertex).copied();
        if known.is_none_or(|s| s.is_terminal()) {
            return self.stale("vertex_completed");
        }
        self.vertex_states.insert(vertex, outcome);

        let mut fx = Effects::none();
        match outcome {
            VertexState::Succeeded => self.succeeded_vertices += 1,
            VertexState::Killed => self.killed_vertices += 1,
            VertexState::Failed | VertexState::Error => {
                if outcome == VertexState::Failed {
                    self.failed_vertices += 1;
                } else {
                    self.errored_vertices += 1;
                }
                if self.diagnostics.is_empty() {
                    self.diagnostics.extend(diagnostics);
                }
                if self.plan.failure_policy == FailurePolicy::FailFast
                    && self.state == DagState::Running
                {
                    warn!(dag = %self.id, %vertex, "vertex failed; terminating DAG");
                    self.state = DagState::Terminating;
                    self.terminate_vertices(TerminationReason::DagFailed, &mut fx);
                }
            }
            _ => {}
        }

        self.check_completion(ctx, &mut fx);
        fx
    }

    fn on_kill(&mut self, ctx: &Context<'_>) -> Effects {
        if self.state.is_terminal() {
            return self.stale("kill");
        }

        info!(dag = %self.id, name = %self.name(), "kill requested");
        self.killed_by_user = true;

        let mut fx = Effects::none();
        if self.state == DagState::New {
            self.finish(DagState::Killed, ctx, &mut fx);
            return fx;
        }
        self.state = DagState::Terminating;
        self.terminate_vertices(TerminationReason::DagKilled, &mut fx);
        self.check_completion(ctx, &mut fx);
        fx
    }

    fn on_speculation_tick(&mut self) -> Effects {
        if self.state != DagState::Running {
            return Effects::none();
        }
        let mut fx = Effects::none();
        for (vertex, state) in &self.vertex_states {
            if *state != VertexState::New && !state.is_terminal() {
                fx.emit(Event::Vertex(*vertex, VertexEvent::CheckSpeculation));
            }
        }
        fx
    }

    fn terminate_vertices(&self, reason: TerminationReason, fx: &mut Effects) {
        for (vertex, state) in &self.vertex_states {
            if !state.is_terminal() {
                fx.emit(Event::Vertex(*vertex, VertexEvent::Terminate(reason)));
            }
        }
    }

    fn check_completion(&mut self, ctx: &Context<'_>, fx: &mut Effects) {
        if self.vertex_states.values().any(|s| !s.is_terminal()) {
            return;
        }

        let outcome = if self.killed_by_user {
            DagState::Killed
        } else if self.errored_vertices > 0 {
            DagState::Error
        } else if self.failed_vertices > 0 {
            DagState::Failed
        } else if self.killed_vertices > 0 {
            DagState::Killed
        } else {
            DagState::Succeeded
        };
        self.finish(outcome, ctx, fx);
    }

    fn finish(&mut self, outcome: DagState, ctx: &Context<'_>, fx: &mut Effects) {
        self.state = outcome;
        self.finished_at = Some(ctx.now);

        if matches!(outcome, DagState::Failed | DagState::Error) {
            let kind = self
                .diagnostics
                .first()
                .map_or(FailureKind::InternalInvariant, |d| d.kind);
            let failed = self.failed_vertices + self.errored_vertices;
            self.diagnostics.insert(
                0,
                Diagnostic::new(
                    kind,
                    self.id,
                    format!("DAG '{}' ended {outcome}: {failed} vertices failed", self.name()),
                ),
            );
            error!(dag = %self.id, name = %self.name(), state = %outcome, "DAG did not succeed");
        } else {
            info!(dag = %self.id, name = %self.name(), state = %outcome, "DAG finished");
        }

        fx.command(CoreCommand::DagFinished {
            dag: self.id,
            state: outcome,
        });
    }

    fn stale(&self, event: &str) -> Effects {
        debug!(dag = %self.id, state = %self.state, event, "dropping DAG event");
        Effects::dropped()
    }
}

impl StateMachine for Dag {
    type State = DagState;
    type Event = DagEvent;

    fn state(&self) -> DagState {
        self.state
    }

    fn last_diagnostic(&self) -> Option<&Diagnostic> {
        self.diagnostics.first()
    }

    fn handle(&mut self, event: DagEvent, ctx: &Context<'_>) -> Effects {
        if self.state.is_terminal() {
            warn!(dag = %self.id, state = %self.state, ?event, "event for finished DAG dropped");
            return Effects::dropped();
        }
        match event {
            DagEvent::Init => self.on_init(ctx),
            DagEvent::Start => self.on_start(ctx),
            DagEvent::VertexCompleted {
                vertex,
                outcome,
                diagnostics,
            } => self.on_vertex_completed(vertex, outcome, diagnostics, ctx),
            DagEvent::Kill => self.on_kill(ctx),
            DagEvent::SpeculationTick => self.on_speculation_tick(),
        }
    }
}
