// src/engine/status.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ids::{DagId, EntityId, VertexId};
use crate::state::{DagState, Diagnostic, VertexState};

/// Answer to a status query.
#[derive(Debug, Clone, Serialize)]
pub struct DagStatus {
    pub dag: DagId,
    pub name: String,
    pub state: DagState,
    /// Mean of the vertex progress values.
    pub progress: f32,
    pub vertices: Vec<VertexStatus>,
    /// Diagnostic chain, outermost first.
    pub diagnostics: Vec<Diagnostic>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DagStatus {
    /// The innermost diagnostic: the failure that started the chain.
    pub fn deepest_diagnostic(&self) -> Option<&Diagnostic> {
        self.diagnostics.last()
    }

    pub fn vertex(&self, name: &str) -> Option<&VertexStatus> {
        self.vertices.iter().find(|v| v.name == name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VertexStatus {
    pub id: VertexId,
    pub name: String,
    pub state: VertexState,
    pub parallelism: Option<u32>,
    pub succeeded_tasks: u32,
    pub failed_tasks: u32,
    pub killed_tasks: u32,
    pub running_tasks: u32,
    pub failed_attempts: u32,
    pub killed_attempts: u32,
    pub progress: f32,
}

/// State label of every entity of a run, for comparing runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StateSnapshot(pub BTreeMap<EntityId, String>);

impl StateSnapshot {
    pub fn get(&self, id: impl Into<EntityId>) -> Option<&str> {
        self.0.get(&id.into()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
