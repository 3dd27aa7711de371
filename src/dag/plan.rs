// src/dag/plan.rs

//! Validated-topology input handed to the engine at submission time.

use serde::{Deserialize, Serialize};

use crate::types::{DataMovement, FailurePolicy, ResourceSpec, SchedulingPolicy};

/// Default number of attempts that may fail before a task is failed.
pub const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 3;

/// How many tasks a vertex fans out into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parallelism {
    /// Known when the graph is built.
    Fixed(u32),
    /// Derived at runtime from an incoming edge: inherited from a
    /// ONE_TO_ONE source, otherwise computed from the source's output
    /// partition count once enough of its tasks have completed.
    FromSource,
}

/// Output commit step run once every task of a vertex has succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSpec {
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexPlan {
    pub name: String,
    pub parallelism: Parallelism,
    /// Command each task runs (interpreted by the worker runtime).
    pub command: Option<String>,
    pub resource: ResourceSpec,
    pub max_failed_attempts: u32,
    /// Number of failed tasks the vertex tolerates before failing itself.
    pub max_failed_tasks: u32,
    pub speculation: bool,
    /// Declared number of output partitions, used to size dependents whose
    /// parallelism comes from this vertex.
    pub output_partitions: Option<u32>,
    pub commit: Option<CommitSpec>,
}

impl VertexPlan {
    pub fn new(name: impl Into<String>, parallelism: Parallelism) -> Self {
        Self {
            name: name.into(),
            parallelism,
            command: None,
            resource: ResourceSpec::default(),
            max_failed_attempts: DEFAULT_MAX_FAILED_ATTEMPTS,
            max_failed_tasks: 0,
            speculation: false,
            output_partitions: None,
            commit: None,
        }
    }

    pub fn fixed(name: impl Into<String>, tasks: u32) -> Self {
        Self::new(name, Parallelism::Fixed(tasks))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgePlan {
    pub from: String,
    pub to: String,
    pub data_movement: DataMovement,
    pub scheduling: SchedulingPolicy,
}

impl EdgePlan {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        data_movement: DataMovement,
        scheduling: SchedulingPolicy,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            data_movement,
            scheduling,
        }
    }
}

/// The graph builder's output: vertices in submission order plus edges.
///
/// Vertex sequence numbers are assigned from the position in `vertices`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagPlan {
    pub name: String,
    pub failure_policy: FailurePolicy,
    pub vertices: Vec<VertexPlan>,
    pub edges: Vec<EdgePlan>,
}

impl DagPlan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure_policy: FailurePolicy::default(),
            vertices: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn vertex_index(&self, name: &str) -> Option<usize> {
        self.vertices.iter().position(|v| v.name == name)
    }
}
