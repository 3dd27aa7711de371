// src/ids.rs

//! Entity identifiers.
//!
//! Ids form a strict containment hierarchy (`DagId -> VertexId -> TaskId ->
//! AttemptId`). Each id carries its parent plus a sequence number, is `Copy`,
//! orders by (parent, seq) and renders as a stable string:
//!
//! ```text
//! dag_1700000000000_1
//! vertex_1700000000000_1_02
//! task_1700000000000_1_02_000007
//! attempt_1700000000000_1_02_000007_1
//! ```
//!
//! The string form is what goes into history records and logs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::DagError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DagId {
    /// Engine session (usually the engine start time in epoch millis).
    pub session: u64,
    pub seq: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VertexId {
    pub dag: DagId,
    pub seq: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId {
    pub vertex: VertexId,
    pub seq: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttemptId {
    pub task: TaskId,
    pub seq: u32,
}

impl DagId {
    pub fn new(session: u64, seq: u32) -> Self {
        Self { session, seq }
    }

    pub fn vertex(self, seq: u32) -> VertexId {
        VertexId { dag: self, seq }
    }
}

impl VertexId {
    pub fn dag(self) -> DagId {
        self.dag
    }

    pub fn task(self, seq: u32) -> TaskId {
        TaskId { vertex: self, seq }
    }
}

impl TaskId {
    pub fn vertex(self) -> VertexId {
        self.vertex
    }

    pub fn dag(self) -> DagId {
        self.vertex.dag
    }

    pub fn attempt(self, seq: u32) -> AttemptId {
        AttemptId { task: self, seq }
    }
}

impl AttemptId {
    pub fn task(self) -> TaskId {
        self.task
    }

    pub fn vertex(self) -> VertexId {
        self.task.vertex
    }

    pub fn dag(self) -> DagId {
        self.task.vertex.dag
    }
}

impl fmt::Display for DagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dag_{}_{}", self.session, self.seq)
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "vertex_{}_{}_{:02}",
            self.dag.session, self.dag.seq, self.seq
        )
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.vertex;
        write!(
            f,
            "task_{}_{}_{:02}_{:06}",
            v.dag.session, v.dag.seq, v.seq, self.seq
        )
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.task;
        let v = t.vertex;
        write!(
            f,
            "attempt_{}_{}_{:02}_{:06}_{}",
            v.dag.session, v.dag.seq, v.seq, t.seq, self.seq
        )
    }
}

/// Split `prefix_a_b_c` into its numeric parts, checking the prefix and the
/// expected number of components.
fn numeric_parts(s: &str, prefix: &str, expected: usize) -> Result<Vec<u64>, DagError> {
    let mut parts = s.trim().split('_');
    if parts.next() != Some(prefix) {
        return Err(DagError::InvalidId(format!(
            "'{s}' does not start with '{prefix}_'"
        )));
    }

    let nums = parts
        .map(|p| {
            p.parse::<u64>()
                .map_err(|e| DagError::InvalidId(format!("'{s}': bad component '{p}': {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if nums.len() != expected {
        return Err(DagError::InvalidId(format!(
            "'{s}': expected {expected} numeric components, got {}",
            nums.len()
        )));
    }

    Ok(nums)
}

fn narrow(s: &str, value: u64) -> Result<u32, DagError> {
    u32::try_from(value)
        .map_err(|_| DagError::InvalidId(format!("'{s}': component {value} out of range")))
}

impl FromStr for DagId {
    type Err = DagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n = numeric_parts(s, "dag", 2)?;
        Ok(DagId::new(n[0], narrow(s, n[1])?))
    }
}

impl FromStr for VertexId {
    type Err = DagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n = numeric_parts(s, "vertex", 3)?;
        Ok(DagId::new(n[0], narrow(s, n[1])?).vertex(narrow(s, n[2])?))
    }
}

impl FromStr for TaskId {
    type Err = DagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n = numeric_parts(s, "task", 4)?;
        Ok(DagId::new(n[0], narrow(s, n[1])?)
            .vertex(narrow(s, n[2])?)
            .task(narrow(s, n[3])?))
    }
}

impl FromStr for AttemptId {
    type Err = DagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n = numeric_parts(s, "attempt", 5)?;
        Ok(DagId::new(n[0], narrow(s, n[1])?)
            .vertex(narrow(s, n[2])?)
            .task(narrow(s, n[3])?)
            .attempt(narrow(s, n[4])?))
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(DagId);
string_serde!(VertexId);
string_serde!(TaskId);
string_serde!(AttemptId);

/// Any entity id, tagged with its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityId {
    Dag(DagId),
    Vertex(VertexId),
    Task(TaskId),
    Attempt(AttemptId),
}

impl EntityId {
    pub fn dag(&self) -> DagId {
        match self {
            EntityId::Dag(id) => *id,
            EntityId::Vertex(id) => id.dag(),
            EntityId::Task(id) => id.dag(),
            EntityId::Attempt(id) => id.dag(),
        }
    }

    /// Entity type label used in history records.
    pub fn kind(&self) -> &'static str {
        match self {
            EntityId::Dag(_) => "DAG",
            EntityId::Vertex(_) => "VERTEX",
            EntityId::Task(_) => "TASK",
            EntityId::Attempt(_) => "TASK_ATTEMPT",
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Dag(id) => id.fmt(f),
            EntityId::Vertex(id) => id.fmt(f),
            EntityId::Task(id) => id.fmt(f),
            EntityId::Attempt(id) => id.fmt(f),
        }
    }
}

impl FromStr for EntityId {
    type Err = DagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split('_').next() {
            Some("dag") => Ok(EntityId::Dag(s.parse()?)),
            Some("vertex") => Ok(EntityId::Vertex(s.parse()?)),
            Some("task") => Ok(EntityId::Task(s.parse()?)),
            Some("attempt") => Ok(EntityId::Attempt(s.parse()?)),
            _ => Err(DagError::InvalidId(format!("unknown entity id '{s}'"))),
        }
    }
}

string_serde!(EntityId);

impl From<DagId> for EntityId {
    fn from(id: DagId) -> Self {
        EntityId::Dag(id)
    }
}

impl From<VertexId> for EntityId {
    fn from(id: VertexId) -> Self {
        EntityId::Vertex(id)
    }
}

impl From<TaskId> for EntityId {
    fn from(id: TaskId) -> Self {
        EntityId::Task(id)
    }
}

impl From<AttemptId> for EntityId {
    fn from(id: AttemptId) -> Self {
        EntityId::Attempt(id)
    }
}

/// Opaque handle to a cluster-allocated execution slot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerRef(pub String);

impl WorkerRef {
    pub fn new(id: impl Into<String>) -> Self {
        WorkerRef(id.into())
    }
}

impl fmt::Display for WorkerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
