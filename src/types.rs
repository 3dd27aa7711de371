use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Named integer counters reported by attempts (e.g. `OUTPUT_PARTITIONS`).
pub type Counters = BTreeMap<String, i64>;

/// Counter a task reports to size dependents with derived parallelism.
pub const OUTPUT_PARTITIONS_COUNTER: &str = "OUTPUT_PARTITIONS";

/// How a source vertex's outputs map onto a destination vertex's inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataMovement {
    /// Task `i` of the destination reads only task `i` of the source.
    OneToOne,
    /// Every destination task reads every source task's full output.
    Broadcast,
    /// Source outputs are partitioned; destination task `i` gathers
    /// partition `i` from every source task.
    ScatterGather,
}

/// When a destination vertex may begin scheduling relative to its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingPolicy {
    /// Start only after the source vertex has SUCCEEDED.
    Sequential,
    /// Start as soon as the source vertex is producing output.
    Concurrent,
}

/// What the DAG does when one of its vertices fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Kill every other non-terminal vertex immediately.
    FailFast,
    /// Let unrelated vertices finish; only dependents of the failed vertex
    /// are killed.
    FailSlow,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::FailFast
    }
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        SchedulingPolicy::Sequential
    }
}

impl Default for DataMovement {
    fn default() -> Self {
        DataMovement::ScatterGather
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "fail_fast" => Ok(FailurePolicy::FailFast),
            "fail_slow" => Ok(FailurePolicy::FailSlow),
            other => Err(format!(
                "invalid failure_policy: {other} (expected \"fail_fast\" or \"fail_slow\")"
            )),
        }
    }
}

impl fmt::Display for DataMovement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataMovement::OneToOne => write!(f, "ONE_TO_ONE"),
            DataMovement::Broadcast => write!(f, "BROADCAST"),
            DataMovement::ScatterGather => write!(f, "SCATTER_GATHER"),
        }
    }
}

impl fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingPolicy::Sequential => write!(f, "SEQUENTIAL"),
            SchedulingPolicy::Concurrent => write!(f, "CONCURRENT"),
        }
    }
}

/// Resources requested for each task of a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub memory_mb: u32,
    pub vcores: u32,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            memory_mb: 1024,
            vcores: 1,
        }
    }
}

impl fmt::Display for ResourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<memory:{}MB, vcores:{}>", self.memory_mb, self.vcores)
    }
}
