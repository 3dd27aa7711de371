// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::types::{DataMovement, FailurePolicy, SchedulingPolicy};

/// Top-level DAG description as read from a TOML file.
///
/// ```toml
/// [dag]
/// name = "wordcount"
/// failure_policy = "fail_fast"
///
/// [engine]
/// scheduling_timeout = "5m"
/// speculation = true
///
/// [defaults]
/// max_failed_attempts = 3
///
/// [vertex.tokenize]
/// parallelism = 2
/// cmd = "tokenize --part $RUNDAG_TASK_INDEX"
///
/// [vertex.count]
/// cmd = "count"
///
/// [[edge]]
/// from = "tokenize"
/// to = "count"
/// data_movement = "scatter_gather"
/// scheduling = "sequential"
/// ```
///
/// Only `[vertex.<name>]` is required. Use [`DagFile::try_from`] (or
/// `config::load_and_validate`) to obtain a checked [`DagFile`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawDagFile {
    #[serde(default)]
    pub dag: DagSection,

    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub defaults: DefaultsSection,

    /// Keys are vertex names. Vertices are numbered in name order.
    #[serde(default)]
    pub vertex: BTreeMap<String, VertexConfig>,

    #[serde(default)]
    pub edge: Vec<EdgeConfig>,
}

/// `[dag]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DagSection {
    #[serde(default = "default_dag_name")]
    pub name: String,

    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_dag_name() -> String {
    "dag".to_string()
}

impl Default for DagSection {
    fn default() -> Self {
        Self {
            name: default_dag_name(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// `[engine]` section. Durations are strings such as `"250ms"` or `"5m"`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineSection {
    #[serde(default)]
    pub scheduling_timeout: Option<String>,

    /// Cap on outstanding worker requests plus held workers.
    #[serde(default)]
    pub max_concurrent_workers: Option<usize>,

    #[serde(default)]
    pub speculation: bool,

    #[serde(default)]
    pub speculation_interval: Option<String>,

    #[serde(default)]
    pub slow_task_factor: Option<f64>,

    #[serde(default)]
    pub min_completed_fraction: Option<f64>,

    #[serde(default)]
    pub dynamic_parallelism_threshold: Option<f64>,
}

/// `[defaults]` section, applied to vertices that do not override a value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultsSection {
    #[serde(default)]
    pub max_failed_attempts: Option<u32>,

    #[serde(default)]
    pub max_failed_tasks: Option<u32>,

    #[serde(default)]
    pub memory_mb: Option<u32>,

    #[serde(default)]
    pub vcores: Option<u32>,
}

/// `[vertex.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VertexConfig {
    /// Number of tasks. When omitted the vertex is sized by its first
    /// incoming edge.
    #[serde(default)]
    pub parallelism: Option<u32>,

    /// Shell command every task runs. A vertex without one succeeds each
    /// task immediately.
    #[serde(default)]
    pub cmd: Option<String>,

    #[serde(default)]
    pub max_failed_attempts: Option<u32>,

    #[serde(default)]
    pub max_failed_tasks: Option<u32>,

    #[serde(default)]
    pub speculation: Option<bool>,

    #[serde(default)]
    pub output_partitions: Option<u32>,

    /// Runs once all tasks succeeded; its presence enables COMMITTING.
    #[serde(default)]
    pub commit_cmd: Option<String>,

    #[serde(default)]
    pub memory_mb: Option<u32>,

    #[serde(default)]
    pub vcores: Option<u32>,
}

/// `[[edge]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct EdgeConfig {
    pub from: String,
    pub to: String,

    #[serde(default)]
    pub data_movement: DataMovement,

    #[serde(default)]
    pub scheduling: SchedulingPolicy,
}

/// Validated DAG description.
///
/// Only constructed through `TryFrom<RawDagFile>`, so the durations are
/// already parsed and the topology is known to be runnable.
#[derive(Debug, Clone)]
pub struct DagFile {
    pub dag: DagSection,
    pub engine: EngineSection,
    pub defaults: DefaultsSection,
    pub vertex: BTreeMap<String, VertexConfig>,
    pub edge: Vec<EdgeConfig>,
    pub(crate) scheduling_timeout: Option<Duration>,
    pub(crate) speculation_interval: Option<Duration>,
}
