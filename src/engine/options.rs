// src/engine/options.rs

use std::time::Duration;

/// Default time an attempt may wait for a worker before it is failed.
pub const DEFAULT_SCHEDULING_TIMEOUT: Duration = Duration::from_secs(300);

/// Engine tunables shared by the core and every handler.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub scheduling_timeout: Duration,
    /// Upper bound on outstanding worker requests plus held workers, per DAG.
    pub max_concurrent_workers: Option<usize>,
    /// Fraction of a source vertex's tasks that must complete before it
    /// sizes a destination with derived parallelism. `0.0` means the first
    /// completed task.
    pub dynamic_parallelism_threshold: f64,
    pub speculation: SpeculationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduling_timeout: DEFAULT_SCHEDULING_TIMEOUT,
            max_concurrent_workers: None,
            dynamic_parallelism_threshold: 0.0,
            speculation: SpeculationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeculationConfig {
    pub enabled: bool,
    /// How often the runtime asks every DAG to look for slow tasks.
    pub interval: Duration,
    /// A running attempt is slow once it exceeds this multiple of the
    /// vertex's mean successful task duration.
    pub slow_task_factor: f64,
    /// Fraction of the vertex's tasks that must have succeeded before the
    /// mean is trusted.
    pub min_completed_fraction: f64,
}

impl Default for SpeculationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(1),
            slow_task_factor: 2.0,
            min_completed_fraction: 0.5,
        }
    }
}

/// Runtime options used by the async shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeOptions {
    /// Exit the runtime once every submitted DAG is terminal.
    pub exit_when_idle: bool,
}
