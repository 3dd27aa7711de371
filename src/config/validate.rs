// src/config/validate.rs

use std::time::Duration;

use crate::config::duration::parse_duration;
use crate::config::model::{DagFile, RawDagFile};
use crate::dag::{CommitSpec, DagPlan, EdgePlan, Parallelism, VertexPlan};
use crate::dag::plan::DEFAULT_MAX_FAILED_ATTEMPTS;
use crate::engine::{EngineConfig, SpeculationConfig};
use crate::engine::options::DEFAULT_SCHEDULING_TIMEOUT;
use crate::errors::{DagError, Result};
use crate::types::ResourceSpec;

impl TryFrom<RawDagFile> for DagFile {
    type Error = DagError;

    fn try_from(raw: RawDagFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;

        let scheduling_timeout = optional_duration("scheduling_timeout", &raw.engine.scheduling_timeout)?;
        let speculation_interval =
            optional_duration("speculation_interval", &raw.engine.speculation_interval)?;
        if scheduling_timeout == Some(Duration::ZERO) || speculation_interval == Some(Duration::ZERO) {
            return Err(DagError::Config(
                "[engine] durations must be greater than zero".to_string(),
            ));
        }

        let file = DagFile {
            dag: raw.dag,
            engine: raw.engine,
            defaults: raw.defaults,
            vertex: raw.vertex,
            edge: raw.edge,
            scheduling_timeout,
            speculation_interval,
        };

        // Cycles, ONE_TO_ONE mismatches and unsized vertices.
        file.to_plan().validate()?;
        Ok(file)
    }
}

impl DagFile {
    /// The graph handed to the engine.
    pub fn to_plan(&self) -> DagPlan {
        let defaults = &self.defaults;
        let mut plan = DagPlan::new(self.dag.name.clone());
        plan.failure_policy = self.dag.failure_policy;

        for (name, v) in &self.vertex {
            let fallback = ResourceSpec::default();
            plan.vertices.push(VertexPlan {
                name: name.clone(),
                parallelism: v.parallelism.map_or(Parallelism::FromSource, Parallelism::Fixed),
                command: v.cmd.clone(),
                resource: ResourceSpec {
                    memory_mb: v.memory_mb.or(defaults.memory_mb).unwrap_or(fallback.memory_mb),
                    vcores: v.vcores.or(defaults.vcores).unwrap_or(fallback.vcores),
                },
                max_failed_attempts: v
                    .max_failed_attempts
                    .or(defaults.max_failed_attempts)
                    .unwrap_or(DEFAULT_MAX_FAILED_ATTEMPTS),
                max_failed_tasks: v.max_failed_tasks.or(defaults.max_failed_tasks).unwrap_or(0),
                speculation: v.speculation.unwrap_or(self.engine.speculation),
                output_partitions: v.output_partitions,
                commit: v.commit_cmd.clone().map(|command| CommitSpec { command }),
            });
        }

        for e in &self.edge {
            plan.edges
                .push(EdgePlan::new(&e.from, &e.to, e.data_movement, e.scheduling));
        }
        plan
    }

    /// Engine tunables, with defaults for everything the file leaves out.
    pub fn engine_config(&self) -> EngineConfig {
        let engine = &self.engine;
        let spec_defaults = SpeculationConfig::default();
        let defaults = EngineConfig::default();
        EngineConfig {
            scheduling_timeout: self.scheduling_timeout.unwrap_or(DEFAULT_SCHEDULING_TIMEOUT),
            max_concurrent_workers: engine.max_concurrent_workers,
            dynamic_parallelism_threshold: engine
                .dynamic_parallelism_threshold
                .unwrap_or(defaults.dynamic_parallelism_threshold),
            speculation: SpeculationConfig {
                enabled: engine.speculation,
                interval: self.speculation_interval.unwrap_or(spec_defaults.interval),
                slow_task_factor: engine
                    .slow_task_factor
                    .unwrap_or(spec_defaults.slow_task_factor),
                min_completed_fraction: engine
                    .min_completed_fraction
                    .unwrap_or(spec_defaults.min_completed_fraction),
            },
        }
    }
}

fn optional_duration(key: &str, value: &Option<String>) -> Result<Option<Duration>> {
    value
        .as_deref()
        .map(|s| {
            parse_duration(s).map_err(|e| DagError::Config(format!("[engine].{key}: {e}")))
        })
        .transpose()
}

fn validate_raw_config(cfg: &RawDagFile) -> Result<()> {
    ensure_has_vertices(cfg)?;
    validate_engine_section(cfg)?;
    validate_edges(cfg)?;
    Ok(())
}

fn ensure_has_vertices(cfg: &RawDagFile) -> Result<()> {
    if cfg.vertex.is_empty() {
        return Err(DagError::Config(
            "config must contain at least one [vertex.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_engine_section(cfg: &RawDagFile) -> Result<()> {
    let engine = &cfg.engine;

    if engine.max_concurrent_workers == Some(0) {
        return Err(DagError::Config(
            "[engine].max_concurrent_workers must be >= 1 (got 0)".to_string(),
        ));
    }
    if let Some(f) = engine.slow_task_factor {
        if !(f.is_finite() && f > 0.0) {
            return Err(DagError::Config(format!(
                "[engine].slow_task_factor must be a positive number (got {f})"
            )));
        }
    }
    for (key, value) in [
        ("min_completed_fraction", engine.min_completed_fraction),
        ("dynamic_parallelism_threshold", engine.dynamic_parallelism_threshold),
    ] {
        if let Some(v) = value {
            if !(0.0..=1.0).contains(&v) {
                return Err(DagError::Config(format!(
                    "[engine].{key} must be between 0 and 1 (got {v})"
                )));
            }
        }
    }
    Ok(())
}

fn validate_edges(cfg: &RawDagFile) -> Result<()> {
    for edge in &cfg.edge {
        for end in [&edge.from, &edge.to] {
            if !cfg.vertex.contains_key(end) {
                return Err(DagError::Config(format!(
                    "edge {} -> {} names unknown vertex '{}'",
                    edge.from, edge.to, end
                )));
            }
        }
        if edge.from == edge.to {
            return Err(DagError::Config(format!(
                "vertex '{}' cannot have an edge to itself",
                edge.from
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataMovement, FailurePolicy, SchedulingPolicy};

    fn parse(toml_src: &str) -> Result<DagFile> {
        let raw: RawDagFile = toml::from_str(toml_src)?;
        DagFile::try_from(raw)
    }

    #[test]
    fn full_file_maps_to_plan_and_engine_config() {
        let file = parse(
            r#"
            [dag]
            name = "wordcount"
            failure_policy = "fail_slow"

            [engine]
            scheduling_timeout = "30s"
            max_concurrent_workers = 4
            speculation = true
            speculation_interval = "500ms"
            dynamic_parallelism_threshold = 0.5

            [defaults]
            max_failed_attempts = 2
            memory_mb = 512

            [vertex.tokenize]
            parallelism = 2
            cmd = "echo tokenize"
            output_partitions = 4

            [vertex.count]
            cmd = "echo count"
            max_failed_attempts = 5
            commit_cmd = "true"

            [[edge]]
            from = "tokenize"
            to = "count"
            "#,
        )
        .unwrap();

        let plan = file.to_plan();
        assert_eq!(plan.name, "wordcount");
        assert_eq!(plan.failure_policy, FailurePolicy::FailSlow);
        // Name order.
        assert_eq!(plan.vertices[0].name, "count");
        assert_eq!(plan.vertices[0].parallelism, Parallelism::FromSource);
        assert_eq!(plan.vertices[0].max_failed_attempts, 5);
        assert!(plan.vertices[0].commit.is_some());
        assert_eq!(plan.vertices[1].parallelism, Parallelism::Fixed(2));
        assert_eq!(plan.vertices[1].max_failed_attempts, 2);
        assert_eq!(plan.vertices[1].resource.memory_mb, 512);
        assert!(plan.vertices[1].speculation);
        assert_eq!(plan.edges[0].data_movement, DataMovement::ScatterGather);
        assert_eq!(plan.edges[0].scheduling, SchedulingPolicy::Sequential);

        let engine = file.engine_config();
        assert_eq!(engine.scheduling_timeout, Duration::from_secs(30));
        assert_eq!(engine.max_concurrent_workers, Some(4));
        assert!(engine.speculation.enabled);
        assert_eq!(engine.speculation.interval, Duration::from_millis(500));
        assert_eq!(engine.dynamic_parallelism_threshold, 0.5);
    }

    #[test]
    fn defaults_fill_an_almost_empty_file() {
        let file = parse("[vertex.only]\nparallelism = 1\n").unwrap();
        assert_eq!(file.engine_config(), EngineConfig::default());
        let plan = file.to_plan();
        assert_eq!(plan.name, "dag");
        assert_eq!(plan.vertices[0].max_failed_attempts, DEFAULT_MAX_FAILED_ATTEMPTS);
    }

    #[test]
    fn rejects_file_without_vertices() {
        let err = parse("[dag]\nname = \"x\"\n").unwrap_err();
        assert!(matches!(err, DagError::Config(_)));
    }

    #[test]
    fn rejects_unknown_edge_endpoint_and_self_edges() {
        let err = parse(
            "[vertex.a]\nparallelism = 1\n[[edge]]\nfrom = \"a\"\nto = \"b\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, DagError::Config(msg) if msg.contains("'b'")));

        let err = parse(
            "[vertex.a]\nparallelism = 1\n[[edge]]\nfrom = \"a\"\nto = \"a\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, DagError::Config(_)));
    }

    #[test]
    fn rejects_cycles_as_invalid_dag() {
        let err = parse(
            r#"
            [vertex.a]
            parallelism = 1
            [vertex.b]
            parallelism = 1
            [[edge]]
            from = "a"
            to = "b"
            [[edge]]
            from = "b"
            to = "a"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, DagError::InvalidDag(_)));
    }

    #[test]
    fn rejects_bad_engine_values() {
        for src in [
            "[engine]\nscheduling_timeout = \"10\"\n[vertex.a]\nparallelism = 1\n",
            "[engine]\nscheduling_timeout = \"0s\"\n[vertex.a]\nparallelism = 1\n",
            "[engine]\nmax_concurrent_workers = 0\n[vertex.a]\nparallelism = 1\n",
            "[engine]\nslow_task_factor = -1.0\n[vertex.a]\nparallelism = 1\n",
            "[engine]\nmin_completed_fraction = 1.5\n[vertex.a]\nparallelism = 1\n",
        ] {
            let err = parse(src).unwrap_err();
            assert!(matches!(err, DagError::Config(_)), "{src}: {err}");
        }
    }

    #[test]
    fn unknown_policy_fails_to_deserialize() {
        let err = parse("[dag]\nfailure_policy = \"fail_later\"\n[vertex.a]\nparallelism = 1\n")
            .unwrap_err();
        assert!(matches!(err, DagError::Toml(_)));
    }
}
