#![allow(dead_code)]

use rundag::dag::{CommitSpec, DagPlan, EdgePlan, Parallelism, VertexPlan};
use rundag::types::{DataMovement, FailurePolicy, SchedulingPolicy};

/// Builder for `DagPlan` to simplify test setup.
pub struct PlanBuilder {
    plan: DagPlan,
}

impl PlanBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            plan: DagPlan::new(name),
        }
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.plan.failure_policy = policy;
        self
    }

    /// Vertex with a fixed number of tasks.
    pub fn vertex(mut self, name: &str, tasks: u32) -> Self {
        self.plan.vertices.push(VertexPlan::fixed(name, tasks));
        self
    }

    /// Vertex sized by its first incoming edge.
    pub fn derived_vertex(mut self, name: &str) -> Self {
        self.plan
            .vertices
            .push(VertexPlan::new(name, Parallelism::FromSource));
        self
    }

    /// Change the most recently added vertex.
    pub fn with(mut self, f: impl FnOnce(&mut VertexPlan)) -> Self {
        if let Some(v) = self.plan.vertices.last_mut() {
            f(v);
        }
        self
    }

    pub fn max_failed_attempts(self, n: u32) -> Self {
        self.with(|v| v.max_failed_attempts = n)
    }

    pub fn max_failed_tasks(self, n: u32) -> Self {
        self.with(|v| v.max_failed_tasks = n)
    }

    pub fn speculation(self) -> Self {
        self.with(|v| v.speculation = true)
    }

    pub fn output_partitions(self, n: u32) -> Self {
        self.with(|v| v.output_partitions = Some(n))
    }

    pub fn commit(self, command: &str) -> Self {
        let command = command.to_string();
        self.with(move |v| v.commit = Some(CommitSpec { command }))
    }

    pub fn command(self, command: &str) -> Self {
        let command = command.to_string();
        self.with(move |v| v.command = Some(command))
    }

    pub fn edge(
        mut self,
        from: &str,
        to: &str,
        data_movement: DataMovement,
        scheduling: SchedulingPolicy,
    ) -> Self {
        self.plan
            .edges
            .push(EdgePlan::new(from, to, data_movement, scheduling));
        self
    }

    /// SCATTER_GATHER + SEQUENTIAL, the common shuffle edge.
    pub fn shuffle(self, from: &str, to: &str) -> Self {
        self.edge(
            from,
            to,
            DataMovement::ScatterGather,
            SchedulingPolicy::Sequential,
        )
    }

    pub fn build(self) -> DagPlan {
        self.plan
    }
}

/// Linear chain `v1 -> v2 -> ... -> vN` of shuffle edges, each vertex with
/// `tasks` tasks and the given attempt tolerance.
pub fn chain_plan(vertices: usize, tasks: u32, max_failed_attempts: u32) -> DagPlan {
    let mut b = PlanBuilder::new("chain");
    for i in 1..=vertices {
        b = b
            .vertex(&format!("v{i}"), tasks)
            .max_failed_attempts(max_failed_attempts);
    }
    for i in 1..vertices {
        b = b.shuffle(&format!("v{i}"), &format!("v{}", i + 1));
    }
    b.build()
}
