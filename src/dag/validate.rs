// src/dag/validate.rs

use std::collections::HashSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::plan::{DagPlan, Parallelism};
use crate::errors::{DagError, Result};
use crate::types::DataMovement;

impl DagPlan {
    /// Check that the topology can be executed.
    ///
    /// Rejects empty graphs, duplicate vertex names, dangling or duplicate
    /// edges, self edges, cycles, `FromSource` parallelism without an
    /// incoming edge, and ONE_TO_ONE edges joining two fixed parallelisms
    /// that disagree.
    pub fn validate(&self) -> Result<()> {
        ensure_has_vertices(self)?;
        validate_vertex_names(self)?;
        validate_edges(self)?;
        validate_acyclic(self)?;
        validate_parallelism(self)?;
        Ok(())
    }
}

fn ensure_has_vertices(plan: &DagPlan) -> Result<()> {
    if plan.vertices.is_empty() {
        return Err(DagError::InvalidDag(format!(
            "DAG '{}' must contain at least one vertex",
            plan.name
        )));
    }
    Ok(())
}

fn validate_vertex_names(plan: &DagPlan) -> Result<()> {
    let mut seen = HashSet::new();
    for v in &plan.vertices {
        if v.name.trim().is_empty() {
            return Err(DagError::InvalidDag("vertex name must not be empty".to_string()));
        }
        if !seen.insert(v.name.as_str()) {
            return Err(DagError::InvalidDag(format!(
                "duplicate vertex name '{}'",
                v.name
            )));
        }
    }
    Ok(())
}

fn validate_edges(plan: &DagPlan) -> Result<()> {
    let mut seen = HashSet::new();
    for edge in &plan.edges {
        for endpoint in [&edge.from, &edge.to] {
            if plan.vertex_index(endpoint).is_none() {
                return Err(DagError::InvalidDag(format!(
                    "edge {} -> {} references unknown vertex '{}'",
                    edge.from, edge.to, endpoint
                )));
            }
        }
        if edge.from == edge.to {
            return Err(DagError::InvalidDag(format!(
                "vertex '{}' cannot have an edge to itself",
                edge.from
            )));
        }
        if !seen.insert((edge.from.as_str(), edge.to.as_str())) {
            return Err(DagError::InvalidDag(format!(
                "duplicate edge {} -> {}",
                edge.from, edge.to
            )));
        }
    }
    Ok(())
}

fn validate_acyclic(plan: &DagPlan) -> Result<()> {
    // Edge direction: source -> destination.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for v in &plan.vertices {
        graph.add_node(v.name.as_str());
    }
    for edge in &plan.edges {
        graph.add_edge(edge.from.as_str(), edge.to.as_str(), ());
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(DagError::InvalidDag(format!(
            "cycle detected in DAG '{}' involving vertex '{}'",
            plan.name,
            cycle.node_id()
        ))),
    }
}

fn validate_parallelism(plan: &DagPlan) -> Result<()> {
    for v in &plan.vertices {
        let incoming: Vec<_> = plan.edges.iter().filter(|e| e.to == v.name).collect();

        if v.parallelism == Parallelism::FromSource && incoming.is_empty() {
            return Err(DagError::InvalidDag(format!(
                "vertex '{}' derives its parallelism from a source but has no incoming edge",
                v.name
            )));
        }

        let Parallelism::Fixed(own) = v.parallelism else {
            continue;
        };

        for edge in incoming
            .iter()
            .filter(|e| e.data_movement == DataMovement::OneToOne)
        {
            let Some(src) = plan.vertex_index(&edge.from).map(|i| &plan.vertices[i]) else {
                continue;
            };
            if let Parallelism::Fixed(theirs) = src.parallelism {
                if theirs != own {
                    return Err(DagError::InvalidDag(format!(
                        "ONE_TO_ONE edge {} -> {} joins parallelism {} with {}",
                        edge.from, edge.to, theirs, own
                    )));
                }
            }
        }
    }
    Ok(())
}
