use std::collections::{HashMap, VecDeque};

use crate::dag::plan::{DagPlan, EdgePlan};

/// Internal node structure: stores immediate incoming and outgoing edges.
#[derive(Debug, Clone, Default)]
struct DagNode {
    /// Indices into the plan's edge list whose `to` is this vertex.
    incoming: Vec<usize>,
    /// Indices into the plan's edge list whose `from` is this vertex.
    outgoing: Vec<usize>,
}

/// In-memory adjacency over a validated [`DagPlan`], keyed by vertex index.
///
/// Acyclicity and endpoint existence are checked by
/// [`DagPlan::validate`](crate::dag::plan::DagPlan); this type only keeps
/// the information needed to wire vertices together and to prioritise
/// scheduling.
#[derive(Debug, Clone)]
pub struct DagGraph {
    nodes: Vec<DagNode>,
    edges: Vec<EdgePlan>,
    by_name: HashMap<String, usize>,
    depth: Vec<u32>,
}

impl DagGraph {
    /// Build adjacency for a plan. Assumes the plan has been validated.
    pub fn from_plan(plan: &DagPlan) -> Self {
        let by_name: HashMap<String, usize> = plan
            .vertices
            .iter()
            .enumerate()
            .map(|(i, v)| (v.name.clone(), i))
            .collect();

        let mut nodes = vec![DagNode::default(); plan.vertices.len()];
        for (ei, edge) in plan.edges.iter().enumerate() {
            if let (Some(&from), Some(&to)) = (by_name.get(&edge.from), by_name.get(&edge.to)) {
                nodes[from].outgoing.push(ei);
                nodes[to].incoming.push(ei);
            }
        }

        let mut graph = Self {
            nodes,
            edges: plan.edges.clone(),
            by_name,
            depth: Vec::new(),
        };
        graph.depth = graph.compute_depths();
        graph
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Incoming edges of a vertex, as `(source index, edge)`.
    pub fn sources_of(&self, idx: usize) -> Vec<(usize, &EdgePlan)> {
        self.nodes
            .get(idx)
            .map(|n| {
                n.incoming
                    .iter()
                    .filter_map(|&ei| {
                        let edge = &self.edges[ei];
                        self.index_of(&edge.from).map(|src| (src, edge))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Outgoing edges of a vertex, as `(destination index, edge)`.
    pub fn destinations_of(&self, idx: usize) -> Vec<(usize, &EdgePlan)> {
        self.nodes
            .get(idx)
            .map(|n| {
                n.outgoing
                    .iter()
                    .filter_map(|&ei| {
                        let edge = &self.edges[ei];
                        self.index_of(&edge.to).map(|dst| (dst, edge))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Vertices with no incoming edges, in plan order.
    pub fn roots(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&i| self.nodes[i].incoming.is_empty())
            .collect()
    }

    /// Longest distance from any root. Used as scheduling priority: lower
    /// depth is scheduled first.
    pub fn depth_of(&self, idx: usize) -> u32 {
        self.depth.get(idx).copied().unwrap_or(0)
    }

    fn compute_depths(&self) -> Vec<u32> {
        let n = self.nodes.len();
        let mut depth = vec![0u32; n];
        let mut remaining: Vec<usize> = self.nodes.iter().map(|node| node.incoming.len()).collect();
        let mut ready: VecDeque<usize> = (0..n).filter(|&i| remaining[i] == 0).collect();

        // Kahn's algorithm; on a validated plan every node is visited.
        while let Some(i) = ready.pop_front() {
            for (dst, _) in self.destinations_of(i) {
                depth[dst] = depth[dst].max(depth[i] + 1);
                remaining[dst] -= 1;
                if remaining[dst] == 0 {
                    ready.push_back(dst);
                }
            }
        }

        depth
    }
}
