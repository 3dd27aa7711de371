// src/dag/mod.rs

//! Graph topology handed to the engine.
//!
//! - [`plan`] holds the graph builder's output: vertices, edges and their
//!   data-movement / scheduling policies.
//! - [`validate`] rejects topologies the engine cannot run.
//! - [`graph`] provides adjacency and depth lookups over a validated plan.

pub mod graph;
pub mod plan;
pub mod validate;

pub use graph::DagGraph;
pub use plan::{CommitSpec, DagPlan, EdgePlan, Parallelism, VertexPlan};
