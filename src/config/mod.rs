// src/config/mod.rs

//! Configuration loading and validation for rundag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a DAG description from disk (`loader.rs`).
//! - Validate it and turn it into a `DagPlan` plus `EngineConfig`
//!   (`validate.rs`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{load_and_validate, load_from_path};
pub use model::{
    DagFile, DagSection, DefaultsSection, EdgeConfig, EngineSection, RawDagFile, VertexConfig,
};
