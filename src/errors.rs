// src/errors.rs

//! Crate-wide error type.
//!
//! The first five variants mirror the engine's failure taxonomy. Inside the
//! event loop those conditions are carried as [`Diagnostic`]s on terminal
//! entities rather than returned; `DagError` is what the public API
//! (submission, config loading, status queries, history IO) returns.
//!
//! [`Diagnostic`]: crate::state::Diagnostic

use thiserror::Error;

use crate::ids::DagId;

#[derive(Error, Debug)]
pub enum DagError {
    #[error("Invalid DAG: {0}")]
    InvalidDag(String),

    #[error("Scheduling timeout: {0}")]
    SchedulingTimeout(String),

    #[error("Worker execution error: {0}")]
    WorkerExecution(String),

    #[error("Commit error: {0}")]
    Commit(String),

    #[error("Internal invariant violated: {0}")]
    InternalInvariant(String),

    #[error("DAG not found: {0}")]
    DagNotFound(DagId),

    #[error("Invalid entity id: {0}")]
    InvalidId(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, DagError>;
