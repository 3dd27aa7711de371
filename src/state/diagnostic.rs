// src/state/diagnostic.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DagError;
use crate::ids::EntityId;

/// Failure categories carried by terminal entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    InvalidDag,
    SchedulingTimeout,
    WorkerExecution,
    Commit,
    InternalInvariant,
    Killed,
    UpstreamFailed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::InvalidDag => "InvalidDagError",
            FailureKind::SchedulingTimeout => "SchedulingTimeoutError",
            FailureKind::WorkerExecution => "WorkerExecutionError",
            FailureKind::Commit => "CommitError",
            FailureKind::InternalInvariant => "InternalInvariantError",
            FailureKind::Killed => "Killed",
            FailureKind::UpstreamFailed => "UpstreamFailed",
        };
        f.write_str(s)
    }
}

impl FromStr for FailureKind {
    type Err = DagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "InvalidDagError" => Ok(FailureKind::InvalidDag),
            "SchedulingTimeoutError" => Ok(FailureKind::SchedulingTimeout),
            "WorkerExecutionError" => Ok(FailureKind::WorkerExecution),
            "CommitError" => Ok(FailureKind::Commit),
            "InternalInvariantError" => Ok(FailureKind::InternalInvariant),
            "Killed" => Ok(FailureKind::Killed),
            "UpstreamFailed" => Ok(FailureKind::UpstreamFailed),
            other => Err(DagError::InternalInvariant(format!(
                "unknown failure kind '{other}'"
            ))),
        }
    }
}

/// One link in a diagnostic chain: what went wrong, and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: FailureKind,
    pub source: EntityId,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: FailureKind, source: impl Into<EntityId>, message: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.source, self.message)
    }
}

/// Parses the `[kind] source: message` form written to history records.
impl FromStr for Diagnostic {
    type Err = DagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || DagError::InternalInvariant(format!("malformed diagnostic '{s}'"));
        let rest = s.trim().strip_prefix('[').ok_or_else(bad)?;
        let (kind, rest) = rest.split_once("] ").ok_or_else(bad)?;
        let (source, message) = rest.split_once(": ").ok_or_else(bad)?;
        Ok(Diagnostic {
            kind: kind.parse()?,
            source: source.parse()?,
            message: message.to_string(),
        })
    }
}

impl From<&Diagnostic> for DagError {
    fn from(d: &Diagnostic) -> Self {
        let msg = d.to_string();
        match d.kind {
            FailureKind::InvalidDag => DagError::InvalidDag(msg),
            FailureKind::SchedulingTimeout => DagError::SchedulingTimeout(msg),
            FailureKind::WorkerExecution => DagError::WorkerExecution(msg),
            FailureKind::Commit => DagError::Commit(msg),
            FailureKind::InternalInvariant
            | FailureKind::Killed
            | FailureKind::UpstreamFailed => DagError::InternalInvariant(msg),
        }
    }
}
