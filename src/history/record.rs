// src/history/record.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{DagId, EntityId};

/// One state transition of one entity, as written to the history log.
///
/// A creation is recorded with `from: None`. Records of one DAG are written
/// in the order the transitions happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub dag: DagId,
    pub entity: EntityId,
    #[serde(rename = "entitytype")]
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub to: String,
    pub at: DateTime<Utc>,
    /// Event that caused the transition.
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl TransitionRecord {
    pub fn new(
        entity: EntityId,
        from: Option<String>,
        to: impl Into<String>,
        at: DateTime<Utc>,
        event: impl Into<String>,
    ) -> Self {
        Self {
            dag: entity.dag(),
            entity_type: entity.kind().to_string(),
            entity,
            from,
            to: to.into(),
            at,
            event: event.into(),
            diagnostic: None,
        }
    }

    pub fn with_diagnostic(mut self, diagnostic: Option<String>) -> Self {
        self.diagnostic = diagnostic;
        self
    }

    pub fn is_creation(&self) -> bool {
        self.from.is_none()
    }
}
