//! Structured run events
//!
//! Every item-level failure in a pipeline run is captured as a [`RunEvent`]
//! rather than propagated. Observability tooling consumes the list returned
//! with the run result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline stage that produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Chunking,
    EntityExtraction,
    Embedding,
    Consumer,
    EntityDedup,
    RelationExtraction,
    RelationDedup,
    Sink,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chunking => "chunking",
            Self::EntityExtraction => "entity_extraction",
            Self::Embedding => "embedding",
            Self::Consumer => "consumer",
            Self::EntityDedup => "entity_dedup",
            Self::RelationExtraction => "relation_extraction",
            Self::RelationDedup => "relation_dedup",
            Self::Sink => "sink",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification of a recorded failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Parse,
    Timeout,
    Model,
    Embedding,
    InvalidInput,
    Config,
    Protocol,
    Sink,
    Cancelled,
    Panic,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Parse => "parse",
            Self::Timeout => "timeout",
            Self::Model => "model",
            Self::Embedding => "embedding",
            Self::InvalidInput => "invalid_input",
            Self::Config => "config",
            Self::Protocol => "protocol",
            Self::Sink => "sink",
            Self::Cancelled => "cancelled",
            Self::Panic => "panic",
            Self::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

/// One entry of a run's error/event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub stage: Stage,
    pub item_id: String,
    pub error_kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl RunEvent {
    pub fn new(
        stage: Stage,
        item_id: impl Into<String>,
        error_kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            item_id: item_id.into(),
            error_kind,
            message: message.into(),
            at: Utc::now(),
        }
    }

    /// Build an event from an error, taking the kind from the error itself
    pub fn from_error(stage: Stage, item_id: impl Into<String>, error: &crate::KgError) -> Self {
        Self::new(stage, item_id, error.kind(), error.to_string())
    }
}
