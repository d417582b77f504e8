//! Run results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use kgflow_core::{EntityMapping, KgError, KnowledgeGraph, RunEvent};

/// Counters collected over one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Chunks read from the source
    pub chunks: usize,
    /// Chunks that received a text embedding
    pub chunks_embedded: usize,
    /// Entities before deduplication
    pub raw_entities: usize,
    /// Entities after deduplication
    pub canonical_entities: usize,
    /// Relations before deduplication
    pub raw_relations: usize,
    /// Relations handed to the sink
    pub final_relations: usize,
    /// Item-level errors recorded
    pub item_errors: usize,
    /// Items discarded from queues on cancellation
    pub dropped_on_cancel: usize,
}

/// Result of a completed run: the graph plus everything observed on the way
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub graph: KnowledgeGraph,
    pub mapping: EntityMapping,
    pub events: Vec<RunEvent>,
    pub stats: RunStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn error_count(&self) -> usize {
        self.events.len()
    }

    pub fn has_errors(&self) -> bool {
        !self.events.is_empty()
    }
}

/// How a run ended.
///
/// A completed run may carry item errors. A failed run never carries a
/// graph.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunReport),
    Cancelled {
        run_id: Uuid,
        events: Vec<RunEvent>,
        stats: RunStats,
    },
    Failed {
        run_id: Uuid,
        error: KgError,
        events: Vec<RunEvent>,
    },
}

impl RunOutcome {
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::Completed(report) => report.run_id,
            Self::Cancelled { run_id, .. } | Self::Failed { run_id, .. } => *run_id,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn report(&self) -> Option<&RunReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }

    pub fn events(&self) -> &[RunEvent] {
        match self {
            Self::Completed(report) => &report.events,
            Self::Cancelled { events, .. } | Self::Failed { events, .. } => events,
        }
    }

    /// The report of a completed run, or the error that ended it
    pub fn into_result(self) -> Result<RunReport, KgError> {
        match self {
            Self::Completed(report) => Ok(report),
            Self::Cancelled { .. } => Err(KgError::Cancelled),
            Self::Failed { error, .. } => Err(error),
        }
    }
}
