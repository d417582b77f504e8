//! Shared error log of a pipeline run

use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use kgflow_core::{KgError, RunEvent, Stage};

/// Append-only list of item-level failures, shared by every worker of a run
#[derive(Debug, Clone)]
pub struct ErrorLog {
    run_id: Uuid,
    events: Arc<Mutex<Vec<RunEvent>>>,
}

impl ErrorLog {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Record an event and emit it as a warning
    pub fn record(&self, event: RunEvent) {
        tracing::warn!(
            run_id = %self.run_id,
            stage = %event.stage,
            item_id = %event.item_id,
            error_kind = %event.error_kind,
            "{}",
            event.message
        );
        self.lock().push(event);
    }

    /// Record an error raised while processing `item_id`
    pub fn record_error(&self, stage: Stage, item_id: &str, error: &KgError) {
        self.record(RunEvent::from_error(stage, item_id, error));
    }

    pub fn snapshot(&self) -> Vec<RunEvent> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RunEvent>> {
        // push is the only mutation, so a poisoned lock still guards a valid list
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
