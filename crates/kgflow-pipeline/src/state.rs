//! Run state machine
//!
//! `Idle -> Running -> {Completed | Cancelled | Failed}`. Terminal states are
//! final; any other transition is a protocol violation.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use kgflow_core::{KgError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    fn can_become(&self, next: RunState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Cancelled)
                | (Self::Running, Self::Failed)
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Owner of a run's state; observers subscribe through a watch channel
#[derive(Debug)]
pub struct RunStateTracker {
    tx: watch::Sender<RunState>,
}

impl RunStateTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(RunState::Idle);
        Self { tx }
    }

    pub fn current(&self) -> RunState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.tx.subscribe()
    }

    /// Move to `next`, rejecting transitions the state machine does not allow
    pub fn transition(&self, next: RunState) -> Result<()> {
        let mut result = Ok(());
        self.tx.send_if_modified(|state| {
            if state.can_become(next) {
                *state = next;
                true
            } else {
                result = Err(KgError::Protocol(format!(
                    "invalid run state transition {state} -> {next}"
                )));
                false
            }
        });
        result
    }
}

impl Default for RunStateTracker {
    fn default() -> Self {
        Self::new()
    }
}
