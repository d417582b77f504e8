//! kgflow Pipeline - Streaming orchestrator
//!
//! Runs one document through the extraction and deduplication passes:
//!
//! ```text
//! chunks -> entity extraction (N workers) -> chunk embedding (M workers) -> consumer
//!                                 |
//!                     entity dedup barrier (whole document)
//!                                 |
//!        relation extraction (N workers) -> relation dedup -> graph sink
//! ```
//!
//! Stages are connected by bounded queues that end with a single sentinel.
//! Item failures are recorded in the run's event log and never abort the run;
//! embedding-service failure during deduplication fails the whole document.

pub mod chunk;
pub mod events;
pub mod orchestrator;
pub mod queue;
pub mod report;
pub mod sink;
pub mod state;

mod stage;
mod timeout;

pub use chunk::ProcessedChunk;
pub use events::ErrorLog;
pub use orchestrator::{Pipeline, RunHandle};
pub use queue::{bounded, LiveWorkers, QueueReceiver, QueueSender};
pub use report::{RunOutcome, RunReport, RunStats};
pub use sink::{ChunkConsumer, JsonFileSink, MemorySink, NoopConsumer};
pub use state::{RunState, RunStateTracker};
