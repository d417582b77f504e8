//! kgflow Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout kgflow:
//! - Knowledge graph records (chunks, entities, relations, entity mappings)
//! - The error taxonomy shared by every pipeline stage
//! - Run events recorded for observability tooling
//! - Traits for the external model services and the graph sink
//! - Configuration management

pub mod config;
pub mod events;
pub mod model;

pub use config::{
    AppConfig, ChunkingConfig, ConfigError, LlmConfig, LlmProvider, LoggingConfig,
    PipelineConfig, RelationsConfig,
};
pub use events::{ErrorKind, RunEvent, Stage};
pub use model::{
    Chunk, Entity, EntityIndex, EntityMapping, EntityType, KnowledgeGraph, Relation,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for kgflow operations
#[derive(Error, Debug)]
pub enum KgError {
    #[error("Embedding service error: {0}")]
    Embedding(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Failed to parse model output: {0}")]
    Parse(String),

    #[error("Timed out after {secs}s: {operation}")]
    Timeout { operation: String, secs: u64 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Queue protocol violation: {0}")]
    Protocol(String),

    #[error("Graph sink error: {0}")]
    Sink(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KgError {
    /// Whether the error is local to the item that produced it: bad model
    /// output, a timed-out or failed completion, or an invalid chunk.
    ///
    /// Informational only. Pipeline stages record every item error and keep
    /// going; a run fails on dedup embedding errors and sink errors.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Parse(_) | Self::Timeout { .. } | Self::Llm(_) | Self::InvalidInput(_)
        )
    }

    /// The event classification used when this error is recorded
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Embedding(_) => ErrorKind::Embedding,
            Self::Llm(_) => ErrorKind::Model,
            Self::Parse(_) => ErrorKind::Parse,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Config(_) => ErrorKind::Config,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Sink(_) => ErrorKind::Sink,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Other(_) => ErrorKind::Internal,
        }
    }
}

impl From<ConfigError> for KgError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KgError>;

// ============================================================================
// Traits
// ============================================================================

/// Generation options passed with every completion request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 2048,
        }
    }
}

/// Trait for generative model clients
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete a prompt and return the raw text response
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String>;

    /// Model identifier, recorded as the origin of extracted relations
    fn model_name(&self) -> &str;
}

/// Trait for embedding service clients
#[async_trait::async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a batch of texts. The result has one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get embedding dimension
    fn dimension(&self) -> usize;
}

/// Trait for the collaborator that persists finished graphs
#[async_trait::async_trait]
pub trait GraphSink: Send + Sync {
    /// Persist the final entity and relation set of one document
    async fn write(&self, graph: &KnowledgeGraph) -> Result<()>;

    /// Get sink name for logging
    fn name(&self) -> &str;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(KgError::Parse("bad json".into()).is_recoverable());
        assert!(KgError::Timeout {
            operation: "complete".into(),
            secs: 30
        }
        .is_recoverable());
        assert!(!KgError::Embedding("down".into()).is_recoverable());
        assert!(!KgError::Protocol("double sentinel".into()).is_recoverable());
        assert!(!KgError::Cancelled.is_recoverable());
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(KgError::Parse(String::new()).kind(), ErrorKind::Parse);
        assert_eq!(KgError::Llm(String::new()).kind(), ErrorKind::Model);
        assert_eq!(KgError::Sink(String::new()).kind(), ErrorKind::Sink);
    }

    #[test]
    fn test_config_error_conversion() {
        let err: KgError = ConfigError::MissingRequired("OPENAI_API_KEY".into()).into();
        assert!(matches!(err, KgError::Config(_)));
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }
}
