//! Run configuration
//!
//! Every section has a usable default, so a TOML file only needs the keys it
//! changes. Environment variables are applied last and win over the file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

/// Top-level configuration, one field per TOML table
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Streaming pipeline configuration
    pub pipeline: PipelineConfig,

    /// Completion and embedding providers
    pub llm: LlmConfig,

    /// Additions to the built-in relation vocabulary
    pub relations: RelationsConfig,

    /// Log filter and output format
    pub logging: LoggingConfig,

    /// Chunking used by the command-line ingester
    pub chunking: ChunkingConfig,
}

impl AppConfig {
    /// Defaults overlaid with environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Parse a TOML file; missing keys keep their defaults
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Apply environment variables on top of `self`
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env()?;
        Ok(self)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Pipeline
        if let Some(v) = parse_env("KGFLOW_SIMILARITY_THRESHOLD")? {
            self.pipeline.similarity_threshold = v;
        }
        if let Some(v) = parse_env("KGFLOW_QUEUE_MAX_DEPTH")? {
            self.pipeline.queue_max_depth = v;
        }
        if let Some(v) = parse_env("KGFLOW_EXTRACTION_WORKERS")? {
            self.pipeline.extraction_worker_count = v;
        }
        if let Some(v) = parse_env("KGFLOW_EMBEDDING_WORKERS")? {
            self.pipeline.embedding_worker_count = v;
        }
        if let Some(v) = parse_env("KGFLOW_ENABLE_RELATION_DEDUP")? {
            self.pipeline.enable_relation_dedup = v;
        }
        if let Some(v) = parse_env("KGFLOW_MODEL_TIMEOUT_SECS")? {
            self.pipeline.model_timeout_secs = v;
        }

        // Providers
        if let Some(provider) = env_string("LLM_PROVIDER") {
            self.llm.provider = provider.parse()?;
        }
        self.llm.openai_api_key = env_string("OPENAI_API_KEY").or(self.llm.openai_api_key.take());
        self.llm.openai_base_url = env_string("OPENAI_BASE_URL").or(self.llm.openai_base_url.take());
        for (key, field) in [
            ("OLLAMA_URL", &mut self.llm.ollama_url),
            ("LLM_MODEL", &mut self.llm.model),
            ("EMBEDDING_MODEL", &mut self.llm.embedding_model),
            ("LOG_LEVEL", &mut self.logging.level),
        ] {
            if let Some(value) = env_string(key) {
                *field = value;
            }
        }
        if let Some(v) = parse_env("EMBEDDING_DIMENSION")? {
            self.llm.embedding_dimension = Some(v);
        }
        if let Some(v) = parse_env("LLM_TIMEOUT_SECS")? {
            self.llm.timeout_secs = v;
        }

        Ok(())
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.embedding_dimension == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "embedding_dimension".to_string(),
                value: "0".to_string(),
            });
        }
        self.pipeline.validate()
    }
}

/// Non-empty value of an environment variable
fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// Streaming pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Cosine similarity at or above which two entity names are merged
    pub similarity_threshold: f32,

    /// Maximum depth of every inter-stage queue
    pub queue_max_depth: usize,

    /// Parallel workers for entity and relation extraction
    pub extraction_worker_count: usize,

    /// Parallel workers for chunk embedding
    pub embedding_worker_count: usize,

    /// Run relation deduplication (disable for A/B comparison)
    pub enable_relation_dedup: bool,

    /// Timeout for each external model call in seconds
    pub model_timeout_secs: u64,

    /// Time workers get to unwind after cancellation, in milliseconds
    pub cancel_grace_period_ms: u64,

    /// Entity names per embedding request during deduplication
    pub embedding_batch_size: usize,

    /// Embed chunk text in the embedding stage
    pub embed_chunks: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            queue_max_depth: 10,
            extraction_worker_count: 4,
            embedding_worker_count: 2,
            enable_relation_dedup: true,
            model_timeout_secs: 60,
            cancel_grace_period_ms: 5_000,
            embedding_batch_size: 64,
            embed_chunks: true,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "similarity_threshold".to_string(),
                value: self.similarity_threshold.to_string(),
            });
        }
        let positive = [
            ("queue_max_depth", self.queue_max_depth),
            ("extraction_worker_count", self.extraction_worker_count),
            ("embedding_worker_count", self.embedding_worker_count),
            ("embedding_batch_size", self.embedding_batch_size),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: "0".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Where completions and embeddings come from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Backend serving both completions and embeddings
    pub provider: LlmProvider,

    /// Bearer token for OpenAI and Azure
    pub openai_api_key: Option<String>,

    /// Override for Azure deployments and OpenAI-compatible gateways
    pub openai_base_url: Option<String>,

    /// Root URL of the local Ollama server
    pub ollama_url: String,

    /// Model used for relation extraction
    pub model: String,

    /// Model used for entity and chunk embeddings
    pub embedding_model: String,

    /// Vector width for embedding models missing from the built-in table,
    /// or a shortened width for models that support one
    pub embedding_dimension: Option<usize>,

    /// Completion budget per relation prompt
    pub max_tokens: u32,

    /// Sampling temperature; zero keeps extraction repeatable
    pub temperature: f32,

    /// HTTP request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            openai_api_key: None,
            openai_base_url: None,
            ollama_url: "http://localhost:11434".to_string(),
            model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimension: None,
            max_tokens: 2048,
            temperature: 0.0,
            timeout_secs: 60,
        }
    }
}

/// Model backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAI,
    Ollama,
    Azure,
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let provider = match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Self::OpenAI,
            "ollama" => Self::Ollama,
            "azure" => Self::Azure,
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "LLM_PROVIDER".to_string(),
                    value: s.to_string(),
                })
            }
        };
        Ok(provider)
    }
}

/// Extra relation vocabulary merged over the built-in tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationsConfig {
    /// Relation type -> canonical relation type
    pub synonyms: BTreeMap<String, String>,

    /// Relation types where (A, t, B) and (B, t, A) state the same fact
    pub symmetric: Vec<String>,
}

/// `tracing` subscriber settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// Emit one JSON object per event
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Chunking configuration for the command-line ingester
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Soft upper bound on chunk length in characters
    pub max_chunk_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 2_000,
        }
    }
}

/// Failures while loading or checking configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("{key} cannot be {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("{0} must be set")]
    MissingRequired(String),
}
