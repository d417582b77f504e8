//! Embedding service clients
//!
//! Entity deduplication embeds many short names per request and the chunk
//! stage embeds one text at a time, so both clients send whole batches and
//! check that one vector of the expected width comes back per input.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{http_client, read_json, request_error, DEFAULT_OPENAI_BASE_URL};
use kgflow_core::{EmbeddingClient, KgError, LlmConfig, LlmProvider, Result};

/// Vector width of well-known embedding models
fn known_dimension(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-large" => Some(3072),
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        "nomic-embed-text" => Some(768),
        "mxbai-embed-large" => Some(1024),
        "all-minilm" => Some(384),
        _ => None,
    }
}

fn transport_error(service: &str, timeout_secs: u64, err: reqwest::Error) -> KgError {
    match request_error(service, timeout_secs, err) {
        KgError::Llm(message) => KgError::Embedding(message),
        other => other,
    }
}

/// Expected vector width: configured, listed for the model, or learned from
/// the first response
#[derive(Debug)]
struct Width {
    expected: Option<usize>,
    learned: AtomicUsize,
}

impl Width {
    fn new(expected: Option<usize>) -> Self {
        Self {
            expected,
            learned: AtomicUsize::new(0),
        }
    }

    /// 0 until known
    fn get(&self) -> usize {
        self.expected
            .unwrap_or_else(|| self.learned.load(Ordering::Relaxed))
    }

    /// One vector per input, all of the same width, matching the known width
    fn check(&self, service: &str, inputs: usize, vectors: &[Vec<f32>]) -> Result<()> {
        if vectors.len() != inputs {
            return Err(KgError::Embedding(format!(
                "{service} returned {} vectors for {inputs} inputs",
                vectors.len()
            )));
        }
        let Some(width) = vectors.first().map(Vec::len) else {
            return Ok(());
        };
        if let Some(bad) = vectors.iter().find(|v| v.len() != width) {
            return Err(KgError::Embedding(format!(
                "{service} returned vectors of {width} and {} values in one batch",
                bad.len()
            )));
        }

        let expected = match self.expected {
            Some(expected) => expected,
            None => match self
                .learned
                .compare_exchange(0, width, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => width,
                Err(learned) => learned,
            },
        };
        if width != expected {
            return Err(KgError::Embedding(format!(
                "{service} returned a {width}-wide vector, expected {expected}"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// OpenAI-compatible embeddings
// ============================================================================

/// Client for `POST {base}/embeddings`
pub struct OpenAiEmbedding {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    width: Width,
    // sent as `dimensions` so text-embedding-3 models shorten their output
    requested_dimension: Option<usize>,
    timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<IndexedVector>,
}

#[derive(Debug, Deserialize)]
struct IndexedVector {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedding {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let model = model.into();
        Ok(Self {
            client: http_client(timeout_secs)?,
            api_key: api_key.into(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            width: Width::new(known_dimension(&model)),
            requested_dimension: None,
            model,
            timeout_secs,
        })
    }

    /// Create from config; an OpenAI base URL override also applies to Azure
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let Some(api_key) = &config.openai_api_key else {
            return Err(KgError::Config(
                "an OpenAI API key is required for embeddings".to_string(),
            ));
        };

        let mut client = Self::new(
            api_key.clone(),
            config.embedding_model.clone(),
            config.timeout_secs,
        )?;
        if let Some(url) = &config.openai_base_url {
            client = client.with_base_url(url.clone());
        }
        if let Some(dimension) = config.embedding_dimension {
            client = client.with_dimension(dimension);
        }
        Ok(client)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Request shortened vectors of this width
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.width = Width::new(Some(dimension));
        self.requested_dimension = Some(dimension);
        self
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbedding {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&OpenAiEmbeddingRequest {
                model: &self.model,
                input: texts,
                dimensions: self.requested_dimension,
            })
            .send()
            .await
            .map_err(|e| transport_error("OpenAI embeddings", self.timeout_secs, e))?;

        let mut body: OpenAiEmbeddingResponse =
            read_json("OpenAI embeddings", response, KgError::Embedding).await?;
        // the API may answer out of order
        body.data.sort_by_key(|v| v.index);
        let vectors: Vec<Vec<f32>> = body.data.into_iter().map(|v| v.embedding).collect();

        self.width.check("OpenAI embeddings", texts.len(), &vectors)?;
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.width.get()
    }
}

// ============================================================================
// Ollama embeddings
// ============================================================================

/// Client for Ollama's batch `POST {base}/api/embed`
pub struct OllamaEmbedding {
    client: Client,
    base_url: String,
    model: String,
    width: Width,
    timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedding {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let model = model.into();
        Ok(Self {
            client: http_client(timeout_secs)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            width: Width::new(known_dimension(&model)),
            model,
            timeout_secs,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let client = Self::new(
            config.ollama_url.clone(),
            config.embedding_model.clone(),
            config.timeout_secs,
        )?;
        Ok(match config.embedding_dimension {
            Some(dimension) => client.with_dimension(dimension),
            None => client,
        })
    }

    /// Expect vectors of this width instead of the listed or learned one
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.width = Width::new(Some(dimension));
        self
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbedding {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&OllamaEmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| transport_error("Ollama embed", self.timeout_secs, e))?;

        let body: OllamaEmbedResponse = read_json("Ollama embed", response, KgError::Embedding).await?;
        self.width.check("Ollama embed", texts.len(), &body.embeddings)?;
        Ok(body.embeddings)
    }

    fn dimension(&self) -> usize {
        self.width.get()
    }
}

/// Create the embedding client selected by `config.provider`
pub fn create_embedding_client(config: &LlmConfig) -> Result<Box<dyn EmbeddingClient>> {
    let client: Box<dyn EmbeddingClient> = match config.provider {
        LlmProvider::OpenAI | LlmProvider::Azure => Box::new(OpenAiEmbedding::from_config(config)?),
        LlmProvider::Ollama => Box::new(OllamaEmbedding::from_config(config)?),
    };
    Ok(client)
}
