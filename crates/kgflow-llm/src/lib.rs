//! kgflow LLM - Model service clients
//!
//! HTTP clients for the generative model used by relation extraction and
//! the embedding service used by entity deduplication and chunk embedding.
//! OpenAI-compatible APIs (including Azure deployments) and Ollama are
//! supported; [`cache::CachedEmbeddingClient`] avoids re-embedding repeated
//! surface forms.

pub mod cache;
pub mod embedding;
pub mod llm;

pub use cache::{CacheConfig, CacheStats, CachedEmbeddingClient};
pub use embedding::{create_embedding_client, OllamaEmbedding, OpenAiEmbedding};
pub use llm::{create_llm_client, OllamaClient, OpenAiClient};

use std::time::Duration;

use reqwest::Response;
use serde::de::DeserializeOwned;

use kgflow_core::{KgError, Result};

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Build the shared HTTP client with a request timeout
fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| KgError::Config(format!("Failed to build HTTP client: {e}")))
}

/// Map a transport error, keeping timeouts distinguishable
fn request_error(operation: &str, timeout_secs: u64, err: reqwest::Error) -> KgError {
    if err.is_timeout() {
        KgError::Timeout {
            operation: operation.to_string(),
            secs: timeout_secs,
        }
    } else {
        KgError::Llm(format!("{operation} request failed: {err}"))
    }
}

/// Decode a JSON body, turning non-2xx statuses into `error`
async fn read_json<T: DeserializeOwned>(
    service: &str,
    response: Response,
    error: fn(String) -> KgError,
) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(error(format!("{service} returned {status}: {body}")));
    }

    response
        .json()
        .await
        .map_err(|e| error(format!("{service} sent an unreadable body: {e}")))
}
