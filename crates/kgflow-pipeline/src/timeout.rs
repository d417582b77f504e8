//! Per-call timeouts for external model services

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use kgflow_core::{EmbeddingClient, KgError, Result};

/// Await `future`, failing with [`KgError::Timeout`] after `secs` seconds
pub(crate) async fn with_timeout<T>(
    secs: u64,
    operation: &str,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(Duration::from_secs(secs), future).await {
        Ok(result) => result,
        Err(_) => Err(KgError::Timeout {
            operation: operation.to_string(),
            secs,
        }),
    }
}

/// Embedding client whose every call is bounded by a timeout
pub(crate) struct TimeoutEmbedder {
    inner: Arc<dyn EmbeddingClient>,
    secs: u64,
}

impl TimeoutEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingClient>, secs: u64) -> Self {
        Self { inner, secs }
    }
}

#[async_trait]
impl EmbeddingClient for TimeoutEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        with_timeout(self.secs, "embedding request", self.inner.embed(texts)).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}
