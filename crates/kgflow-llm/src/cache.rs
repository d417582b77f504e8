//! Embedding cache
//!
//! Entity dedup embeds the same surface forms over and over ("Marie Curie"
//! shows up in most chunks of a biography), so [`CachedEmbeddingClient`]
//! keeps vectors in a moka cache keyed by exact text and only forwards the
//! texts it has not seen.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;

use kgflow_core::{EmbeddingClient, KgError, Result};

/// Size and lifetime bounds for cached vectors
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_capacity: u64,
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        // 1536-wide f32 vectors, about 60MB when full
        Self {
            max_capacity: 10_000,
            ttl_seconds: 3600,
        }
    }
}

/// Embedding client that serves repeated texts from cache
pub struct CachedEmbeddingClient {
    inner: Arc<dyn EmbeddingClient>,
    vectors: Cache<String, Arc<Vec<f32>>>,
    stats: Arc<CacheStats>,
}

impl CachedEmbeddingClient {
    pub fn new(inner: Arc<dyn EmbeddingClient>) -> Self {
        Self::with_config(inner, &CacheConfig::default())
    }

    pub fn with_config(inner: Arc<dyn EmbeddingClient>, config: &CacheConfig) -> Self {
        Self {
            inner,
            vectors: Cache::builder()
                .max_capacity(config.max_capacity)
                .time_to_live(Duration::from_secs(config.ttl_seconds))
                .build(),
            stats: Arc::new(CacheStats::default()),
        }
    }

    /// Shared handle to the counters; stays live while the client is used
    pub fn stats(&self) -> Arc<CacheStats> {
        self.stats.clone()
    }

    /// Embed the distinct uncached texts in one request and cache the results
    async fn fetch(&self, missing: &[String]) -> Result<Vec<Arc<Vec<f32>>>> {
        if missing.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = self.inner.embed(missing).await?;
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        if vectors.len() != missing.len() {
            return Err(KgError::Embedding(format!(
                "expected {} vectors, got {}",
                missing.len(),
                vectors.len()
            )));
        }

        let mut fetched = Vec::with_capacity(vectors.len());
        for (text, vector) in missing.iter().zip(vectors) {
            let vector = Arc::new(vector);
            self.vectors.insert(text.clone(), vector.clone()).await;
            fetched.push(vector);
        }
        Ok(fetched)
    }
}

#[async_trait]
impl EmbeddingClient for CachedEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut cached: Vec<Option<Arc<Vec<f32>>>> = Vec::with_capacity(texts.len());
        let mut missing: Vec<String> = Vec::new();
        let mut missing_index: HashMap<&str, usize> = HashMap::new();

        for text in texts {
            let hit = self.vectors.get(text).await;
            if hit.is_none() && !missing_index.contains_key(text.as_str()) {
                missing_index.insert(text.as_str(), missing.len());
                missing.push(text.clone());
            }
            cached.push(hit);
        }

        let hits = cached.iter().filter(|v| v.is_some()).count() as u64;
        self.stats.record(hits, texts.len() as u64 - hits);

        let fetched = self.fetch(&missing).await?;

        texts
            .iter()
            .zip(cached)
            .map(|(text, hit)| {
                hit.or_else(|| {
                    missing_index
                        .get(text.as_str())
                        .and_then(|&i| fetched.get(i).cloned())
                })
                .map(|vector| vector.as_ref().clone())
                .ok_or_else(|| KgError::Embedding(format!("no vector for {text:?}")))
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

/// Lookup counters for [`CachedEmbeddingClient`]
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    requests: AtomicU64,
}

impl CacheStats {
    fn record(&self, hits: u64, misses: u64) {
        self.hits.fetch_add(hits, Ordering::Relaxed);
        self.misses.fetch_add(misses, Ordering::Relaxed);
    }

    /// Texts answered from cache
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Texts that were not cached, counting in-batch duplicates
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Requests forwarded to the wrapped client
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        match self.hits() + self.misses() {
            0 => 0.0,
            total => self.hits() as f64 / total as f64,
        }
    }
}
