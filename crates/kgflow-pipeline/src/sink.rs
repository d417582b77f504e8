//! Chunk consumers and graph sinks
//!
//! The terminal consumer receives every processed chunk as it leaves the
//! embedding stage (a vector index writer in production). The graph sink
//! receives the finished entity and relation set once per document.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::chunk::ProcessedChunk;
use kgflow_core::{GraphSink, KgError, KnowledgeGraph, Result};

/// Terminal consumer of processed chunks
#[async_trait]
pub trait ChunkConsumer: Send + Sync {
    /// Consume one chunk. Errors are recorded for the chunk and the run continues.
    async fn consume(&self, chunk: &ProcessedChunk) -> Result<()>;

    /// Get consumer name for logging
    fn name(&self) -> &str;
}

/// Consumer that discards chunks
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopConsumer;

#[async_trait]
impl ChunkConsumer for NoopConsumer {
    async fn consume(&self, _chunk: &ProcessedChunk) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}

// ============================================================================
// In-memory sink
// ============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    graphs: Vec<KnowledgeGraph>,
    chunks: Vec<ProcessedChunk>,
}

/// Sink and consumer that keeps everything in memory
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graphs written so far
    pub fn graphs(&self) -> Vec<KnowledgeGraph> {
        self.lock().graphs.clone()
    }

    /// Chunks consumed so far, in arrival order
    pub fn chunks(&self) -> Vec<ProcessedChunk> {
        self.lock().chunks.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl GraphSink for MemorySink {
    async fn write(&self, graph: &KnowledgeGraph) -> Result<()> {
        self.lock().graphs.push(graph.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[async_trait]
impl ChunkConsumer for MemorySink {
    async fn consume(&self, chunk: &ProcessedChunk) -> Result<()> {
        self.lock().chunks.push(chunk.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// JSON file sink
// ============================================================================

/// Sink that writes each graph as pretty-printed JSON
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    /// Write to `path`. When `path` is an existing directory the graph is
    /// written to `<path>/<source_id>.json`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn target(&self, graph: &KnowledgeGraph) -> PathBuf {
        let is_dir = tokio::fs::metadata(&self.path)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);

        if is_dir {
            let stem: String = graph
                .source_id
                .chars()
                .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
                .collect();
            let stem = if stem.is_empty() { "graph".to_string() } else { stem };
            self.path.join(format!("{stem}.json"))
        } else {
            self.path.clone()
        }
    }
}

#[async_trait]
impl GraphSink for JsonFileSink {
    async fn write(&self, graph: &KnowledgeGraph) -> Result<()> {
        let target = self.target(graph).await;
        let json = serde_json::to_vec_pretty(graph)
            .map_err(|e| KgError::Sink(format!("Failed to serialize graph: {e}")))?;

        tokio::fs::write(&target, json)
            .await
            .map_err(|e| KgError::Sink(format!("Failed to write {}: {e}", target.display())))?;

        tracing::info!(
            path = %target.display(),
            entities = graph.entities.len(),
            relations = graph.relations.len(),
            "Graph written"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "json_file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgflow_core::{Entity, EntityType, Relation};

    fn graph() -> KnowledgeGraph {
        KnowledgeGraph {
            source_id: "films/face off.txt".to_string(),
            entities: vec![Entity::new("Nicolas Cage", EntityType::Person, "rule_ner")],
            relations: vec![Relation::new("Nicolas Cage", "ACTED_IN", "Face/Off")],
        }
    }

    #[tokio::test]
    async fn test_json_file_sink_writes_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let sink = JsonFileSink::new(file.path());

        sink.write(&graph()).await.unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        let parsed: KnowledgeGraph = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed, graph());
    }

    #[tokio::test]
    async fn test_json_file_sink_directory_target() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path());

        sink.write(&graph()).await.unwrap();

        assert!(dir.path().join("films_face_off_txt.json").exists());
    }

    #[tokio::test]
    async fn test_json_file_sink_new_path_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        let sink = JsonFileSink::new(&path);

        assert_eq!(sink.target(&graph()).await, path);
        sink.write(&graph()).await.unwrap();
        assert!(tokio::fs::metadata(&path).await.unwrap().is_file());
    }

    #[tokio::test]
    async fn test_memory_sink_collects() {
        let sink = MemorySink::new();
        sink.write(&graph()).await.unwrap();
        ChunkConsumer::consume(&sink, &ProcessedChunk::new(kgflow_core::Chunk::new("d", 0, "x")))
            .await
            .unwrap();

        assert_eq!(sink.graphs().len(), 1);
        assert_eq!(sink.chunks()[0].item_id(), "d#0");
    }
}
