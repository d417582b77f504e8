//! Items flowing between pipeline stages

use serde::{Deserialize, Serialize};

use kgflow_core::{Chunk, Entity, Relation};

/// A chunk after entity extraction and (optionally) embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedChunk {
    pub chunk: Chunk,

    /// Raw entities recognised in this chunk, before deduplication
    pub entities: Vec<Entity>,

    /// Chunk text embedding; `None` when embedding is disabled or failed
    pub embedding: Option<Vec<f32>>,
}

impl ProcessedChunk {
    pub fn new(chunk: Chunk) -> Self {
        Self {
            chunk,
            entities: Vec::new(),
            embedding: None,
        }
    }

    pub fn item_id(&self) -> String {
        self.chunk.item_id()
    }
}

/// Relation extraction work for one chunk, queued after the dedup barrier
#[derive(Debug, Clone)]
pub(crate) struct RelationTask {
    /// Position of the chunk in document order
    pub position: usize,
    pub chunk: Chunk,
    /// Canonical entities of the chunk
    pub entities: Vec<Entity>,
}

/// Relations extracted from one chunk
#[derive(Debug, Clone)]
pub(crate) struct ChunkRelations {
    pub position: usize,
    pub relations: Vec<Relation>,
}

/// Items that can be named in run events
pub(crate) trait Tracked {
    fn item_id(&self) -> String;
}

impl Tracked for Chunk {
    fn item_id(&self) -> String {
        Chunk::item_id(self)
    }
}

impl Tracked for ProcessedChunk {
    fn item_id(&self) -> String {
        ProcessedChunk::item_id(self)
    }
}

impl Tracked for RelationTask {
    fn item_id(&self) -> String {
        self.chunk.item_id()
    }
}
