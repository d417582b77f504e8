//! kgflow Extractor - Knowledge extraction pipeline
//!
//! Implements the two extraction passes and the two deduplication passes
//! that turn text chunks into a knowledge graph:
//! - Rule-based Named Entity Recognition (fast, deterministic)
//! - Embedding-similarity entity deduplication
//! - LLM-based Relation Extraction
//! - Relation deduplication (endpoint renaming, type synonyms, symmetry)

use kgflow_core::{Chunk, Entity, Relation, Result};

/// Entities and relations extracted from one chunk
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}

/// Trait for entity recognizers. Never fails on ordinary text.
pub trait EntityExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Vec<Entity>;
}

/// Trait for relation extractors backed by an external model
#[async_trait::async_trait]
pub trait RelationExtractor: Send + Sync {
    async fn extract(&self, text: &str, entities: &[Entity]) -> Result<Vec<Relation>>;
}

/// Extraction capability shared by the recognizer and the generative model,
/// so the pipeline can run either behind the same worker pool.
///
/// `known_entities` holds the deduplicated entities of the chunk when the
/// extractor runs after the deduplication barrier, and is empty before it.
#[async_trait::async_trait]
pub trait Extractor: Send + Sync {
    /// Identifier recorded on produced entities and in logs
    fn name(&self) -> &str;

    async fn extract(&self, chunk: &Chunk, known_entities: &[Entity]) -> Result<Extraction>;
}

pub mod entity_dedup;
pub mod ner;
pub mod relation;
pub mod relation_dedup;

pub use entity_dedup::{
    collapse_exact_names, cosine_similarity, greedy_clusters, merge_by_similarity,
    EntityDeduplicator,
};
pub use ner::{map_label, RuleBasedNer};
pub use relation::{LlmRelationExtractor, RelationPromptConfig, ResponseParser};
pub use relation_dedup::{
    normalize_endpoints, normalize_relation_type, RelationDeduplicator, RelationVocabulary,
};
