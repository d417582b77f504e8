//! Test doubles for the model services

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use kgflow_core::{
    Chunk, CompletionOptions, EmbeddingClient, Entity, EntityType, KgError, LlmClient,
    PipelineConfig, Result,
};
use kgflow_extractor::{Extraction, Extractor};

pub const DIMENSION: usize = 64;

/// Recognizes a fixed list of names by substring match
pub struct KeywordExtractor {
    names: Vec<(&'static str, EntityType)>,
}

impl KeywordExtractor {
    pub fn new(names: &[(&'static str, EntityType)]) -> Self {
        Self {
            names: names.to_vec(),
        }
    }
}

#[async_trait]
impl Extractor for KeywordExtractor {
    fn name(&self) -> &str {
        "keywords"
    }

    async fn extract(&self, chunk: &Chunk, _known_entities: &[Entity]) -> Result<Extraction> {
        let entities = self
            .names
            .iter()
            .filter(|(name, _)| chunk.text.contains(name))
            .map(|(name, entity_type)| Entity::new(*name, *entity_type, "keywords"))
            .collect();
        Ok(Extraction {
            entities,
            relations: Vec::new(),
        })
    }
}

/// Answers with the response whose marker appears in the prompt, or `[]`
pub struct ScriptedLlm {
    responses: Vec<(&'static str, String)>,
    calls: Mutex<usize>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<(&'static str, String)>) -> Self {
        Self {
            responses,
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, prompt: &str, _options: &CompletionOptions) -> Result<String> {
        *self.calls.lock().unwrap() += 1;
        Ok(self
            .responses
            .iter()
            .find(|(marker, _)| prompt.contains(marker))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| "[]".to_string()))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Relation extractor that signals when called and then never finishes
/// within any reasonable timeout
pub struct StalledExtractor {
    pub started: Arc<Notify>,
    pub delay: Duration,
}

#[async_trait]
impl Extractor for StalledExtractor {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn extract(&self, _chunk: &Chunk, _known_entities: &[Entity]) -> Result<Extraction> {
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        Ok(Extraction::default())
    }
}

/// Embeds each alias group onto its own axis. Texts outside every group
/// get a fresh axis, so they are orthogonal to everything else.
pub struct AliasEmbedder {
    axes: Mutex<HashMap<String, usize>>,
    next: Mutex<usize>,
}

impl AliasEmbedder {
    pub fn new(groups: &[&[&str]]) -> Self {
        let mut axes = HashMap::new();
        for (axis, group) in groups.iter().enumerate() {
            for name in group.iter() {
                axes.insert(name.to_string(), axis);
            }
        }
        Self {
            axes: Mutex::new(axes),
            next: Mutex::new(groups.len()),
        }
    }

    fn axis(&self, text: &str) -> usize {
        let mut axes = self.axes.lock().unwrap();
        if let Some(axis) = axes.get(text) {
            return *axis;
        }
        let mut next = self.next.lock().unwrap();
        let axis = *next % DIMENSION;
        *next += 1;
        axes.insert(text.to_string(), axis);
        axis
    }
}

#[async_trait]
impl EmbeddingClient for AliasEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0; DIMENSION];
                vector[self.axis(text)] = 1.0;
                vector
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }
}

/// Embedding service that is always down
pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingClient for FailingEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(KgError::Embedding("connection refused".to_string()))
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }
}

pub fn people() -> Vec<(&'static str, EntityType)> {
    vec![
        ("Marie Curie", EntityType::Person),
        ("M. Curie", EntityType::Person),
        ("Pierre Curie", EntityType::Person),
        ("Sorbonne", EntityType::Organization),
        ("Warsaw", EntityType::Location),
    ]
}

/// Five chunks of one document; each carries a `[cN]` marker for scripting
pub fn curie_chunks() -> Vec<Chunk> {
    [
        "[c0] Marie Curie was born in Warsaw.",
        "[c1] M. Curie taught at the Sorbonne.",
        "[c2] Pierre Curie married Marie Curie.",
        "[c3] Pierre Curie also worked at the Sorbonne.",
        "[c4] M. Curie married Pierre Curie.",
    ]
    .iter()
    .enumerate()
    .map(|(i, text)| Chunk::new("curie", i as u32, *text))
    .collect()
}

pub fn curie_responses() -> Vec<(&'static str, String)> {
    vec![
        (
            "[c0]",
            r#"[{"source": "Marie Curie", "relation": "born in", "target": "Warsaw"}]"#.to_string(),
        ),
        (
            "[c1]",
            r#"```json
[{"subject": "M. Curie", "predicate": "works_for", "object": "Sorbonne", "confidence": 0.7}]
```"#
                .to_string(),
        ),
        (
            "[c2]",
            r#"[{"source": "Pierre Curie", "relation": "MARRIED_TO", "target": "Marie Curie"}]"#
                .to_string(),
        ),
        (
            "[c3]",
            r#"[{"source": "Pierre Curie", "relation": "WORKS_FOR", "target": "Sorbonne"}]"#
                .to_string(),
        ),
        (
            "[c4]",
            r#"[{"source": "M. Curie", "relation": "married to", "target": "Pierre Curie", "confidence": 0.95}]"#
                .to_string(),
        ),
    ]
}

pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        queue_max_depth: 2,
        extraction_worker_count: 3,
        embedding_worker_count: 2,
        cancel_grace_period_ms: 200,
        ..PipelineConfig::default()
    }
}
