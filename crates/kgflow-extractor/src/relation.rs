//! Relation Extraction (RE) module
//!
//! Asks a generative model for the relations a chunk states between its
//! (already deduplicated) entities, and parses the model's JSON answer.

use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;

use crate::relation_dedup::normalize_relation_type;
use crate::{Extraction, Extractor, RelationExtractor};
use kgflow_core::{Chunk, CompletionOptions, Entity, KgError, LlmClient, Relation, Result};

/// Confidence assigned when the model omits one
pub const DEFAULT_CONFIDENCE: f32 = 0.8;

// ============================================================================
// Prompt
// ============================================================================

/// Configuration for LLM-based RE
#[derive(Debug, Clone)]
pub struct RelationPromptConfig {
    /// System prompt
    pub system_prompt: String,
    /// Relation types suggested to the model
    pub relation_types: Vec<String>,
    /// Maximum tokens
    pub max_tokens: u32,
    /// Temperature
    pub temperature: f32,
}

impl Default for RelationPromptConfig {
    fn default() -> Self {
        Self {
            system_prompt: include_str!("prompts/relation_system.txt").to_string(),
            relation_types: [
                "ACTED_IN",
                "DIRECTED",
                "WORKS_FOR",
                "FOUNDED",
                "LOCATED_IN",
                "MEMBER_OF",
                "PARENT_OF",
                "MARRIED_TO",
                "KNOWS",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_tokens: 1024,
            temperature: 0.0,
        }
    }
}

// ============================================================================
// LLM-based RE
// ============================================================================

/// Relation extractor backed by an [`LlmClient`]
pub struct LlmRelationExtractor {
    client: Arc<dyn LlmClient>,
    config: RelationPromptConfig,
    parser: ResponseParser,
}

impl LlmRelationExtractor {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            config: RelationPromptConfig::default(),
            parser: ResponseParser::new(),
        }
    }

    /// Create with custom prompt config
    pub fn with_config(mut self, config: RelationPromptConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RelationPromptConfig {
        &self.config
    }

    /// Build the extraction prompt
    pub fn build_prompt(&self, text: &str, entities: &[Entity]) -> String {
        let entities_json: Vec<serde_json::Value> = entities
            .iter()
            .map(|e| {
                serde_json::json!({
                    "name": e.name,
                    "type": e.entity_type.as_str(),
                })
            })
            .collect();

        format!(
            "{}\n\nSuggested relation types: {}\n\nEntities:\n{}\n\nText:\n{}\n\nRelations as a JSON array:",
            self.config.system_prompt,
            self.config.relation_types.join(", "),
            serde_json::to_string_pretty(&entities_json).unwrap_or_default(),
            text
        )
    }

    /// Extract relations from `text` given its entities.
    ///
    /// Unparseable model output is reported as [`KgError::Parse`]; callers
    /// record it and continue with an empty relation list for the chunk.
    pub async fn extract_relations(&self, text: &str, entities: &[Entity]) -> Result<Vec<Relation>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let prompt = self.build_prompt(text, entities);
        let options = CompletionOptions {
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self.client.complete(&prompt, &options).await?;
        let relations = self.parser.parse(&response, self.client.model_name())?;

        tracing::debug!(
            model = self.client.model_name(),
            relations = relations.len(),
            "Relation extraction complete"
        );

        Ok(relations)
    }
}

#[async_trait::async_trait]
impl RelationExtractor for LlmRelationExtractor {
    async fn extract(&self, text: &str, entities: &[Entity]) -> Result<Vec<Relation>> {
        self.extract_relations(text, entities).await
    }
}

#[async_trait::async_trait]
impl Extractor for LlmRelationExtractor {
    fn name(&self) -> &str {
        self.client.model_name()
    }

    async fn extract(&self, chunk: &Chunk, known_entities: &[Entity]) -> Result<Extraction> {
        let relations = self.extract_relations(&chunk.text, known_entities).await?;
        Ok(Extraction {
            entities: Vec::new(),
            relations,
        })
    }
}

// ============================================================================
// Response parsing
// ============================================================================

/// Relation structure for LLM JSON output
#[derive(Debug, Deserialize)]
struct LlmRelation {
    #[serde(default, alias = "subject", alias = "head")]
    source: String,
    #[serde(default, alias = "predicate", alias = "type")]
    relation: String,
    #[serde(default, alias = "object", alias = "tail")]
    target: String,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LlmResponse {
    List(Vec<LlmRelation>),
    Wrapped { relations: Vec<LlmRelation> },
}

impl LlmResponse {
    fn into_relations(self) -> Vec<LlmRelation> {
        match self {
            Self::List(relations) | Self::Wrapped { relations } => relations,
        }
    }
}

/// Parser for model responses.
///
/// Strategies are tried in order, each only if the previous failed:
/// the whole response as JSON, the contents of a fenced code block, then
/// the first `[...]` array literal.
pub struct ResponseParser {
    fenced_block: Option<Regex>,
    array_greedy: Option<Regex>,
    array_lazy: Option<Regex>,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            fenced_block: Regex::new(r"(?s)```[A-Za-z]*\s*(.*?)```").ok(),
            array_greedy: Regex::new(r"(?s)\[.*\]").ok(),
            array_lazy: Regex::new(r"(?s)\[.*?\]").ok(),
        }
    }

    /// Parse a response into relations attributed to `origin_model`
    pub fn parse(&self, response: &str, origin_model: &str) -> Result<Vec<Relation>> {
        let parsed = self.parse_raw(response).ok_or_else(|| {
            let preview: String = response.chars().take(120).collect();
            KgError::Parse(format!("no JSON relation array in model response: {preview:?}"))
        })?;

        Ok(parsed
            .into_iter()
            .filter_map(|r| {
                let relation_type = normalize_relation_type(&r.relation);
                let source = r.source.trim();
                let target = r.target.trim();
                if source.is_empty() || target.is_empty() || relation_type.is_empty() {
                    return None;
                }

                Some(
                    Relation::new(source, relation_type, target)
                        .with_confidence(r.confidence.unwrap_or(DEFAULT_CONFIDENCE))
                        .with_origin(origin_model),
                )
            })
            .collect())
    }

    fn parse_raw(&self, response: &str) -> Option<Vec<LlmRelation>> {
        if let Some(parsed) = try_parse(response.trim()) {
            return Some(parsed);
        }

        if let Some(re) = &self.fenced_block {
            if let Some(parsed) = re
                .captures(response)
                .and_then(|caps| caps.get(1))
                .and_then(|m| try_parse(m.as_str().trim()))
            {
                return Some(parsed);
            }
        }

        for re in [&self.array_greedy, &self.array_lazy].into_iter().flatten() {
            if let Some(parsed) = re.find(response).and_then(|m| try_parse(m.as_str())) {
                return Some(parsed);
            }
        }

        None
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

fn try_parse(candidate: &str) -> Option<Vec<LlmRelation>> {
    serde_json::from_str::<LlmResponse>(candidate)
        .ok()
        .map(LlmResponse::into_relations)
}

// ============================================================================
// Tests
// ============================================================================
