//! Knowledge graph records
//!
//! Relations reference entities by name, never by object identity. Entity
//! deduplication therefore produces an [`EntityMapping`] (raw name to
//! canonical name) that must be applied to relation endpoints before
//! relations are compared.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

// ============================================================================
// Chunks
// ============================================================================

/// An ordered slice of document text produced by the document parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Text content
    pub text: String,

    /// Identifier of the source document
    pub source_id: String,

    /// First and last page covered by this chunk (inclusive)
    pub page_range: (u32, u32),

    /// Chunk index within the document
    pub chunk_index: u32,

    /// Section name or heading, when the parser knows it
    pub section: Option<String>,
}

impl Chunk {
    /// Create a new chunk on page 1
    pub fn new(source_id: impl Into<String>, chunk_index: u32, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_id: source_id.into(),
            page_range: (1, 1),
            chunk_index,
            section: None,
        }
    }

    /// Set the page range
    pub fn with_pages(mut self, first: u32, last: u32) -> Self {
        self.page_range = (first, last.max(first));
        self
    }

    /// Set section name
    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    /// Stable identifier used in run events
    pub fn item_id(&self) -> String {
        format!("{}#{}", self.source_id, self.chunk_index)
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Closed set of entity types known to the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Person,
    Organization,
    Location,
    Date,
    Event,
    Product,
    Quantity,
    Concept,
}

impl EntityType {
    pub const ALL: [EntityType; 8] = [
        Self::Person,
        Self::Organization,
        Self::Location,
        Self::Date,
        Self::Event,
        Self::Product,
        Self::Quantity,
        Self::Concept,
    ];

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "PERSON",
            Self::Organization => "ORGANIZATION",
            Self::Location => "LOCATION",
            Self::Date => "DATE",
            Self::Event => "EVENT",
            Self::Product => "PRODUCT",
            Self::Quantity => "QUANTITY",
            Self::Concept => "CONCEPT",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == upper)
            .ok_or_else(|| format!("unknown entity type: {s}"))
    }
}

/// A named entity extracted from text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,

    #[serde(rename = "type")]
    pub entity_type: EntityType,

    /// Free-text description; merged descriptions are joined with "; "
    #[serde(default)]
    pub description: String,

    /// Identifier of the extractor that produced this entity
    pub source: String,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,
}

impl Entity {
    /// Create a new entity with full confidence
    pub fn new(name: impl Into<String>, entity_type: EntityType, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type,
            description: String::new(),
            source: source.into(),
            confidence: 1.0,
        }
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set confidence score, clamped to [0, 1]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

// ============================================================================
// Relations
// ============================================================================

/// A typed, directed edge between two entities, referenced by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub source_entity: String,
    pub relation_type: String,
    pub target_entity: String,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,

    /// Model that emitted this relation
    pub origin_model: String,
}

impl Relation {
    /// Create a new relation
    pub fn new(
        source_entity: impl Into<String>,
        relation_type: impl Into<String>,
        target_entity: impl Into<String>,
    ) -> Self {
        Self {
            source_entity: source_entity.into(),
            relation_type: relation_type.into(),
            target_entity: target_entity.into(),
            confidence: 1.0,
            origin_model: String::new(),
        }
    }

    /// Set confidence score, clamped to [0, 1]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Set the originating model
    pub fn with_origin(mut self, origin_model: impl Into<String>) -> Self {
        self.origin_model = origin_model.into();
        self
    }

    /// The `(source, type, target)` triple used for duplicate detection
    pub fn triple(&self) -> (&str, &str, &str) {
        (
            self.source_entity.as_str(),
            self.relation_type.as_str(),
            self.target_entity.as_str(),
        )
    }
}

// ============================================================================
// Entity mapping
// ============================================================================

/// Mapping from every observed entity name to its canonical name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityMapping(HashMap<String, String>);

impl EntityMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity mapping over the given names
    pub fn identity<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        names
            .into_iter()
            .map(|n| (n.to_string(), n.to_string()))
            .collect()
    }

    pub fn insert(&mut self, raw: impl Into<String>, canonical: impl Into<String>) {
        self.0.insert(raw.into(), canonical.into());
    }

    pub fn get(&self, raw: &str) -> Option<&str> {
        self.0.get(raw).map(String::as_str)
    }

    /// Resolve a name; names absent from the mapping are already canonical
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.get(name).unwrap_or(name)
    }

    pub fn contains(&self, raw: &str) -> bool {
        self.0.contains_key(raw)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every name maps to itself
    pub fn is_identity(&self) -> bool {
        self.0.iter().all(|(raw, canonical)| raw == canonical)
    }

    /// Distinct canonical names
    pub fn canonical_names(&self) -> HashSet<&str> {
        self.0.values().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for EntityMapping {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ============================================================================
// Canonical entity arena
// ============================================================================

/// Name-keyed arena of canonical entities
#[derive(Debug, Clone, Default)]
pub struct EntityIndex {
    entities: Vec<Entity>,
    by_name: HashMap<String, usize>,
}

impl EntityIndex {
    /// Build from canonical entities. Later duplicates of a name are ignored.
    pub fn from_entities(entities: Vec<Entity>) -> Self {
        let mut index = Self::default();
        for entity in entities {
            if index.by_name.contains_key(&entity.name) {
                continue;
            }
            index.by_name.insert(entity.name.clone(), index.entities.len());
            index.entities.push(entity);
        }
        index
    }

    pub fn get(&self, name: &str) -> Option<&Entity> {
        self.by_name.get(name).map(|&i| &self.entities[i])
    }

    /// Look up the canonical entity for a raw name
    pub fn resolve(&self, mapping: &EntityMapping, raw: &str) -> Option<&Entity> {
        self.get(mapping.resolve(raw))
    }

    /// Canonical entities for a list of raw names, first occurrence order,
    /// without repeats
    pub fn canonical_for<'a>(
        &self,
        mapping: &EntityMapping,
        raw_names: impl IntoIterator<Item = &'a str>,
    ) -> Vec<Entity> {
        let mut seen = HashSet::new();
        raw_names
            .into_iter()
            .filter_map(|raw| self.resolve(mapping, raw))
            .filter(|e| seen.insert(e.name.as_str()))
            .cloned()
            .collect()
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn into_entities(self) -> Vec<Entity> {
        self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

// ============================================================================
// Knowledge graph
// ============================================================================

/// Final entity and relation set of one document, handed to the graph sink
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub source_id: String,
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

impl KnowledgeGraph {
    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_builder() {
        let chunk = Chunk::new("doc-1", 3, "Alice met Bob.")
            .with_pages(2, 4)
            .with_section("Intro");

        assert_eq!(chunk.page_range, (2, 4));
        assert_eq!(chunk.section.as_deref(), Some("Intro"));
        assert_eq!(chunk.item_id(), "doc-1#3");
    }

    #[test]
    fn test_entity_type_parse() {
        assert_eq!("person".parse::<EntityType>(), Ok(EntityType::Person));
        assert_eq!(" Organization ".parse::<EntityType>(), Ok(EntityType::Organization));
        assert!("spaceship".parse::<EntityType>().is_err());
        assert_eq!(EntityType::Concept.to_string(), "CONCEPT");
    }

    #[test]
    fn test_entity_serializes_type_field() {
        let entity = Entity::new("OpenAI", EntityType::Organization, "rule_ner");
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["type"], "ORGANIZATION");
        assert_eq!(json["confidence"], 1.0);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let entity = Entity::new("x", EntityType::Concept, "t").with_confidence(1.7);
        assert_eq!(entity.confidence, 1.0);
        let relation = Relation::new("a", "KNOWS", "b").with_confidence(-0.2);
        assert_eq!(relation.confidence, 0.0);
    }

    #[test]
    fn test_mapping_resolve_passthrough() {
        let mut mapping = EntityMapping::new();
        mapping.insert("nicolas cage", "Nicolas Cage");

        assert_eq!(mapping.resolve("nicolas cage"), "Nicolas Cage");
        assert_eq!(mapping.resolve("Tom Hanks"), "Tom Hanks");
        assert!(!mapping.is_identity());
        assert!(EntityMapping::identity(["a", "b"]).is_identity());
    }

    #[test]
    fn test_entity_index_canonical_for() {
        let index = EntityIndex::from_entities(vec![
            Entity::new("OpenAI Inc.", EntityType::Organization, "t"),
            Entity::new("Sam Altman", EntityType::Person, "t"),
        ]);
        let mut mapping = EntityMapping::identity(["OpenAI Inc.", "Sam Altman"]);
        mapping.insert("OpenAI", "OpenAI Inc.");

        let entities = index.canonical_for(&mapping, ["OpenAI", "Sam Altman", "OpenAI Inc.", "Nobody"]);
        let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["OpenAI Inc.", "Sam Altman"]);
    }
}
