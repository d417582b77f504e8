//! Relation deduplication
//!
//! Rewrites relation endpoints through the entity mapping, canonicalizes
//! relation types through a synonym table, collapses symmetric relations
//! stated in both directions, and merges exact duplicate triples.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use kgflow_core::{EntityMapping, KgError, Relation, RelationsConfig, Result};

/// Built-in relation type synonyms (synonym -> canonical)
const BUILTIN_SYNONYMS: &[(&str, &str)] = &[
    ("STARRED_IN", "ACTED_IN"),
    ("PLAYED_IN", "ACTED_IN"),
    ("APPEARED_IN", "ACTED_IN"),
    ("CAST_IN", "ACTED_IN"),
    ("EMPLOYED_BY", "WORKS_FOR"),
    ("WORKS_AT", "WORKS_FOR"),
    ("EMPLOYEE_OF", "WORKS_FOR"),
    ("BASED_IN", "LOCATED_IN"),
    ("HEADQUARTERED_IN", "LOCATED_IN"),
    ("SITUATED_IN", "LOCATED_IN"),
    ("FOUNDER_OF", "FOUNDED"),
    ("CO_FOUNDED", "FOUNDED"),
    ("ESTABLISHED", "FOUNDED"),
    ("SPOUSE_OF", "MARRIED_TO"),
    ("WIFE_OF", "MARRIED_TO"),
    ("HUSBAND_OF", "MARRIED_TO"),
    ("BORN_IN", "BIRTHPLACE"),
    ("DIRECTOR_OF", "DIRECTED"),
    ("BELONGS_TO", "MEMBER_OF"),
    ("PART_OF", "MEMBER_OF"),
    ("ACQUAINTED_WITH", "KNOWS"),
    ("COLLABORATED_WITH", "WORKED_WITH"),
];

/// Built-in symmetric relation types
const BUILTIN_SYMMETRIC: &[&str] = &[
    "KNOWS",
    "MARRIED_TO",
    "SIBLING_OF",
    "FRIEND_OF",
    "WORKED_WITH",
    "PARTNER_OF",
    "RELATED_TO",
    "COLLEAGUE_OF",
];

/// Upper-snake-case a relation type: `"starred in"` -> `STARRED_IN`
pub fn normalize_relation_type(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_separator = false;

    for c in raw.chars() {
        if c.is_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.extend(c.to_uppercase());
        } else {
            pending_separator = true;
        }
    }

    out
}

// ============================================================================
// Vocabulary
// ============================================================================

/// Immutable relation vocabulary: type synonyms and symmetric types.
///
/// Built once at startup and shared by every deduplicator of the process.
#[derive(Debug, Clone)]
pub struct RelationVocabulary {
    synonyms: HashMap<String, String>,
    symmetric: HashSet<String>,
}

impl RelationVocabulary {
    /// Vocabulary holding only the built-in tables
    pub fn builtin() -> Self {
        Self {
            synonyms: BUILTIN_SYNONYMS
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
            symmetric: BUILTIN_SYMMETRIC.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Built-in tables extended with configured entries.
    ///
    /// Synonym chains (`A -> B`, `B -> C`) are resolved here so every entry
    /// points at its final type. A chain that loops back on itself is a
    /// configuration error.
    pub fn with_config(config: &RelationsConfig) -> Result<Self> {
        let mut vocabulary = Self::builtin();
        for (from, to) in &config.synonyms {
            let (from, to) = (normalize_relation_type(from), normalize_relation_type(to));
            if from == to {
                vocabulary.synonyms.remove(&from);
            } else {
                vocabulary.synonyms.insert(from, to);
            }
        }
        for relation_type in &config.symmetric {
            vocabulary
                .symmetric
                .insert(normalize_relation_type(relation_type));
        }

        vocabulary.synonyms = resolve_chains(&vocabulary.synonyms)?;
        Ok(vocabulary)
    }

    /// Canonical form of a relation type. Unmapped types are only normalized.
    pub fn canonical_type(&self, relation_type: &str) -> String {
        let normalized = normalize_relation_type(relation_type);
        match self.synonyms.get(&normalized) {
            Some(canonical) => canonical.clone(),
            None => normalized,
        }
    }

    /// Whether `relation_type` (canonical form) is symmetric
    pub fn is_symmetric(&self, relation_type: &str) -> bool {
        self.symmetric.contains(relation_type)
    }

    pub fn synonym_count(&self) -> usize {
        self.synonyms.len()
    }
}

/// Point every synonym at the end of its chain
fn resolve_chains(synonyms: &HashMap<String, String>) -> Result<HashMap<String, String>> {
    let mut resolved = HashMap::with_capacity(synonyms.len());

    for from in synonyms.keys() {
        let mut path = vec![from.as_str()];
        let mut current = from.as_str();
        while let Some(next) = synonyms.get(current) {
            if path.contains(&next.as_str()) {
                path.push(next);
                return Err(KgError::Config(format!(
                    "relation synonyms form a cycle: {}",
                    path.join(" -> ")
                )));
            }
            path.push(next);
            current = next;
        }
        resolved.insert(from.clone(), current.to_string());
    }

    Ok(resolved)
}

impl Default for RelationVocabulary {
    fn default() -> Self {
        Self::builtin()
    }
}

// ============================================================================
// Deduplicator
// ============================================================================

/// Relation deduplicator over an injected vocabulary
#[derive(Debug, Clone, Default)]
pub struct RelationDeduplicator {
    vocabulary: Arc<RelationVocabulary>,
}

impl RelationDeduplicator {
    pub fn new(vocabulary: Arc<RelationVocabulary>) -> Self {
        Self { vocabulary }
    }

    pub fn vocabulary(&self) -> &RelationVocabulary {
        &self.vocabulary
    }

    /// Deduplicate relations after renaming endpoints through `mapping`.
    ///
    /// Output keeps the order in which each surviving triple first appeared.
    pub fn deduplicate(&self, relations: Vec<Relation>, mapping: &EntityMapping) -> Vec<Relation> {
        let input = relations.len();
        let mut position: HashMap<(String, String, String), usize> = HashMap::new();
        let mut result: Vec<Relation> = Vec::new();

        for relation in normalize_endpoints(relations, mapping) {
            let relation = self.canonicalize(relation);
            let key = (
                relation.source_entity.clone(),
                relation.relation_type.clone(),
                relation.target_entity.clone(),
            );

            match position.get(&key) {
                Some(&i) => {
                    let kept = &mut result[i];
                    if relation.confidence > kept.confidence {
                        kept.confidence = relation.confidence;
                        kept.origin_model = relation.origin_model;
                    }
                }
                None => {
                    position.insert(key, result.len());
                    result.push(relation);
                }
            }
        }

        tracing::info!(
            input,
            output = result.len(),
            "Relation deduplication complete"
        );

        result
    }

    /// Canonical type, then sorted endpoints for symmetric types
    fn canonicalize(&self, mut relation: Relation) -> Relation {
        relation.relation_type = self.vocabulary.canonical_type(&relation.relation_type);

        if self.vocabulary.is_symmetric(&relation.relation_type)
            && relation.target_entity < relation.source_entity
        {
            std::mem::swap(&mut relation.source_entity, &mut relation.target_entity);
        }

        relation
    }
}

/// Rewrite relation endpoints through the entity mapping. Endpoints missing
/// from the mapping are kept as they are.
pub fn normalize_endpoints(relations: Vec<Relation>, mapping: &EntityMapping) -> Vec<Relation> {
    relations
        .into_iter()
        .map(|mut relation| {
            if let Some(canonical) = mapping.get(&relation.source_entity) {
                relation.source_entity = canonical.to_string();
            }
            if let Some(canonical) = mapping.get(&relation.target_entity) {
                relation.target_entity = canonical.to_string();
            }
            relation
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn dedup() -> RelationDeduplicator {
        RelationDeduplicator::default()
    }

    fn rel(s: &str, t: &str, o: &str) -> Relation {
        Relation::new(s, t, o).with_origin("test")
    }

    #[test]
    fn test_normalize_relation_type() {
        assert_eq!(normalize_relation_type("starred in"), "STARRED_IN");
        assert_eq!(normalize_relation_type("  works-for "), "WORKS_FOR");
        assert_eq!(normalize_relation_type("ACTED_IN"), "ACTED_IN");
        assert_eq!(normalize_relation_type("parentOf"), "PARENTOF");
        assert_eq!(normalize_relation_type("--"), "");
    }

    #[test]
    fn test_synonym_merge() {
        let result = dedup().deduplicate(
            vec![
                rel("Tom Hanks", "STARRED_IN", "Big").with_confidence(0.7),
                rel("Tom Hanks", "ACTED_IN", "Big").with_confidence(0.9),
            ],
            &EntityMapping::new(),
        );

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].triple(), ("Tom Hanks", "ACTED_IN", "Big"));
        assert_eq!(result[0].confidence, 0.9);
    }

    #[test]
    fn test_symmetric_collapse_sorts_endpoints() {
        let result = dedup().deduplicate(
            vec![rel("Bob", "KNOWS", "Alice"), rel("Alice", "KNOWS", "Bob")],
            &EntityMapping::new(),
        );

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].triple(), ("Alice", "KNOWS", "Bob"));
    }

    #[test]
    fn test_asymmetric_not_collapsed() {
        let result = dedup().deduplicate(
            vec![rel("Alice", "PARENT_OF", "Bob"), rel("Bob", "PARENT_OF", "Alice")],
            &EntityMapping::new(),
        );

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].triple(), ("Alice", "PARENT_OF", "Bob"));
        assert_eq!(result[1].triple(), ("Bob", "PARENT_OF", "Alice"));
    }

    #[test]
    fn test_mapping_applied_to_both_endpoints() {
        let mut mapping = EntityMapping::new();
        mapping.insert("nicolas cage", "Nicolas Cage");
        mapping.insert("Nicolas Cage", "Nicolas Cage");
        mapping.insert("faceoff", "Face/Off");

        let result = dedup().deduplicate(
            vec![
                rel("nicolas cage", "ACTED_IN", "faceoff"),
                rel("John Travolta", "KNOWS", "nicolas cage"),
            ],
            &mapping,
        );

        assert_eq!(result[0].triple(), ("Nicolas Cage", "ACTED_IN", "Face/Off"));
        // unmapped endpoint passes through; KNOWS sorts endpoints
        assert_eq!(result[1].triple(), ("John Travolta", "KNOWS", "Nicolas Cage"));
    }

    #[test]
    fn test_max_confidence_keeps_its_origin() {
        let result = dedup().deduplicate(
            vec![
                rel("A", "FOUNDED", "B").with_confidence(0.5).with_origin("small"),
                rel("A", "founder of", "B").with_confidence(0.95).with_origin("large"),
            ],
            &EntityMapping::new(),
        );

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].confidence, 0.95);
        assert_eq!(result[0].origin_model, "large");
    }

    #[test]
    fn test_idempotent() {
        let mut mapping = EntityMapping::new();
        mapping.insert("bob", "Bob");
        let once = dedup().deduplicate(
            vec![
                rel("bob", "MARRIED_TO", "Alice"),
                rel("Alice", "spouse of", "Bob"),
                rel("Alice", "PARENT_OF", "Carol"),
            ],
            &mapping,
        );
        let twice = dedup().deduplicate(once.clone(), &mapping);

        assert_eq!(once.len(), 2);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_configured_vocabulary() {
        let mut config = RelationsConfig::default();
        config
            .synonyms
            .insert("costarred with".to_string(), "WORKED_WITH".to_string());
        config.symmetric.push("rival_of".to_string());

        let vocabulary = RelationVocabulary::with_config(&config).unwrap();
        assert_eq!(vocabulary.canonical_type("COSTARRED_WITH"), "WORKED_WITH");
        assert!(vocabulary.is_symmetric("RIVAL_OF"));
        // built-ins survive
        assert_eq!(vocabulary.canonical_type("played in"), "ACTED_IN");
    }

    #[test]
    fn test_synonym_cycle_rejected() {
        let mut config = RelationsConfig::default();
        config.synonyms.insert("X".to_string(), "Y".to_string());
        config.synonyms.insert("Y".to_string(), "X".to_string());

        let err = RelationVocabulary::with_config(&config).unwrap_err();
        assert!(matches!(err, KgError::Config(_)));
        assert!(err.to_string().contains("cycle"));

        // a configured entry can also close a loop through the built-ins
        let mut config = RelationsConfig::default();
        config
            .synonyms
            .insert("acted in".to_string(), "STARRED_IN".to_string());
        assert!(RelationVocabulary::with_config(&config).is_err());
    }

    #[test]
    fn test_synonym_chains_resolved() {
        let mut config = RelationsConfig::default();
        config.synonyms.insert("X".to_string(), "Y".to_string());
        config.synonyms.insert("Y".to_string(), "Z".to_string());
        // mapping a type to itself clears it
        config
            .synonyms
            .insert("born in".to_string(), "BORN_IN".to_string());

        let vocabulary = RelationVocabulary::with_config(&config).unwrap();
        assert_eq!(vocabulary.canonical_type("X"), "Z");
        assert_eq!(vocabulary.canonical_type("Y"), "Z");
        assert_eq!(vocabulary.canonical_type("BORN_IN"), "BORN_IN");

        let dedup = RelationDeduplicator::new(Arc::new(vocabulary));
        let mapping = EntityMapping::new();
        let once = dedup.deduplicate(
            vec![rel("A", "X", "B"), rel("A", "Y", "B"), rel("A", "Z", "B")],
            &mapping,
        );
        assert_eq!(once.len(), 1);
        assert_eq!(once[0].relation_type, "Z");
        assert_eq!(dedup.deduplicate(once.clone(), &mapping), once);
    }

    #[test]
    fn test_builtin_synonyms_are_final() {
        let vocabulary = RelationVocabulary::builtin();
        for (from, to) in BUILTIN_SYNONYMS {
            assert_eq!(vocabulary.canonical_type(from), *to);
            assert_eq!(vocabulary.canonical_type(to), *to);
        }
    }

    #[test]
    fn test_normalize_endpoints_only_renames() {
        let mut mapping = EntityMapping::new();
        mapping.insert("bob", "Bob");

        let result = normalize_endpoints(
            vec![rel("bob", "STARRED_IN", "X"), rel("Bob", "STARRED_IN", "X")],
            &mapping,
        );
        assert_eq!(result.len(), 2);
        assert!(result.iter().all(|r| r.source_entity == "Bob"));
        assert!(result.iter().all(|r| r.relation_type == "STARRED_IN"));
    }
}
