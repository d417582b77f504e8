//! Named Entity Recognition (NER) module
//!
//! Fast, deterministic recognizer that runs without any network call.
//! Spans are tagged with OntoNotes-style native labels (`PERSON`, `ORG`,
//! `GPE`, ...) and then mapped onto the closed [`EntityType`] set through a
//! fixed lookup table. Labels missing from the table become `CONCEPT`.

use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::{EntityExtractor, Extraction, Extractor};
use kgflow_core::{Chunk, Entity, EntityType, Result};

/// Extractor identifier recorded on every entity this module produces
pub const RULE_NER_SOURCE: &str = "rule_ner";

// ============================================================================
// Native label table
// ============================================================================

/// Native recognizer label -> system entity type
const LABEL_TABLE: &[(&str, EntityType)] = &[
    ("PERSON", EntityType::Person),
    ("PER", EntityType::Person),
    ("ORG", EntityType::Organization),
    ("NORP", EntityType::Organization),
    ("GPE", EntityType::Location),
    ("LOC", EntityType::Location),
    ("FAC", EntityType::Location),
    ("DATE", EntityType::Date),
    ("TIME", EntityType::Date),
    ("EVENT", EntityType::Event),
    ("PRODUCT", EntityType::Product),
    ("MONEY", EntityType::Quantity),
    ("PERCENT", EntityType::Quantity),
    ("QUANTITY", EntityType::Quantity),
    ("CARDINAL", EntityType::Quantity),
];

/// Map a native recognizer label onto the system entity type
pub fn map_label(label: &str) -> EntityType {
    LABEL_TABLE
        .iter()
        .find(|(native, _)| *native == label)
        .map(|(_, entity_type)| *entity_type)
        .unwrap_or(EntityType::Concept)
}

// ============================================================================
// Rule-based NER
// ============================================================================

const MONTHS: &str =
    "January|February|March|April|May|June|July|August|September|October|November|December";

/// Tokens that never start an entity name
const LEADING_STOPWORDS: &[&str] = &[
    "The", "A", "An", "In", "On", "At", "This", "That", "These", "Those", "It", "He", "She",
    "They", "We", "I", "But", "And", "Or", "If", "When", "While", "After", "Before", "During",
    "Since", "For", "From", "To", "With", "By", "As", "Of", "Mr", "Mrs", "Ms", "Dr", "Prof",
    "Sir", "Dame",
];

/// Label used for capitalised runs no other rule claimed
const PROPER_NOUN_LABEL: &str = "PROPN";

/// A regex rule producing spans with a native label
#[derive(Debug, Clone)]
struct PatternRule {
    regex: Regex,
    label: String,
    /// Lower wins when two rules claim the same span
    priority: u8,
    /// Capture group holding the entity text
    group: usize,
}

/// A candidate span before overlap resolution
#[derive(Debug, Clone)]
struct Candidate {
    start: usize,
    end: usize,
    name: String,
    label: String,
    priority: u8,
}

/// Dictionary entry for gazetteer matching
#[derive(Debug, Clone)]
pub struct DictionaryEntry {
    pub term: String,
    pub label: String,
    pub aliases: Vec<String>,
}

/// Rule-based NER using regex patterns, a gazetteer and capitalisation cues
#[derive(Debug, Clone)]
pub struct RuleBasedNer {
    patterns: Vec<PatternRule>,
    /// Known terms, keyed by term
    dictionary: HashMap<String, DictionaryEntry>,
    /// Surface form (term or alias) -> canonical term
    lookup: HashMap<String, String>,
    /// Alternation over every surface form, longest first
    gazetteer: Option<Regex>,
    capitalized_run: Option<Regex>,
}

impl RuleBasedNer {
    /// Create a new rule-based NER with the default rules and gazetteer
    pub fn new() -> Self {
        let mut ner = Self {
            patterns: Vec::new(),
            dictionary: HashMap::new(),
            lookup: HashMap::new(),
            gazetteer: None,
            capitalized_run: Regex::new(r"\b\p{Lu}[\w'’\-]*(?:\s+\p{Lu}[\w'’\-]*)*").ok(),
        };

        ner.init_patterns();
        ner.init_gazetteer();
        ner
    }

    /// Add a gazetteer term with aliases. Aliases resolve to `term`.
    pub fn with_term(mut self, term: &str, label: &str, aliases: &[&str]) -> Self {
        self.add_term(term, label, aliases);
        self.rebuild_gazetteer();
        self
    }

    fn init_patterns(&mut self) {
        // Dates
        self.add_pattern(
            &format!(r"\b(?:{MONTHS})\s+\d{{1,2}}(?:st|nd|rd|th)?,?\s+\d{{4}}\b"),
            "DATE",
            1,
            0,
        );
        self.add_pattern(
            &format!(r"\b\d{{1,2}}\s+(?:{MONTHS})\s+\d{{4}}\b"),
            "DATE",
            1,
            0,
        );
        self.add_pattern(&format!(r"\b(?:{MONTHS})\s+\d{{4}}\b"), "DATE", 1, 0);
        self.add_pattern(r"\b\d{4}-\d{2}-\d{2}\b", "DATE", 1, 0);
        self.add_pattern(r"\b(?:1[6-9]|20)\d{2}\b", "DATE", 1, 0);

        // Money and percentages
        self.add_pattern(
            r"[$€£]\s?\d[\d,]*(?:\.\d+)?(?:\s?(?:thousand|million|billion|trillion)\b)?",
            "MONEY",
            1,
            0,
        );
        self.add_pattern(
            r"\b\d[\d,]*(?:\.\d+)?\s?(?:(?:million|billion)\s)?(?:dollars|euros|pounds|USD|EUR|GBP)\b",
            "MONEY",
            1,
            0,
        );
        self.add_pattern(r"\b\d+(?:\.\d+)?(?:%|\s?percent\b)", "PERCENT", 1, 0);

        // Honorific followed by a capitalised name
        self.add_pattern(
            r"\b(?:Mr|Mrs|Ms|Dr|Prof|Sir|Dame)\.?\s+(\p{Lu}\p{Ll}+(?:\s+\p{Lu}\p{Ll}+)*)",
            "PERSON",
            1,
            1,
        );

        // Organisation and event suffixes
        self.add_pattern(
            r"\b((?:\p{Lu}[\w&\-]*\s+)+(?:Inc|Corp|Corporation|Ltd|LLC|GmbH|Company|Group|University|Institute|Foundation|Association|Agency|Bank|Studios|Pictures)\b\.?)",
            "ORG",
            2,
            1,
        );
        self.add_pattern(
            r"\b((?:\p{Lu}[\w\-]*\s+)+(?:War|Olympics|Summit|Conference|Festival|Awards|Election|Revolution)\b)",
            "EVENT",
            2,
            1,
        );
    }

    fn init_gazetteer(&mut self) {
        // Countries and regions
        self.add_term("United States", "GPE", &["USA", "United States of America"]);
        self.add_term("United Kingdom", "GPE", &["UK", "Great Britain", "Britain"]);
        for country in [
            "France", "Germany", "Japan", "China", "India", "Canada", "Italy", "Spain", "Brazil",
            "Australia",
        ] {
            self.add_term(country, "GPE", &[]);
        }

        // Cities
        for city in [
            "New York", "Los Angeles", "San Francisco", "London", "Paris", "Berlin", "Tokyo",
            "Beijing", "Hollywood",
        ] {
            self.add_term(city, "GPE", &[]);
        }

        // International bodies
        self.add_term("European Union", "ORG", &["EU"]);
        self.add_term("United Nations", "ORG", &["UN"]);

        self.rebuild_gazetteer();
    }

    /// Add a regex pattern
    fn add_pattern(&mut self, pattern: &str, label: &str, priority: u8, group: usize) {
        if let Ok(regex) = Regex::new(pattern) {
            self.patterns.push(PatternRule {
                regex,
                label: label.to_string(),
                priority,
                group,
            });
        }
    }

    /// Add a dictionary term
    fn add_term(&mut self, term: &str, label: &str, aliases: &[&str]) {
        let entry = DictionaryEntry {
            term: term.to_string(),
            label: label.to_string(),
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
        };

        self.lookup.insert(term.to_string(), term.to_string());
        for alias in &entry.aliases {
            self.lookup.insert(alias.clone(), term.to_string());
        }

        self.dictionary.insert(term.to_string(), entry);
    }

    fn rebuild_gazetteer(&mut self) {
        let mut surfaces: Vec<&String> = self.lookup.keys().collect();
        // Longest first so "United States of America" beats "United States"
        surfaces.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));

        let alternation = surfaces
            .iter()
            .map(|s| regex::escape(s))
            .collect::<Vec<_>>()
            .join("|");

        self.gazetteer = if alternation.is_empty() {
            None
        } else {
            Regex::new(&format!(r"\b(?:{alternation})\b")).ok()
        };
    }

    /// Extract candidates using pattern rules
    fn extract_by_patterns(&self, text: &str) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        for rule in &self.patterns {
            for caps in rule.regex.captures_iter(text) {
                let Some(mat) = caps.get(rule.group) else {
                    continue;
                };
                if let Some((start, end, name)) = clean_span(mat.as_str(), mat.start()) {
                    candidates.push(Candidate {
                        start,
                        end,
                        name,
                        label: rule.label.clone(),
                        priority: rule.priority,
                    });
                }
            }
        }

        candidates
    }

    /// Extract candidates using gazetteer lookup
    fn extract_by_dictionary(&self, text: &str) -> Vec<Candidate> {
        let Some(gazetteer) = &self.gazetteer else {
            return Vec::new();
        };

        gazetteer
            .find_iter(text)
            .filter_map(|mat| {
                let term = self.lookup.get(mat.as_str())?;
                let entry = self.dictionary.get(term)?;
                Some(Candidate {
                    start: mat.start(),
                    end: mat.end(),
                    name: entry.term.clone(),
                    label: entry.label.clone(),
                    priority: 0,
                })
            })
            .collect()
    }

    /// Capitalised word runs not claimed by any other rule
    fn extract_proper_nouns(&self, text: &str) -> Vec<Candidate> {
        let Some(regex) = &self.capitalized_run else {
            return Vec::new();
        };

        let mut candidates = Vec::new();
        for mat in regex.find_iter(text) {
            let Some((start, end, name)) = clean_span(mat.as_str(), mat.start()) else {
                continue;
            };

            let single_token = !name.contains(char::is_whitespace);
            if single_token
                && (name.chars().count() < 2
                    || LEADING_STOPWORDS.contains(&name.as_str())
                    || starts_sentence(text, start))
            {
                continue;
            }

            candidates.push(Candidate {
                start,
                end,
                name,
                label: PROPER_NOUN_LABEL.to_string(),
                priority: 9,
            });
        }

        candidates
    }

    /// Keep the earliest, then longest, then highest-priority span of any
    /// overlapping group
    fn resolve_overlaps(&self, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
        candidates.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then((b.end - b.start).cmp(&(a.end - a.start)))
                .then(a.priority.cmp(&b.priority))
        });

        let mut result: Vec<Candidate> = Vec::new();
        let mut covered_until = 0;

        for candidate in candidates {
            if candidate.start < covered_until {
                continue;
            }
            covered_until = candidate.end;
            result.push(candidate);
        }

        result
    }

    /// Recognize entities in text, in order of first appearance
    pub fn recognize(&self, text: &str) -> Vec<Entity> {
        if text.trim().is_empty() || text.contains('\0') {
            return Vec::new();
        }

        let mut candidates = self.extract_by_patterns(text);
        candidates.extend(self.extract_by_dictionary(text));
        candidates.extend(self.extract_proper_nouns(text));

        let mut seen = HashSet::new();
        self.resolve_overlaps(candidates)
            .into_iter()
            .filter(|c| seen.insert(c.name.clone()))
            .map(|c| Entity::new(c.name, map_label(&c.label), RULE_NER_SOURCE))
            .collect()
    }
}

impl Default for RuleBasedNer {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityExtractor for RuleBasedNer {
    fn extract(&self, text: &str) -> Vec<Entity> {
        self.recognize(text)
    }
}

#[async_trait::async_trait]
impl Extractor for RuleBasedNer {
    fn name(&self) -> &str {
        RULE_NER_SOURCE
    }

    async fn extract(&self, chunk: &Chunk, _known_entities: &[Entity]) -> Result<Extraction> {
        Ok(Extraction {
            entities: self.recognize(&chunk.text),
            relations: Vec::new(),
        })
    }
}

/// Strip leading stopwords and a trailing possessive from a matched span.
/// Returns the adjusted byte range and the entity name.
fn clean_span(surface: &str, offset: usize) -> Option<(usize, usize, String)> {
    let mut skipped = 0;
    let mut rest = surface;

    loop {
        let word_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let word = rest[..word_end].trim_end_matches('.');
        if word_end < rest.len() && LEADING_STOPWORDS.contains(&word) {
            let after = rest[word_end..].trim_start();
            skipped += rest.len() - after.len();
            rest = after;
        } else {
            break;
        }
    }

    let name = rest
        .strip_suffix("'s")
        .or_else(|| rest.strip_suffix("’s"))
        .unwrap_or(rest)
        .trim();

    if name.is_empty() {
        return None;
    }

    let start = offset + skipped;
    Some((start, start + name.len(), name.to_string()))
}

/// True when the byte offset begins a sentence
fn starts_sentence(text: &str, start: usize) -> bool {
    match text[..start].trim_end().chars().last() {
        None => true,
        Some(c) => matches!(c, '.' | '!' | '?' | '\n' | ':' | '"' | '“'),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn find<'a>(entities: &'a [Entity], name: &str) -> Option<&'a Entity> {
        entities.iter().find(|e| e.name == name)
    }

    #[test]
    fn test_label_table() {
        assert_eq!(map_label("ORG"), EntityType::Organization);
        assert_eq!(map_label("GPE"), EntityType::Location);
        assert_eq!(map_label("TIME"), EntityType::Date);
        assert_eq!(map_label("WORK_OF_ART"), EntityType::Concept);
        assert_eq!(map_label("made-up"), EntityType::Concept);
    }

    #[test]
    fn test_person_org_and_date() {
        let ner = RuleBasedNer::new();
        let entities = ner.recognize("Dr. Alice Smith joined OpenAI Inc. in 2019.");

        assert_eq!(
            find(&entities, "Alice Smith").map(|e| e.entity_type),
            Some(EntityType::Person)
        );
        assert_eq!(
            find(&entities, "OpenAI Inc.").map(|e| e.entity_type),
            Some(EntityType::Organization)
        );
        assert_eq!(
            find(&entities, "2019").map(|e| e.entity_type),
            Some(EntityType::Date)
        );
        assert!(find(&entities, "Dr").is_none());
    }

    #[test]
    fn test_gazetteer_alias_resolves_to_term() {
        let ner = RuleBasedNer::new();
        let entities = ner.recognize("She moved to the USA and later to Paris.");

        let us = find(&entities, "United States").expect("alias should resolve");
        assert_eq!(us.entity_type, EntityType::Location);
        assert!(find(&entities, "Paris").is_some());
    }

    #[test]
    fn test_money_and_percent() {
        let ner = RuleBasedNer::new();
        let entities = ner.recognize("Revenue grew 12% to $3.5 billion last year.");

        assert_eq!(
            find(&entities, "12%").map(|e| e.entity_type),
            Some(EntityType::Quantity)
        );
        assert_eq!(
            find(&entities, "$3.5 billion").map(|e| e.entity_type),
            Some(EntityType::Quantity)
        );
    }

    #[test]
    fn test_full_date_beats_month_name() {
        let ner = RuleBasedNer::new();
        let entities = ner.recognize("The film premiered on March 4, 1997 in Hollywood.");

        assert!(find(&entities, "March 4, 1997").is_some());
        assert!(find(&entities, "March").is_none());
        assert!(find(&entities, "1997").is_none());
    }

    #[test]
    fn test_unmapped_label_defaults_to_concept() {
        let ner = RuleBasedNer::new();
        let entities = ner.recognize("In 1997 Nicolas Cage starred in Face Off.");

        let cage = find(&entities, "Nicolas Cage").expect("proper noun run");
        assert_eq!(cage.entity_type, EntityType::Concept);
    }

    #[test]
    fn test_sentence_initial_word_is_skipped() {
        let ner = RuleBasedNer::new();
        let entities = ner.recognize("Yesterday it rained.");
        assert!(entities.is_empty());
    }

    #[test]
    fn test_names_unique_within_chunk() {
        let ner = RuleBasedNer::new();
        let entities = ner.recognize("Paris is large. Paris is old. Berlin is too.");

        let paris = entities.iter().filter(|e| e.name == "Paris").count();
        assert_eq!(paris, 1);
        assert_eq!(entities[0].name, "Paris");
    }

    #[test]
    fn test_deterministic_full_confidence() {
        let ner = RuleBasedNer::new();
        let text = "Mr. John Doe of Acme Corp met Ms. Jane Roe in London on 2021-05-04.";

        let first = ner.recognize(text);
        let second = ner.recognize(text);

        assert_eq!(first, second);
        assert!(!first.is_empty());
        assert!(first
            .iter()
            .all(|e| e.confidence == 1.0 && e.source == RULE_NER_SOURCE));
    }

    #[test]
    fn test_malformed_input_yields_nothing() {
        let ner = RuleBasedNer::new();
        assert!(ner.recognize("").is_empty());
        assert!(ner.recognize("   \n\t").is_empty());
        assert!(ner.recognize("Paris\0London").is_empty());
    }

    #[test]
    fn test_custom_term() {
        let ner = RuleBasedNer::new().with_term("Face/Off", "WORK_OF_ART", &["Face Off"]);
        let entities = ner.recognize("Nicolas Cage starred in Face Off.");

        let film = find(&entities, "Face/Off").expect("custom term");
        assert_eq!(film.entity_type, EntityType::Concept);
    }

    #[tokio::test]
    async fn test_extractor_capability() {
        let ner = RuleBasedNer::new();
        let chunk = Chunk::new("doc", 0, "Tokyo and Berlin signed a pact.");

        let extraction = Extractor::extract(&ner, &chunk, &[]).await.unwrap();
        assert_eq!(extraction.entities.len(), 2);
        assert!(extraction.relations.is_empty());
        assert_eq!(Extractor::name(&ner), "rule_ner");
    }
}
