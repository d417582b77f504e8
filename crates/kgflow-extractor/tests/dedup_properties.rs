//! Property tests for the deduplication passes

use std::collections::{HashMap, HashSet};

use kgflow_core::{Entity, EntityMapping, EntityType, Relation};
use kgflow_extractor::{
    greedy_clusters, merge_by_similarity, relation_dedup::normalize_endpoints,
    RelationDeduplicator,
};
use kgflow_extractor::entity_dedup::similarity_matrix;
use proptest::prelude::*;

fn vectors(max_len: usize) -> impl Strategy<Value = Vec<Vec<f32>>> {
    prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 3), 0..max_len)
}

fn entities_for(vectors: &[Vec<f32>], name_lengths: &[usize]) -> Vec<Entity> {
    vectors
        .iter()
        .enumerate()
        .map(|(i, _)| {
            let pad = name_lengths.get(i).copied().unwrap_or(0);
            Entity::new(
                format!("{}{}", "n".repeat(pad), i),
                EntityType::Concept,
                "prop",
            )
        })
        .collect()
}

const NAMES: &[&str] = &["Alice", "Bob", "Carol", "alice", "bob"];
const TYPES: &[&str] = &["KNOWS", "STARRED_IN", "ACTED_IN", "PARENT_OF", "married to"];

fn relations() -> impl Strategy<Value = Vec<Relation>> {
    prop::collection::vec(
        (0..NAMES.len(), 0..TYPES.len(), 0..NAMES.len(), 0.0f32..1.0),
        0..24,
    )
    .prop_map(|items| {
        items
            .into_iter()
            .map(|(s, t, o, c)| Relation::new(NAMES[s], TYPES[t], NAMES[o]).with_confidence(c))
            .collect()
    })
}

fn lowercase_mapping() -> EntityMapping {
    let mut mapping = EntityMapping::new();
    mapping.insert("alice", "Alice");
    mapping.insert("bob", "Bob");
    mapping
}

proptest! {
    #[test]
    fn clusters_partition_the_input(vectors in vectors(16), threshold in 0.0f32..1.0) {
        let matrix = similarity_matrix(&vectors);
        let clusters = greedy_clusters(&matrix, threshold);

        let mut seen = HashSet::new();
        for cluster in &clusters {
            prop_assert!(!cluster.is_empty());
            let seed = cluster[0];
            for &member in cluster {
                prop_assert!(seen.insert(member), "index {} in two clusters", member);
                if member != seed {
                    prop_assert!(member > seed);
                    prop_assert!(matrix[seed][member] >= threshold);
                }
            }
        }
        prop_assert_eq!(seen.len(), vectors.len());
    }

    #[test]
    fn mapping_covers_every_name(
        vectors in vectors(12),
        lengths in prop::collection::vec(0usize..4, 12),
        threshold in 0.5f32..1.0,
    ) {
        let entities = entities_for(&vectors, &lengths);
        let names: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();

        let (canonical, mapping) = merge_by_similarity(entities, &vectors, threshold);
        let canonical_names: HashSet<&str> = canonical.iter().map(|e| e.name.as_str()).collect();

        prop_assert_eq!(canonical_names.len(), canonical.len());
        for name in &names {
            let target = mapping.get(name);
            prop_assert!(target.is_some());
            prop_assert!(canonical_names.contains(target.unwrap_or_default()));
        }
        for name in &canonical_names {
            prop_assert_eq!(mapping.get(name), Some(*name));
        }
    }

    #[test]
    fn entity_merge_is_idempotent(vectors in vectors(12), threshold in 0.5f32..1.0) {
        // earlier names are longer, so every cluster's canonical entity is its seed
        let count = vectors.len();
        let entities: Vec<Entity> = (0..count)
            .map(|i| Entity::new("n".repeat(count - i), EntityType::Concept, "prop"))
            .collect();
        let vector_of: HashMap<String, Vec<f32>> = entities
            .iter()
            .map(|e| e.name.clone())
            .zip(vectors.iter().cloned())
            .collect();

        let (once, _) = merge_by_similarity(entities, &vectors, threshold);
        let canonical_vectors: Vec<Vec<f32>> =
            once.iter().map(|e| vector_of[&e.name].clone()).collect();
        let (twice, mapping) = merge_by_similarity(once.clone(), &canonical_vectors, threshold);

        prop_assert_eq!(twice, once);
        prop_assert!(mapping.is_identity());
    }

    #[test]
    fn relation_dedup_is_idempotent(relations in relations()) {
        let dedup = RelationDeduplicator::default();
        let mapping = lowercase_mapping();

        let once = dedup.deduplicate(relations, &mapping);
        let twice = dedup.deduplicate(once.clone(), &mapping);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn relation_dedup_leaves_no_stale_names(relations in relations()) {
        let mapping = lowercase_mapping();
        let result = RelationDeduplicator::default().deduplicate(relations.clone(), &mapping);

        prop_assert!(result.len() <= relations.len());
        for relation in &result {
            prop_assert!(!mapping.contains(&relation.source_entity)
                || mapping.get(&relation.source_entity) == Some(relation.source_entity.as_str()));
            prop_assert!(!mapping.contains(&relation.target_entity)
                || mapping.get(&relation.target_entity) == Some(relation.target_entity.as_str()));
        }

        let renamed = normalize_endpoints(relations, &mapping);
        prop_assert!(renamed.iter().all(|r| r.source_entity != "alice" && r.target_entity != "bob"));
    }
}
