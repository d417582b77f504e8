//! Entity deduplication
//!
//! Collapses near-duplicate entity surface forms into canonical entities by
//! embedding every name and clustering on cosine similarity.
//!
//! Clustering is a single greedy pass: each unvisited entity, in input order,
//! seeds a cluster and absorbs every later unvisited entity whose similarity
//! to the seed is at or above the threshold. The result is a strict partition.
//! Two clusters whose seeds were never compared against each other are never
//! merged, even when they describe the same thing.

use std::collections::HashMap;
use std::sync::Arc;

use kgflow_core::{EmbeddingClient, Entity, EntityMapping, KgError, Result};

/// Default similarity at or above which two names are merged
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.85;

/// Separator used when merging descriptions
const DESCRIPTION_SEPARATOR: &str = "; ";

/// Embedding-similarity entity deduplicator
pub struct EntityDeduplicator {
    embedder: Arc<dyn EmbeddingClient>,
    similarity_threshold: f32,
    batch_size: usize,
}

impl EntityDeduplicator {
    /// Create a deduplicator with the default threshold
    pub fn new(embedder: Arc<dyn EmbeddingClient>) -> Self {
        Self {
            embedder,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            batch_size: 64,
        }
    }

    /// Set similarity threshold
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Set the number of names sent per embedding request
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn threshold(&self) -> f32 {
        self.similarity_threshold
    }

    /// Deduplicate entities, returning canonical entities and the complete
    /// raw-name to canonical-name mapping.
    ///
    /// Embedding failures are returned as [`KgError::Embedding`]; there is no
    /// fallback to string equality.
    pub async fn deduplicate(&self, entities: Vec<Entity>) -> Result<(Vec<Entity>, EntityMapping)> {
        if entities.len() <= 1 {
            let mapping = EntityMapping::identity(entities.iter().map(|e| e.name.as_str()));
            return Ok((entities, mapping));
        }

        let input_count = entities.len();
        let unique = collapse_exact_names(entities);
        if unique.len() <= 1 {
            let mapping = EntityMapping::identity(unique.iter().map(|e| e.name.as_str()));
            return Ok((unique, mapping));
        }

        let names: Vec<String> = unique.iter().map(|e| e.name.clone()).collect();
        let vectors = self.embed_names(&names).await?;
        let (canonical, mapping) = merge_by_similarity(unique, &vectors, self.similarity_threshold);

        tracing::info!(
            input = input_count,
            distinct_names = names.len(),
            canonical = canonical.len(),
            threshold = self.similarity_threshold,
            "Entity deduplication complete"
        );

        Ok((canonical, mapping))
    }

    async fn embed_names(&self, names: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(names.len());

        for batch in names.chunks(self.batch_size) {
            let embedded = self.embedder.embed(batch).await.map_err(|e| match e {
                KgError::Embedding(_) => e,
                other => KgError::Embedding(other.to_string()),
            })?;

            if embedded.len() != batch.len() {
                return Err(KgError::Embedding(format!(
                    "expected {} vectors, got {}",
                    batch.len(),
                    embedded.len()
                )));
            }
            vectors.extend(embedded);
        }

        if let Some(first) = vectors.first() {
            let dimension = first.len();
            if vectors.iter().any(|v| v.len() != dimension) {
                return Err(KgError::Embedding(
                    "embedding service returned vectors of mixed dimension".to_string(),
                ));
            }
        }

        Ok(vectors)
    }
}

/// Merge entities that share an exact name, keeping the first occurrence.
///
/// Identical names embed identically, so this matches what the greedy pass
/// would do while embedding each surface form once.
pub fn collapse_exact_names(entities: Vec<Entity>) -> Vec<Entity> {
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<Entity> = Vec::new();

    for entity in entities {
        match position.get(&entity.name) {
            Some(&i) => absorb(&mut unique[i], &entity),
            None => {
                position.insert(entity.name.clone(), unique.len());
                unique.push(entity);
            }
        }
    }

    unique
}

/// Cluster entities with their name vectors and merge each cluster.
/// `entities` must have unique names and `vectors[i]` must embed `entities[i]`.
pub fn merge_by_similarity(
    entities: Vec<Entity>,
    vectors: &[Vec<f32>],
    threshold: f32,
) -> (Vec<Entity>, EntityMapping) {
    let matrix = similarity_matrix(vectors);
    let clusters = greedy_clusters(&matrix, threshold);

    let mut mapping = EntityMapping::new();
    let mut canonical = Vec::with_capacity(clusters.len());

    for cluster in clusters {
        let members: Vec<&Entity> = cluster.iter().map(|&i| &entities[i]).collect();
        let merged = merge_cluster(&members);

        for member in &members {
            mapping.insert(member.name.clone(), merged.name.clone());
        }
        if members.len() > 1 {
            tracing::debug!(
                canonical = %merged.name,
                members = members.len(),
                "Merged entity cluster"
            );
        }
        canonical.push(merged);
    }

    (canonical, mapping)
}

/// Cosine similarity of two vectors. Zero vectors have similarity 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Full pairwise similarity matrix; `matrix[i][j]` compares `i` as seed
/// against `j` as candidate
pub fn similarity_matrix(vectors: &[Vec<f32>]) -> Vec<Vec<f32>> {
    vectors
        .iter()
        .map(|a| vectors.iter().map(|b| cosine_similarity(a, b)).collect())
        .collect()
}

/// Greedy single-pass clustering over a similarity matrix.
///
/// Returns clusters of indices in input order; the first index of each
/// cluster is its seed. Every index appears in exactly one cluster.
pub fn greedy_clusters(matrix: &[Vec<f32>], threshold: f32) -> Vec<Vec<usize>> {
    let n = matrix.len();
    let mut visited = vec![false; n];
    let mut clusters = Vec::new();

    for seed in 0..n {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;
        let mut cluster = vec![seed];

        for candidate in (seed + 1)..n {
            if !visited[candidate] && matrix[seed][candidate] >= threshold {
                visited[candidate] = true;
                cluster.push(candidate);
            }
        }

        clusters.push(cluster);
    }

    clusters
}

/// Index of the canonical member: longest name, first occurrence on ties
fn select_canonical(members: &[&Entity]) -> usize {
    let mut best = 0;
    let mut best_len = 0;

    for (i, member) in members.iter().enumerate() {
        let len = member.name.chars().count();
        if len > best_len {
            best = i;
            best_len = len;
        }
    }

    best
}

fn merge_cluster(members: &[&Entity]) -> Entity {
    let canonical_index = select_canonical(members);
    let mut merged = members[canonical_index].clone();

    for (i, member) in members.iter().enumerate() {
        if i != canonical_index {
            absorb(&mut merged, member);
        }
    }

    merged
}

/// Fold another entity's description and confidence into `target`
fn absorb(target: &mut Entity, other: &Entity) {
    let description = other.description.trim();
    if !description.is_empty()
        && !target
            .description
            .split(DESCRIPTION_SEPARATOR)
            .any(|existing| existing.trim() == description)
    {
        if !target.description.is_empty() {
            target.description.push_str(DESCRIPTION_SEPARATOR);
        }
        target.description.push_str(description);
    }

    if other.confidence > target.confidence {
        target.confidence = other.confidence;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use kgflow_core::EntityType;

    /// Embedder that serves fixed vectors per name
    struct TableEmbedder {
        table: HashMap<String, Vec<f32>>,
    }

    impl TableEmbedder {
        fn new(entries: &[(&str, Vec<f32>)]) -> Arc<Self> {
            Arc::new(Self {
                table: entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            })
        }
    }

    #[async_trait::async_trait]
    impl EmbeddingClient for TableEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            texts
                .iter()
                .map(|t| {
                    self.table
                        .get(t)
                        .cloned()
                        .ok_or_else(|| KgError::Embedding(format!("no vector for {t}")))
                })
                .collect()
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    struct DownEmbedder;

    #[async_trait::async_trait]
    impl EmbeddingClient for DownEmbedder {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(KgError::Llm("connection refused".to_string()))
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    fn org(name: &str) -> Entity {
        Entity::new(name, EntityType::Organization, "test")
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_greedy_clusters_first_cluster_wins() {
        // 0~1 and 1~2 are similar but 0 and 2 are not: 2 starts its own cluster
        let matrix = vec![
            vec![1.0, 0.9, 0.1],
            vec![0.9, 1.0, 0.9],
            vec![0.1, 0.9, 1.0],
        ];
        let clusters = greedy_clusters(&matrix, 0.85);
        assert_eq!(clusters, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn test_greedy_clusters_compare_against_seed_only() {
        // 1 and 2 are similar to each other, but only 1 is similar to seed 0
        let matrix = vec![
            vec![1.0, 0.9, 0.2],
            vec![0.9, 1.0, 0.95],
            vec![0.2, 0.95, 1.0],
        ];
        let clusters = greedy_clusters(&matrix, 0.85);
        assert_eq!(clusters, vec![vec![0, 1], vec![2]]);
    }

    #[tokio::test]
    async fn test_canonical_is_longest_name() {
        let embedder = TableEmbedder::new(&[
            ("OpenAI", vec![1.0, 0.0, 0.0]),
            ("Open AI", vec![0.99, 0.05, 0.0]),
            ("OpenAI Inc.", vec![0.98, 0.1, 0.0]),
        ]);
        let dedup = EntityDeduplicator::new(embedder);

        let (entities, mapping) = dedup
            .deduplicate(vec![org("OpenAI"), org("Open AI"), org("OpenAI Inc.")])
            .await
            .unwrap();

        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "OpenAI Inc.");
        for raw in ["OpenAI", "Open AI", "OpenAI Inc."] {
            assert_eq!(mapping.get(raw), Some("OpenAI Inc."));
        }
    }

    #[tokio::test]
    async fn test_canonical_tie_breaks_on_first_occurrence() {
        let embedder = TableEmbedder::new(&[
            ("ACME", vec![1.0, 0.0, 0.0]),
            ("Acme", vec![1.0, 0.0, 0.0]),
        ]);
        let dedup = EntityDeduplicator::new(embedder);

        let (entities, _) = dedup
            .deduplicate(vec![org("Acme"), org("ACME")])
            .await
            .unwrap();
        assert_eq!(entities[0].name, "Acme");
    }

    #[tokio::test]
    async fn test_threshold_boundary() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.8, 0.6, 0.0];
        let exact = cosine_similarity(&a, &b);
        let embedder = TableEmbedder::new(&[("Alpha", a), ("Alpha Co", b)]);

        let at = EntityDeduplicator::new(embedder.clone()).with_threshold(exact);
        let (merged, _) = at
            .deduplicate(vec![org("Alpha"), org("Alpha Co")])
            .await
            .unwrap();
        assert_eq!(merged.len(), 1);

        let above = EntityDeduplicator::new(embedder).with_threshold(exact + f32::EPSILON);
        let (separate, mapping) = above
            .deduplicate(vec![org("Alpha"), org("Alpha Co")])
            .await
            .unwrap();
        assert_eq!(separate.len(), 2);
        assert!(mapping.is_identity());
    }

    #[tokio::test]
    async fn test_descriptions_concatenated_without_repeats() {
        let embedder = TableEmbedder::new(&[
            ("IBM", vec![0.0, 1.0, 0.0]),
            ("IBM Corp", vec![0.0, 1.0, 0.01]),
            ("I.B.M.", vec![0.0, 0.99, 0.0]),
        ]);
        let dedup = EntityDeduplicator::new(embedder);

        let (entities, _) = dedup
            .deduplicate(vec![
                org("IBM").with_description("Computer maker"),
                org("IBM Corp").with_description("Big Blue"),
                org("I.B.M.").with_description("Computer maker"),
            ])
            .await
            .unwrap();

        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "IBM Corp");
        assert_eq!(entities[0].description, "Big Blue; Computer maker");
    }

    #[tokio::test]
    async fn test_second_pass_is_a_no_op() {
        let embedder = TableEmbedder::new(&[
            ("OpenAI", vec![1.0, 0.0, 0.0]),
            ("Open AI", vec![0.99, 0.05, 0.0]),
            ("OpenAI Inc.", vec![0.98, 0.1, 0.0]),
            ("IBM", vec![0.0, 1.0, 0.0]),
            ("IBM Corp", vec![0.0, 1.0, 0.01]),
            ("I.B.M.", vec![0.0, 0.99, 0.0]),
        ]);
        let dedup = EntityDeduplicator::new(embedder);

        let (once, first_mapping) = dedup
            .deduplicate(vec![
                org("OpenAI"),
                org("IBM").with_description("Computer maker"),
                org("Open AI"),
                org("IBM Corp").with_description("Big Blue"),
                org("OpenAI Inc."),
                org("I.B.M.").with_description("Computer maker"),
            ])
            .await
            .unwrap();
        assert_eq!(once.len(), 2);
        assert!(!first_mapping.is_identity());

        let (twice, mapping) = dedup.deduplicate(once.clone()).await.unwrap();
        assert_eq!(twice, once);
        assert!(mapping.is_identity());
        assert_eq!(mapping.len(), 2);
        assert_eq!(twice[1].description, "Big Blue; Computer maker");
    }

    #[tokio::test]
    async fn test_single_entity_unchanged() {
        let dedup = EntityDeduplicator::new(Arc::new(DownEmbedder));
        let (entities, mapping) = dedup.deduplicate(vec![org("Solo")]).await.unwrap();

        assert_eq!(entities, vec![org("Solo")]);
        assert_eq!(mapping.get("Solo"), Some("Solo"));
    }

    #[tokio::test]
    async fn test_exact_duplicates_skip_embedding() {
        let dedup = EntityDeduplicator::new(Arc::new(DownEmbedder));
        let (entities, mapping) = dedup
            .deduplicate(vec![org("Solo"), org("Solo").with_confidence(0.4)])
            .await
            .unwrap();

        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].confidence, 1.0);
        assert!(mapping.is_identity());
    }

    #[tokio::test]
    async fn test_embedding_outage_is_fatal() {
        let dedup = EntityDeduplicator::new(Arc::new(DownEmbedder));
        let err = dedup
            .deduplicate(vec![org("A"), org("B")])
            .await
            .unwrap_err();

        assert!(matches!(err, KgError::Embedding(_)));
    }

    #[tokio::test]
    async fn test_batches_cover_all_names() {
        let embedder = TableEmbedder::new(&[
            ("a", vec![1.0, 0.0, 0.0]),
            ("b", vec![0.0, 1.0, 0.0]),
            ("c", vec![0.0, 0.0, 1.0]),
        ]);
        let dedup = EntityDeduplicator::new(embedder).with_batch_size(2);

        let (entities, mapping) = dedup
            .deduplicate(vec![org("a"), org("b"), org("c")])
            .await
            .unwrap();
        assert_eq!(entities.len(), 3);
        assert_eq!(mapping.len(), 3);
    }
}
