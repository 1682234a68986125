//! Topic-scoped vector similarity search.
//!
//! The ranking policy lives here, on top of the [`Store`] trait: stores
//! only compute raw cosine scores for a topic's chunks, and this module
//! applies the min-score filter, deterministic ordering, and k-truncation
//! so every backend ranks identically.
//!
//! # Ordering
//!
//! Results are sorted by score descending. Ties break by ascending chunk
//! sequence index, then ascending document id, which makes result order
//! reproducible across runs and backends.

use anyhow::Result;

use crate::store::{ScoredChunk, Store};

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, Copy)]
pub struct SearchParams {
    /// Maximum results to return.
    pub k: usize,
    /// Minimum cosine similarity for a chunk to qualify.
    pub min_score: f32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            k: 5,
            min_score: 0.2,
        }
    }
}

/// Find the `k` most similar chunks to `query_vec` within one topic.
///
/// Only chunks whose `topic_id` matches are considered — cross-topic
/// leakage is a correctness bug, and the scoping is enforced at the store
/// query, not by post-filtering. An empty topic returns an empty list.
pub async fn search<S: Store + ?Sized>(
    store: &S,
    topic_id: &str,
    query_vec: &[f32],
    params: SearchParams,
) -> Result<Vec<ScoredChunk>> {
    if query_vec.is_empty() {
        return Ok(Vec::new());
    }

    let mut candidates = store.scored_chunks(topic_id, query_vec).await?;
    candidates.retain(|c| c.score >= params.min_score);
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
            .then(a.chunk.document_id.cmp(&b.chunk.document_id))
    });
    candidates.truncate(params.k);

    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, Document, Topic};
    use crate::store::memory::InMemoryStore;
    use chrono::Utc;

    async fn seed_topic(store: &InMemoryStore, title: &str, vectors: &[(i64, Vec<f32>)]) -> Topic {
        let topic = Topic::new(title, Utc::now());
        store.insert_topic(&topic).await.unwrap();
        let doc = Document::new(&topic.id, "doc.txt", "text/plain", Utc::now());
        store.insert_document(&doc).await.unwrap();

        let chunks: Vec<Chunk> = vectors
            .iter()
            .map(|(i, _)| Chunk {
                id: format!("{}-{}", topic.id, i),
                document_id: doc.id.clone(),
                topic_id: topic.id.clone(),
                chunk_index: *i,
                text: format!("chunk {i}"),
                hash: String::new(),
            })
            .collect();
        let vecs: Vec<Vec<f32>> = vectors.iter().map(|(_, v)| v.clone()).collect();
        store.replace_chunks(&doc.id, &chunks, &vecs).await.unwrap();
        topic
    }

    #[tokio::test]
    async fn results_stay_within_the_topic() {
        let store = InMemoryStore::new();
        let anatomy = seed_topic(&store, "anatomy", &[(0, vec![1.0, 0.0])]).await;
        let _physics = seed_topic(&store, "physics", &[(0, vec![1.0, 0.0])]).await;

        let hits = search(&store, &anatomy.id, &[1.0, 0.0], SearchParams::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.topic_id, anatomy.id);
    }

    #[tokio::test]
    async fn scores_are_non_increasing_and_capped_at_k() {
        let store = InMemoryStore::new();
        let topic = seed_topic(
            &store,
            "anatomy",
            &[
                (0, vec![1.0, 0.0]),
                (1, vec![0.9, 0.1]),
                (2, vec![0.5, 0.5]),
                (3, vec![0.1, 0.9]),
            ],
        )
        .await;

        let params = SearchParams {
            k: 3,
            min_score: -1.0,
        };
        let hits = search(&store, &topic.id, &[1.0, 0.0], params).await.unwrap();
        assert_eq!(hits.len(), 3);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn min_score_filters_weak_matches() {
        let store = InMemoryStore::new();
        let topic = seed_topic(
            &store,
            "anatomy",
            &[(0, vec![1.0, 0.0]), (1, vec![0.0, 1.0])],
        )
        .await;

        let params = SearchParams {
            k: 10,
            min_score: 0.5,
        };
        let hits = search(&store, &topic.id, &[1.0, 0.0], params).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.chunk_index, 0);
    }

    #[tokio::test]
    async fn ties_break_by_chunk_index_then_document() {
        let store = InMemoryStore::new();
        let topic = Topic::new("anatomy", Utc::now());
        store.insert_topic(&topic).await.unwrap();

        // Two documents with identical vectors; insertion order shuffled.
        for (doc_name, chunk_id) in [("b.txt", "cb"), ("a.txt", "ca")] {
            let doc = Document::new(&topic.id, doc_name, "text/plain", Utc::now());
            store.insert_document(&doc).await.unwrap();
            let chunk = Chunk {
                id: chunk_id.to_string(),
                document_id: doc.id.clone(),
                topic_id: topic.id.clone(),
                chunk_index: 0,
                text: "same".to_string(),
                hash: String::new(),
            };
            store
                .replace_chunks(&doc.id, &[chunk], &[vec![1.0, 0.0]])
                .await
                .unwrap();
        }

        let hits = search(&store, &topic.id, &[1.0, 0.0], SearchParams { k: 2, min_score: 0.0 })
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].chunk.document_id < hits[1].chunk.document_id);
    }

    #[tokio::test]
    async fn empty_topic_returns_empty_not_error() {
        let store = InMemoryStore::new();
        let topic = Topic::new("empty", Utc::now());
        store.insert_topic(&topic).await.unwrap();

        let hits = search(&store, &topic.id, &[1.0, 0.0], SearchParams::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn empty_query_vector_returns_empty() {
        let store = InMemoryStore::new();
        let topic = seed_topic(&store, "anatomy", &[(0, vec![1.0, 0.0])]).await;
        let hits = search(&store, &topic.id, &[], SearchParams::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
