//! Retrieval-augmented question answering.
//!
//! [`QaService::ask`] embeds the question, runs topic-scoped similarity
//! search, assembles a bounded context from the top-ranked chunks, and
//! prompts the language model. Every round is persisted as a
//! [`QAExchange`] with the chunk ids that actually made it into the
//! prompt and a confidence score derived from retrieval quality.
//!
//! When retrieval finds nothing above the similarity floor, the model is
//! still asked, but with a prompt that instructs it to flag the answer
//! as not grounded in the student's material; such exchanges carry no
//! confidence and no sources.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use studykit_core::models::QAExchange;
use studykit_core::search::{search, SearchParams};
use studykit_core::store::{ScoredChunk, Store};

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::error::AskError;
use crate::llm::Generator;

/// Ceiling on the retrieval-derived confidence score.
const MAX_CONFIDENCE: f64 = 0.95;

pub struct QaService {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    retrieval: RetrievalConfig,
}

/// Context assembled for one question: the included chunk texts joined
/// for the prompt, plus which chunks contributed and their mean score.
struct AssembledContext {
    text: String,
    chunk_ids: Vec<String>,
    avg_score: f64,
}

impl QaService {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            generator,
            retrieval,
        }
    }

    pub async fn ask(&self, topic_id: &str, question: &str) -> Result<QAExchange, AskError> {
        if self.store.get_topic(topic_id).await?.is_none() {
            return Err(AskError::TopicNotFound(topic_id.to_string()));
        }

        let query_vec = self.embedder.embed_query(question).await?;
        let params = SearchParams {
            k: self.retrieval.k,
            min_score: self.retrieval.min_score,
        };
        let hits = search(self.store.as_ref(), topic_id, &query_vec, params).await?;

        let context = assemble_context(&hits, self.retrieval.max_context_chars);

        let (prompt, confidence, source_chunk_ids) = match context {
            Some(ctx) => {
                let confidence = MAX_CONFIDENCE.min(0.9 * (0.5 + ctx.avg_score));
                (
                    grounded_prompt(&ctx.text, question),
                    Some(confidence),
                    ctx.chunk_ids,
                )
            }
            None => (fallback_prompt(question), None, Vec::new()),
        };

        let answer = self.generator.generate(&prompt).await?;

        let exchange = QAExchange {
            id: Uuid::new_v4().to_string(),
            topic_id: topic_id.to_string(),
            question: question.to_string(),
            answer,
            source_chunk_ids,
            confidence,
            model: self.generator.model_name().to_string(),
            created_at: Utc::now(),
        };
        self.store.insert_exchange(&exchange).await?;
        info!(
            topic_id,
            exchange_id = %exchange.id,
            sources = exchange.source_chunk_ids.len(),
            "question answered"
        );
        Ok(exchange)
    }

    /// Past exchanges for a topic, newest first.
    pub async fn history(&self, topic_id: &str) -> Result<Vec<QAExchange>, AskError> {
        if self.store.get_topic(topic_id).await?.is_none() {
            return Err(AskError::TopicNotFound(topic_id.to_string()));
        }
        Ok(self.store.list_exchanges(topic_id).await?)
    }

    /// Returns `false` when no such exchange existed.
    pub async fn delete_exchange(&self, id: &str) -> Result<bool, AskError> {
        Ok(self.store.delete_exchange(id).await?)
    }

    /// Delete a topic's whole history; returns how many were removed.
    pub async fn clear_history(&self, topic_id: &str) -> Result<u64, AskError> {
        Ok(self.store.clear_exchanges(topic_id).await?)
    }
}

/// Join ranked chunks into a context string no longer than `max_chars`.
/// Chunks are consumed in rank order; when the budget runs out the
/// current chunk is cut to fit and lower-ranked chunks are dropped.
/// Returns `None` when there are no hits at all.
fn assemble_context(hits: &[ScoredChunk], max_chars: usize) -> Option<AssembledContext> {
    if hits.is_empty() {
        return None;
    }

    let mut text = String::new();
    let mut chunk_ids = Vec::new();
    let mut score_sum = 0.0f64;

    for hit in hits {
        let remaining = max_chars.saturating_sub(text.chars().count());
        if remaining == 0 {
            break;
        }
        let separator = if text.is_empty() { 0 } else { 2 };
        if remaining <= separator {
            break;
        }
        if separator > 0 {
            text.push_str("\n\n");
        }
        let budget = remaining - separator;
        if hit.chunk.text.chars().count() <= budget {
            text.push_str(&hit.chunk.text);
        } else {
            text.extend(hit.chunk.text.chars().take(budget));
        }
        chunk_ids.push(hit.chunk.id.clone());
        score_sum += f64::from(hit.score);
    }

    if chunk_ids.is_empty() {
        return None;
    }
    let avg_score = score_sum / chunk_ids.len() as f64;
    Some(AssembledContext {
        text,
        chunk_ids,
        avg_score,
    })
}

fn grounded_prompt(context: &str, question: &str) -> String {
    format!(
        "You are a study assistant. Answer the student's question using the \
         course material below.\n\n\
         Course material:\n{context}\n\n\
         Question: {question}\n\n\
         Answer based on the material above. If it does not contain the \
         answer, say so explicitly."
    )
}

fn fallback_prompt(question: &str) -> String {
    format!(
        "You are a study assistant. No relevant material was found in the \
         student's uploaded documents for this question. Answer from general \
         knowledge, and begin your answer by noting that it is not based on \
         their course material.\n\n\
         Question: {question}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingError;
    use crate::llm::GenerationError;
    use async_trait::async_trait;
    use studykit_core::models::{Chunk, Document, Topic};
    use studykit_core::store::memory::InMemoryStore;

    /// Maps text onto a 2-d vector by keyword, so similarity is
    /// predictable: anything mentioning "heart" points one way,
    /// everything else the other.
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keyword-test-embed"
        }

        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.to_lowercase().contains("heart") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }
    }

    /// Echoes the prompt back so tests can inspect what the model saw.
    struct EchoGenerator;

    #[async_trait]
    impl Generator for EchoGenerator {
        fn model_name(&self) -> &str {
            "echo-test-model"
        }

        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            Ok(prompt.to_string())
        }
    }

    fn chunk(document_id: &str, topic_id: &str, index: i64, text: &str) -> Chunk {
        Chunk {
            id: format!("{document_id}-{index}"),
            document_id: document_id.to_string(),
            topic_id: topic_id.to_string(),
            chunk_index: index,
            text: text.to_string(),
            hash: String::new(),
        }
    }

    async fn setup() -> (Arc<InMemoryStore>, QaService, Topic) {
        let store = Arc::new(InMemoryStore::default());
        let topic = Topic::new("Anatomy", Utc::now());
        store.insert_topic(&topic).await.unwrap();
        let service = QaService::new(
            store.clone(),
            Arc::new(KeywordEmbedder),
            Arc::new(EchoGenerator),
            RetrievalConfig::default(),
        );
        (store, service, topic)
    }

    async fn seed_chunks(store: &InMemoryStore, topic_id: &str) {
        let doc = Document::new(topic_id, "notes.txt", "text/plain", Utc::now());
        store.insert_document(&doc).await.unwrap();
        let chunks = vec![
            chunk(&doc.id, topic_id, 0, "The heart has four chambers."),
            chunk(&doc.id, topic_id, 1, "Mitochondria produce ATP."),
        ];
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        store.replace_chunks(&doc.id, &chunks, &vectors).await.unwrap();
    }

    #[tokio::test]
    async fn ask_grounds_the_answer_in_matching_chunks() {
        let (store, service, topic) = setup().await;
        seed_chunks(&store, &topic.id).await;

        let exchange = service
            .ask(&topic.id, "How many chambers does the heart have?")
            .await
            .unwrap();

        assert_eq!(exchange.source_chunk_ids.len(), 1);
        assert!(exchange.answer.contains("The heart has four chambers."));
        assert!(!exchange.answer.contains("Mitochondria"));

        // One perfectly matching chunk: min(0.95, 0.9 * (0.5 + 1.0))
        let confidence = exchange.confidence.unwrap();
        assert!((confidence - 0.95).abs() < 1e-9);
    }

    #[tokio::test]
    async fn ask_without_matches_uses_the_fallback_prompt() {
        let (_, service, topic) = setup().await;

        let exchange = service
            .ask(&topic.id, "What is the capital of France?")
            .await
            .unwrap();

        assert!(exchange.source_chunk_ids.is_empty());
        assert!(exchange.confidence.is_none());
        assert!(exchange.answer.contains("No relevant material"));
    }

    #[tokio::test]
    async fn ask_rejects_unknown_topic() {
        let (_, service, _) = setup().await;
        let err = service.ask("missing", "anything").await.unwrap_err();
        assert!(matches!(err, AskError::TopicNotFound(_)));
    }

    #[tokio::test]
    async fn history_is_newest_first_and_clearable() {
        let (store, service, topic) = setup().await;
        seed_chunks(&store, &topic.id).await;

        service.ask(&topic.id, "first heart question").await.unwrap();
        service.ask(&topic.id, "second heart question").await.unwrap();

        let history = service.history(&topic.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].question, "second heart question");

        let removed = service.clear_history(&topic.id).await.unwrap();
        assert_eq!(removed, 2);
        assert!(service.history(&topic.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_exchange_reports_whether_it_existed() {
        let (store, service, topic) = setup().await;
        seed_chunks(&store, &topic.id).await;
        let exchange = service.ask(&topic.id, "heart?").await.unwrap();

        assert!(service.delete_exchange(&exchange.id).await.unwrap());
        assert!(!service.delete_exchange(&exchange.id).await.unwrap());
    }

    #[test]
    fn context_is_bounded_and_drops_lowest_ranked_first() {
        let hits: Vec<ScoredChunk> = (0..3)
            .map(|i| ScoredChunk {
                chunk: chunk("doc", "topic", i, &"x".repeat(40)),
                score: 1.0 - i as f32 * 0.1,
            })
            .collect();

        let ctx = assemble_context(&hits, 100).unwrap();
        assert!(ctx.text.chars().count() <= 100);
        // First two chunks fit (40 + 2 + 40), the third is cut to the
        // remaining budget.
        assert_eq!(ctx.chunk_ids.len(), 3);
        assert_eq!(ctx.text.chars().count(), 100);

        let ctx = assemble_context(&hits, 40).unwrap();
        assert_eq!(ctx.chunk_ids, vec!["doc-0".to_string()]);
        assert_eq!(ctx.text.chars().count(), 40);
    }

    #[test]
    fn empty_hits_produce_no_context() {
        assert!(assemble_context(&[], 100).is_none());
    }
}
