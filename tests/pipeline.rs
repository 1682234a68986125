//! End-to-end pipeline tests over a real SQLite database.
//!
//! Exercises the SQLite store through the same services the CLI uses,
//! with deterministic embedding and generation stubs in place of the
//! HTTP clients.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use studykit::cards::CardService;
use studykit::db;
use studykit::embedding::{Embedder, EmbeddingError};
use studykit::error::IngestError;
use studykit::ingest::Ingestor;
use studykit::llm::{GenerationError, Generator};
use studykit::migrate;
use studykit::qa::QaService;
use studykit::sqlite_store::SqliteStore;
use studykit::config::RetrievalConfig;

use studykit_core::chunk::ChunkerConfig;
use studykit_core::models::{DocumentStatus, Flashcard, Topic};
use studykit_core::srs;
use studykit_core::store::Store;

/// Embeds text onto a fixed 3-d basis by keyword so retrieval outcomes
/// are predictable.
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
                let t = t.to_lowercase();
                vec![
                    if t.contains("heart") { 1.0 } else { 0.0 },
                    if t.contains("lung") { 1.0 } else { 0.0 },
                    1.0,
                ]
            })
            .collect())
    }
}

struct CannedGenerator(&'static str);

#[async_trait]
impl Generator for CannedGenerator {
    fn model_name(&self) -> &str {
        "canned-test-model"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        Ok(self.0.to_string())
    }
}

struct Env {
    _tmp: TempDir,
    store: Arc<SqliteStore>,
    topic: Topic,
}

async fn setup() -> Env {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect(&tmp.path().join("data/study.sqlite"))
        .await
        .unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let store = Arc::new(SqliteStore::new(pool));
    let topic = Topic::new("Anatomy", Utc::now());
    store.insert_topic(&topic).await.unwrap();

    Env {
        _tmp: tmp,
        store,
        topic,
    }
}

fn ingestor(store: Arc<SqliteStore>) -> Ingestor {
    Ingestor::new(
        store,
        Arc::new(KeywordEmbedder),
        ChunkerConfig {
            max_chunk_chars: 60,
            overlap_chars: 10,
        },
        3,
    )
}

#[tokio::test]
async fn ingest_search_and_ask_round_trip() {
    let env = setup().await;
    let store: Arc<dyn Store> = env.store.clone();
    let ingestor = ingestor(env.store.clone());

    let doc = ingestor
        .upload(&env.topic.id, "anatomy.txt", None)
        .await
        .unwrap();
    ingestor
        .process(
            &doc.id,
            b"The heart has four chambers. Blood flows through valves. \
              The lungs exchange oxygen and carbon dioxide in alveoli.",
        )
        .await
        .unwrap();

    let stored = store.get_document(&doc.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DocumentStatus::Processed);
    assert_eq!(stored.attempts, 1);

    let chunks = store.chunks_for_document(&doc.id).await.unwrap();
    assert!(chunks.len() >= 2);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i as i64);
        assert_eq!(chunk.topic_id, env.topic.id);
    }

    let qa = QaService::new(
        store.clone(),
        Arc::new(KeywordEmbedder),
        Arc::new(CannedGenerator("The heart has four chambers.")),
        RetrievalConfig::default(),
    );
    let exchange = qa
        .ask(&env.topic.id, "How many chambers does the heart have?")
        .await
        .unwrap();
    assert!(!exchange.source_chunk_ids.is_empty());
    assert!(exchange.confidence.unwrap() > 0.0);

    // The exchange survives a fresh read from the database.
    let history = store.list_exchanges(&env.topic.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].answer, "The heart has four chambers.");
    assert_eq!(history[0].source_chunk_ids, exchange.source_chunk_ids);
}

#[tokio::test]
async fn questions_outside_the_material_get_no_sources() {
    let env = setup().await;
    let store: Arc<dyn Store> = env.store.clone();

    let qa = QaService::new(
        store,
        Arc::new(KeywordEmbedder),
        Arc::new(CannedGenerator("Not based on your material: Paris.")),
        RetrievalConfig::default(),
    );
    let exchange = qa
        .ask(&env.topic.id, "What is the capital of France?")
        .await
        .unwrap();
    assert!(exchange.source_chunk_ids.is_empty());
    assert!(exchange.confidence.is_none());
}

#[tokio::test]
async fn reprocessing_replaces_chunks_atomically() {
    let env = setup().await;
    let store: Arc<dyn Store> = env.store.clone();
    let ingestor = ingestor(env.store.clone());

    let doc = ingestor
        .upload(&env.topic.id, "notes.txt", None)
        .await
        .unwrap();
    ingestor
        .process(&doc.id, b"The heart has four chambers and pumps blood.")
        .await
        .unwrap();
    let before = store.chunks_for_document(&doc.id).await.unwrap();

    ingestor.reprocess(&doc.id).await.unwrap();
    let after = store.chunks_for_document(&doc.id).await.unwrap();

    // Same text, fresh chunk rows; no leftovers from the first run.
    assert_eq!(before.len(), after.len());
    assert_ne!(before[0].id, after[0].id);
    assert_eq!(before[0].text, after[0].text);
}

#[tokio::test]
async fn failed_extraction_is_recorded_on_the_document() {
    let env = setup().await;
    let store: Arc<dyn Store> = env.store.clone();
    let ingestor = ingestor(env.store.clone());

    let doc = ingestor
        .upload(&env.topic.id, "broken.pdf", None)
        .await
        .unwrap();
    let err = ingestor.process(&doc.id, b"not a pdf at all").await.unwrap_err();
    assert!(matches!(err, IngestError::Extract(_)));

    let stored = store.get_document(&doc.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DocumentStatus::Failed);
    assert!(stored.error.unwrap().contains("PDF"));
}

#[tokio::test]
async fn claim_is_exclusive_in_sqlite() {
    let env = setup().await;
    let store: Arc<dyn Store> = env.store.clone();

    let ingestor = ingestor(env.store.clone());
    let doc = ingestor
        .upload(&env.topic.id, "notes.txt", None)
        .await
        .unwrap();

    assert!(store.claim_document(&doc.id).await.unwrap());
    assert!(!store.claim_document(&doc.id).await.unwrap());
    // A claimed document cannot be reset out from under its worker.
    assert!(!store.reset_for_reprocess(&doc.id).await.unwrap());

    store.mark_failed(&doc.id, "boom").await.unwrap();
    assert!(store.claim_document(&doc.id).await.unwrap());

    let stored = store.get_document(&doc.id).await.unwrap().unwrap();
    assert_eq!(stored.attempts, 2);
}

#[tokio::test]
async fn reprocess_resets_the_attempt_counter() {
    let env = setup().await;
    let store: Arc<dyn Store> = env.store.clone();
    let ingestor = ingestor(env.store.clone());

    let doc = ingestor
        .upload(&env.topic.id, "notes.txt", None)
        .await
        .unwrap();
    ingestor
        .process(&doc.id, b"The heart has four chambers.")
        .await
        .unwrap();
    ingestor.reprocess(&doc.id).await.unwrap();

    // Each cycle starts its attempt count from scratch; earlier successful
    // runs must not eat into the retry allowance of a later one.
    let stored = store.get_document(&doc.id).await.unwrap().unwrap();
    assert_eq!(stored.attempts, 1);

    assert!(store.reset_for_reprocess(&doc.id).await.unwrap());
    let stored = store.get_document(&doc.id).await.unwrap().unwrap();
    assert_eq!(stored.attempts, 0);
    assert_eq!(stored.status, DocumentStatus::Uploaded);
}

#[tokio::test]
async fn never_reviewed_cards_are_due_regardless_of_date() {
    let env = setup().await;
    let store: Arc<dyn Store> = env.store.clone();
    let now = Utc::now();

    let mut future = Flashcard::new(&env.topic.id, "q1", "a1", now);
    future.state.due = now + chrono::Duration::days(5);
    let mut reviewed = Flashcard::new(&env.topic.id, "q2", "a2", now);
    reviewed.state = srs::review(&reviewed.state, 5, now); // due tomorrow
    let overdue = Flashcard::new(&env.topic.id, "q3", "a3", now - chrono::Duration::days(1));

    for card in [&future, &reviewed, &overdue] {
        store.insert_flashcard(card).await.unwrap();
    }

    let due = store.due_flashcards(&env.topic.id, now, 10).await.unwrap();
    let ids: Vec<&str> = due.iter().map(|c| c.id.as_str()).collect();
    assert!(ids.contains(&overdue.id.as_str()));
    assert!(ids.contains(&future.id.as_str()));
    assert!(!ids.contains(&reviewed.id.as_str()));
}

#[tokio::test]
async fn flashcard_review_is_versioned_in_sqlite() {
    let env = setup().await;
    let store: Arc<dyn Store> = env.store.clone();

    let cards = CardService::new(store.clone(), None);
    let card = cards
        .create(&env.topic.id, "Chambers of the heart?", "Four")
        .await
        .unwrap();

    // New card is due immediately.
    let due = store
        .due_flashcards(&env.topic.id, Utc::now(), 10)
        .await
        .unwrap();
    assert_eq!(due.len(), 1);

    let reviewed = cards.review(&card.id, 5).await.unwrap();
    assert_eq!(reviewed.version, 1);
    assert_eq!(reviewed.state.interval_days, 1);

    // An update against the stale version must not apply.
    let stale = srs::review(&card.state, 3, Utc::now());
    assert!(!store
        .update_review_state(&card.id, card.version, &stale)
        .await
        .unwrap());

    // The winning review persisted.
    let stored = store.get_flashcard(&card.id).await.unwrap().unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(stored.state.repetitions, 1);
    assert!(store
        .due_flashcards(&env.topic.id, Utc::now(), 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn generated_cards_persist() {
    let env = setup().await;
    let store: Arc<dyn Store> = env.store.clone();
    let ingestor = ingestor(env.store.clone());

    let doc = ingestor
        .upload(&env.topic.id, "notes.txt", None)
        .await
        .unwrap();
    ingestor
        .process(&doc.id, b"The heart has four chambers.")
        .await
        .unwrap();

    let cards = CardService::new(
        store.clone(),
        Some(Arc::new(CannedGenerator(
            r#"[{"front":"Chambers?","back":"Four"},{"front":"Valves?","back":"Yes"}]"#,
        ))),
    );
    let generated = cards.generate(&env.topic.id, 5).await.unwrap();
    assert_eq!(generated.len(), 2);

    let listed = store.list_flashcards(&env.topic.id).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].version, 0);
}

#[tokio::test]
async fn deleting_a_topic_cascades_in_sqlite() {
    let env = setup().await;
    let store: Arc<dyn Store> = env.store.clone();
    let ingestor = ingestor(env.store.clone());

    let doc = ingestor
        .upload(&env.topic.id, "notes.txt", None)
        .await
        .unwrap();
    ingestor
        .process(&doc.id, b"The heart has four chambers.")
        .await
        .unwrap();
    let cards = CardService::new(store.clone(), None);
    cards.create(&env.topic.id, "f", "b").await.unwrap();

    store.delete_topic(&env.topic.id).await.unwrap();

    assert!(store.get_topic(&env.topic.id).await.unwrap().is_none());
    assert!(store.list_documents(&env.topic.id).await.unwrap().is_empty());
    assert!(store.chunks_for_document(&doc.id).await.unwrap().is_empty());
    assert!(store.list_flashcards(&env.topic.id).await.unwrap().is_empty());
}
