//! Storage abstraction for studykit.
//!
//! The [`Store`] trait defines every persistence operation the ingestion,
//! retrieval, and review pipelines need, enabling pluggable backends
//! (SQLite in the application, in-memory here for tests).
//!
//! Implementations must be `Send + Sync` and uphold three contracts the
//! rest of the system depends on:
//!
//! - [`claim_document`](Store::claim_document) is an atomic conditional
//!   status update — only one caller can move a document into
//!   `processing` at a time, which keeps pipeline runs for the same
//!   document single-writer while unrelated documents process in parallel.
//! - [`replace_chunks`](Store::replace_chunks) is all-or-nothing: readers
//!   observe either the previous chunk set or the complete new one, never
//!   a partial write.
//! - [`update_review_state`](Store::update_review_state) only applies
//!   when the caller's `expected_version` matches the stored row, so a
//!   concurrent review loses the race visibly instead of silently.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Chunk, Document, Flashcard, QAExchange, Topic};
use crate::srs::ReviewState;

/// A chunk scored against a query vector, produced by
/// [`Store::scored_chunks`] and consumed by [`crate::search::search`].
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
}

/// Abstract storage backend.
///
/// All methods are async (via `async-trait`); the in-memory store returns
/// immediately-ready futures. Errors are `anyhow` — backend failures are
/// infrastructure errors, not domain outcomes, so the domain layers wrap
/// them where a typed error is contractually required.
#[async_trait]
pub trait Store: Send + Sync {
    // ---- Topics ----

    async fn insert_topic(&self, topic: &Topic) -> Result<()>;

    async fn get_topic(&self, id: &str) -> Result<Option<Topic>>;

    async fn list_topics(&self) -> Result<Vec<Topic>>;

    /// Delete a topic and cascade to its documents, chunks, exchanges,
    /// and flashcards. Nothing owned by a topic survives it.
    async fn delete_topic(&self, id: &str) -> Result<()>;

    // ---- Documents ----

    async fn insert_document(&self, doc: &Document) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    async fn list_documents(&self, topic_id: &str) -> Result<Vec<Document>>;

    /// Atomically move a document from `uploaded` or `failed` into
    /// `processing`, recording the attempt. Returns `false` when the
    /// document is absent or another run already owns it.
    async fn claim_document(&self, id: &str) -> Result<bool>;

    /// Record a successful pipeline run: stores the extracted text,
    /// clears any prior error, and sets status to `processed`.
    async fn mark_processed(
        &self,
        id: &str,
        text: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Record a terminal pipeline failure with its error detail.
    async fn mark_failed(&self, id: &str, error: &str) -> Result<()>;

    /// Reset a `processed` or `failed` document back to `uploaded` so it
    /// can be reprocessed. Returns `false` if the document is currently
    /// `processing` (the running worker owns it) or absent.
    async fn reset_for_reprocess(&self, id: &str) -> Result<bool>;

    /// Delete a document and its chunks.
    async fn delete_document(&self, id: &str) -> Result<()>;

    // ---- Chunks ----

    /// Replace the full chunk set for a document in one atomic unit.
    /// `vectors` holds one embedding per chunk, in chunk order.
    async fn replace_chunks(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()>;

    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>>;

    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>>;

    /// Score every chunk in the topic against `query_vec` by cosine
    /// similarity. Unordered and unfiltered; ranking policy lives in
    /// [`crate::search`]. An empty topic yields an empty list.
    async fn scored_chunks(&self, topic_id: &str, query_vec: &[f32]) -> Result<Vec<ScoredChunk>>;

    // ---- Q&A history ----

    async fn insert_exchange(&self, exchange: &QAExchange) -> Result<()>;

    /// Exchanges for a topic, newest first.
    async fn list_exchanges(&self, topic_id: &str) -> Result<Vec<QAExchange>>;

    /// Returns `false` when no such exchange existed.
    async fn delete_exchange(&self, id: &str) -> Result<bool>;

    /// Delete all exchanges for a topic; returns how many were removed.
    async fn clear_exchanges(&self, topic_id: &str) -> Result<u64>;

    // ---- Flashcards ----

    async fn insert_flashcard(&self, card: &Flashcard) -> Result<()>;

    async fn get_flashcard(&self, id: &str) -> Result<Option<Flashcard>>;

    async fn list_flashcards(&self, topic_id: &str) -> Result<Vec<Flashcard>>;

    /// Cards never reviewed or due at `now` or earlier, ordered by due
    /// date ascending, truncated to `limit`.
    async fn due_flashcards(
        &self,
        topic_id: &str,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Flashcard>>;

    /// Optimistic-concurrency review update: applies `state` and bumps
    /// the version only if the stored version equals `expected_version`.
    /// Returns `false` on a version mismatch or missing card.
    async fn update_review_state(
        &self,
        id: &str,
        expected_version: i64,
        state: &ReviewState,
    ) -> Result<bool>;

    async fn delete_flashcard(&self, id: &str) -> Result<bool>;
}
