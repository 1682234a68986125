//! Core data models used throughout studykit.
//!
//! These types represent the topics, documents, chunks, Q&A exchanges,
//! and flashcards that flow through the ingestion, retrieval, and review
//! pipelines. A [`Topic`] exclusively owns everything beneath it; deleting
//! a topic cascades to its documents, chunks, exchanges, and flashcards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::srs::ReviewState;

/// Processing lifecycle of an uploaded document.
///
/// Transitions: `Uploaded → Processing → Processed` on success, or
/// `Uploaded → Processing → Failed` on any stage error. A failed document
/// may be claimed again for a retry (`Failed → Processing`). Only the
/// ingestion pipeline mutates this, and only after winning an atomic
/// status claim — two pipeline runs never process the same document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Processed,
    Failed,
}

impl DocumentStatus {
    /// Stable string form used in the database and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Processed => "processed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(DocumentStatus::Uploaded),
            "processing" => Some(DocumentStatus::Processing),
            "processed" => Some(DocumentStatus::Processed),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named study topic. Owns documents, chunks, exchanges, and flashcards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl Topic {
    pub fn new(title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            created_at: now,
        }
    }
}

/// An uploaded study document and its processing state.
///
/// `text` and `processed_at` stay `None` until the pipeline succeeds;
/// `error` records the last failure and is cleared on a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub topic_id: String,
    pub filename: String,
    pub content_type: String,
    pub status: DocumentStatus,
    pub text: Option<String>,
    pub error: Option<String>,
    /// Number of processing attempts so far (successful or not).
    pub attempts: i64,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn new(
        topic_id: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic_id: topic_id.into(),
            filename: filename.into(),
            content_type: content_type.into(),
            status: DocumentStatus::Uploaded,
            text: None,
            error: None,
            attempts: 0,
            created_at: now,
            processed_at: None,
        }
    }
}

/// A bounded segment of a document's extracted text.
///
/// Chunks are immutable once created; reprocessing a document replaces
/// its full chunk set in one transaction. `topic_id` is denormalized so
/// similarity search can scope by topic without a join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub topic_id: String,
    /// Zero-based, contiguous within the document.
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`, for staleness detection.
    pub hash: String,
}

/// One persisted question/answer round against a topic's content.
///
/// Immutable after creation. `source_chunk_ids` lists the chunks actually
/// included in the prompt context, highest-ranked first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QAExchange {
    pub id: String,
    pub topic_id: String,
    pub question: String,
    pub answer: String,
    pub source_chunk_ids: Vec<String>,
    /// Confidence in `[0, 1]`; absent when no supporting content was found.
    pub confidence: Option<f64>,
    /// Identifier of the language model that produced the answer.
    pub model: String,
    pub created_at: DateTime<Utc>,
}

/// A flashcard with its spaced-repetition review state.
///
/// `version` is an optimistic-concurrency counter: a review update only
/// applies when the caller's version matches the stored row, so a lost
/// race surfaces as a conflict instead of a silently dropped update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flashcard {
    pub id: String,
    pub topic_id: String,
    pub front: String,
    pub back: String,
    pub state: ReviewState,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Flashcard {
    pub fn new(
        topic_id: impl Into<String>,
        front: impl Into<String>,
        back: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic_id: topic_id.into(),
            front: front.into(),
            back: back.into(),
            state: ReviewState::new(now),
            version: 0,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            DocumentStatus::Uploaded,
            DocumentStatus::Processing,
            DocumentStatus::Processed,
            DocumentStatus::Failed,
        ] {
            assert_eq!(DocumentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DocumentStatus::parse("pending"), None);
    }
}
