//! Typed errors for the domain services.
//!
//! Component-level failures ([`crate::extract::ExtractError`],
//! [`crate::embedding::EmbeddingError`],
//! [`crate::llm::GenerationError`]) wrap into one error per service so
//! callers can distinguish domain outcomes (missing topic, review
//! conflict, unsupported format) from infrastructure failures, which
//! stay `anyhow` behind the `Store` variant.

use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::extract::ExtractError;
use crate::llm::GenerationError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("topic not found: {0}")]
    TopicNotFound(String),
    #[error("document not found: {0}")]
    DocumentNotFound(String),
    #[error("document is already being processed: {0}")]
    AlreadyProcessing(String),
    #[error("document has no stored text to reprocess: {0}")]
    NoStoredText(String),
    #[error("document contains no extractable text: {0}")]
    EmptyDocument(String),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum AskError {
    #[error("topic not found: {0}")]
    TopicNotFound(String),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum CardsError {
    #[error("topic not found: {0}")]
    TopicNotFound(String),
    #[error("topic has no processed content to generate cards from: {0}")]
    NoContent(String),
    #[error("model returned no usable cards: {0}")]
    InvalidCards(String),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("flashcard not found: {0}")]
    CardNotFound(String),
    #[error("flashcard was reviewed concurrently, reload and retry: {0}")]
    Conflict(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
