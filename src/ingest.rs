//! Document ingestion pipeline.
//!
//! Coordinates the full flow for one document: extraction → chunking →
//! embedding → atomic chunk replacement → status update. A run starts by
//! winning the store's status claim, so concurrent runs for the same
//! document are impossible; runs for different documents proceed freely.
//!
//! Failure handling is two-tier. Extraction errors and empty documents
//! are terminal: the document is marked `failed` with the error recorded.
//! Retryable embedding failures (provider outage, rate limiting beyond
//! the client's own backoff) also mark the document `failed`, but the
//! pipeline re-claims and retries until the persistent attempt counter
//! reaches `max_attempts`.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use studykit_core::chunk::{chunk_document, ChunkerConfig};
use studykit_core::models::Document;
use studykit_core::store::Store;

use crate::embedding::Embedder;
use crate::error::IngestError;
use crate::extract;

pub struct Ingestor {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    chunker: ChunkerConfig,
    max_attempts: u32,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        chunker: ChunkerConfig,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            embedder,
            chunker,
            max_attempts,
        }
    }

    /// Register an upload. The document is persisted in `uploaded` state;
    /// call [`process`](Self::process) to run the pipeline on it.
    ///
    /// The content type is taken from `content_type` when given, otherwise
    /// inferred from the filename extension; an unrecognizable format is
    /// rejected before anything is stored.
    pub async fn upload(
        &self,
        topic_id: &str,
        filename: &str,
        content_type: Option<&str>,
    ) -> Result<Document, IngestError> {
        if self.store.get_topic(topic_id).await?.is_none() {
            return Err(IngestError::TopicNotFound(topic_id.to_string()));
        }

        let content_type = match content_type {
            Some(ct) => ct.to_string(),
            None => extract::content_type_for_filename(filename)
                .ok_or_else(|| {
                    extract::ExtractError::UnsupportedContentType(format!(
                        "cannot infer content type for '{filename}'"
                    ))
                })?
                .to_string(),
        };

        let doc = Document::new(topic_id, filename, content_type, Utc::now());
        self.store.insert_document(&doc).await?;
        info!(document_id = %doc.id, topic_id, filename, "document uploaded");
        Ok(doc)
    }

    /// Run the pipeline on an uploaded document's raw bytes.
    pub async fn process(&self, document_id: &str, bytes: &[u8]) -> Result<(), IngestError> {
        loop {
            let doc = self.fetch(document_id).await?;

            if !self.store.claim_document(document_id).await? {
                return Err(IngestError::AlreadyProcessing(document_id.to_string()));
            }

            // PDF and docx parsing are CPU-bound; keep them off the runtime.
            let owned = bytes.to_vec();
            let content_type = doc.content_type.clone();
            let extracted = match tokio::task::spawn_blocking(move || {
                extract::extract_text(&owned, &content_type)
            })
            .await
            {
                Ok(extracted) => extracted,
                Err(join_err) => {
                    let err = anyhow::Error::from(join_err);
                    // The claim is held; release it into `failed` so the
                    // document stays recoverable.
                    self.store.mark_failed(document_id, &err.to_string()).await?;
                    return Err(err.into());
                }
            };

            let text = match extracted {
                Ok(text) => text,
                Err(e) => {
                    self.store.mark_failed(document_id, &e.to_string()).await?;
                    return Err(e.into());
                }
            };

            match self.index_claimed(&doc, &text).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if self.should_retry(document_id, &e).await? {
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Re-run chunking and embedding from a document's stored text,
    /// resetting its status first. Refused while another run owns the
    /// document.
    pub async fn reprocess(&self, document_id: &str) -> Result<(), IngestError> {
        let doc = self.fetch(document_id).await?;
        let text = doc
            .text
            .clone()
            .ok_or_else(|| IngestError::NoStoredText(document_id.to_string()))?;

        if !self.store.reset_for_reprocess(document_id).await? {
            return Err(IngestError::AlreadyProcessing(document_id.to_string()));
        }

        loop {
            if !self.store.claim_document(document_id).await? {
                return Err(IngestError::AlreadyProcessing(document_id.to_string()));
            }

            match self.index_claimed(&doc, &text).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if self.should_retry(document_id, &e).await? {
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Chunk, embed, and commit. Caller must hold the processing claim;
    /// on any failure the document is marked `failed` before the error
    /// propagates.
    async fn index_claimed(&self, doc: &Document, text: &str) -> Result<(), IngestError> {
        if text.trim().is_empty() {
            let err = IngestError::EmptyDocument(doc.id.clone());
            self.store.mark_failed(&doc.id, &err.to_string()).await?;
            return Err(err);
        }

        let chunks = chunk_document(&doc.id, &doc.topic_id, text, &self.chunker);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

        let vectors = match self.embedder.embed_texts(&texts).await {
            Ok(vectors) => vectors,
            Err(e) => {
                self.store.mark_failed(&doc.id, &e.to_string()).await?;
                return Err(e.into());
            }
        };

        // Every stage error after a won claim must end in `failed`: nothing
        // can re-claim or reset a document stuck in `processing`.
        if let Err(e) = self.store.replace_chunks(&doc.id, &chunks, &vectors).await {
            let _ = self.store.mark_failed(&doc.id, &e.to_string()).await;
            return Err(e.into());
        }
        if let Err(e) = self.store.mark_processed(&doc.id, text, Utc::now()).await {
            let _ = self.store.mark_failed(&doc.id, &e.to_string()).await;
            return Err(e.into());
        }
        info!(
            document_id = %doc.id,
            chunks = chunks.len(),
            model = self.embedder.model_name(),
            "document processed"
        );
        Ok(())
    }

    async fn should_retry(&self, document_id: &str, err: &IngestError) -> Result<bool, IngestError> {
        let retryable = matches!(err, IngestError::Embedding(e) if e.is_retryable());
        if !retryable {
            return Ok(false);
        }
        let attempts = self.fetch(document_id).await?.attempts;
        if attempts < i64::from(self.max_attempts) {
            warn!(document_id, attempts, "retrying document after transient failure");
            Ok(true)
        } else {
            warn!(document_id, attempts, "document failed permanently, attempts exhausted");
            Ok(false)
        }
    }

    async fn fetch(&self, document_id: &str) -> Result<Document, IngestError> {
        self.store
            .get_document(document_id)
            .await?
            .ok_or_else(|| IngestError::DocumentNotFound(document_id.to_string()))
    }
}
