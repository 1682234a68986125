//! In-memory [`Store`] implementation for tests.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity over the topic's stored vectors. Chunk
//! replacement swaps the document's chunk list under a single write lock,
//! so readers see the old set or the new set, never a mixture — the same
//! visibility guarantee the SQLite store gets from a transaction.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, Document, DocumentStatus, Flashcard, QAExchange, Topic};
use crate::srs::ReviewState;

use super::{ScoredChunk, Store};

struct StoredChunk {
    chunk: Chunk,
    vector: Vec<f32>,
}

/// In-memory store for unit and pipeline tests.
#[derive(Default)]
pub struct InMemoryStore {
    topics: RwLock<HashMap<String, Topic>>,
    documents: RwLock<HashMap<String, Document>>,
    chunks: RwLock<Vec<StoredChunk>>,
    exchanges: RwLock<Vec<QAExchange>>,
    flashcards: RwLock<HashMap<String, Flashcard>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_topic(&self, topic: &Topic) -> Result<()> {
        self.topics
            .write()
            .unwrap()
            .insert(topic.id.clone(), topic.clone());
        Ok(())
    }

    async fn get_topic(&self, id: &str) -> Result<Option<Topic>> {
        Ok(self.topics.read().unwrap().get(id).cloned())
    }

    async fn list_topics(&self) -> Result<Vec<Topic>> {
        let mut topics: Vec<Topic> = self.topics.read().unwrap().values().cloned().collect();
        topics.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(topics)
    }

    async fn delete_topic(&self, id: &str) -> Result<()> {
        self.topics.write().unwrap().remove(id);
        self.documents
            .write()
            .unwrap()
            .retain(|_, d| d.topic_id != id);
        self.chunks
            .write()
            .unwrap()
            .retain(|sc| sc.chunk.topic_id != id);
        self.exchanges.write().unwrap().retain(|e| e.topic_id != id);
        self.flashcards
            .write()
            .unwrap()
            .retain(|_, c| c.topic_id != id);
        Ok(())
    }

    async fn insert_document(&self, doc: &Document) -> Result<()> {
        self.documents
            .write()
            .unwrap()
            .insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.documents.read().unwrap().get(id).cloned())
    }

    async fn list_documents(&self, topic_id: &str) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .documents
            .read()
            .unwrap()
            .values()
            .filter(|d| d.topic_id == topic_id)
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(docs)
    }

    async fn claim_document(&self, id: &str) -> Result<bool> {
        let mut docs = self.documents.write().unwrap();
        match docs.get_mut(id) {
            Some(doc)
                if matches!(
                    doc.status,
                    DocumentStatus::Uploaded | DocumentStatus::Failed
                ) =>
            {
                doc.status = DocumentStatus::Processing;
                doc.attempts += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_processed(
        &self,
        id: &str,
        text: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(doc) = self.documents.write().unwrap().get_mut(id) {
            doc.status = DocumentStatus::Processed;
            doc.text = Some(text.to_string());
            doc.error = None;
            doc.processed_at = Some(processed_at);
        }
        Ok(())
    }

    async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        if let Some(doc) = self.documents.write().unwrap().get_mut(id) {
            doc.status = DocumentStatus::Failed;
            doc.error = Some(error.to_string());
        }
        Ok(())
    }

    async fn reset_for_reprocess(&self, id: &str) -> Result<bool> {
        let mut docs = self.documents.write().unwrap();
        match docs.get_mut(id) {
            Some(doc) if doc.status != DocumentStatus::Processing => {
                doc.status = DocumentStatus::Uploaded;
                doc.error = None;
                doc.attempts = 0;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        self.documents.write().unwrap().remove(id);
        self.chunks
            .write()
            .unwrap()
            .retain(|sc| sc.chunk.document_id != id);
        Ok(())
    }

    async fn replace_chunks(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        anyhow::ensure!(
            chunks.len() == vectors.len(),
            "chunk/vector count mismatch: {} vs {}",
            chunks.len(),
            vectors.len()
        );
        let mut stored = self.chunks.write().unwrap();
        stored.retain(|sc| sc.chunk.document_id != document_id);
        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            stored.push(StoredChunk {
                chunk: chunk.clone(),
                vector: vector.clone(),
            });
        }
        Ok(())
    }

    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let mut chunks: Vec<Chunk> = self
            .chunks
            .read()
            .unwrap()
            .iter()
            .filter(|sc| sc.chunk.document_id == document_id)
            .map(|sc| sc.chunk.clone())
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        let stored = self.chunks.read().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| {
                stored
                    .iter()
                    .find(|sc| &sc.chunk.id == id)
                    .map(|sc| sc.chunk.clone())
            })
            .collect())
    }

    async fn scored_chunks(&self, topic_id: &str, query_vec: &[f32]) -> Result<Vec<ScoredChunk>> {
        Ok(self
            .chunks
            .read()
            .unwrap()
            .iter()
            .filter(|sc| sc.chunk.topic_id == topic_id)
            .map(|sc| ScoredChunk {
                chunk: sc.chunk.clone(),
                score: cosine_similarity(query_vec, &sc.vector),
            })
            .collect())
    }

    async fn insert_exchange(&self, exchange: &QAExchange) -> Result<()> {
        self.exchanges.write().unwrap().push(exchange.clone());
        Ok(())
    }

    async fn list_exchanges(&self, topic_id: &str) -> Result<Vec<QAExchange>> {
        let mut exchanges: Vec<QAExchange> = self
            .exchanges
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.topic_id == topic_id)
            .cloned()
            .collect();
        exchanges.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(exchanges)
    }

    async fn delete_exchange(&self, id: &str) -> Result<bool> {
        let mut exchanges = self.exchanges.write().unwrap();
        let before = exchanges.len();
        exchanges.retain(|e| e.id != id);
        Ok(exchanges.len() < before)
    }

    async fn clear_exchanges(&self, topic_id: &str) -> Result<u64> {
        let mut exchanges = self.exchanges.write().unwrap();
        let before = exchanges.len();
        exchanges.retain(|e| e.topic_id != topic_id);
        Ok((before - exchanges.len()) as u64)
    }

    async fn insert_flashcard(&self, card: &Flashcard) -> Result<()> {
        self.flashcards
            .write()
            .unwrap()
            .insert(card.id.clone(), card.clone());
        Ok(())
    }

    async fn get_flashcard(&self, id: &str) -> Result<Option<Flashcard>> {
        Ok(self.flashcards.read().unwrap().get(id).cloned())
    }

    async fn list_flashcards(&self, topic_id: &str) -> Result<Vec<Flashcard>> {
        let mut cards: Vec<Flashcard> = self
            .flashcards
            .read()
            .unwrap()
            .values()
            .filter(|c| c.topic_id == topic_id)
            .cloned()
            .collect();
        cards.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(cards)
    }

    async fn due_flashcards(
        &self,
        topic_id: &str,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Flashcard>> {
        let mut cards: Vec<Flashcard> = self
            .flashcards
            .read()
            .unwrap()
            .values()
            .filter(|c| {
                c.topic_id == topic_id && (c.state.last_reviewed.is_none() || c.state.due <= now)
            })
            .cloned()
            .collect();
        cards.sort_by(|a, b| a.state.due.cmp(&b.state.due).then(a.id.cmp(&b.id)));
        cards.truncate(limit.max(0) as usize);
        Ok(cards)
    }

    async fn update_review_state(
        &self,
        id: &str,
        expected_version: i64,
        state: &ReviewState,
    ) -> Result<bool> {
        let mut cards = self.flashcards.write().unwrap();
        match cards.get_mut(id) {
            Some(card) if card.version == expected_version => {
                card.state = state.clone();
                card.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_flashcard(&self, id: &str) -> Result<bool> {
        Ok(self.flashcards.write().unwrap().remove(id).is_some())
    }
}
