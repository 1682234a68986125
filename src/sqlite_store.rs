//! SQLite-backed [`Store`] implementation.
//!
//! Translates each [`Store`] operation into SQL against the schema created
//! by [`crate::migrate`]. The three concurrency contracts the trait
//! documents map to SQLite primitives here: the status claim and the
//! versioned review update are single conditional `UPDATE`s checked via
//! `rows_affected`, and chunk replacement runs inside one transaction.

use anyhow::{ensure, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use studykit_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use studykit_core::models::{Chunk, Document, DocumentStatus, Flashcard, QAExchange, Topic};
use studykit_core::srs::ReviewState;
use studykit_core::store::{ScoredChunk, Store};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn from_ts(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    let status_str: String = row.get("status");
    let status = DocumentStatus::parse(&status_str)
        .ok_or_else(|| anyhow::anyhow!("unknown document status '{status_str}'"))?;
    Ok(Document {
        id: row.get("id"),
        topic_id: row.get("topic_id"),
        filename: row.get("filename"),
        content_type: row.get("content_type"),
        status,
        text: row.get("text"),
        error: row.get("error"),
        attempts: row.get("attempts"),
        created_at: from_ts(row.get("created_at")),
        processed_at: row.get::<Option<i64>, _>("processed_at").map(from_ts),
    })
}

fn chunk_from_row(row: &sqlx::sqlite::SqliteRow) -> Chunk {
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        topic_id: row.get("topic_id"),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        hash: row.get("hash"),
    }
}

fn flashcard_from_row(row: &sqlx::sqlite::SqliteRow) -> Flashcard {
    Flashcard {
        id: row.get("id"),
        topic_id: row.get("topic_id"),
        front: row.get("front"),
        back: row.get("back"),
        state: ReviewState {
            ease_factor: row.get("ease_factor"),
            interval_days: row.get("interval_days"),
            repetitions: row.get("repetitions"),
            due: from_ts(row.get("due")),
            last_reviewed: row.get::<Option<i64>, _>("last_reviewed").map(from_ts),
        },
        version: row.get("version"),
        created_at: from_ts(row.get("created_at")),
    }
}

fn exchange_from_row(row: &sqlx::sqlite::SqliteRow) -> QAExchange {
    let ids_json: String = row.get("source_chunk_ids");
    let source_chunk_ids: Vec<String> = serde_json::from_str(&ids_json).unwrap_or_default();
    QAExchange {
        id: row.get("id"),
        topic_id: row.get("topic_id"),
        question: row.get("question"),
        answer: row.get("answer"),
        source_chunk_ids,
        confidence: row.get("confidence"),
        model: row.get("model"),
        created_at: from_ts(row.get("created_at")),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_topic(&self, topic: &Topic) -> Result<()> {
        sqlx::query("INSERT INTO topics (id, title, created_at) VALUES (?, ?, ?)")
            .bind(&topic.id)
            .bind(&topic.title)
            .bind(topic.created_at.timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_topic(&self, id: &str) -> Result<Option<Topic>> {
        let row = sqlx::query("SELECT id, title, created_at FROM topics WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Topic {
            id: r.get("id"),
            title: r.get("title"),
            created_at: from_ts(r.get("created_at")),
        }))
    }

    async fn list_topics(&self) -> Result<Vec<Topic>> {
        let rows = sqlx::query("SELECT id, title, created_at FROM topics ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| Topic {
                id: r.get("id"),
                title: r.get("title"),
                created_at: from_ts(r.get("created_at")),
            })
            .collect())
    }

    async fn delete_topic(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE topic_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE topic_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM qa_exchanges WHERE topic_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM flashcards WHERE topic_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM topics WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn insert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, topic_id, filename, content_type, status,
                                   text, error, attempts, created_at, processed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.topic_id)
        .bind(&doc.filename)
        .bind(&doc.content_type)
        .bind(doc.status.as_str())
        .bind(&doc.text)
        .bind(&doc.error)
        .bind(doc.attempts)
        .bind(doc.created_at.timestamp())
        .bind(doc.processed_at.map(|t| t.timestamp()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn list_documents(&self, topic_id: &str) -> Result<Vec<Document>> {
        let rows =
            sqlx::query("SELECT * FROM documents WHERE topic_id = ? ORDER BY created_at ASC")
                .bind(topic_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn claim_document(&self, id: &str) -> Result<bool> {
        // Conditional update doubles as the mutual-exclusion primitive:
        // exactly one concurrent caller sees rows_affected == 1.
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET status = 'processing', attempts = attempts + 1
            WHERE id = ? AND status IN ('uploaded', 'failed')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_processed(
        &self,
        id: &str,
        text: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET status = 'processed', text = ?, error = NULL, processed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(text)
        .bind(processed_at.timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query("UPDATE documents SET status = 'failed', error = ? WHERE id = ?")
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reset_for_reprocess(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET status = 'uploaded', error = NULL, attempts = 0
            WHERE id = ? AND status IN ('processed', 'failed', 'uploaded')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn replace_chunks(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        ensure!(
            chunks.len() == vectors.len(),
            "chunk/vector count mismatch: {} chunks, {} vectors",
            chunks.len(),
            vectors.len()
        );

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            let blob = vec_to_blob(vector);
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, topic_id, chunk_index, text, hash, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.topic_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(&blob)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT id, document_id, topic_id, chunk_index, text, hash FROM chunks WHERE document_id = ? ORDER BY chunk_index ASC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::with_capacity(ids.len());
        for id in ids {
            let row = sqlx::query(
                "SELECT id, document_id, topic_id, chunk_index, text, hash FROM chunks WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = row {
                chunks.push(chunk_from_row(&row));
            }
        }
        Ok(chunks)
    }

    async fn scored_chunks(&self, topic_id: &str, query_vec: &[f32]) -> Result<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            "SELECT id, document_id, topic_id, chunk_index, text, hash, embedding FROM chunks WHERE topic_id = ?",
        )
        .bind(topic_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vector = blob_to_vec(&blob);
                ScoredChunk {
                    chunk: chunk_from_row(row),
                    score: cosine_similarity(query_vec, &vector),
                }
            })
            .collect())
    }

    async fn insert_exchange(&self, exchange: &QAExchange) -> Result<()> {
        let ids_json = serde_json::to_string(&exchange.source_chunk_ids)?;
        sqlx::query(
            r#"
            INSERT INTO qa_exchanges (id, topic_id, question, answer,
                                      source_chunk_ids, confidence, model, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&exchange.id)
        .bind(&exchange.topic_id)
        .bind(&exchange.question)
        .bind(&exchange.answer)
        .bind(&ids_json)
        .bind(exchange.confidence)
        .bind(&exchange.model)
        .bind(exchange.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_exchanges(&self, topic_id: &str) -> Result<Vec<QAExchange>> {
        let rows = sqlx::query(
            "SELECT * FROM qa_exchanges WHERE topic_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(topic_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(exchange_from_row).collect())
    }

    async fn delete_exchange(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM qa_exchanges WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn clear_exchanges(&self, topic_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM qa_exchanges WHERE topic_id = ?")
            .bind(topic_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_flashcard(&self, card: &Flashcard) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO flashcards (id, topic_id, front, back, ease_factor, interval_days,
                                    repetitions, due, last_reviewed, version, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&card.id)
        .bind(&card.topic_id)
        .bind(&card.front)
        .bind(&card.back)
        .bind(card.state.ease_factor)
        .bind(card.state.interval_days)
        .bind(card.state.repetitions)
        .bind(card.state.due.timestamp())
        .bind(card.state.last_reviewed.map(|t| t.timestamp()))
        .bind(card.version)
        .bind(card.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_flashcard(&self, id: &str) -> Result<Option<Flashcard>> {
        let row = sqlx::query("SELECT * FROM flashcards WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(flashcard_from_row))
    }

    async fn list_flashcards(&self, topic_id: &str) -> Result<Vec<Flashcard>> {
        let rows =
            sqlx::query("SELECT * FROM flashcards WHERE topic_id = ? ORDER BY created_at ASC")
                .bind(topic_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.iter().map(flashcard_from_row).collect())
    }

    async fn due_flashcards(
        &self,
        topic_id: &str,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Flashcard>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM flashcards
            WHERE topic_id = ? AND (last_reviewed IS NULL OR due <= ?)
            ORDER BY due ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(topic_id)
        .bind(now.timestamp())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(flashcard_from_row).collect())
    }

    async fn update_review_state(
        &self,
        id: &str,
        expected_version: i64,
        state: &ReviewState,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE flashcards
            SET ease_factor = ?, interval_days = ?, repetitions = ?,
                due = ?, last_reviewed = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(state.ease_factor)
        .bind(state.interval_days)
        .bind(state.repetitions)
        .bind(state.due.timestamp())
        .bind(state.last_reviewed.map(|t| t.timestamp()))
        .bind(id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_flashcard(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM flashcards WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
