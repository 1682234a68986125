//! Flashcard creation, generation, and review.
//!
//! Cards are created by hand or generated by the language model from a
//! topic's processed material. Review applies the scheduler in
//! [`studykit_core::srs`] and commits the new state through the store's
//! versioned update, so two concurrent reviews of the same card cannot
//! both win; the loser gets [`ReviewError::Conflict`] and should reload.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use studykit_core::models::{DocumentStatus, Flashcard};
use studykit_core::srs;
use studykit_core::store::Store;

use crate::error::{CardsError, ReviewError};
use crate::llm::Generator;

/// Upper bound on source material handed to the model when generating
/// cards.
const MAX_SOURCE_CHARS: usize = 4000;

pub struct CardService {
    store: Arc<dyn Store>,
    generator: Option<Arc<dyn Generator>>,
}

#[derive(Debug, Deserialize)]
struct GeneratedCard {
    front: String,
    back: String,
}

impl CardService {
    /// `generator` is optional; without one, [`generate`](Self::generate)
    /// is unavailable but manual cards and review still work.
    pub fn new(store: Arc<dyn Store>, generator: Option<Arc<dyn Generator>>) -> Self {
        Self { store, generator }
    }

    pub async fn create(
        &self,
        topic_id: &str,
        front: &str,
        back: &str,
    ) -> Result<Flashcard, CardsError> {
        if self.store.get_topic(topic_id).await?.is_none() {
            return Err(CardsError::TopicNotFound(topic_id.to_string()));
        }
        let card = Flashcard::new(topic_id, front, back, Utc::now());
        self.store.insert_flashcard(&card).await?;
        Ok(card)
    }

    /// Generate up to `count` cards from the topic's processed documents.
    pub async fn generate(&self, topic_id: &str, count: usize) -> Result<Vec<Flashcard>, CardsError> {
        let generator = self
            .generator
            .as_ref()
            .ok_or(CardsError::Generation(
                crate::llm::GenerationError::Disabled,
            ))?;

        if self.store.get_topic(topic_id).await?.is_none() {
            return Err(CardsError::TopicNotFound(topic_id.to_string()));
        }

        let source = self.topic_source_text(topic_id).await?;
        if source.trim().is_empty() {
            return Err(CardsError::NoContent(topic_id.to_string()));
        }

        let prompt = generation_prompt(&source, count);
        let reply = generator.generate(&prompt).await?;
        let drafts = parse_generated_cards(&reply)?;

        let now = Utc::now();
        let mut cards = Vec::with_capacity(drafts.len());
        for draft in drafts.into_iter().take(count) {
            let card = Flashcard::new(topic_id, draft.front, draft.back, now);
            self.store.insert_flashcard(&card).await?;
            cards.push(card);
        }
        info!(topic_id, cards = cards.len(), "flashcards generated");
        Ok(cards)
    }

    pub async fn list(&self, topic_id: &str) -> Result<Vec<Flashcard>, CardsError> {
        if self.store.get_topic(topic_id).await?.is_none() {
            return Err(CardsError::TopicNotFound(topic_id.to_string()));
        }
        Ok(self.store.list_flashcards(topic_id).await?)
    }

    /// Cards due for review now, soonest first.
    pub async fn due(&self, topic_id: &str, limit: i64) -> Result<Vec<Flashcard>, CardsError> {
        if self.store.get_topic(topic_id).await?.is_none() {
            return Err(CardsError::TopicNotFound(topic_id.to_string()));
        }
        Ok(self.store.due_flashcards(topic_id, Utc::now(), limit).await?)
    }

    /// Apply one review with quality `grade` (0-5) and return the updated
    /// card.
    pub async fn review(&self, card_id: &str, grade: u8) -> Result<Flashcard, ReviewError> {
        let card = self
            .store
            .get_flashcard(card_id)
            .await?
            .ok_or_else(|| ReviewError::CardNotFound(card_id.to_string()))?;
        self.apply_review(&card, grade).await
    }

    /// Review against a card snapshot the caller already holds. If the
    /// stored card has moved on since the snapshot was taken, the update
    /// does not apply and the caller gets [`ReviewError::Conflict`].
    pub async fn apply_review(
        &self,
        card: &Flashcard,
        grade: u8,
    ) -> Result<Flashcard, ReviewError> {
        let state = srs::review(&card.state, grade, Utc::now());
        let applied = self
            .store
            .update_review_state(&card.id, card.version, &state)
            .await?;
        if !applied {
            return Err(ReviewError::Conflict(card.id.clone()));
        }

        Ok(Flashcard {
            state,
            version: card.version + 1,
            ..card.clone()
        })
    }

    pub async fn delete(&self, card_id: &str) -> Result<bool, CardsError> {
        Ok(self.store.delete_flashcard(card_id).await?)
    }

    /// Concatenated text of the topic's processed documents, bounded to
    /// [`MAX_SOURCE_CHARS`].
    async fn topic_source_text(&self, topic_id: &str) -> Result<String, CardsError> {
        let documents = self.store.list_documents(topic_id).await?;
        let mut source = String::new();
        for doc in documents {
            if doc.status != DocumentStatus::Processed {
                continue;
            }
            let Some(text) = doc.text else { continue };
            let remaining = MAX_SOURCE_CHARS.saturating_sub(source.chars().count());
            if remaining == 0 {
                break;
            }
            if !source.is_empty() {
                source.push_str("\n\n");
            }
            source.extend(text.chars().take(remaining));
        }
        Ok(source)
    }
}

fn generation_prompt(source: &str, count: usize) -> String {
    format!(
        "Create {count} study flashcards from the course material below. \
         Respond with only a JSON array where each element is an object \
         with \"front\" (a question or term) and \"back\" (the answer or \
         definition). No other text.\n\n\
         Course material:\n{source}"
    )
}

/// Pull the JSON array out of a model reply. Models often wrap JSON in
/// prose or code fences, so everything outside the outermost brackets is
/// ignored.
fn parse_generated_cards(reply: &str) -> Result<Vec<GeneratedCard>, CardsError> {
    let start = reply
        .find('[')
        .ok_or_else(|| CardsError::InvalidCards("no JSON array in reply".to_string()))?;
    let end = reply
        .rfind(']')
        .filter(|&end| end > start)
        .ok_or_else(|| CardsError::InvalidCards("no JSON array in reply".to_string()))?;

    let cards: Vec<GeneratedCard> = serde_json::from_str(&reply[start..=end])
        .map_err(|e| CardsError::InvalidCards(e.to_string()))?;

    let cards: Vec<GeneratedCard> = cards
        .into_iter()
        .filter(|c| !c.front.trim().is_empty() && !c.back.trim().is_empty())
        .collect();
    if cards.is_empty() {
        return Err(CardsError::InvalidCards(
            "reply contained no usable cards".to_string(),
        ));
    }
    Ok(cards)
}
