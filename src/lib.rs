//! # studykit
//!
//! A local-first study toolkit: ingest course material, ask questions
//! against it, and drill it with spaced-repetition flashcards.
//!
//! Documents (text, Markdown, PDF, DOCX) are organized under topics,
//! split into overlapping chunks, and embedded through a hosted
//! embeddings API. Questions retrieve the most similar chunks within a
//! topic and feed them to a language model; every answer is stored with
//! its sources and a confidence score. Flashcards are written by hand or
//! generated by the model, and scheduled with SM-2.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────┐   ┌─────────┐
//! │ Uploads  │──▶│     Pipeline      │──▶│ SQLite  │
//! │ txt/pdf/ │   │ Extract+Chunk+    │   │ chunks+ │
//! │ md/docx  │   │ Embed             │   │ vectors │
//! └──────────┘   └───────────────────┘   └────┬────┘
//!                                             │
//!                      ┌──────────────────────┤
//!                      ▼                      ▼
//!                ┌──────────┐          ┌────────────┐
//!                │   Q&A    │          │ Flashcards │
//!                │ (search+ │          │   (SM-2)   │
//!                │   LLM)   │          │            │
//!                └──────────┘          └────────────┘
//! ```
//!
//! The domain core (chunking, similarity search policy, SM-2, the
//! [`Store`](studykit_core::store::Store) trait) lives in the
//! `studykit-core` crate and has no network or database dependencies;
//! this crate supplies the SQLite store, the HTTP clients, and the
//! `study` CLI.
//!
//! ## Quick start
//!
//! ```bash
//! study init                                  # create database
//! study topics add "Anatomy"                  # create a topic
//! study ingest <topic-id> notes.pdf           # upload and process
//! study ask <topic-id> "How many chambers does the heart have?"
//! study cards generate <topic-id>             # make flashcards
//! study cards due <topic-id>                  # what to review
//! study cards review <card-id> 4              # grade a recall
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite [`Store`](studykit_core::store::Store) backend |
//! | [`extract`] | Text extraction (txt, md, PDF, DOCX) |
//! | [`embedding`] | Embedding provider client |
//! | [`llm`] | Chat-completion client |
//! | [`ingest`] | Document processing pipeline |
//! | [`qa`] | Retrieval-augmented Q&A |
//! | [`cards`] | Flashcard creation, generation, and review |
//! | [`error`] | Typed service errors |

pub mod cards;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod qa;
pub mod sqlite_store;
