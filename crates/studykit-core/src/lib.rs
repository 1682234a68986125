//! # studykit-core
//!
//! Shared logic for studykit: data models, the overlapping text chunker,
//! the SM-2 spaced-repetition scheduler, store abstraction, and
//! topic-scoped vector similarity search.
//!
//! This crate contains no tokio, sqlx, network, or filesystem
//! dependencies. Everything here is pure computation over the [`store`]
//! abstraction, so the algorithms can be tested against the in-memory
//! store without a database or an embedding provider.

pub mod chunk;
pub mod embedding;
pub mod models;
pub mod search;
pub mod srs;
pub mod store;
