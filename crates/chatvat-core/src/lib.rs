//! # ChatVat Core
//!
//! Shared, runtime-agnostic logic for ChatVat: data models, the error
//! taxonomy, content fingerprinting, chunking, the knowledge store
//! abstraction, deterministic ranking, retrieval, and answer composition.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. External
//! collaborators (embedding model, completion model, persistent storage)
//! are reached through the [`embedding::Embedder`],
//! [`compose::Completer`] and [`store::KnowledgeStore`] traits.

pub mod chunk;
pub mod compose;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod models;
pub mod retrieval;
pub mod search;
pub mod store;

pub use error::{Error, Result};
pub use fingerprint::Fingerprint;
