//! Error taxonomy shared by the ingestion and query paths.
//!
//! Trait seams ([`KnowledgeStore`](crate::store::KnowledgeStore),
//! [`Embedder`](crate::embedding::Embedder),
//! [`Completer`](crate::compose::Completer)) return `anyhow::Result`; the
//! retrieval engine, answer composer and refresh orchestrator classify
//! those failures into the variants below so callers can tell
//! "no relevant content" apart from "collaborator unavailable".

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A source could not be fetched. Isolated to that source.
    #[error("fetch failed for source {source_id}: {message}")]
    FetchFailure { source_id: String, message: String },

    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("completion service unavailable: {0}")]
    CompletionUnavailable(String),

    #[error("storage failure: {0}")]
    StorageFailure(String),

    /// Fatal at startup.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Stable machine-readable code, used in HTTP error bodies and refresh
    /// reports.
    pub fn code(&self) -> &'static str {
        match self {
            Error::FetchFailure { .. } => "fetch_failure",
            Error::EmbeddingUnavailable(_) => "embedding_unavailable",
            Error::CompletionUnavailable(_) => "completion_unavailable",
            Error::StorageFailure(_) => "storage_failure",
            Error::ConfigInvalid(_) => "config_invalid",
            Error::Timeout(_) => "timeout",
            Error::InvalidInput(_) => "bad_request",
        }
    }

    pub(crate) fn storage(err: anyhow::Error) -> Self {
        Error::StorageFailure(format!("{err:#}"))
    }

    pub(crate) fn embedding(err: anyhow::Error) -> Self {
        Error::EmbeddingUnavailable(format!("{err:#}"))
    }

    pub(crate) fn completion(err: anyhow::Error) -> Self {
        Error::CompletionUnavailable(format!("{err:#}"))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
