//! Retrieval engine: query text in, ranked knowledge entries out.
//!
//! The engine embeds the query through the [`Embedder`] collaborator and
//! asks the [`KnowledgeStore`] for the nearest entries. An embedding
//! failure is always surfaced as [`Error::EmbeddingUnavailable`], never as
//! an empty result, so callers can tell "nothing relevant" apart from
//! "engine unavailable".

use std::sync::Arc;

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::models::{KnowledgeEntry, QueryContext};
use crate::search::DistanceMetric;
use crate::store::KnowledgeStore;

/// Read-only view over the knowledge store.
#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn Embedder>,
    metric: DistanceMetric,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn Embedder>,
        metric: DistanceMetric,
    ) -> Self {
        Self {
            store,
            embedder,
            metric,
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Top `k` entries for `query_text`, most relevant first.
    pub async fn retrieve(&self, query_text: &str, k: usize) -> Result<Vec<KnowledgeEntry>> {
        Ok(self.retrieve_context(query_text, k).await?.retrieved)
    }

    /// Like [`retrieve`](Self::retrieve) but keeps the query embedding
    /// alongside the results.
    pub async fn retrieve_context(&self, query_text: &str, k: usize) -> Result<QueryContext> {
        let query = query_text.trim();
        if query.is_empty() {
            return Err(Error::InvalidInput("query must not be empty".to_string()));
        }

        let embedding = self
            .embedder
            .embed_one(query)
            .await
            .map_err(Error::embedding)?;
        if embedding.is_empty() {
            return Err(Error::EmbeddingUnavailable(format!(
                "model {} returned an empty vector",
                self.embedder.model_name()
            )));
        }

        let retrieved = self
            .store
            .search(&embedding, k, self.metric)
            .await
            .map_err(Error::storage)?;

        tracing::debug!(
            query_len = query.len(),
            k,
            hits = retrieved.len(),
            "retrieved context"
        );

        Ok(QueryContext {
            query_text: query.to_string(),
            embedding,
            retrieved,
            answer: None,
        })
    }
}
