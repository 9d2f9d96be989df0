//! Query path: retrieve context, then compose an answer, under a
//! per-request deadline.

use std::sync::Arc;
use std::time::Duration;

use chatvat_core::compose::{AnswerComposer, Completer};
use chatvat_core::embedding::Embedder;
use chatvat_core::models::QueryContext;
use chatvat_core::retrieval::Retriever;
use chatvat_core::store::KnowledgeStore;
use chatvat_core::{Error, Result};

use crate::config::Config;

#[derive(Clone)]
pub struct ChatService {
    retriever: Retriever,
    composer: Arc<AnswerComposer>,
    top_k: usize,
    timeout: Duration,
}

impl ChatService {
    pub fn new(retriever: Retriever, composer: AnswerComposer, top_k: usize, timeout: Duration) -> Self {
        Self {
            retriever,
            composer: Arc::new(composer),
            top_k,
            timeout,
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn Embedder>,
        completer: Arc<dyn Completer>,
    ) -> Self {
        let retriever = Retriever::new(store, embedder, config.retrieval.metric);
        let composer = AnswerComposer::new(
            completer,
            &config.bot_name,
            config.system_prompt.as_deref(),
            config.retrieval.max_context_chars,
        );
        Self::new(
            retriever,
            composer,
            config.retrieval.top_k,
            Duration::from_secs(config.retrieval.query_timeout_secs),
        )
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Answer `message`. On timeout nothing partial is returned.
    pub async fn ask(&self, message: &str) -> Result<QueryContext> {
        let started = std::time::Instant::now();
        let work = async {
            let mut ctx = self.retriever.retrieve_context(message, self.top_k).await?;
            let answer = self.composer.answer(&ctx.query_text, &ctx.retrieved).await?;
            ctx.answer = Some(answer);
            Ok::<_, Error>(ctx)
        };

        let ctx = tokio::time::timeout(self.timeout, work)
            .await
            .map_err(|_| Error::Timeout(self.timeout))??;

        tracing::info!(
            hits = ctx.retrieved.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "answered query"
        );
        Ok(ctx)
    }
}
