//! Service wiring shared by the CLI commands and the HTTP server.
//!
//! The completion provider is only built for commands that answer
//! questions, so ingestion and maintenance commands run without its
//! credentials.

use std::sync::Arc;

use anyhow::{Context, Result};

use chatvat_core::embedding::Embedder;
use chatvat_core::retrieval::Retriever;
use chatvat_core::store::KnowledgeStore;

use crate::chat::ChatService;
use crate::completion::create_completer;
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::fetch::SourceFetcher;
use crate::refresh::{RefreshOrchestrator, RefreshSettings};
use crate::sqlite_store::SqliteStore;

pub struct App {
    pub config: Arc<Config>,
    pub store: Arc<SqliteStore>,
    pub embedder: Arc<dyn Embedder>,
    pub orchestrator: Arc<RefreshOrchestrator>,
}

impl App {
    /// Open the store and build the ingestion collaborators. Fails if the
    /// embedding provider is misconfigured.
    pub async fn build(config: Config) -> Result<Self> {
        let store = Arc::new(
            SqliteStore::open(&config.storage.path)
                .await
                .with_context(|| format!("Failed to open {}", config.storage.path.display()))?,
        );
        let embedder = create_embedder(&config).context("Failed to set up embedding provider")?;
        let fetcher = Arc::new(SourceFetcher::new(&config.fetch)?);

        let knowledge: Arc<dyn KnowledgeStore> = store.clone();
        let orchestrator = RefreshOrchestrator::new(
            config.resolved_sources(),
            fetcher,
            embedder.clone(),
            knowledge,
            RefreshSettings::from_config(&config),
        )
        .with_journal(store.clone());

        tracing::info!(
            bot = %config.bot_name,
            sources = config.sources.len(),
            embedder = embedder.model_name(),
            store = %config.storage.path.display(),
            "service ready"
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            embedder,
            orchestrator: Arc::new(orchestrator),
        })
    }

    pub fn retriever(&self) -> Retriever {
        let knowledge: Arc<dyn KnowledgeStore> = self.store.clone();
        Retriever::new(knowledge, self.embedder.clone(), self.config.retrieval.metric)
    }

    /// Build the query path, including the completion provider.
    pub fn chat_service(&self) -> Result<ChatService> {
        let completer =
            create_completer(&self.config).context("Failed to set up completion provider")?;
        let knowledge: Arc<dyn KnowledgeStore> = self.store.clone();
        Ok(ChatService::from_config(
            &self.config,
            knowledge,
            self.embedder.clone(),
            completer,
        ))
    }
}
