//! Knowledge store abstraction.
//!
//! The [`KnowledgeStore`] trait is the persistent, concurrency-safe mapping
//! from [`Fingerprint`] to [`KnowledgeEntry`]. The refresh orchestrator is
//! its only writer; the retrieval engine only reads.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Contract
//!
//! | Method | Guarantee |
//! |--------|-----------|
//! | [`exists`](KnowledgeStore::exists) | Existence check by fingerprint |
//! | [`upsert`](KnowledgeStore::upsert) | Insert if absent, else only advance `last_confirmed_at`; atomic per entry |
//! | [`search`](KnowledgeStore::search) | `k` nearest entries in the order defined by [`rank_entries`](crate::search::rank_entries) |
//! | [`retire`](KnowledgeStore::retire) | Delete entries unseen since a cutoff; never touches results already returned |
//! | [`snapshot`](KnowledgeStore::snapshot) | Point-in-time copy of every committed entry |
//!
//! A failed write must leave the store in its pre-write state.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::fingerprint::Fingerprint;
use crate::models::{KnowledgeEntry, UpsertOutcome};
use crate::search::DistanceMetric;

pub use memory::InMemoryStore;

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Returns `true` if an entry with this fingerprint is committed.
    async fn exists(&self, fingerprint: &Fingerprint) -> Result<bool>;

    /// Fetch a single entry.
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<KnowledgeEntry>>;

    /// Insert `entry` if its fingerprint is absent; otherwise advance the
    /// stored `last_confirmed_at` (never backwards) and leave every other
    /// field untouched.
    async fn upsert(&self, entry: &KnowledgeEntry) -> Result<UpsertOutcome>;

    /// The `k` entries closest to `query`, fully ordered.
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        metric: DistanceMetric,
    ) -> Result<Vec<KnowledgeEntry>>;

    /// Remove entries whose `last_confirmed_at` is older than
    /// `unseen_before`. Returns the number removed.
    async fn retire(&self, unseen_before: DateTime<Utc>) -> Result<usize>;

    /// All entries, ordered by fingerprint.
    async fn list(&self) -> Result<Vec<KnowledgeEntry>>;

    async fn count(&self) -> Result<usize>;

    /// Point-in-time copy of every committed entry.
    async fn snapshot(&self) -> Result<Vec<KnowledgeEntry>> {
        self.list().await
    }
}
