//! In-memory [`KnowledgeStore`] implementation for tests and embedding.
//!
//! Entries live in a `BTreeMap` behind `std::sync::RwLock`, each wrapped in
//! an `Arc`. Writers swap whole entries under the write lock, readers clone
//! the `Arc`s they need, so a search never observes a half-written entry
//! and retirement never invalidates results already handed out.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::fingerprint::Fingerprint;
use crate::models::{KnowledgeEntry, UpsertOutcome};
use crate::search::{rank_entries, DistanceMetric};

use super::KnowledgeStore;

type EntryMap = BTreeMap<Fingerprint, Arc<KnowledgeEntry>>;

/// In-memory knowledge store.
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<EntryMap>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a snapshot. Later duplicates of a fingerprint
    /// are ignored, matching upsert semantics.
    pub fn restore(entries: impl IntoIterator<Item = KnowledgeEntry>) -> Self {
        let mut map = EntryMap::new();
        for entry in entries {
            map.entry(entry.fingerprint.clone())
                .or_insert_with(|| Arc::new(entry));
        }
        Self {
            entries: RwLock::new(map),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, EntryMap>> {
        self.entries
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, EntryMap>> {
        self.entries
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    async fn exists(&self, fingerprint: &Fingerprint) -> Result<bool> {
        Ok(self.read()?.contains_key(fingerprint))
    }

    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<KnowledgeEntry>> {
        Ok(self.read()?.get(fingerprint).map(|e| (**e).clone()))
    }

    async fn upsert(&self, entry: &KnowledgeEntry) -> Result<UpsertOutcome> {
        let mut entries = self.write()?;
        match entries.get(&entry.fingerprint) {
            Some(existing) => {
                if entry.last_confirmed_at > existing.last_confirmed_at {
                    let mut confirmed = (**existing).clone();
                    confirmed.last_confirmed_at = entry.last_confirmed_at;
                    entries.insert(entry.fingerprint.clone(), Arc::new(confirmed));
                }
                Ok(UpsertOutcome::Confirmed)
            }
            None => {
                entries.insert(entry.fingerprint.clone(), Arc::new(entry.clone()));
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        metric: DistanceMetric,
    ) -> Result<Vec<KnowledgeEntry>> {
        let candidates: Vec<Arc<KnowledgeEntry>> = self.read()?.values().cloned().collect();
        Ok(rank_entries(candidates, query, k, metric)
            .into_iter()
            .map(|(entry, _)| (*entry).clone())
            .collect())
    }

    async fn retire(&self, unseen_before: DateTime<Utc>) -> Result<usize> {
        let mut entries = self.write()?;
        let before = entries.len();
        entries.retain(|_, e| e.last_confirmed_at >= unseen_before);
        Ok(before - entries.len())
    }

    async fn list(&self) -> Result<Vec<KnowledgeEntry>> {
        Ok(self.read()?.values().map(|e| (**e).clone()).collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }
}
