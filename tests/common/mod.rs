//! In-process fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use chatvat::fetch::Fetcher;
use chatvat::refresh::{RefreshOrchestrator, RefreshOutcome, RefreshReport, RefreshSettings};
use chatvat_core::chunk::ChunkOptions;
use chatvat_core::compose::{Completer, Prompt};
use chatvat_core::embedding::Embedder;
use chatvat_core::models::{KnowledgeEntry, RawDocument, Source, SourceKind, UpsertOutcome};
use chatvat_core::search::DistanceMetric;
use chatvat_core::store::KnowledgeStore;
use chatvat_core::Fingerprint;

pub const DIMS: usize = 64;

/// Bag-of-words embedder: each lowercase token is hashed into one of
/// [`DIMS`] buckets and the vector is L2-normalized.
pub struct HashEmbedder {
    pub calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIMS];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            // FNV-1a
            let mut h: u32 = 0x811c_9dc5;
            for b in token.bytes() {
                h ^= b as u32;
                h = h.wrapping_mul(0x0100_0193);
            }
            v[(h as usize) % DIMS] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "token-hash"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

pub struct DownEmbedder;

#[async_trait]
impl Embedder for DownEmbedder {
    fn model_name(&self) -> &str {
        "down"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("connection refused")
    }
}

/// Answers with the prompt it was given, so tests can see the context.
pub struct EchoCompleter;

#[async_trait]
impl Completer for EchoCompleter {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        Ok(format!("You asked:\n{}", prompt.user))
    }
}

pub struct DownCompleter;

#[async_trait]
impl Completer for DownCompleter {
    fn model_name(&self) -> &str {
        "down"
    }

    async fn complete(&self, _prompt: &Prompt) -> Result<String> {
        bail!("completion API error 503 Service Unavailable")
    }
}

/// Takes `delay` before echoing.
pub struct SlowCompleter {
    pub delay: Duration,
}

#[async_trait]
impl Completer for SlowCompleter {
    fn model_name(&self) -> &str {
        "slow"
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        EchoCompleter.complete(prompt).await
    }
}

/// Serves per-source text that tests can change between cycles. Unknown
/// sources fail like an unreachable host.
pub struct ScriptedFetcher {
    docs: Mutex<HashMap<String, String>>,
    delay: Duration,
}

impl ScriptedFetcher {
    pub fn new(docs: &[(&str, &str)]) -> Self {
        Self {
            docs: Mutex::new(
                docs.iter()
                    .map(|(id, text)| (id.to_string(), text.to_string()))
                    .collect(),
            ),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set(&self, source_id: &str, text: &str) {
        self.docs
            .lock()
            .unwrap()
            .insert(source_id.to_string(), text.to_string());
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, source: &Source) -> Result<RawDocument> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let text = self
            .docs
            .lock()
            .unwrap()
            .get(&source.id)
            .cloned()
            .ok_or_else(|| anyhow!("request failed: connection refused"))?;
        Ok(RawDocument::from_text(&source.id, text))
    }
}

/// Wraps a store and fails every upsert after the first `budget` inserts,
/// as if the process died mid-cycle.
pub struct FailingAfter {
    inner: Arc<dyn KnowledgeStore>,
    budget: AtomicUsize,
}

impl FailingAfter {
    pub fn new(inner: Arc<dyn KnowledgeStore>, budget: usize) -> Self {
        Self {
            inner,
            budget: AtomicUsize::new(budget),
        }
    }
}

#[async_trait]
impl KnowledgeStore for FailingAfter {
    async fn exists(&self, fingerprint: &Fingerprint) -> Result<bool> {
        self.inner.exists(fingerprint).await
    }

    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<KnowledgeEntry>> {
        self.inner.get(fingerprint).await
    }

    async fn upsert(&self, entry: &KnowledgeEntry) -> Result<UpsertOutcome> {
        let left = self
            .budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if left.is_err() {
            bail!("disk I/O error");
        }
        self.inner.upsert(entry).await
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        metric: DistanceMetric,
    ) -> Result<Vec<KnowledgeEntry>> {
        self.inner.search(query, k, metric).await
    }

    async fn retire(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.inner.retire(cutoff).await
    }

    async fn list(&self) -> Result<Vec<KnowledgeEntry>> {
        self.inner.list().await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }
}

/// A store whose database is gone: every call fails.
pub struct UnreadableStore;

#[async_trait]
impl KnowledgeStore for UnreadableStore {
    async fn exists(&self, _fingerprint: &Fingerprint) -> Result<bool> {
        bail!("unable to open database file")
    }

    async fn get(&self, _fingerprint: &Fingerprint) -> Result<Option<KnowledgeEntry>> {
        bail!("unable to open database file")
    }

    async fn upsert(&self, _entry: &KnowledgeEntry) -> Result<UpsertOutcome> {
        bail!("unable to open database file")
    }

    async fn search(
        &self,
        _query: &[f32],
        _k: usize,
        _metric: DistanceMetric,
    ) -> Result<Vec<KnowledgeEntry>> {
        bail!("unable to open database file")
    }

    async fn retire(&self, _cutoff: DateTime<Utc>) -> Result<usize> {
        bail!("unable to open database file")
    }

    async fn list(&self) -> Result<Vec<KnowledgeEntry>> {
        bail!("unable to open database file")
    }

    async fn count(&self) -> Result<usize> {
        bail!("unable to open database file")
    }
}

pub fn local_source(id: &str) -> Source {
    Source::new(SourceKind::LocalFile, format!("./{}.txt", id)).with_id(id)
}

/// One-paragraph-per-chunk settings with no retries.
pub fn small_chunks() -> RefreshSettings {
    RefreshSettings {
        chunking: ChunkOptions {
            max_chunk_chars: 50,
            overlap_chars: 0,
            ..ChunkOptions::default()
        },
        ..RefreshSettings::default()
    }
}

/// `n` distinct paragraphs, each of which becomes its own chunk under
/// [`small_chunks`].
pub fn sessions(n: usize) -> String {
    (0..n)
        .map(|i| format!("Session {:02} covers topic number {:02} in depth.", i, i))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn orchestrator(
    sources: &[&str],
    fetcher: Arc<dyn Fetcher>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn KnowledgeStore>,
    settings: RefreshSettings,
) -> RefreshOrchestrator {
    RefreshOrchestrator::new(
        sources.iter().map(|id| local_source(id)).collect(),
        fetcher,
        embedder,
        store,
        settings,
    )
}

pub fn completed(outcome: RefreshOutcome) -> RefreshReport {
    match outcome {
        RefreshOutcome::Completed(report) => report,
        RefreshOutcome::AlreadyRunning => panic!("expected a completed cycle"),
    }
}
