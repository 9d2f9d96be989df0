//! Refresh orchestrator: the only writer of the knowledge store.
//!
//! A refresh cycle walks the configured sources in order:
//!
//! ```text
//! fetch ──▶ chunk ──▶ fingerprint ──▶ known?  ──yes──▶ confirm (advance last_confirmed_at)
//!                                        │
//!                                        no ──▶ embed (batched) ──▶ upsert
//! ```
//!
//! Failures are isolated: a source that cannot be fetched is recorded and
//! skipped, a batch that cannot be embedded or a chunk that cannot be
//! stored is counted as failed and retried on the next cycle. Nothing is
//! escalated to the process; a cycle with any error ends idle with a
//! `last_error` summary.
//!
//! At most one cycle runs at a time. The guard is a `tokio::sync::Mutex`
//! taken with `try_lock`; a second trigger gets
//! [`RefreshOutcome::AlreadyRunning`] instead of queueing.
//!
//! If a cycle future is dropped (shutdown), entries committed so far stay
//! committed, nothing partial is written, and the state returns to idle
//! with `last_error = "cancelled"`.

use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, OwnedMutexGuard};

use chatvat_core::chunk::{chunk, ChunkOptions};
use chatvat_core::embedding::Embedder;
use chatvat_core::models::{Chunk, KnowledgeEntry, Source, UpsertOutcome};
use chatvat_core::store::KnowledgeStore;
use chatvat_core::{Error, Fingerprint};

use crate::config::Config;
use crate::fetch::Fetcher;
use crate::retry::{retry, Backoff};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshStatus {
    #[default]
    Idle,
    Running,
}

/// A failure recorded during a cycle, attributed to one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceError {
    pub source_id: String,
    /// Error code, e.g. `fetch_failure` or `embedding_unavailable`.
    pub kind: String,
    pub message: String,
}

impl SourceError {
    fn new(source_id: &str, err: &Error) -> Self {
        Self {
            source_id: source_id.to_string(),
            kind: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Outcome of one cycle. Persisted as a row of `refresh_runs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources_processed: usize,
    pub sources_failed: usize,
    pub entries_added: usize,
    pub entries_confirmed: usize,
    pub chunks_failed: usize,
    pub entries_retired: usize,
    pub cancelled: bool,
    pub errors: Vec<SourceError>,
}

impl RefreshReport {
    fn begin(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            sources_processed: 0,
            sources_failed: 0,
            entries_added: 0,
            entries_confirmed: 0,
            chunks_failed: 0,
            entries_retired: 0,
            cancelled: false,
            errors: Vec::new(),
        }
    }
}

/// Live view of the orchestrator, served by `GET /status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshCycleState {
    pub status: RefreshStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cycles_completed: u64,
    pub sources_processed: usize,
    pub sources_failed: usize,
    pub entries_added: usize,
    pub entries_confirmed: usize,
    pub chunks_failed: usize,
    pub entries_retired: usize,
    pub errors: Vec<SourceError>,
    pub last_error: Option<String>,
}

impl RefreshCycleState {
    fn apply(&mut self, report: &RefreshReport) {
        self.sources_processed = report.sources_processed;
        self.sources_failed = report.sources_failed;
        self.entries_added = report.entries_added;
        self.entries_confirmed = report.entries_confirmed;
        self.chunks_failed = report.chunks_failed;
        self.entries_retired = report.entries_retired;
        self.errors = report.errors.clone();
    }

    fn to_report(&self, cancelled: bool) -> RefreshReport {
        let started_at = self.started_at.unwrap_or_else(Utc::now);
        RefreshReport {
            started_at,
            finished_at: self.finished_at.unwrap_or(started_at),
            sources_processed: self.sources_processed,
            sources_failed: self.sources_failed,
            entries_added: self.entries_added,
            entries_confirmed: self.entries_confirmed,
            chunks_failed: self.chunks_failed,
            entries_retired: self.entries_retired,
            cancelled,
            errors: self.errors.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Completed(RefreshReport),
    AlreadyRunning,
}

/// Where finished cycles are recorded.
#[async_trait]
pub trait RefreshJournal: Send + Sync {
    async fn record(&self, report: &RefreshReport) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub chunking: ChunkOptions,
    pub batch_size: usize,
    pub backoff: Backoff,
    /// Entries unconfirmed for longer than this are retired after a cycle
    /// in which every source was fetched.
    pub retention: Option<chrono::Duration>,
}

impl RefreshSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunking: config.chunking.options(),
            batch_size: config.embedding.batch_size.max(1),
            backoff: Backoff::from_refresh(&config.refresh),
            retention: config
                .refresh
                .retention_days
                .map(|days| chrono::Duration::days(days as i64)),
        }
    }
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            chunking: ChunkOptions::default(),
            batch_size: 32,
            backoff: Backoff::none(),
            retention: None,
        }
    }
}

pub struct RefreshOrchestrator {
    sources: Vec<Source>,
    fetcher: Arc<dyn Fetcher>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn KnowledgeStore>,
    journal: Option<Arc<dyn RefreshJournal>>,
    settings: RefreshSettings,
    guard: Arc<Mutex<()>>,
    state: RwLock<RefreshCycleState>,
}

impl RefreshOrchestrator {
    pub fn new(
        sources: Vec<Source>,
        fetcher: Arc<dyn Fetcher>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn KnowledgeStore>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            sources,
            fetcher,
            embedder,
            store,
            journal: None,
            settings,
            guard: Arc::new(Mutex::new(())),
            state: RwLock::new(RefreshCycleState::default()),
        }
    }

    pub fn with_journal(mut self, journal: Arc<dyn RefreshJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Snapshot of the current cycle state.
    pub fn state(&self) -> RefreshCycleState {
        self.read_state().clone()
    }

    pub fn is_running(&self) -> bool {
        self.read_state().status == RefreshStatus::Running
    }

    /// Run one cycle now, unless one is already running.
    pub async fn trigger(&self) -> RefreshOutcome {
        let Ok(_permit) = self.guard.clone().try_lock_owned() else {
            return RefreshOutcome::AlreadyRunning;
        };
        RefreshOutcome::Completed(self.run_cycle().await)
    }

    /// Start a cycle on a background task. Returns `false` if one is
    /// already running. The cycle is cancelled when `shutdown` flips.
    pub fn spawn_cycle(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> bool {
        let Ok(permit) = self.guard.clone().try_lock_owned() else {
            return false;
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.cycle_until_shutdown(permit, &mut shutdown).await;
        });
        true
    }

    /// Wait until no cycle holds the guard.
    pub async fn wait_idle(&self) {
        let _permit = self.guard.lock().await;
    }

    /// Background loop: one cycle after `initial_delay`, then one every
    /// `interval` (`None` disables the timer). Returns when `shutdown`
    /// flips to `true` or its sender is dropped; an in-flight cycle is
    /// cancelled.
    pub async fn run_periodic(
        self: Arc<Self>,
        initial_delay: Duration,
        interval: Option<Duration>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!(
            initial_delay_secs = initial_delay.as_secs(),
            interval_secs = interval.map(|i| i.as_secs()),
            sources = self.sources.len(),
            "refresh loop started"
        );

        if !sleep_unless_shutdown(initial_delay, &mut shutdown).await {
            return;
        }
        if !self.scheduled_cycle(&mut shutdown).await {
            return;
        }

        let Some(period) = interval.filter(|p| !p.is_zero()) else {
            tracing::info!("periodic refresh disabled");
            return;
        };

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.scheduled_cycle(&mut shutdown).await {
                        return;
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("refresh loop stopped");
                    return;
                }
            }
        }
    }

    /// Returns `false` once shutdown was requested.
    async fn scheduled_cycle(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let Ok(permit) = self.guard.clone().try_lock_owned() else {
            tracing::info!("skipping scheduled refresh; a cycle is already running");
            return true;
        };
        self.cycle_until_shutdown(permit, shutdown).await
    }

    /// Run one cycle unless shutdown arrives first. The cancelled run is
    /// journaled before the guard is released. Returns `false` on shutdown.
    async fn cycle_until_shutdown(
        &self,
        permit: OwnedMutexGuard<()>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let finished = tokio::select! {
            _ = self.run_cycle() => true,
            _ = shutdown.changed() => false,
        };

        if !finished {
            let report = self.state().to_report(true);
            self.journal_report(&report).await;
        }
        drop(permit);
        finished
    }

    /// One full cycle. Callers hold the guard.
    async fn run_cycle(&self) -> RefreshReport {
        let started_at = Utc::now();
        {
            let mut state = self.write_state();
            let cycles_completed = state.cycles_completed;
            *state = RefreshCycleState {
                status: RefreshStatus::Running,
                started_at: Some(started_at),
                cycles_completed,
                ..RefreshCycleState::default()
            };
        }
        let mut cancel_guard = CancelGuard {
            state: &self.state,
            armed: true,
        };

        tracing::info!(sources = self.sources.len(), "refresh cycle started");

        let mut report = RefreshReport::begin(started_at);
        let mut seen: HashSet<Fingerprint> = HashSet::new();

        for source in &self.sources {
            match self.fetcher.fetch(source).await {
                Ok(raw) => {
                    let chunks = chunk(&raw, &self.settings.chunking);
                    tracing::debug!(source = %source.id, chunks = chunks.len(), "chunked source");
                    self.ingest(source, chunks, &mut seen, &mut report).await;
                }
                Err(e) => {
                    let err = Error::FetchFailure {
                        source_id: source.id.clone(),
                        message: format!("{e:#}"),
                    };
                    tracing::warn!(source = %source.id, error = %err, "source skipped");
                    report.sources_failed += 1;
                    report.errors.push(SourceError::new(&source.id, &err));
                }
            }
            report.sources_processed += 1;
            self.write_state().apply(&report);
        }

        if let Some(window) = self.settings.retention {
            if report.sources_failed == 0 && report.chunks_failed == 0 && !self.sources.is_empty() {
                self.retire_unseen(started_at - window, &mut report).await;
            }
        }

        report.finished_at = Utc::now();
        {
            let mut state = self.write_state();
            state.apply(&report);
            state.status = RefreshStatus::Idle;
            state.finished_at = Some(report.finished_at);
            state.cycles_completed += 1;
            state.last_error = failure_summary(&report, self.sources.len());
        }
        cancel_guard.armed = false;

        tracing::info!(
            added = report.entries_added,
            confirmed = report.entries_confirmed,
            chunks_failed = report.chunks_failed,
            sources_failed = report.sources_failed,
            retired = report.entries_retired,
            elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "refresh cycle finished"
        );

        self.journal_report(&report).await;
        report
    }

    /// Confirm known chunks and embed + insert new ones.
    async fn ingest(
        &self,
        source: &Source,
        chunks: Vec<Chunk>,
        seen: &mut HashSet<Fingerprint>,
        report: &mut RefreshReport,
    ) {
        let backoff = &self.settings.backoff;
        let mut fresh: Vec<Chunk> = Vec::new();

        for chunk in chunks {
            if !seen.insert(chunk.fingerprint.clone()) {
                continue;
            }

            let existing = retry(backoff, "lookup entry", || self.store.get(&chunk.fingerprint)).await;
            match existing {
                Ok(Some(mut entry)) => {
                    entry.last_confirmed_at = Utc::now();
                    self.store_entry(source, &entry, report).await;
                }
                Ok(None) => fresh.push(chunk),
                Err(e) => self.chunk_failed(source, Error::StorageFailure(format!("{e:#}")), 1, report),
            }
        }

        for batch in fresh.chunks(self.settings.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            // Providers apply their own retry policy (`embedding.max_retries`).
            let vectors = match self.embedder.embed(&texts).await {
                Ok(v) if v.len() == batch.len() => v,
                Ok(v) => {
                    let err = Error::EmbeddingUnavailable(format!(
                        "expected {} vectors, got {}",
                        batch.len(),
                        v.len()
                    ));
                    self.chunk_failed(source, err, batch.len(), report);
                    continue;
                }
                Err(e) => {
                    let err = Error::EmbeddingUnavailable(format!("{e:#}"));
                    self.chunk_failed(source, err, batch.len(), report);
                    continue;
                }
            };

            let now = Utc::now();
            for (chunk, vector) in batch.iter().zip(vectors) {
                let entry = KnowledgeEntry::from_chunk(chunk, source.kind, &source.target, vector, now);
                self.store_entry(source, &entry, report).await;
            }
        }
    }

    async fn store_entry(&self, source: &Source, entry: &KnowledgeEntry, report: &mut RefreshReport) {
        match retry(&self.settings.backoff, "upsert entry", || self.store.upsert(entry)).await {
            Ok(UpsertOutcome::Inserted) => report.entries_added += 1,
            Ok(UpsertOutcome::Confirmed) => report.entries_confirmed += 1,
            Err(e) => self.chunk_failed(source, Error::StorageFailure(format!("{e:#}")), 1, report),
        }
    }

    fn chunk_failed(&self, source: &Source, err: Error, count: usize, report: &mut RefreshReport) {
        tracing::warn!(source = %source.id, chunks = count, error = %err, "chunks not stored");
        report.chunks_failed += count;
        report.errors.push(SourceError::new(&source.id, &err));
    }

    async fn retire_unseen(&self, cutoff: DateTime<Utc>, report: &mut RefreshReport) {
        match retry(&self.settings.backoff, "retire entries", || self.store.retire(cutoff)).await {
            Ok(n) => {
                if n > 0 {
                    tracing::info!(retired = n, cutoff = %cutoff, "retired unseen entries");
                }
                report.entries_retired = n;
            }
            Err(e) => {
                let err = Error::StorageFailure(format!("{e:#}"));
                tracing::warn!(error = %err, "retirement failed");
                report.errors.push(SourceError::new("*", &err));
            }
        }
    }

    async fn journal_report(&self, report: &RefreshReport) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record(report).await {
                tracing::warn!(error = %format!("{e:#}"), "failed to record refresh run");
            }
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, RefreshCycleState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, RefreshCycleState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Marks the state cancelled if a cycle is dropped before it finishes.
struct CancelGuard<'a> {
    state: &'a RwLock<RefreshCycleState>,
    armed: bool,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.status = RefreshStatus::Idle;
        state.finished_at = Some(Utc::now());
        state.last_error = Some("cancelled".to_string());
        tracing::warn!("refresh cycle cancelled");
    }
}

/// `None` for a clean cycle. Every source failing to fetch gets its own
/// message.
fn failure_summary(report: &RefreshReport, total_sources: usize) -> Option<String> {
    if report.errors.is_empty() {
        return None;
    }
    if total_sources > 0 && report.sources_failed == total_sources {
        return Some(format!("all {} sources failed to fetch", total_sources));
    }
    if report.sources_failed == 0 && report.chunks_failed == 0 {
        return report.errors.first().map(|e| e.message.clone());
    }
    Some(format!(
        "{} of {} sources failed; {} chunks failed",
        report.sources_failed, total_sources, report.chunks_failed
    ))
}

async fn sleep_unless_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown.changed() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use chatvat_core::models::{RawDocument, SourceKind};
    use chatvat_core::store::InMemoryStore;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves fixed text per source id; unknown ids fail.
    struct MapFetcher {
        docs: HashMap<String, String>,
        delay: Duration,
    }

    #[async_trait]
    impl Fetcher for MapFetcher {
        async fn fetch(&self, source: &Source) -> Result<RawDocument> {
            tokio::time::sleep(self.delay).await;
            self.docs
                .get(&source.id)
                .map(|text| RawDocument::from_text(&source.id, text.as_str()))
                .ok_or_else(|| anyhow!("connection refused"))
        }
    }

    /// Length-based vectors; counts calls.
    #[derive(Default)]
    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }

        fn dims(&self) -> usize {
            2
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    fn source(id: &str) -> Source {
        Source::new(SourceKind::LocalFile, format!("{}.txt", id)).with_id(id)
    }

    fn orchestrator(
        docs: &[(&str, &str)],
        sources: &[&str],
        delay: Duration,
    ) -> (Arc<RefreshOrchestrator>, Arc<InMemoryStore>, Arc<CountingEmbedder>) {
        let fetcher = Arc::new(MapFetcher {
            docs: docs
                .iter()
                .map(|(id, text)| (id.to_string(), text.to_string()))
                .collect(),
            delay,
        });
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(CountingEmbedder::default());
        let orch = RefreshOrchestrator::new(
            sources.iter().map(|id| source(id)).collect(),
            fetcher,
            embedder.clone(),
            store.clone(),
            RefreshSettings::default(),
        );
        (Arc::new(orch), store, embedder)
    }

    fn completed(outcome: RefreshOutcome) -> RefreshReport {
        match outcome {
            RefreshOutcome::Completed(report) => report,
            RefreshOutcome::AlreadyRunning => panic!("expected a completed cycle"),
        }
    }

    #[tokio::test]
    async fn test_cycle_ingests_and_is_idempotent() {
        let (orch, store, embedder) = orchestrator(
            &[("a", "Alpha paragraph.\n\nBeta paragraph.")],
            &["a"],
            Duration::ZERO,
        );

        let first = completed(orch.trigger().await);
        assert_eq!(first.entries_added, 1);
        assert_eq!(store.count().await.unwrap(), 1);

        let second = completed(orch.trigger().await);
        assert_eq!(second.entries_added, 0);
        assert_eq!(second.entries_confirmed, 1);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

        let state = orch.state();
        assert_eq!(state.status, RefreshStatus::Idle);
        assert_eq!(state.cycles_completed, 2);
        assert!(state.last_error.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_chunk_first_writer_wins() {
        let (orch, store, _) = orchestrator(
            &[("first", "Shared text."), ("second", "Shared text.")],
            &["first", "second"],
            Duration::ZERO,
        );
        let report = completed(orch.trigger().await);
        assert_eq!(report.entries_added, 1);
        let entries = store.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source_id, "first");
    }

    #[tokio::test]
    async fn test_fetch_failure_is_isolated() {
        let (orch, store, _) = orchestrator(&[("up", "Reachable text.")], &["down", "up"], Duration::ZERO);
        let report = completed(orch.trigger().await);
        assert_eq!(report.sources_processed, 2);
        assert_eq!(report.sources_failed, 1);
        assert_eq!(report.errors[0].source_id, "down");
        assert_eq!(report.errors[0].kind, "fetch_failure");
        assert_eq!(store.count().await.unwrap(), 1);

        let state = orch.state();
        assert_eq!(state.status, RefreshStatus::Idle);
        assert_eq!(
            state.last_error.as_deref(),
            Some("1 of 2 sources failed; 0 chunks failed")
        );
    }

    #[tokio::test]
    async fn test_all_sources_failing_sets_last_error() {
        let (orch, _, _) = orchestrator(&[], &["x", "y"], Duration::ZERO);
        completed(orch.trigger().await);
        let state = orch.state();
        assert_eq!(state.status, RefreshStatus::Idle);
        assert_eq!(state.last_error.as_deref(), Some("all 2 sources failed to fetch"));
    }

    #[tokio::test]
    async fn test_second_trigger_is_rejected() {
        let (orch, _, _) = orchestrator(&[("a", "Slow text.")], &["a"], Duration::from_millis(200));
        let (first, second) = tokio::join!(orch.trigger(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            orch.trigger().await
        });
        assert!(matches!(first, RefreshOutcome::Completed(_)));
        assert_eq!(second, RefreshOutcome::AlreadyRunning);
    }

    #[tokio::test]
    async fn test_spawn_cycle_runs_in_background() {
        let (orch, store, _) = orchestrator(&[("a", "Background text.")], &["a"], Duration::from_millis(50));
        let (_tx, rx) = watch::channel(false);
        assert!(orch.spawn_cycle(rx.clone()));
        assert!(!orch.spawn_cycle(rx));
        for _ in 0..100 {
            if orch.state().cycles_completed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(orch.state().cycles_completed, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_cycle() {
        let (orch, _, _) = orchestrator(&[("a", "Never lands.")], &["a"], Duration::from_secs(30));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(orch.clone().run_periodic(Duration::ZERO, None, rx));

        for _ in 0..100 {
            if orch.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(orch.is_running());

        tx.send(true).unwrap();
        handle.await.unwrap();
        let state = orch.state();
        assert_eq!(state.status, RefreshStatus::Idle);
        assert_eq!(state.last_error.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_spawned_cycle() {
        let (orch, _, _) = orchestrator(&[("a", "Never lands.")], &["a"], Duration::from_secs(30));
        let (tx, rx) = watch::channel(false);
        assert!(orch.spawn_cycle(rx));
        for _ in 0..100 {
            if orch.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(orch.is_running());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), orch.wait_idle())
            .await
            .unwrap();
        let state = orch.state();
        assert_eq!(state.status, RefreshStatus::Idle);
        assert_eq!(state.last_error.as_deref(), Some("cancelled"));
        assert_eq!(state.cycles_completed, 0);
    }

    #[tokio::test]
    async fn test_periodic_timer_runs_repeated_cycles() {
        let (orch, store, embedder) = orchestrator(&[("a", "Timer text.")], &["a"], Duration::ZERO);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(orch.clone().run_periodic(
            Duration::ZERO,
            Some(Duration::from_millis(30)),
            rx,
        ));

        for _ in 0..200 {
            if orch.state().cycles_completed >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(orch.state().cycles_completed >= 2);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    /// Always fails; counts calls.
    #[derive(Default)]
    struct FailingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }

        fn dims(&self) -> usize {
            2
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("503 Service Unavailable"))
        }
    }

    #[tokio::test]
    async fn test_embed_batch_is_not_retried_by_orchestrator() {
        let embedder = Arc::new(FailingEmbedder::default());
        let fetcher = Arc::new(MapFetcher {
            docs: HashMap::from([("a".to_string(), "Only paragraph.".to_string())]),
            delay: Duration::ZERO,
        });
        let settings = RefreshSettings {
            backoff: Backoff::new(Duration::from_millis(1), Duration::from_millis(1), 3),
            ..RefreshSettings::default()
        };
        let orch = RefreshOrchestrator::new(
            vec![source("a")],
            fetcher,
            embedder.clone(),
            Arc::new(InMemoryStore::new()),
            settings,
        );

        let report = completed(orch.trigger().await);
        assert_eq!(report.chunks_failed, 1);
        assert_eq!(report.errors[0].kind, "embedding_unavailable");
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_summary() {
        let mut report = RefreshReport::begin(Utc::now());
        assert_eq!(failure_summary(&report, 3), None);

        let err = Error::StorageFailure("disk full".into());
        report.errors.push(SourceError::new("*", &err));
        assert_eq!(failure_summary(&report, 3).as_deref(), Some("storage failure: disk full"));

        report.sources_failed = 3;
        assert_eq!(
            failure_summary(&report, 3).as_deref(),
            Some("all 3 sources failed to fetch")
        );

        report.sources_failed = 1;
        report.chunks_failed = 4;
        assert_eq!(
            failure_summary(&report, 3).as_deref(),
            Some("1 of 3 sources failed; 4 chunks failed")
        );
    }
}
