//! SQLite-backed [`KnowledgeStore`].
//!
//! Every upsert is a single transaction: a conditional insert, followed by
//! a confirm `UPDATE` when the fingerprint already existed. A crash or a
//! failed statement rolls the transaction back, so a restored database
//! holds exactly the entries whose upsert returned successfully.
//!
//! Search loads candidates with matching dimensionality in one statement
//! (a consistent WAL read) and ranks them with
//! [`rank_entries`](chatvat_core::search::rank_entries), the same ordering
//! the in-memory store uses.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use chatvat_core::embedding::{blob_to_vec, vec_to_blob};
use chatvat_core::models::{KnowledgeEntry, UpsertOutcome};
use chatvat_core::search::{rank_entries, DistanceMetric};
use chatvat_core::store::KnowledgeStore;
use chatvat_core::Fingerprint;

use crate::db;
use crate::migrate;
use crate::refresh::{RefreshJournal, RefreshReport, SourceError};

const ENTRY_COLUMNS: &str = "fingerprint, embedding, text, source_id, metadata_json, \
                             first_seen_at, last_confirmed_at";

pub struct SqliteStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteStore {
    /// Open or create the database at `path` and apply the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool)
            .await
            .context("Failed to apply schema")?;
        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    /// Reopen a database written earlier, e.g. a backup or the state left
    /// behind by a crashed process. Fails if the file does not exist.
    pub async fn restore(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("No database to restore at {}", path.display());
        }
        let store = Self::open(path).await?;
        let count = store.count().await?;
        tracing::info!(path = %path.display(), entries = count, "restored knowledge store");
        Ok(store)
    }

    /// Write a consistent copy of the database to `dest`.
    pub async fn backup_to(&self, dest: &Path) -> Result<()> {
        if dest.exists() {
            bail!("Backup target already exists: {}", dest.display());
        }
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        sqlx::query("VACUUM INTO ?")
            .bind(dest.to_string_lossy().into_owned())
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to back up to {}", dest.display()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Most recent refresh run, if any.
    pub async fn last_run(&self) -> Result<Option<RefreshReport>> {
        let row = sqlx::query(
            "SELECT started_at, finished_at, sources_processed, sources_failed, entries_added, \
             entries_confirmed, chunks_failed, entries_retired, cancelled, errors_json \
             FROM refresh_runs ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let errors_json: String = row.get("errors_json");
        let errors: Vec<SourceError> =
            serde_json::from_str(&errors_json).context("Corrupt errors_json in refresh_runs")?;

        Ok(Some(RefreshReport {
            started_at: millis_to_utc(row.get("started_at"))?,
            finished_at: millis_to_utc(row.get("finished_at"))?,
            sources_processed: row.get::<i64, _>("sources_processed") as usize,
            sources_failed: row.get::<i64, _>("sources_failed") as usize,
            entries_added: row.get::<i64, _>("entries_added") as usize,
            entries_confirmed: row.get::<i64, _>("entries_confirmed") as usize,
            chunks_failed: row.get::<i64, _>("chunks_failed") as usize,
            entries_retired: row.get::<i64, _>("entries_retired") as usize,
            cancelled: row.get::<i64, _>("cancelled") != 0,
            errors,
        }))
    }
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("invalid timestamp: {}", ms))
}

fn row_to_entry(row: &SqliteRow) -> Result<KnowledgeEntry> {
    let blob: Vec<u8> = row.get("embedding");
    let metadata_json: String = row.get("metadata_json");
    Ok(KnowledgeEntry {
        fingerprint: Fingerprint::from_hex(row.get::<String, _>("fingerprint")),
        embedding: blob_to_vec(&blob),
        text: row.get("text"),
        source_id: row.get("source_id"),
        metadata: serde_json::from_str(&metadata_json)
            .context("Corrupt metadata_json in knowledge_entries")?,
        first_seen_at: millis_to_utc(row.get("first_seen_at"))?,
        last_confirmed_at: millis_to_utc(row.get("last_confirmed_at"))?,
    })
}

#[async_trait]
impl KnowledgeStore for SqliteStore {
    async fn exists(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM knowledge_entries WHERE fingerprint = ?")
                .bind(fingerprint.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<KnowledgeEntry>> {
        let sql = format!(
            "SELECT {} FROM knowledge_entries WHERE fingerprint = ?",
            ENTRY_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(fingerprint.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_entry).transpose()
    }

    async fn upsert(&self, entry: &KnowledgeEntry) -> Result<UpsertOutcome> {
        let metadata_json = serde_json::to_string(&entry.metadata)?;
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO knowledge_entries (fingerprint, embedding, dims, text, source_id,
                                           metadata_json, first_seen_at, last_confirmed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(fingerprint) DO NOTHING
            "#,
        )
        .bind(entry.fingerprint.as_str())
        .bind(vec_to_blob(&entry.embedding))
        .bind(entry.embedding.len() as i64)
        .bind(&entry.text)
        .bind(&entry.source_id)
        .bind(&metadata_json)
        .bind(entry.first_seen_at.timestamp_millis())
        .bind(entry.last_confirmed_at.timestamp_millis())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let outcome = if inserted == 1 {
            UpsertOutcome::Inserted
        } else {
            sqlx::query(
                "UPDATE knowledge_entries SET last_confirmed_at = MAX(last_confirmed_at, ?) \
                 WHERE fingerprint = ?",
            )
            .bind(entry.last_confirmed_at.timestamp_millis())
            .bind(entry.fingerprint.as_str())
            .execute(&mut *tx)
            .await?;
            UpsertOutcome::Confirmed
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        metric: DistanceMetric,
    ) -> Result<Vec<KnowledgeEntry>> {
        if k == 0 || query.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM knowledge_entries WHERE dims = ?",
            ENTRY_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(query.len() as i64)
            .fetch_all(&self.pool)
            .await?;

        let candidates = rows
            .iter()
            .map(row_to_entry)
            .collect::<Result<Vec<_>>>()?;

        Ok(rank_entries(candidates, query, k, metric)
            .into_iter()
            .map(|(entry, _)| entry)
            .collect())
    }

    async fn retire(&self, unseen_before: DateTime<Utc>) -> Result<usize> {
        let removed = sqlx::query("DELETE FROM knowledge_entries WHERE last_confirmed_at < ?")
            .bind(unseen_before.timestamp_millis())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed as usize)
    }

    async fn list(&self) -> Result<Vec<KnowledgeEntry>> {
        let sql = format!(
            "SELECT {} FROM knowledge_entries ORDER BY fingerprint ASC",
            ENTRY_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_entry).collect()
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}

#[async_trait]
impl RefreshJournal for SqliteStore {
    async fn record(&self, report: &RefreshReport) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_runs (started_at, finished_at, sources_processed, sources_failed,
                                      entries_added, entries_confirmed, chunks_failed,
                                      entries_retired, cancelled, errors_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(report.started_at.timestamp_millis())
        .bind(report.finished_at.timestamp_millis())
        .bind(report.sources_processed as i64)
        .bind(report.sources_failed as i64)
        .bind(report.entries_added as i64)
        .bind(report.entries_confirmed as i64)
        .bind(report.chunks_failed as i64)
        .bind(report.entries_retired as i64)
        .bind(report.cancelled as i64)
        .bind(serde_json::to_string(&report.errors)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
