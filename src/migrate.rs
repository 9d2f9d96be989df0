use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema if it does not exist yet. Safe to run on every open.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_entries (
            fingerprint TEXT PRIMARY KEY,
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            text TEXT NOT NULL,
            source_id TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            first_seen_at INTEGER NOT NULL,
            last_confirmed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per finished refresh cycle.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS refresh_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at INTEGER NOT NULL,
            finished_at INTEGER NOT NULL,
            sources_processed INTEGER NOT NULL,
            sources_failed INTEGER NOT NULL,
            entries_added INTEGER NOT NULL,
            entries_confirmed INTEGER NOT NULL,
            chunks_failed INTEGER NOT NULL,
            entries_retired INTEGER NOT NULL,
            cancelled INTEGER NOT NULL DEFAULT 0,
            errors_json TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entries_last_confirmed ON knowledge_entries(last_confirmed_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_dims ON knowledge_entries(dims)")
        .execute(pool)
        .await?;

    Ok(())
}
