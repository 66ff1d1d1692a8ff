//! SQLite pool setup and schema management.
//!
//! The schema is applied idempotently on every open, so the database file is
//! created on first use and older files pick up new tables without a separate
//! migrate step.

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::error::{Error, Result};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sources (
        id TEXT PRIMARY KEY,
        source_type TEXT NOT NULL,
        repo TEXT NOT NULL,
        url TEXT NOT NULL,
        title TEXT NOT NULL DEFAULT '',
        raw_content TEXT NOT NULL DEFAULT '',
        fetched_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS decisions (
        id TEXT PRIMARY KEY,
        source_id TEXT NOT NULL REFERENCES sources(id),
        summary TEXT NOT NULL,
        reasoning TEXT NOT NULL DEFAULT '',
        alternatives TEXT NOT NULL DEFAULT '[]',
        confidence TEXT NOT NULL DEFAULT 'medium',
        decision_date TEXT NOT NULL DEFAULT '',
        extracted_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS decision_entities (
        decision_id TEXT NOT NULL REFERENCES decisions(id),
        entity TEXT NOT NULL,
        entity_type TEXT NOT NULL DEFAULT '',
        PRIMARY KEY (decision_id, entity)
    )",
    "CREATE TABLE IF NOT EXISTS learnings (
        id TEXT PRIMARY KEY,
        source_id TEXT NOT NULL REFERENCES sources(id),
        category TEXT NOT NULL,
        summary TEXT NOT NULL,
        detail TEXT NOT NULL DEFAULT '',
        components TEXT NOT NULL DEFAULT '[]',
        session_date TEXT NOT NULL DEFAULT '',
        extracted_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS learning_entities (
        learning_id TEXT NOT NULL REFERENCES learnings(id),
        entity TEXT NOT NULL,
        entity_type TEXT NOT NULL DEFAULT '',
        PRIMARY KEY (learning_id, entity)
    )",
    "CREATE TABLE IF NOT EXISTS run_locks (
        name TEXT PRIMARY KEY,
        pid INTEGER NOT NULL,
        acquired_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_decisions_source ON decisions(source_id)",
    "CREATE INDEX IF NOT EXISTS idx_decision_entities_entity ON decision_entities(entity)",
    "CREATE INDEX IF NOT EXISTS idx_learnings_source ON learnings(source_id)",
    "CREATE INDEX IF NOT EXISTS idx_learning_entities_entity ON learning_entities(entity)",
    "CREATE INDEX IF NOT EXISTS idx_sources_repo ON sources(repo)",
];

// External-content FTS tables need triggers to stay in sync; plain tables
// with UNINDEXED id columns keep the write path a simple delete + insert in
// the same transaction as the row itself.
const DECISIONS_FTS: &str = "CREATE VIRTUAL TABLE decisions_fts USING fts5(
    decision_id UNINDEXED,
    summary,
    reasoning,
    alternatives
)";

const LEARNINGS_FTS: &str = "CREATE VIRTUAL TABLE learnings_fts USING fts5(
    learning_id UNINDEXED,
    summary,
    detail,
    components
)";

/// Open (creating if needed) the database at `path` and apply the schema.
pub async fn open_pool(path: &Path) -> Result<SqlitePool> {
    let url = format!("sqlite://{}", path.display());
    let options = SqliteConnectOptions::from_str(&url)
        .map_err(|e| Error::StoreCorrupt {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .map_err(|e| Error::StoreCorrupt {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

    apply_schema(&pool).await.map_err(|e| Error::StoreCorrupt {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    Ok(pool)
}

async fn apply_schema(pool: &SqlitePool) -> std::result::Result<(), sqlx::Error> {
    for stmt in SCHEMA {
        sqlx::query(stmt).execute(pool).await?;
    }
    ensure_fts(pool, "decisions_fts", DECISIONS_FTS).await?;
    ensure_fts(pool, "learnings_fts", LEARNINGS_FTS).await?;
    Ok(())
}

// FTS5 virtual tables do not support CREATE IF NOT EXISTS on all SQLite
// builds, so check sqlite_master first.
async fn ensure_fts(
    pool: &SqlitePool,
    name: &str,
    create: &str,
) -> std::result::Result<(), sqlx::Error> {
    let exists: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(name)
            .fetch_optional(pool)
            .await?;
    if exists.is_none() {
        sqlx::query(create).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_file_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let pool = open_pool(&path).await.unwrap();
        assert!(path.exists());

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM decisions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let pool = open_pool(&path).await.unwrap();
        sqlx::query("INSERT INTO sources (id, source_type, repo, url, fetched_at) VALUES ('manual:x', 'manual', 'a/b', '', '2026-01-01T00:00:00Z')")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let pool = open_pool(&path).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sources")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
