//! Data access layer over the SQLite database.
//!
//! All writes that touch a decision or learning also rewrite its FTS row in
//! the same transaction, so the index can never drift from the base table.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::db;
use crate::error::{Error, Result};
use crate::models::{
    Confidence, Decision, DecisionWithSource, Entity, Learning, LearningCategory,
    LearningWithSource, Source, SourceType,
};

/// A stale extraction lock is reclaimed after this long.
const LOCK_TTL_HOURS: i64 = 1;

const DECISION_SELECT: &str = "
    SELECT d.id, d.source_id, d.summary, d.reasoning, d.alternatives,
           d.confidence, d.decision_date, d.extracted_at,
           s.url AS source_url, s.title AS source_title, s.source_type
    FROM decisions d
    JOIN sources s ON d.source_id = s.id
";

const LEARNING_SELECT: &str = "
    SELECT l.id, l.source_id, l.category, l.summary, l.detail, l.components,
           l.session_date, l.extracted_at,
           s.url AS source_url, s.title AS source_title, s.source_type
    FROM learnings l
    JOIN sources s ON l.source_id = s.id
";

pub struct Store {
    pool: SqlitePool,
    path: PathBuf,
}

impl Store {
    /// Open the database at `path`, creating it with the full schema if it
    /// does not exist yet.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::open_pool(path).await?;
        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    /// Open only if the database file already exists. Used by read paths that
    /// should tell the user to run `extract` instead of silently creating an
    /// empty store.
    pub async fn open_existing(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "no database at {}; run 'setkontext extract' first",
                path.display()
            )));
        }
        Self::open(path).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ── sources ─────────────────────────────────────────────────────

    pub async fn save_source(&self, source: &Source) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO sources
             (id, source_type, repo, url, title, raw_content, fetched_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&source.id)
        .bind(source.source_type.as_str())
        .bind(&source.repo)
        .bind(&source.url)
        .bind(&source.title)
        .bind(&source.raw_content)
        .bind(source.fetched_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_source(&self, id: &str) -> Result<Option<Source>> {
        let row = sqlx::query(
            "SELECT id, source_type, repo, url, title, raw_content, fetched_at
             FROM sources WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_source(&r)).transpose()
    }

    /// Delete all decisions and learnings previously extracted from a source,
    /// along with their entity and FTS rows. Called before re-ingesting the
    /// same source so re-extraction replaces rather than accumulates.
    pub async fn clear_source_records(&self, source_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM decision_entities WHERE decision_id IN
             (SELECT id FROM decisions WHERE source_id = ?)",
        )
        .bind(source_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM decisions_fts WHERE decision_id IN
             (SELECT id FROM decisions WHERE source_id = ?)",
        )
        .bind(source_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM decisions WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "DELETE FROM learning_entities WHERE learning_id IN
             (SELECT id FROM learnings WHERE source_id = ?)",
        )
        .bind(source_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM learnings_fts WHERE learning_id IN
             (SELECT id FROM learnings WHERE source_id = ?)",
        )
        .bind(source_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM learnings WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // ── decisions ───────────────────────────────────────────────────

    pub async fn save_decision(&self, decision: &Decision) -> Result<()> {
        let alternatives = serde_json::to_string(&decision.alternatives)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT OR REPLACE INTO decisions
             (id, source_id, summary, reasoning, alternatives, confidence, decision_date, extracted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&decision.id)
        .bind(&decision.source_id)
        .bind(&decision.summary)
        .bind(&decision.reasoning)
        .bind(&alternatives)
        .bind(decision.confidence.as_str())
        .bind(&decision.decision_date)
        .bind(decision.extracted_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM decision_entities WHERE decision_id = ?")
            .bind(&decision.id)
            .execute(&mut *tx)
            .await?;
        for entity in &decision.entities {
            sqlx::query(
                "INSERT OR IGNORE INTO decision_entities (decision_id, entity, entity_type)
                 VALUES (?, ?, ?)",
            )
            .bind(&decision.id)
            .bind(&entity.name)
            .bind(&entity.entity_type)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM decisions_fts WHERE decision_id = ?")
            .bind(&decision.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO decisions_fts (decision_id, summary, reasoning, alternatives)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&decision.id)
        .bind(&decision.summary)
        .bind(&decision.reasoning)
        .bind(decision.alternatives.join(" "))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_decision(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM decision_entities WHERE decision_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM decisions_fts WHERE decision_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM decisions WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_all_decisions(&self, limit: i64) -> Result<Vec<DecisionWithSource>> {
        let sql = format!("{DECISION_SELECT} ORDER BY d.extracted_at DESC LIMIT ?");
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        self.hydrate_decisions(rows).await
    }

    pub async fn get_decisions_by_entity(&self, entity: &str) -> Result<Vec<DecisionWithSource>> {
        let sql = format!(
            "{DECISION_SELECT}
             JOIN decision_entities de ON d.id = de.decision_id
             WHERE LOWER(de.entity) = LOWER(?)
             ORDER BY d.extracted_at DESC"
        );
        let rows = sqlx::query(&sql).bind(entity).fetch_all(&self.pool).await?;
        self.hydrate_decisions(rows).await
    }

    /// Full-text search across summaries, reasoning, and alternatives.
    /// `query` must already be a valid FTS5 match expression.
    pub async fn search_decisions(
        &self,
        query: &str,
        limit: i64,
    ) -> Result<Vec<DecisionWithSource>> {
        let sql = format!(
            "{DECISION_SELECT}
             JOIN decisions_fts fts ON d.id = fts.decision_id
             WHERE decisions_fts MATCH ?
             ORDER BY rank
             LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        self.hydrate_decisions(rows).await
    }

    /// All distinct entities with the number of decisions referencing each,
    /// most-referenced first.
    pub async fn get_entities(&self) -> Result<Vec<(Entity, i64)>> {
        let rows = sqlx::query(
            "SELECT entity, entity_type, COUNT(*) AS decision_count
             FROM decision_entities
             GROUP BY entity, entity_type
             ORDER BY decision_count DESC, entity",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                (
                    Entity::new(r.get::<String, _>("entity"), r.get::<String, _>("entity_type")),
                    r.get::<i64, _>("decision_count"),
                )
            })
            .collect())
    }

    async fn hydrate_decisions(&self, rows: Vec<SqliteRow>) -> Result<Vec<DecisionWithSource>> {
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut decision = row_to_decision(&row)?;
            decision.entities = self.decision_entities(&decision.id).await?;
            out.push(DecisionWithSource {
                decision,
                source_url: row.get("source_url"),
                source_title: row.get("source_title"),
                source_type: parse_source_type(&row.get::<String, _>("source_type"))?,
            });
        }
        Ok(out)
    }

    async fn decision_entities(&self, decision_id: &str) -> Result<Vec<Entity>> {
        let rows = sqlx::query(
            "SELECT entity, entity_type FROM decision_entities WHERE decision_id = ? ORDER BY entity",
        )
        .bind(decision_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Entity::new(r.get::<String, _>("entity"), r.get::<String, _>("entity_type")))
            .collect())
    }

    // ── learnings ───────────────────────────────────────────────────

    pub async fn save_learning(&self, learning: &Learning) -> Result<()> {
        let components = serde_json::to_string(&learning.components)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT OR REPLACE INTO learnings
             (id, source_id, category, summary, detail, components, session_date, extracted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&learning.id)
        .bind(&learning.source_id)
        .bind(learning.category.as_str())
        .bind(&learning.summary)
        .bind(&learning.detail)
        .bind(&components)
        .bind(&learning.session_date)
        .bind(learning.extracted_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM learning_entities WHERE learning_id = ?")
            .bind(&learning.id)
            .execute(&mut *tx)
            .await?;
        for entity in &learning.entities {
            sqlx::query(
                "INSERT OR IGNORE INTO learning_entities (learning_id, entity, entity_type)
                 VALUES (?, ?, ?)",
            )
            .bind(&learning.id)
            .bind(&entity.name)
            .bind(&entity.entity_type)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM learnings_fts WHERE learning_id = ?")
            .bind(&learning.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO learnings_fts (learning_id, summary, detail, components)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&learning.id)
        .bind(&learning.summary)
        .bind(&learning.detail)
        .bind(learning.components.join(" "))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn search_learnings(
        &self,
        query: &str,
        category: Option<LearningCategory>,
        limit: i64,
    ) -> Result<Vec<LearningWithSource>> {
        let sql = match category {
            Some(_) => format!(
                "{LEARNING_SELECT}
                 JOIN learnings_fts fts ON l.id = fts.learning_id
                 WHERE learnings_fts MATCH ? AND l.category = ?
                 ORDER BY rank
                 LIMIT ?"
            ),
            None => format!(
                "{LEARNING_SELECT}
                 JOIN learnings_fts fts ON l.id = fts.learning_id
                 WHERE learnings_fts MATCH ?
                 ORDER BY rank
                 LIMIT ?"
            ),
        };
        let mut q = sqlx::query(&sql).bind(query);
        if let Some(cat) = category {
            q = q.bind(cat.as_str());
        }
        let rows = q.bind(limit).fetch_all(&self.pool).await?;
        self.hydrate_learnings(rows).await
    }

    pub async fn get_recent_learnings(
        &self,
        category: Option<LearningCategory>,
        limit: i64,
    ) -> Result<Vec<LearningWithSource>> {
        let sql = match category {
            Some(_) => format!(
                "{LEARNING_SELECT} WHERE l.category = ? ORDER BY l.extracted_at DESC LIMIT ?"
            ),
            None => format!("{LEARNING_SELECT} ORDER BY l.extracted_at DESC LIMIT ?"),
        };
        let mut q = sqlx::query(&sql);
        if let Some(cat) = category {
            q = q.bind(cat.as_str());
        }
        let rows = q.bind(limit).fetch_all(&self.pool).await?;
        self.hydrate_learnings(rows).await
    }

    pub async fn get_learnings_by_entity(&self, entity: &str) -> Result<Vec<LearningWithSource>> {
        let sql = format!(
            "{LEARNING_SELECT}
             JOIN learning_entities le ON l.id = le.learning_id
             WHERE LOWER(le.entity) = LOWER(?)
             ORDER BY l.extracted_at DESC"
        );
        let rows = sqlx::query(&sql).bind(entity).fetch_all(&self.pool).await?;
        self.hydrate_learnings(rows).await
    }

    async fn hydrate_learnings(&self, rows: Vec<SqliteRow>) -> Result<Vec<LearningWithSource>> {
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut learning = row_to_learning(&row)?;
            learning.entities = self.learning_entities(&learning.id).await?;
            out.push(LearningWithSource {
                learning,
                source_url: row.get("source_url"),
                source_title: row.get("source_title"),
                source_type: parse_source_type(&row.get::<String, _>("source_type"))?,
            });
        }
        Ok(out)
    }

    async fn learning_entities(&self, learning_id: &str) -> Result<Vec<Entity>> {
        let rows = sqlx::query(
            "SELECT entity, entity_type FROM learning_entities WHERE learning_id = ? ORDER BY entity",
        )
        .bind(learning_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Entity::new(r.get::<String, _>("entity"), r.get::<String, _>("entity_type")))
            .collect())
    }

    // ── stats ───────────────────────────────────────────────────────

    pub async fn get_stats(&self) -> Result<StoreStats> {
        let count = |sql: &'static str| async move {
            let (n,): (i64,) = sqlx::query_as(sql).fetch_one(&self.pool).await?;
            Ok::<i64, Error>(n)
        };

        let mut by_source_type = Vec::new();
        for st in ["adr", "pr", "doc", "session", "manual"] {
            let (n,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM sources WHERE source_type = ?")
                    .bind(st)
                    .fetch_one(&self.pool)
                    .await?;
            by_source_type.push((st.to_string(), n));
        }

        let mut learnings_by_category = Vec::new();
        for cat in ["bug_fix", "gotcha", "implementation"] {
            let (n,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM learnings WHERE category = ?")
                    .bind(cat)
                    .fetch_one(&self.pool)
                    .await?;
            learnings_by_category.push((cat.to_string(), n));
        }

        Ok(StoreStats {
            total_sources: count("SELECT COUNT(*) FROM sources").await?,
            total_decisions: count("SELECT COUNT(*) FROM decisions").await?,
            total_learnings: count("SELECT COUNT(*) FROM learnings").await?,
            unique_entities: count("SELECT COUNT(DISTINCT entity) FROM decision_entities").await?,
            by_source_type,
            learnings_by_category,
        })
    }

    // ── run lock ────────────────────────────────────────────────────

    /// Take the named run lock, reclaiming it if the holder's row is older
    /// than the TTL. Acquisition is a single conditional insert so two
    /// simultaneous callers cannot both win: the loser sees zero rows
    /// affected and gets [`Error::RunLocked`].
    pub async fn acquire_lock(&self, name: &str) -> Result<()> {
        let now = Utc::now();
        let pid = std::process::id() as i64;
        let stale_cutoff = (now - Duration::hours(LOCK_TTL_HOURS)).to_rfc3339();

        // timestamps are written by us in RFC 3339 UTC, so they compare
        // lexicographically
        sqlx::query("DELETE FROM run_locks WHERE name = ? AND acquired_at < ?")
            .bind(name)
            .bind(&stale_cutoff)
            .execute(&self.pool)
            .await?;

        let inserted = sqlx::query(
            "INSERT INTO run_locks (name, pid, acquired_at) VALUES (?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(pid)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            let holder: i64 =
                sqlx::query("SELECT pid FROM run_locks WHERE name = ?")
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await?
                    .map(|row| row.get("pid"))
                    .unwrap_or_default();
            return Err(Error::RunLocked(holder));
        }
        Ok(())
    }

    pub async fn release_lock(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM run_locks WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Summary counts shown by `setkontext stats`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub total_sources: i64,
    pub total_decisions: i64,
    pub total_learnings: i64,
    pub unique_entities: i64,
    pub by_source_type: Vec<(String, i64)>,
    pub learnings_by_category: Vec<(String, i64)>,
}

fn parse_source_type(s: &str) -> Result<SourceType> {
    SourceType::parse(s).ok_or_else(|| Error::Config(format!("unknown source type '{s}' in store")))
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_source(row: &SqliteRow) -> Result<Source> {
    Ok(Source {
        id: row.get("id"),
        source_type: parse_source_type(&row.get::<String, _>("source_type"))?,
        repo: row.get("repo"),
        url: row.get("url"),
        title: row.get("title"),
        raw_content: row.get("raw_content"),
        fetched_at: parse_timestamp(&row.get::<String, _>("fetched_at")),
    })
}

fn row_to_decision(row: &SqliteRow) -> Result<Decision> {
    let alternatives: Vec<String> =
        serde_json::from_str(&row.get::<String, _>("alternatives")).unwrap_or_default();
    let confidence =
        Confidence::parse(&row.get::<String, _>("confidence")).unwrap_or(Confidence::Medium);
    Ok(Decision {
        id: row.get("id"),
        source_id: row.get("source_id"),
        summary: row.get("summary"),
        reasoning: row.get("reasoning"),
        alternatives,
        entities: Vec::new(),
        confidence,
        decision_date: row.get("decision_date"),
        extracted_at: parse_timestamp(&row.get::<String, _>("extracted_at")),
    })
}

fn row_to_learning(row: &SqliteRow) -> Result<Learning> {
    let components: Vec<String> =
        serde_json::from_str(&row.get::<String, _>("components")).unwrap_or_default();
    let category = LearningCategory::parse(&row.get::<String, _>("category"))
        .ok_or_else(|| Error::Config(format!(
            "unknown learning category '{}' in store",
            row.get::<String, _>("category")
        )))?;
    Ok(Learning {
        id: row.get("id"),
        source_id: row.get("source_id"),
        category,
        summary: row.get("summary"),
        detail: row.get("detail"),
        components,
        entities: Vec::new(),
        session_date: row.get("session_date"),
        extracted_at: parse_timestamp(&row.get::<String, _>("extracted_at")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Decision, Entity, Learning, LearningCategory, Source, SourceType};

    async fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.db")).await.unwrap();
        (dir, store)
    }

    fn sample_source(id: &str, source_type: SourceType) -> Source {
        Source {
            id: id.to_string(),
            source_type,
            repo: "acme/widgets".to_string(),
            url: format!("https://github.com/acme/widgets/{id}"),
            title: format!("title for {id}"),
            raw_content: "raw".to_string(),
            fetched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn decision_round_trip_with_entities() {
        let (_dir, store) = test_store().await;
        store
            .save_source(&sample_source("adr:docs/adr/001.md", SourceType::Adr))
            .await
            .unwrap();

        let mut decision = Decision::new("adr:docs/adr/001.md", "Use SQLite for storage");
        decision.reasoning = "Zero ops burden and a single-file deploy".to_string();
        decision.alternatives = vec!["PostgreSQL".to_string()];
        decision.entities = vec![
            Entity::new("sqlite", "technology"),
            Entity::new("postgresql", "technology"),
        ];
        store.save_decision(&decision).await.unwrap();

        let all = store.get_all_decisions(10).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].decision.summary, "Use SQLite for storage");
        assert_eq!(all[0].decision.entities.len(), 2);
        assert_eq!(all[0].source_type, SourceType::Adr);

        let by_entity = store.get_decisions_by_entity("SQLite").await.unwrap();
        assert_eq!(by_entity.len(), 1);
    }

    #[tokio::test]
    async fn fts_search_finds_decision_and_stays_in_sync() {
        let (_dir, store) = test_store().await;
        store
            .save_source(&sample_source("pr:42", SourceType::Pr))
            .await
            .unwrap();

        let mut decision = Decision::new("pr:42", "Adopt connection pooling for the API layer");
        decision.reasoning = "Connection churn was saturating the database".to_string();
        store.save_decision(&decision).await.unwrap();

        let hits = store.search_decisions("pooling", 10).await.unwrap();
        assert_eq!(hits.len(), 1);

        store.delete_decision(&decision.id).await.unwrap();
        let hits = store.search_decisions("pooling", 10).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn re_saving_same_decision_id_does_not_duplicate_fts() {
        let (_dir, store) = test_store().await;
        store
            .save_source(&sample_source("doc:docs/arch.md", SourceType::Doc))
            .await
            .unwrap();

        let mut decision = Decision::new("doc:docs/arch.md", "Cache rendering output in Redis");
        store.save_decision(&decision).await.unwrap();
        decision.summary = "Cache rendered pages in Redis".to_string();
        store.save_decision(&decision).await.unwrap();

        let hits = store.search_decisions("redis", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].decision.summary, "Cache rendered pages in Redis");
    }

    #[tokio::test]
    async fn clear_source_records_removes_everything_for_that_source() {
        let (_dir, store) = test_store().await;
        store
            .save_source(&sample_source("pr:1", SourceType::Pr))
            .await
            .unwrap();
        store
            .save_source(&sample_source("pr:2", SourceType::Pr))
            .await
            .unwrap();

        let mut d1 = Decision::new("pr:1", "Use rustls instead of openssl");
        d1.entities = vec![Entity::new("rustls", "library")];
        store.save_decision(&d1).await.unwrap();
        let d2 = Decision::new("pr:2", "Pin the toolchain in CI");
        store.save_decision(&d2).await.unwrap();

        store.clear_source_records("pr:1").await.unwrap();

        let all = store.get_all_decisions(10).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].decision.source_id, "pr:2");
        assert!(store.search_decisions("rustls", 10).await.unwrap().is_empty());
        assert!(store.get_entities().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn learning_search_filters_by_category() {
        let (_dir, store) = test_store().await;
        store
            .save_source(&sample_source("manual:abc12345", SourceType::Manual))
            .await
            .unwrap();

        let mut bug = Learning::new(
            "manual:abc12345",
            LearningCategory::BugFix,
            "Retry loop dropped the final attempt",
        );
        bug.components = vec!["fetcher".to_string()];
        store.save_learning(&bug).await.unwrap();

        let gotcha = Learning::new(
            "manual:abc12345",
            LearningCategory::Gotcha,
            "Retry backoff caps at 32 seconds",
        );
        store.save_learning(&gotcha).await.unwrap();

        let all = store.search_learnings("retry", None, 10).await.unwrap();
        assert_eq!(all.len(), 2);

        let bugs = store
            .search_learnings("retry", Some(LearningCategory::BugFix), 10)
            .await
            .unwrap();
        assert_eq!(bugs.len(), 1);
        assert_eq!(bugs[0].learning.category, LearningCategory::BugFix);
    }

    #[tokio::test]
    async fn lock_blocks_second_acquire_and_releases() {
        let (_dir, store) = test_store().await;
        store.acquire_lock("extract").await.unwrap();
        match store.acquire_lock("extract").await {
            Err(Error::RunLocked(pid)) => assert_eq!(pid, std::process::id() as i64),
            other => panic!("expected RunLocked, got {other:?}"),
        }
        store.release_lock("extract").await.unwrap();
        store.acquire_lock("extract").await.unwrap();
    }

    #[tokio::test]
    async fn stale_lock_is_reclaimed() {
        let (_dir, store) = test_store().await;
        let old = (Utc::now() - Duration::hours(LOCK_TTL_HOURS + 1)).to_rfc3339();
        sqlx::query("INSERT INTO run_locks (name, pid, acquired_at) VALUES ('extract', 999, ?)")
            .bind(&old)
            .execute(store.pool())
            .await
            .unwrap();

        store.acquire_lock("extract").await.unwrap();

        // a fresh row now holds our pid, not the stale holder's
        match store.acquire_lock("extract").await {
            Err(Error::RunLocked(pid)) => assert_eq!(pid, std::process::id() as i64),
            other => panic!("expected RunLocked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stats_counts_by_type() {
        let (_dir, store) = test_store().await;
        store
            .save_source(&sample_source("adr:docs/adr/001.md", SourceType::Adr))
            .await
            .unwrap();
        store
            .save_source(&sample_source("pr:7", SourceType::Pr))
            .await
            .unwrap();
        let d = Decision::new("pr:7", "Something");
        store.save_decision(&d).await.unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_sources, 2);
        assert_eq!(stats.total_decisions, 1);
        let adr = stats
            .by_source_type
            .iter()
            .find(|(t, _)| t == "adr")
            .unwrap();
        assert_eq!(adr.1, 1);
    }
}
