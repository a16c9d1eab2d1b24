//! SQLite-backed [`CommitStore`] implementation.
//!
//! One row per commit in `commits`. `committer_date` is stored as fixed-width
//! `YYYY-MM-DDTHH:MM:SSZ` text, so `MIN`/`MAX` and `<` on the column follow
//! time order, and the `(project_id, committer_date)` index serves every
//! boundary query.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use commit_mirror_core::models::{format_ts, parse_ts, CommitRecord};
use commit_mirror_core::store::CommitStore;

/// SQLite implementation of the [`CommitStore`] trait.
pub struct SqliteCommitStore {
    pool: SqlitePool,
}

impl SqliteCommitStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Turn a stored `committer_date` value back into a timestamp.
pub(crate) fn parse_stored_date(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|s| parse_ts(&s).with_context(|| format!("corrupt committer_date in store: {}", s)))
        .transpose()
}

#[async_trait]
impl CommitStore for SqliteCommitStore {
    fn backend(&self) -> &str {
        "sqlite"
    }

    async fn exists(&self, sha: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM commits WHERE sha = ?")
            .bind(sha)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn count(&self, project_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM commits WHERE project_id = ?")
            .bind(project_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn oldest(&self, project_id: &str) -> Result<Option<DateTime<Utc>>> {
        let min: Option<String> =
            sqlx::query_scalar("SELECT MIN(committer_date) FROM commits WHERE project_id = ?")
                .bind(project_id)
                .fetch_one(&self.pool)
                .await?;
        parse_stored_date(min)
    }

    async fn newest(&self, project_id: &str) -> Result<Option<DateTime<Utc>>> {
        let max: Option<String> =
            sqlx::query_scalar("SELECT MAX(committer_date) FROM commits WHERE project_id = ?")
                .bind(project_id)
                .fetch_one(&self.pool)
                .await?;
        parse_stored_date(max)
    }

    async fn newest_before(
        &self,
        project_id: &str,
        boundary: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let max: Option<String> = sqlx::query_scalar(
            "SELECT MAX(committer_date) FROM commits WHERE project_id = ? AND committer_date < ?",
        )
        .bind(project_id)
        .bind(format_ts(&boundary))
        .fetch_one(&self.pool)
        .await?;
        parse_stored_date(max)
    }

    async fn insert(&self, record: &CommitRecord) -> Result<()> {
        let document = serde_json::to_string(&record.to_document())?;
        sqlx::query(
            r#"
            INSERT INTO commits (sha, project_id, committer_date, document, inserted_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.sha)
        .bind(&record.project_id)
        .bind(format_ts(&record.committer_date))
        .bind(&document)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert commit {}", record.sha))?;
        Ok(())
    }
}
