//! PostgreSQL-backed [`CommitStore`], the remote counterpart of
//! [`SqliteCommitStore`](crate::sqlite_store::SqliteCommitStore).
//!
//! Same table layout and the same fixed-width date text, so both backends
//! answer boundary queries identically.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use commit_mirror_core::models::{format_ts, CommitRecord};
use commit_mirror_core::store::CommitStore;

use crate::sqlite_store::parse_stored_date;

pub struct PostgresCommitStore {
    pool: PgPool,
}

impl PostgresCommitStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CommitStore for PostgresCommitStore {
    fn backend(&self) -> &str {
        "postgres"
    }

    async fn exists(&self, sha: &str) -> Result<bool> {
        let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM commits WHERE sha = $1")
            .bind(sha)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn count(&self, project_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM commits WHERE project_id = $1")
            .bind(project_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn oldest(&self, project_id: &str) -> Result<Option<DateTime<Utc>>> {
        let min: Option<String> =
            sqlx::query_scalar("SELECT MIN(committer_date) FROM commits WHERE project_id = $1")
                .bind(project_id)
                .fetch_one(&self.pool)
                .await?;
        parse_stored_date(min)
    }

    async fn newest(&self, project_id: &str) -> Result<Option<DateTime<Utc>>> {
        let max: Option<String> =
            sqlx::query_scalar("SELECT MAX(committer_date) FROM commits WHERE project_id = $1")
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
            "SELECT MAX(committer_date) FROM commits WHERE project_id = $1 AND committer_date < $2",
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
            VALUES ($1, $2, $3, $4, $5)
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
