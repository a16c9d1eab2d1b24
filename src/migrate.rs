use anyhow::Result;
use sqlx::{PgPool, SqlitePool};

use crate::config::{Config, StoreBackend};
use crate::db;

/// Create the `commits` table and its range index if they don't exist.
pub async fn migrate_sqlite(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS commits (
            sha TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            committer_date TEXT NOT NULL,
            document TEXT NOT NULL,
            inserted_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_commits_project_date ON commits(project_id, committer_date)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn migrate_postgres(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS commits (
            sha TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            committer_date TEXT NOT NULL,
            document TEXT NOT NULL,
            inserted_at BIGINT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_commits_project_date ON commits(project_id, committer_date)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn run_migrations(config: &Config, backend: StoreBackend) -> Result<()> {
    match backend {
        StoreBackend::Local => {
            let pool = db::connect_sqlite(&config.store.path).await?;
            migrate_sqlite(&pool).await?;
            pool.close().await;
        }
        StoreBackend::Remote => {
            let pool = db::connect_postgres(&config.remote_url()?).await?;
            migrate_postgres(&pool).await?;
            pool.close().await;
        }
    }
    Ok(())
}
