use anyhow::{Context, Result};
use commit_mirror_core::store::CommitStore;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::{Config, StoreBackend};
use crate::migrate;
use crate::postgres_store::PostgresCommitStore;
use crate::sqlite_store::SqliteCommitStore;

pub async fn connect_sqlite(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

pub async fn connect_postgres(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await
        .context("Failed to connect to the remote store")?;
    Ok(pool)
}

/// Open the selected backend, making sure the schema exists.
pub async fn open_store(config: &Config, backend: StoreBackend) -> Result<Arc<dyn CommitStore>> {
    match backend {
        StoreBackend::Local => {
            let pool = connect_sqlite(&config.store.path).await.with_context(|| {
                format!("Failed to open SQLite store at {}", config.store.path.display())
            })?;
            migrate::migrate_sqlite(&pool).await?;
            log::info!("Using local store at {}", config.store.path.display());
            Ok(Arc::new(SqliteCommitStore::new(pool)))
        }
        StoreBackend::Remote => {
            let pool = connect_postgres(&config.remote_url()?).await?;
            migrate::migrate_postgres(&pool).await?;
            log::info!("Using remote store");
            Ok(Arc::new(PostgresCommitStore::new(pool)))
        }
    }
}
