//! Storage abstraction for mirrored commits.
//!
//! The [`CommitStore`] trait is the only view the ingestion controller has
//! of the document store. Resumption position is never kept anywhere else:
//! the boundary queries below are the sole source of "where to continue".
//!
//! Implementations must be `Send + Sync`; enrichment workers share one
//! store handle.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::CommitRecord;

/// Abstract commit store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`exists`](CommitStore::exists) | Point lookup by sha, used before spending a detail fetch |
/// | [`count`](CommitStore::count) | Records stored for a project, for progress output |
/// | [`oldest`](CommitStore::oldest) | Minimum `committer_date` for a project |
/// | [`newest`](CommitStore::newest) | Maximum `committer_date` for a project |
/// | [`newest_before`](CommitStore::newest_before) | Maximum `committer_date` strictly before a boundary |
/// | [`insert`](CommitStore::insert) | Persist one enriched record |
#[async_trait]
pub trait CommitStore: Send + Sync {
    /// Short backend label for log lines (e.g. `"sqlite"`).
    fn backend(&self) -> &str;

    /// Whether a record with this sha is already stored.
    async fn exists(&self, sha: &str) -> Result<bool>;

    /// Number of records stored for `project_id`.
    async fn count(&self, project_id: &str) -> Result<u64>;

    /// Earliest stored `committer_date` for `project_id`.
    async fn oldest(&self, project_id: &str) -> Result<Option<DateTime<Utc>>>;

    /// Latest stored `committer_date` for `project_id`.
    async fn newest(&self, project_id: &str) -> Result<Option<DateTime<Utc>>>;

    /// Latest stored `committer_date` for `project_id` that is strictly
    /// earlier than `boundary`.
    async fn newest_before(
        &self,
        project_id: &str,
        boundary: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Insert a record.
    ///
    /// Fails when the sha is already present or the backend rejects the
    /// write. Callers treat the failure as per-record, not fatal.
    async fn insert(&self, record: &CommitRecord) -> Result<()>;
}
