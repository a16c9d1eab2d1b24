//! In-memory [`CommitStore`] implementation for tests and dry runs.
//!
//! Records live in a `BTreeMap` keyed by sha behind `std::sync::RwLock`.
//! Boundary queries scan the project's records; fine for test-sized data.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::CommitRecord;

use super::CommitStore;

/// In-memory commit store.
pub struct InMemoryCommitStore {
    records: RwLock<BTreeMap<String, CommitRecord>>,
    rejected: RwLock<HashSet<String>>,
}

impl InMemoryCommitStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            rejected: RwLock::new(HashSet::new()),
        }
    }

    /// Make every future insert of `sha` fail, simulating a backend
    /// write error for that record.
    pub fn reject_inserts_of(&self, sha: &str) {
        self.rejected.write().unwrap().insert(sha.to_string());
    }

    /// Look up a stored record.
    pub fn get(&self, sha: &str) -> Option<CommitRecord> {
        self.records.read().unwrap().get(sha).cloned()
    }

    /// All stored shas, sorted.
    pub fn shas(&self) -> Vec<String> {
        self.records.read().unwrap().keys().cloned().collect()
    }

    /// Total records across all projects.
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dates_for(&self, project_id: &str) -> Vec<DateTime<Utc>> {
        self.records
            .read()
            .unwrap()
            .values()
            .filter(|r| r.project_id == project_id)
            .map(|r| r.committer_date)
            .collect()
    }
}

impl Default for InMemoryCommitStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommitStore for InMemoryCommitStore {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn exists(&self, sha: &str) -> Result<bool> {
        Ok(self.records.read().unwrap().contains_key(sha))
    }

    async fn count(&self, project_id: &str) -> Result<u64> {
        Ok(self.dates_for(project_id).len() as u64)
    }

    async fn oldest(&self, project_id: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.dates_for(project_id).into_iter().min())
    }

    async fn newest(&self, project_id: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.dates_for(project_id).into_iter().max())
    }

    async fn newest_before(
        &self,
        project_id: &str,
        boundary: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .dates_for(project_id)
            .into_iter()
            .filter(|d| *d < boundary)
            .max())
    }

    async fn insert(&self, record: &CommitRecord) -> Result<()> {
        if self.rejected.read().unwrap().contains(&record.sha) {
            bail!("write rejected for {}", record.sha);
        }
        let mut records = self.records.write().unwrap();
        if records.contains_key(&record.sha) {
            bail!("duplicate key: sha {} already stored", record.sha);
        }
        records.insert(record.sha.clone(), record.clone());
        Ok(())
    }
}
