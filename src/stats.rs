//! Store statistics.
//!
//! A quick summary of what is mirrored for the configured project: record
//! count and the date range covered. Used by `cmirror stats` and shown by
//! the menu before each action.

use anyhow::Result;
use chrono::{DateTime, Utc};
use commit_mirror_core::models::format_ts;
use commit_mirror_core::store::CommitStore;

use crate::progress::format_number;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub backend: String,
    pub project_id: String,
    pub count: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

impl StoreStats {
    pub async fn collect(store: &dyn CommitStore, project_id: &str) -> Result<Self> {
        Ok(Self {
            backend: store.backend().to_string(),
            project_id: project_id.to_string(),
            count: store.count(project_id).await?,
            oldest: store.oldest(project_id).await?,
            newest: store.newest(project_id).await?,
        })
    }

    pub fn render(&self) -> String {
        let date = |ts: &Option<DateTime<Utc>>| match ts {
            Some(ts) => format_ts(ts),
            None => "-".to_string(),
        };
        format!(
            "Commit Mirror Store Stats\n\
             =========================\n\n  \
             Backend:   {}\n  \
             Project:   {}\n  \
             Commits:   {}\n  \
             Oldest:    {}\n  \
             Newest:    {}\n",
            self.backend,
            self.project_id,
            format_number(self.count),
            date(&self.oldest),
            date(&self.newest)
        )
    }
}

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(store: &dyn CommitStore, project_id: &str) -> Result<()> {
    let stats = StoreStats::collect(store, project_id).await?;
    println!("{}", stats.render());
    Ok(())
}
