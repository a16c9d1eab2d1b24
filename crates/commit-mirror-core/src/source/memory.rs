//! In-memory [`CommitSource`] for tests and offline replay.
//!
//! Holds a fixed commit history and serves it with the same shape as the
//! hosted API: listing pages newest first, filtered by window, with detail
//! records carrying `files` and `stats`. Individual details or listing
//! pages can be made to fail, and every call is recorded for assertions.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::models::{format_ts, CommitRecord, CommitSummary, Window};

use super::{CommitSource, Outcome, SkipReason, DEFAULT_ESTIMATE};

/// A listing call as received by [`InMemorySource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingCall {
    pub window: Window,
    pub page: u32,
    pub per_page: u32,
}

/// In-memory upstream.
pub struct InMemorySource {
    project_id: String,
    commits: RwLock<Vec<(DateTime<Utc>, String)>>,
    failing_details: RwLock<HashMap<String, SkipReason>>,
    failing_pages: RwLock<HashSet<u32>>,
    listings: Mutex<Vec<ListingCall>>,
    details: Mutex<Vec<String>>,
}

impl InMemorySource {
    pub fn new(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            commits: RwLock::new(Vec::new()),
            failing_details: RwLock::new(HashMap::new()),
            failing_pages: RwLock::new(HashSet::new()),
            listings: Mutex::new(Vec::new()),
            details: Mutex::new(Vec::new()),
        }
    }

    /// Add a commit to the upstream history.
    pub fn push_commit(&self, sha: &str, committer_date: DateTime<Utc>) {
        let mut commits = self.commits.write().unwrap();
        commits.push((committer_date, sha.to_string()));
        // Newest first, sha as tie-break so paging is stable.
        commits.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    }

    /// Make the detail fetch for `sha` skip with `reason`.
    pub fn fail_detail(&self, sha: &str, reason: SkipReason) {
        self.failing_details
            .write()
            .unwrap()
            .insert(sha.to_string(), reason);
    }

    /// Make listing page `page` (in any window) skip as exhausted.
    pub fn fail_listing_page(&self, page: u32) {
        self.failing_pages.write().unwrap().insert(page);
    }

    /// Every listing call received so far, in order.
    pub fn listing_calls(&self) -> Vec<ListingCall> {
        self.listings.lock().unwrap().clone()
    }

    /// Every sha whose detail was requested, in order.
    pub fn detail_requests(&self) -> Vec<String> {
        self.details.lock().unwrap().clone()
    }

    fn detail_url(&self, sha: &str) -> String {
        format!("memory://{}/commits/{}", self.project_id, sha)
    }

    fn commit_payload(&self, sha: &str, date: &DateTime<Utc>) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("sha".into(), json!(sha));
        payload.insert("url".into(), json!(self.detail_url(sha)));
        payload.insert(
            "commit".into(),
            json!({
                "message": format!("commit {}", sha),
                "committer": { "name": "mirror", "date": format_ts(date) },
            }),
        );
        payload
    }

    fn in_window(&self, window: &Window) -> Vec<(DateTime<Utc>, String)> {
        self.commits
            .read()
            .unwrap()
            .iter()
            .filter(|(date, _)| window.contains(date))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CommitSource for InMemorySource {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn list_page(
        &self,
        window: &Window,
        page: u32,
        per_page: u32,
    ) -> Outcome<Vec<CommitSummary>> {
        self.listings.lock().unwrap().push(ListingCall {
            window: *window,
            page,
            per_page,
        });

        if self.failing_pages.read().unwrap().contains(&page) {
            return Outcome::Skipped(SkipReason::Exhausted {
                attempts: 3,
                last_error: format!("listing page {} unavailable", page),
            });
        }

        let start = (page.saturating_sub(1) as usize) * per_page as usize;
        let summaries = self
            .in_window(window)
            .into_iter()
            .skip(start)
            .take(per_page as usize)
            .map(|(date, sha)| CommitSummary {
                url: self.detail_url(&sha),
                payload: Value::Object(self.commit_payload(&sha, &date)),
                sha,
            })
            .collect();
        Outcome::Fetched(summaries)
    }

    async fn fetch_detail(&self, summary: &CommitSummary) -> Outcome<CommitRecord> {
        self.details.lock().unwrap().push(summary.sha.clone());

        if let Some(reason) = self.failing_details.read().unwrap().get(&summary.sha) {
            return Outcome::Skipped(reason.clone());
        }

        let found = self
            .commits
            .read()
            .unwrap()
            .iter()
            .find(|(_, sha)| *sha == summary.sha)
            .map(|(date, _)| *date);

        match found {
            Some(date) => {
                let files = json!([{ "filename": format!("src/{}.rs", summary.sha), "changes": 1 }]);
                let mut payload = self.commit_payload(&summary.sha, &date);
                payload.insert("files".into(), files.clone());
                Outcome::Fetched(CommitRecord {
                    sha: summary.sha.clone(),
                    committer_date: date,
                    project_id: self.project_id.clone(),
                    files_modified: files,
                    stats: json!({ "total": 1, "additions": 1, "deletions": 0 }),
                    payload,
                })
            }
            None => Outcome::Skipped(SkipReason::ClientError(404)),
        }
    }

    async fn estimate_total(&self, since: Option<DateTime<Utc>>, per_page: u32) -> u64 {
        let total = self.in_window(&Window::new(since, None)).len() as u64;
        let per_page = per_page.max(1) as u64;
        if total == 0 {
            return DEFAULT_ESTIMATE;
        }
        // Same shape as a paginated API: last page × page size when there
        // is more than one page, otherwise first page size × 100.
        if total > per_page {
            total.div_ceil(per_page) * per_page
        } else {
            total * 100
        }
    }
}
