//! Per-page detail enrichment.
//!
//! One listing page at a time: summaries already in the store are dropped
//! before any detail call is spent on them, repeated shas inside the page
//! collapse to one, and the rest are enriched on a bounded worker pool
//! (`JoinSet` + `Semaphore`). Workers only fetch; every insert happens here,
//! on the calling task, as workers finish. A record is therefore stored the
//! moment its own detail arrives, independent of its siblings.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use commit_mirror_core::models::{CommitRecord, CommitSummary};
use commit_mirror_core::source::{CommitSource, Outcome, SkipReason};
use commit_mirror_core::store::CommitStore;

use crate::progress::{ProgressEvent, ProgressReporter};

/// Running totals carried across the pages of one mode run.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tally {
    /// Records stored for the project, including this run's inserts.
    pub stored: u64,
    /// Upstream size estimate, when the mode computed one.
    pub estimate: Option<u64>,
}

/// What happened to one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub listed: usize,
    pub already_stored: usize,
    /// Repeats of a sha earlier in the same page.
    pub repeated: usize,
    /// Summaries handed to workers.
    pub dispatched: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub failed_inserts: usize,
}

impl FanoutReport {
    /// Every listed summary was already stored.
    pub fn all_known(&self) -> bool {
        self.dispatched == 0
    }
}

pub struct DetailFanout {
    source: Arc<dyn CommitSource>,
    store: Arc<dyn CommitStore>,
    progress: Arc<dyn ProgressReporter>,
    width: usize,
    mode: &'static str,
}

impl DetailFanout {
    pub fn new(
        source: Arc<dyn CommitSource>,
        store: Arc<dyn CommitStore>,
        progress: Arc<dyn ProgressReporter>,
        width: usize,
        mode: &'static str,
    ) -> Self {
        Self {
            source,
            store,
            progress,
            width: width.max(1),
            mode,
        }
    }

    /// Summaries from `page` that are not stored yet, first occurrence only.
    pub async fn filter_fresh(
        &self,
        page: Vec<CommitSummary>,
        report: &mut FanoutReport,
    ) -> Result<Vec<CommitSummary>> {
        report.listed = page.len();
        let mut seen = HashSet::new();
        let mut fresh = Vec::with_capacity(page.len());

        for summary in page {
            if !seen.insert(summary.sha.clone()) {
                report.repeated += 1;
                continue;
            }
            if self.store.exists(&summary.sha).await? {
                report.already_stored += 1;
                continue;
            }
            fresh.push(summary);
        }
        Ok(fresh)
    }

    /// Filter, enrich and store one page.
    pub async fn process(&self, page: Vec<CommitSummary>, tally: &mut Tally) -> Result<FanoutReport> {
        let mut report = FanoutReport::default();
        let fresh = self.filter_fresh(page, &mut report).await?;
        report.dispatched = fresh.len();
        if fresh.is_empty() {
            return Ok(report);
        }

        let semaphore = Arc::new(Semaphore::new(self.width));
        let mut workers: JoinSet<(String, Outcome<CommitRecord>)> = JoinSet::new();

        for summary in fresh {
            let source = Arc::clone(&self.source);
            let semaphore = Arc::clone(&semaphore);
            workers.spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            summary.sha,
                            Outcome::Skipped(SkipReason::Malformed(
                                "worker pool closed unexpectedly".to_string(),
                            )),
                        );
                    }
                };
                let outcome = source.fetch_detail(&summary).await;
                (summary.sha, outcome)
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((_, Outcome::Fetched(record))) => self.store_record(record, tally, &mut report).await,
                Ok((sha, Outcome::Skipped(reason))) => {
                    log::warn!("Skipping commit {}: {}", sha, reason);
                    report.skipped += 1;
                    self.progress.report(ProgressEvent::Skipped {
                        mode: self.mode,
                        sha,
                        reason: reason.to_string(),
                    });
                }
                Err(e) => {
                    log::error!("Enrichment worker failed: {}", e);
                    report.skipped += 1;
                }
            }
        }

        Ok(report)
    }

    async fn store_record(&self, record: CommitRecord, tally: &mut Tally, report: &mut FanoutReport) {
        match self.store.insert(&record).await {
            Ok(()) => {
                tally.stored += 1;
                report.inserted += 1;
                log::debug!("Inserted commit {}", record.sha);
                self.progress.report(ProgressEvent::Inserted {
                    mode: self.mode,
                    sha: record.sha,
                    committer_date: record.committer_date,
                    stored: tally.stored,
                    estimate: tally.estimate,
                });
            }
            Err(e) => {
                log::warn!("Error inserting commit {}: {:#}", record.sha, e);
                report.failed_inserts += 1;
                self.progress.report(ProgressEvent::InsertFailed {
                    mode: self.mode,
                    sha: record.sha,
                    error: format!("{:#}", e),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::testing::RecordingProgress;
    use crate::progress::NoProgress;
    use commit_mirror_core::models::{parse_ts, Window};
    use commit_mirror_core::source::memory::InMemorySource;
    use commit_mirror_core::store::memory::InMemoryCommitStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn upstream(n: usize) -> Arc<InMemorySource> {
        let source = InMemorySource::new("p");
        let base = parse_ts("2020-01-01T00:00:00Z").unwrap();
        for i in 0..n {
            source.push_commit(&format!("c{:02}", i), base + chrono::Duration::days(i as i64));
        }
        Arc::new(source)
    }

    async fn first_page(source: &InMemorySource) -> Vec<CommitSummary> {
        source.list_page(&Window::default(), 1, 100).await.fetched().unwrap()
    }

    #[tokio::test]
    async fn stored_shas_are_never_fetched() {
        let source = upstream(5);
        let store = Arc::new(InMemoryCommitStore::new());
        let page = first_page(&source).await;
        let known = source.fetch_detail(&page[0]).await.fetched().unwrap();
        store.insert(&known).await.unwrap();
        let before = source.detail_requests().len();

        let fanout = DetailFanout::new(source.clone(), store.clone(), Arc::new(NoProgress), 3, "test");
        let mut tally = Tally::default();
        let report = fanout.process(page, &mut tally).await.unwrap();

        assert_eq!(report.already_stored, 1);
        assert_eq!(report.inserted, 4);
        assert_eq!(tally.stored, 4);
        let requested = &source.detail_requests()[before..];
        assert_eq!(requested.len(), 4);
        assert!(!requested.contains(&known.sha));
    }

    #[tokio::test]
    async fn repeated_sha_in_page_is_fetched_once() {
        let source = upstream(2);
        let store = Arc::new(InMemoryCommitStore::new());
        let mut page = first_page(&source).await;
        page.push(page[0].clone());

        let fanout = DetailFanout::new(source.clone(), store.clone(), Arc::new(NoProgress), 2, "test");
        let report = fanout.process(page, &mut Tally::default()).await.unwrap();

        assert_eq!(report.listed, 3);
        assert_eq!(report.repeated, 1);
        assert_eq!(report.inserted, 2);
        assert_eq!(source.detail_requests().len(), 2);
    }

    #[tokio::test]
    async fn one_missing_detail_does_not_stop_the_page() {
        let source = upstream(10);
        source.fail_detail("c04", SkipReason::ClientError(404));
        let store = Arc::new(InMemoryCommitStore::new());
        let progress = Arc::new(RecordingProgress::default());

        let fanout = DetailFanout::new(source.clone(), store.clone(), progress.clone(), 4, "test");
        let report = fanout.process(first_page(&source).await, &mut Tally::default()).await.unwrap();

        assert_eq!(report.inserted, 9);
        assert_eq!(report.skipped, 1);
        assert!(!store.exists("c04").await.unwrap());
        assert!(progress.events().iter().any(|e| matches!(
            e,
            ProgressEvent::Skipped { sha, .. } if sha == "c04"
        )));
    }

    #[tokio::test]
    async fn rejected_insert_is_counted_not_fatal() {
        let source = upstream(3);
        let store = Arc::new(InMemoryCommitStore::new());
        store.reject_inserts_of("c01");

        let fanout = DetailFanout::new(source.clone(), store.clone(), Arc::new(NoProgress), 3, "test");
        let report = fanout.process(first_page(&source).await, &mut Tally::default()).await.unwrap();

        assert_eq!(report.inserted, 2);
        assert_eq!(report.failed_inserts, 1);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn fully_known_page_dispatches_nothing() {
        let source = upstream(3);
        let store = Arc::new(InMemoryCommitStore::new());
        let page = first_page(&source).await;
        for summary in &page {
            let record = source.fetch_detail(summary).await.fetched().unwrap();
            store.insert(&record).await.unwrap();
        }

        let fanout = DetailFanout::new(source.clone(), store.clone(), Arc::new(NoProgress), 3, "test");
        let report = fanout.process(page, &mut Tally::default()).await.unwrap();
        assert!(report.all_known());
        assert_eq!(report.already_stored, 3);
    }

    /// Detail fetches that take a while and record how many overlap.
    struct SlowDetails {
        inner: Arc<InMemorySource>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl CommitSource for SlowDetails {
        fn project_id(&self) -> &str {
            self.inner.project_id()
        }

        async fn list_page(&self, window: &Window, page: u32, per_page: u32) -> Outcome<Vec<CommitSummary>> {
            self.inner.list_page(window, page, per_page).await
        }

        async fn fetch_detail(&self, summary: &CommitSummary) -> Outcome<CommitRecord> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let outcome = self.inner.fetch_detail(summary).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            outcome
        }

        async fn estimate_total(&self, since: Option<chrono::DateTime<chrono::Utc>>, per_page: u32) -> u64 {
            self.inner.estimate_total(since, per_page).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn enrichment_never_exceeds_worker_width() {
        let inner = upstream(20);
        let page = first_page(&inner).await;
        let source = Arc::new(SlowDetails {
            inner,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let store = Arc::new(InMemoryCommitStore::new());

        let fanout = DetailFanout::new(source.clone(), store.clone(), Arc::new(NoProgress), 3, "test");
        let report = fanout.process(page, &mut Tally::default()).await.unwrap();

        assert_eq!(report.inserted, 20);
        assert_eq!(store.len(), 20);
        assert_eq!(source.peak.load(Ordering::SeqCst), 3);
        assert_eq!(source.in_flight.load(Ordering::SeqCst), 0);
    }
}
