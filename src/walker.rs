//! Sequential page sweep over one window.
//!
//! Pages are requested strictly in order (1, 2, 3, …) and only one page is
//! in flight at a time; each page is handed to the [`DetailFanout`] before
//! the next one is requested. What stops the sweep is a [`HaltPolicy`].

use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use commit_mirror_core::models::Window;
use commit_mirror_core::source::{CommitSource, Outcome, SkipReason};

use crate::fanout::{DetailFanout, FanoutReport, Tally};
use crate::interrupt::Interrupt;
use crate::progress::{ProgressEvent, ProgressReporter};

/// When a sweep is finished, besides upstream running dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltPolicy {
    /// Only an empty page ends the sweep. Pages full of known commits are
    /// expected near a moving boundary and are walked through.
    EmptyPage,
    /// The first page with nothing new also ends the sweep.
    FirstKnownPage,
}

/// Why a sweep stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    /// Upstream returned an empty page.
    Exhausted,
    /// Every commit on a page was already stored.
    CaughtUp,
    /// A listing page could not be fetched; later pages were not attempted.
    ListingAbandoned { page: u32, reason: SkipReason },
    /// The operator interrupted the run.
    Interrupted,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::Exhausted => write!(f, "no more commits in this range"),
            HaltReason::CaughtUp => write!(f, "reached commits that are already stored"),
            HaltReason::ListingAbandoned { page, reason } => {
                write!(f, "listing page {} abandoned ({})", page, reason)
            }
            HaltReason::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Totals for one sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkReport {
    pub pages: u32,
    pub listed: usize,
    pub already_stored: usize,
    pub repeated: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub failed_inserts: usize,
    pub halt: HaltReason,
}

impl WalkReport {
    fn new() -> Self {
        Self {
            pages: 0,
            listed: 0,
            already_stored: 0,
            repeated: 0,
            inserted: 0,
            skipped: 0,
            failed_inserts: 0,
            halt: HaltReason::Exhausted,
        }
    }

    fn absorb(&mut self, page: &FanoutReport) {
        self.pages += 1;
        self.listed += page.listed;
        self.already_stored += page.already_stored;
        self.repeated += page.repeated;
        self.inserted += page.inserted;
        self.skipped += page.skipped;
        self.failed_inserts += page.failed_inserts;
    }
}

pub struct PageWalker<'a> {
    pub source: Arc<dyn CommitSource>,
    pub fanout: &'a DetailFanout,
    pub progress: Arc<dyn ProgressReporter>,
    pub interrupt: &'a Interrupt,
    pub per_page: u32,
    pub mode: &'static str,
}

impl PageWalker<'_> {
    pub async fn walk(&self, window: &Window, policy: HaltPolicy, tally: &mut Tally) -> Result<WalkReport> {
        let mut report = WalkReport::new();
        let mut page = 1u32;

        report.halt = loop {
            if self.interrupt.is_set() {
                break HaltReason::Interrupted;
            }

            let summaries = match self.source.list_page(window, page, self.per_page).await {
                Outcome::Fetched(summaries) => summaries,
                Outcome::Skipped(reason) => {
                    log::error!("Listing page {} of {} failed: {}", page, window, reason);
                    break HaltReason::ListingAbandoned { page, reason };
                }
            };
            if summaries.is_empty() {
                break HaltReason::Exhausted;
            }
            let listed = summaries.len();

            let page_report = self.fanout.process(summaries, tally).await?;
            report.absorb(&page_report);
            self.progress.report(ProgressEvent::PageListed {
                mode: self.mode,
                page,
                listed,
                fresh: page_report.dispatched,
            });

            if policy == HaltPolicy::FirstKnownPage && page_report.all_known() {
                break HaltReason::CaughtUp;
            }
            page += 1;
        };

        log::info!(
            "{}: sweep of {} halted after {} pages: {}",
            self.mode,
            window,
            report.pages,
            report.halt
        );
        self.progress.report(ProgressEvent::Halted {
            mode: self.mode,
            pages: report.pages,
            reason: report.halt.to_string(),
        });
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use commit_mirror_core::models::parse_ts;
    use commit_mirror_core::source::memory::InMemorySource;
    use commit_mirror_core::store::memory::InMemoryCommitStore;
    use commit_mirror_core::store::CommitStore;

    struct Fixture {
        source: Arc<InMemorySource>,
        store: Arc<InMemoryCommitStore>,
        fanout: DetailFanout,
        interrupt: Interrupt,
    }

    impl Fixture {
        fn new(n: usize) -> Self {
            let source = Arc::new(InMemorySource::new("p"));
            let base = parse_ts("2020-01-01T00:00:00Z").unwrap();
            for i in 0..n {
                source.push_commit(&format!("c{:03}", i), base + chrono::Duration::hours(i as i64));
            }
            let store = Arc::new(InMemoryCommitStore::new());
            let fanout = DetailFanout::new(source.clone(), store.clone(), Arc::new(NoProgress), 4, "test");
            Self {
                source,
                store,
                fanout,
                interrupt: Interrupt::new(),
            }
        }

        fn walker(&self, per_page: u32) -> PageWalker<'_> {
            PageWalker {
                source: self.source.clone(),
                fanout: &self.fanout,
                progress: Arc::new(NoProgress),
                interrupt: &self.interrupt,
                per_page,
                mode: "test",
            }
        }
    }

    #[tokio::test]
    async fn pages_are_walked_in_order_until_empty() {
        let fx = Fixture::new(25);
        let report = fx
            .walker(10)
            .walk(&Window::default(), HaltPolicy::EmptyPage, &mut Tally::default())
            .await
            .unwrap();

        assert_eq!(report.halt, HaltReason::Exhausted);
        assert_eq!(report.pages, 3);
        assert_eq!(report.inserted, 25);
        let pages: Vec<u32> = fx.source.listing_calls().iter().map(|c| c.page).collect();
        assert_eq!(pages, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn known_pages_do_not_stop_an_empty_page_sweep() {
        let fx = Fixture::new(20);
        fx.walker(10)
            .walk(&Window::default(), HaltPolicy::EmptyPage, &mut Tally::default())
            .await
            .unwrap();

        let again = fx
            .walker(10)
            .walk(&Window::default(), HaltPolicy::EmptyPage, &mut Tally::default())
            .await
            .unwrap();
        assert_eq!(again.halt, HaltReason::Exhausted);
        assert_eq!(again.pages, 2);
        assert_eq!(again.inserted, 0);
        assert_eq!(again.already_stored, 20);
    }

    #[tokio::test]
    async fn first_known_page_stops_catch_up() {
        let fx = Fixture::new(30);
        // Store the oldest 20 (pages 2 and 3 when listing 10 per page).
        let page2 = fx.source.list_page(&Window::default(), 2, 10).await.fetched().unwrap();
        let page3 = fx.source.list_page(&Window::default(), 3, 10).await.fetched().unwrap();
        for summary in page2.iter().chain(page3.iter()) {
            let record = fx.source.fetch_detail(summary).await.fetched().unwrap();
            fx.store.insert(&record).await.unwrap();
        }

        let report = fx
            .walker(10)
            .walk(&Window::default(), HaltPolicy::FirstKnownPage, &mut Tally::default())
            .await
            .unwrap();
        assert_eq!(report.halt, HaltReason::CaughtUp);
        assert_eq!(report.pages, 2);
        assert_eq!(report.inserted, 10);
        assert_eq!(fx.store.len(), 30);
    }

    #[tokio::test]
    async fn abandoned_listing_halts_the_sweep() {
        let fx = Fixture::new(30);
        fx.source.fail_listing_page(2);

        let report = fx
            .walker(10)
            .walk(&Window::default(), HaltPolicy::EmptyPage, &mut Tally::default())
            .await
            .unwrap();
        assert!(matches!(report.halt, HaltReason::ListingAbandoned { page: 2, .. }));
        assert_eq!(report.inserted, 10);
        assert_eq!(fx.source.listing_calls().len(), 2);
    }

    #[tokio::test]
    async fn interrupt_is_checked_before_each_page() {
        let fx = Fixture::new(30);
        fx.interrupt.trigger();

        let report = fx
            .walker(10)
            .walk(&Window::default(), HaltPolicy::EmptyPage, &mut Tally::default())
            .await
            .unwrap();
        assert_eq!(report.halt, HaltReason::Interrupted);
        assert!(fx.source.listing_calls().is_empty());
        assert!(fx.store.is_empty());
    }
}
