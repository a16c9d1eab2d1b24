//! Ingestion modes.
//!
//! Every mode follows the same loop (list a page, drop what is stored,
//! enrich the rest concurrently, insert, advance or halt) and differs only
//! in how it picks its window and when it stops:
//!
//! | Mode | Window | Stops on |
//! |------|--------|----------|
//! | [`initial`](Ingestor::initial) | `[start_date, oldest)` | empty page |
//! | [`catch_up`](Ingestor::catch_up) | `[newest, open)` | first page with nothing new, or empty page |
//! | [`extend_backward`](Ingestor::extend_backward) | `[resume, oldest)` | empty page |
//!
//! Windows are derived from store queries at the start of each run, never
//! from in-memory progress, so any mode can be killed and rerun.
//!
//! [`run_mode`] wraps a mode with the operator concerns: Ctrl-C, the
//! elapsed-time file, and the final summary.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use thiserror::Error;

use commit_mirror_core::models::{format_ts, parse_ts_strict, Window};
use commit_mirror_core::source::CommitSource;
use commit_mirror_core::store::CommitStore;

use crate::config::Config;
use crate::elapsed;
use crate::fanout::{DetailFanout, Tally};
use crate::interrupt::Interrupt;
use crate::progress::{format_hms, format_number, NoProgress, ProgressEvent, ProgressReporter};
use crate::walker::{HaltPolicy, HaltReason, PageWalker, WalkReport};

/// Operator-input faults. They abort the requested mode only.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModeError {
    #[error("no commits stored for '{0}' yet; run the initial ingestion first")]
    EmptyStore(String),
    #[error("operation cancelled")]
    NotConfirmed,
    #[error("{0}")]
    InvalidDate(String),
    #[error("the new start date ({boundary}) must be earlier than the oldest stored commit ({oldest})")]
    BoundaryNotBeforeOldest { boundary: String, oldest: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Initial,
    CatchUp,
    Extend,
}

impl Mode {
    pub fn label(&self) -> &'static str {
        match self {
            Mode::Initial => "initial",
            Mode::CatchUp => "catch-up",
            Mode::Extend => "extend",
        }
    }
}

/// Outcome of one mode invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeReport {
    pub mode: Mode,
    pub window: Window,
    /// Stored records for the project when the run ended.
    pub stored: u64,
    pub estimate: Option<u64>,
    pub walk: WalkReport,
}

impl fmt::Display for ModeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Mode:            {}", self.mode.label())?;
        writeln!(f, "Window:          {}", self.window)?;
        writeln!(f, "Pages walked:    {}", self.walk.pages)?;
        writeln!(f, "Listed:          {}", format_number(self.walk.listed as u64))?;
        writeln!(f, "Already stored:  {}", format_number(self.walk.already_stored as u64))?;
        writeln!(f, "Inserted:        {}", format_number(self.walk.inserted as u64))?;
        writeln!(f, "Skipped:         {}", self.walk.skipped)?;
        writeln!(f, "Failed inserts:  {}", self.walk.failed_inserts)?;
        match self.estimate {
            Some(estimate) => writeln!(
                f,
                "Stored total:    {} of ~{}",
                format_number(self.stored),
                format_number(estimate)
            )?,
            None => writeln!(f, "Stored total:    {}", format_number(self.stored))?,
        }
        write!(f, "Halted:          {}", self.walk.halt)
    }
}

/// Knobs the modes need from configuration.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub start_date: DateTime<Utc>,
    pub per_page: u32,
    pub workers: usize,
}

impl IngestSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            start_date: config.start_date()?,
            per_page: config.upstream.per_page,
            workers: config.ingest.workers,
        })
    }
}

pub struct Ingestor {
    source: Arc<dyn CommitSource>,
    store: Arc<dyn CommitStore>,
    progress: Arc<dyn ProgressReporter>,
    settings: IngestSettings,
    interrupt: Interrupt,
    /// Estimate of the sweep in progress, for the interrupt summary.
    estimate: Mutex<Option<u64>>,
}

impl Ingestor {
    pub fn new(
        source: Arc<dyn CommitSource>,
        store: Arc<dyn CommitStore>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            source,
            store,
            progress: Arc::new(NoProgress),
            settings,
            interrupt: Interrupt::new(),
            estimate: Mutex::new(None),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    pub fn store(&self) -> &Arc<dyn CommitStore> {
        &self.store
    }

    pub fn project_id(&self) -> &str {
        self.source.project_id()
    }

    /// Upstream estimate of the current (or last) sweep, if it made one.
    pub fn estimate(&self) -> Option<u64> {
        *self.estimate.lock().unwrap()
    }

    fn set_estimate(&self, estimate: Option<u64>) {
        *self.estimate.lock().unwrap() = estimate;
    }

    /// Initial ingestion: fill `[start_date, oldest)`, or `[start_date, open)` on an
    /// empty store.
    pub async fn initial(&self) -> Result<ModeReport> {
        let estimate = self
            .source
            .estimate_total(Some(self.settings.start_date), self.settings.per_page)
            .await;

        let until = self.store.oldest(self.project_id()).await?;
        match until {
            Some(oldest) => log::info!("Continuing below the oldest stored commit: {}", format_ts(&oldest)),
            None => log::info!(
                "Ingesting from {} with no upper bound",
                format_ts(&self.settings.start_date)
            ),
        }

        let window = Window::new(Some(self.settings.start_date), until);
        self.sweep(Mode::Initial, window, HaltPolicy::EmptyPage, Some(estimate))
            .await
    }

    /// Catch-up: fetch everything newer than the newest stored commit.
    ///
    /// The caller must have confirmed that the store is complete up to its
    /// newest record; a gap below it is never revisited by this mode.
    pub async fn catch_up(&self, confirmed: bool) -> Result<ModeReport> {
        let newest = self
            .store
            .newest(self.project_id())
            .await?
            .ok_or_else(|| ModeError::EmptyStore(self.project_id().to_string()))?;
        if !confirmed {
            return Err(ModeError::NotConfirmed.into());
        }
        log::info!("Looking for commits since {}", format_ts(&newest));

        let window = Window::new(Some(newest), None);
        self.sweep(Mode::CatchUp, window, HaltPolicy::FirstKnownPage, None)
            .await
    }

    /// Extend backward with operator-typed input; the date must match
    /// `YYYY-MM-DDTHH:MM:SSZ` exactly.
    pub async fn extend_backward_from_input(&self, input: &str) -> Result<ModeReport> {
        let boundary = parse_ts_strict(input).map_err(|e| ModeError::InvalidDate(e.to_string()))?;
        self.extend_backward(boundary).await
    }

    /// Extend backward: extend coverage down to `boundary`.
    pub async fn extend_backward(&self, boundary: DateTime<Utc>) -> Result<ModeReport> {
        let oldest = self
            .store
            .oldest(self.project_id())
            .await?
            .ok_or_else(|| ModeError::EmptyStore(self.project_id().to_string()))?;
        if boundary >= oldest {
            return Err(ModeError::BoundaryNotBeforeOldest {
                boundary: format_ts(&boundary),
                oldest: format_ts(&oldest),
            }
            .into());
        }

        let since = match self.store.newest_before(self.project_id(), oldest).await? {
            Some(resume) => {
                log::info!(
                    "Resuming from the newest commit before {}: {}",
                    format_ts(&oldest),
                    format_ts(&resume)
                );
                resume
            }
            None => {
                log::info!(
                    "No commits before {} yet; starting from {}",
                    format_ts(&oldest),
                    format_ts(&boundary)
                );
                boundary
            }
        };

        let window = Window::new(Some(since), Some(oldest));
        self.sweep(Mode::Extend, window, HaltPolicy::EmptyPage, None)
            .await
    }

    async fn sweep(
        &self,
        mode: Mode,
        window: Window,
        policy: HaltPolicy,
        estimate: Option<u64>,
    ) -> Result<ModeReport> {
        self.set_estimate(estimate);
        let mut tally = Tally {
            stored: self.store.count(self.project_id()).await?,
            estimate,
        };
        match estimate {
            Some(total) => log::info!(
                "{} commits already stored out of an estimated {}",
                format_number(tally.stored),
                format_number(total)
            ),
            None => log::info!("{} commits currently stored", format_number(tally.stored)),
        }
        self.progress.report(ProgressEvent::WindowSelected {
            mode: mode.label(),
            window,
        });

        let fanout = DetailFanout::new(
            Arc::clone(&self.source),
            Arc::clone(&self.store),
            Arc::clone(&self.progress),
            self.settings.workers,
            mode.label(),
        );
        let walker = PageWalker {
            source: Arc::clone(&self.source),
            fanout: &fanout,
            progress: Arc::clone(&self.progress),
            interrupt: &self.interrupt,
            per_page: self.settings.per_page,
            mode: mode.label(),
        };
        let walk = walker.walk(&window, policy, &mut tally).await?;

        Ok(ModeReport {
            mode,
            window,
            stored: tally.stored,
            estimate,
            walk,
        })
    }
}

/// How a wrapped mode invocation ended.
#[derive(Debug)]
pub enum RunOutcome {
    Completed {
        report: ModeReport,
        elapsed_secs: f64,
    },
    /// `stored` and `estimate` are read after the stop, so they hold even
    /// when the mode was dropped mid-page and left no report.
    Interrupted {
        report: Option<ModeReport>,
        stored: u64,
        estimate: Option<u64>,
        elapsed_secs: f64,
    },
}

/// Run one mode with interrupt handling and elapsed-time bookkeeping.
///
/// The mode future is raced against the ingestor's interrupt; on interrupt
/// it is dropped (in-flight enrichments are aborted with their `JoinSet`)
/// and the accumulated time is saved. On completion the file is removed.
pub async fn run_mode<F>(ingestor: &Ingestor, elapsed_file: &Path, mode: F) -> Result<RunOutcome>
where
    F: std::future::Future<Output = Result<ModeReport>>,
{
    let previous = elapsed::load(elapsed_file);
    let started = Instant::now();
    ingestor.set_estimate(None);

    let result = tokio::select! {
        biased;
        _ = ingestor.interrupt().wait() => None,
        result = mode => Some(result),
    };
    let total = previous + started.elapsed().as_secs_f64();

    match result {
        None => {
            elapsed::save(elapsed_file, total)?;
            let stored = ingestor.store().count(ingestor.project_id()).await?;
            Ok(RunOutcome::Interrupted {
                report: None,
                stored,
                estimate: ingestor.estimate(),
                elapsed_secs: total,
            })
        }
        Some(Ok(report)) if report.walk.halt == HaltReason::Interrupted => {
            elapsed::save(elapsed_file, total)?;
            Ok(RunOutcome::Interrupted {
                stored: report.stored,
                estimate: report.estimate,
                report: Some(report),
                elapsed_secs: total,
            })
        }
        Some(Ok(report)) => {
            elapsed::clear(elapsed_file)?;
            log::info!("Finished in {}", format_hms(total as u64));
            Ok(RunOutcome::Completed {
                report,
                elapsed_secs: total,
            })
        }
        // Operator faults happen before any work; earlier time stays on file.
        Some(Err(e)) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commit_mirror_core::models::parse_ts;
    use commit_mirror_core::source::memory::InMemorySource;
    use commit_mirror_core::store::memory::InMemoryCommitStore;

    fn ts(s: &str) -> DateTime<Utc> {
        parse_ts(s).unwrap()
    }

    fn ingestor(source: Arc<InMemorySource>, store: Arc<InMemoryCommitStore>) -> Ingestor {
        Ingestor::new(
            source,
            store,
            IngestSettings {
                start_date: ts("2020-01-01T00:00:00Z"),
                per_page: 10,
                workers: 3,
            },
        )
    }

    fn daily(source: &InMemorySource, prefix: &str, from: &str, n: usize) {
        let base = ts(from);
        for i in 0..n {
            source.push_commit(&format!("{}{:03}", prefix, i), base + chrono::Duration::days(i as i64));
        }
    }

    #[tokio::test]
    async fn initial_uses_open_window_on_empty_store() {
        let source = Arc::new(InMemorySource::new("p"));
        daily(&source, "a", "2020-01-01T00:00:00Z", 15);
        let store = Arc::new(InMemoryCommitStore::new());

        let report = ingestor(source.clone(), store.clone()).initial().await.unwrap();
        assert_eq!(report.window, Window::new(Some(ts("2020-01-01T00:00:00Z")), None));
        assert_eq!(report.walk.inserted, 15);
        assert_eq!(report.stored, 15);
        assert_eq!(report.estimate, Some(20));
    }

    #[tokio::test]
    async fn catch_up_requires_records_and_confirmation() {
        let source = Arc::new(InMemorySource::new("p"));
        let store = Arc::new(InMemoryCommitStore::new());
        let ing = ingestor(source.clone(), store.clone());

        let err = ing.catch_up(true).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ModeError>(),
            Some(&ModeError::EmptyStore("p".to_string()))
        );

        daily(&source, "a", "2020-01-01T00:00:00Z", 3);
        ing.initial().await.unwrap();
        let err = ing.catch_up(false).await.unwrap_err();
        assert_eq!(err.downcast_ref::<ModeError>(), Some(&ModeError::NotConfirmed));
        let listings_after_initial = source.listing_calls().len();
        assert!(ing.catch_up(false).await.is_err());
        assert_eq!(source.listing_calls().len(), listings_after_initial);
    }

    #[tokio::test]
    async fn catch_up_fetches_only_newer_commits() {
        let source = Arc::new(InMemorySource::new("p"));
        daily(&source, "a", "2020-01-01T00:00:00Z", 12);
        let store = Arc::new(InMemoryCommitStore::new());
        let ing = ingestor(source.clone(), store.clone());
        ing.initial().await.unwrap();

        daily(&source, "b", "2021-01-01T00:00:00Z", 5);
        let report = ing.catch_up(true).await.unwrap();
        assert_eq!(report.window.since, Some(ts("2020-01-12T00:00:00Z")));
        assert_eq!(report.walk.inserted, 5);
        assert_eq!(store.len(), 17);
    }

    #[tokio::test]
    async fn extend_rejects_bad_boundaries() {
        let source = Arc::new(InMemorySource::new("p"));
        daily(&source, "a", "2020-01-01T00:00:00Z", 3);
        let store = Arc::new(InMemoryCommitStore::new());
        let ing = ingestor(source.clone(), store.clone());

        let err = ing.extend_backward(ts("2019-01-01T00:00:00Z")).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<ModeError>(), Some(ModeError::EmptyStore(_))));

        ing.initial().await.unwrap();
        let err = ing.extend_backward(ts("2020-01-01T00:00:00Z")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ModeError>(),
            Some(ModeError::BoundaryNotBeforeOldest { .. })
        ));

        let err = ing.extend_backward_from_input("2019-01-01").await.unwrap_err();
        assert!(matches!(err.downcast_ref::<ModeError>(), Some(ModeError::InvalidDate(_))));
    }

    #[tokio::test]
    async fn extend_sweeps_below_oldest() {
        let source = Arc::new(InMemorySource::new("p"));
        daily(&source, "a", "2020-01-01T00:00:00Z", 10);
        daily(&source, "old", "2019-06-01T00:00:00Z", 7);
        let store = Arc::new(InMemoryCommitStore::new());
        let ing = ingestor(source.clone(), store.clone());
        ing.initial().await.unwrap();
        assert_eq!(store.len(), 10);

        let report = ing
            .extend_backward_from_input("2019-01-01T00:00:00Z")
            .await
            .unwrap();
        assert_eq!(
            report.window,
            Window::new(Some(ts("2019-01-01T00:00:00Z")), Some(ts("2020-01-01T00:00:00Z")))
        );
        assert_eq!(report.walk.inserted, 7);
        assert_eq!(store.len(), 17);
    }

    #[tokio::test]
    async fn run_mode_saves_time_on_interrupt_and_clears_on_completion() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("ingestion_time.json");
        elapsed::save(&file, 42.0).unwrap();

        let source = Arc::new(InMemorySource::new("p"));
        daily(&source, "a", "2020-01-01T00:00:00Z", 2);
        let stopped = ingestor(source.clone(), Arc::new(InMemoryCommitStore::new()));
        stopped.interrupt().trigger();
        let outcome = run_mode(&stopped, &file, std::future::pending::<Result<ModeReport>>())
            .await
            .unwrap();
        match outcome {
            RunOutcome::Interrupted {
                report,
                stored,
                elapsed_secs,
                ..
            } => {
                assert!(report.is_none());
                assert_eq!(stored, 0);
                assert!(elapsed_secs >= 42.0);
            }
            other => panic!("expected interrupt, got {:?}", other),
        }
        assert!(elapsed::load(&file) >= 42.0);

        let ing = ingestor(source, Arc::new(InMemoryCommitStore::new()));
        let outcome = run_mode(&ing, &file, ing.initial()).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed { .. }));
        assert!(!file.exists());
    }

    /// Enrichment that raises the interrupt and then never answers.
    struct HangingDetails {
        inner: Arc<InMemorySource>,
        interrupt: Interrupt,
    }

    #[async_trait::async_trait]
    impl CommitSource for HangingDetails {
        fn project_id(&self) -> &str {
            self.inner.project_id()
        }

        async fn list_page(
            &self,
            window: &Window,
            page: u32,
            per_page: u32,
        ) -> commit_mirror_core::source::Outcome<Vec<commit_mirror_core::models::CommitSummary>> {
            self.inner.list_page(window, page, per_page).await
        }

        async fn fetch_detail(
            &self,
            _summary: &commit_mirror_core::models::CommitSummary,
        ) -> commit_mirror_core::source::Outcome<commit_mirror_core::models::CommitRecord> {
            self.interrupt.trigger();
            std::future::pending().await
        }

        async fn estimate_total(&self, since: Option<DateTime<Utc>>, per_page: u32) -> u64 {
            self.inner.estimate_total(since, per_page).await
        }
    }

    #[tokio::test]
    async fn interrupt_mid_page_reports_stored_count_and_estimate() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("ingestion_time.json");

        let inner = Arc::new(InMemorySource::new("p"));
        daily(&inner, "a", "2020-01-05T00:00:00Z", 10);
        let store = Arc::new(InMemoryCommitStore::new());
        // The three newest are already mirrored.
        let newest = inner.list_page(&Window::default(), 1, 3).await.fetched().unwrap();
        for summary in &newest {
            let record = inner.fetch_detail(summary).await.fetched().unwrap();
            store.insert(&record).await.unwrap();
        }

        let interrupt = Interrupt::new();
        let source = Arc::new(HangingDetails {
            inner: inner.clone(),
            interrupt: interrupt.clone(),
        });
        let ing = Ingestor::new(
            source,
            store.clone(),
            IngestSettings {
                start_date: ts("2020-01-01T00:00:00Z"),
                per_page: 4,
                workers: 2,
            },
        )
        .with_interrupt(interrupt);

        let outcome = run_mode(&ing, &file, ing.initial()).await.unwrap();
        match outcome {
            RunOutcome::Interrupted {
                stored, estimate, ..
            } => {
                assert_eq!(stored, 3);
                // 10 commits at 4 per page: last page 3.
                assert_eq!(estimate, Some(12));
            }
            other => panic!("expected interrupt, got {:?}", other),
        }
        assert!(file.exists());
    }
}
