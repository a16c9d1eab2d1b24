//! Upstream commit source abstraction.
//!
//! A [`CommitSource`] lists commit summaries for a date window and fetches
//! the full detail for one summary. Failures never surface as `Err`: every
//! call returns an [`Outcome`], and a [`SkipReason`] tells the caller why
//! an item was given up on. Skips are per-item and never abort a run.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

use crate::models::{CommitRecord, CommitSummary, Window};

/// Estimate returned when the upstream cannot be sampled.
pub const DEFAULT_ESTIMATE: u64 = 1000;

/// Why an upstream item was abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// 400, 404 or 409: the request itself is wrong, retrying won't help.
    ClientError(u16),
    /// A status the fetcher has no policy for.
    UnexpectedStatus(u16),
    /// Retry budget spent on transient failures.
    Exhausted { attempts: u32, last_error: String },
    /// The response arrived but could not be interpreted.
    Malformed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ClientError(400) => write!(f, "HTTP 400 Bad Request"),
            SkipReason::ClientError(404) => write!(f, "HTTP 404 Not Found"),
            SkipReason::ClientError(409) => write!(f, "HTTP 409 Conflict"),
            SkipReason::ClientError(status) => write!(f, "HTTP {} client error", status),
            SkipReason::UnexpectedStatus(status) => write!(f, "unexpected HTTP status {}", status),
            SkipReason::Exhausted {
                attempts,
                last_error,
            } => write!(f, "gave up after {} attempts: {}", attempts, last_error),
            SkipReason::Malformed(detail) => write!(f, "malformed response: {}", detail),
        }
    }
}

/// Result of one upstream operation: a value, or the reason it was skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Fetched(T),
    Skipped(SkipReason),
}

impl<T> Outcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Fetched(v) => Outcome::Fetched(f(v)),
            Outcome::Skipped(reason) => Outcome::Skipped(reason),
        }
    }

    /// Chain a step that can itself skip.
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Outcome<U>) -> Outcome<U> {
        match self {
            Outcome::Fetched(v) => f(v),
            Outcome::Skipped(reason) => Outcome::Skipped(reason),
        }
    }

    pub fn fetched(self) -> Option<T> {
        match self {
            Outcome::Fetched(v) => Some(v),
            Outcome::Skipped(_) => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped(_))
    }
}

/// Upstream API as seen by the ingestion controller.
#[async_trait]
pub trait CommitSource: Send + Sync {
    /// Project identifier stamped on every record this source produces.
    fn project_id(&self) -> &str;

    /// One page (1-based) of commit summaries inside `window`, newest first.
    ///
    /// An empty page means the window is exhausted.
    async fn list_page(
        &self,
        window: &Window,
        page: u32,
        per_page: u32,
    ) -> Outcome<Vec<CommitSummary>>;

    /// Full record for one summary, with files and stats attached.
    async fn fetch_detail(&self, summary: &CommitSummary) -> Outcome<CommitRecord>;

    /// Rough number of commits on or after `since`, for progress output.
    ///
    /// Never fails; falls back to [`DEFAULT_ESTIMATE`].
    async fn estimate_total(&self, since: Option<DateTime<Utc>>, per_page: u32) -> u64;
}
