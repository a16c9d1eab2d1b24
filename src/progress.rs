//! Ingestion progress reporting.
//!
//! Reports what the controller is doing while a mode runs: the window it
//! picked, each page listed, each record stored (with a running count
//! against the estimate), each skip, and why the sweep halted. Progress is
//! emitted on **stderr** so stdout stays reserved for summaries.
//!
//! Diagnostics (retries, quota, rotation) go through `log` instead.

use chrono::{DateTime, Utc};
use commit_mirror_core::models::{format_ts, Window};
use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    /// A mode chose the window it is about to sweep.
    WindowSelected { mode: &'static str, window: Window },
    /// A listing page came back; `fresh` of `listed` are not stored yet.
    PageListed {
        mode: &'static str,
        page: u32,
        listed: usize,
        fresh: usize,
    },
    /// A record was enriched and stored.
    Inserted {
        mode: &'static str,
        sha: String,
        committer_date: DateTime<Utc>,
        stored: u64,
        estimate: Option<u64>,
    },
    /// Enrichment gave up on a summary.
    Skipped {
        mode: &'static str,
        sha: String,
        reason: String,
    },
    /// The store refused a record.
    InsertFailed {
        mode: &'static str,
        sha: String,
        error: String,
    },
    /// The sweep stopped.
    Halted {
        mode: &'static str,
        pages: u32,
        reason: String,
    },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = human_line(&event);
        let _ = writeln!(std::io::stderr().lock(), "{}", line);
    }
}

fn human_line(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::WindowSelected { mode, window } => {
            format!("{}  sweeping window {}", mode, window)
        }
        ProgressEvent::PageListed {
            mode,
            page,
            listed,
            fresh,
        } => format!(
            "{}  page {}: {} commits listed, {} new",
            mode, page, listed, fresh
        ),
        ProgressEvent::Inserted {
            mode,
            sha,
            committer_date,
            stored,
            estimate,
        } => match estimate {
            Some(total) => format!(
                "{}  stored {} ({})  {} / ~{}",
                mode,
                sha,
                format_ts(committer_date),
                format_number(*stored),
                format_number(*total)
            ),
            None => format!(
                "{}  stored {} ({})  {} total",
                mode,
                sha,
                format_ts(committer_date),
                format_number(*stored)
            ),
        },
        ProgressEvent::Skipped { mode, sha, reason } => {
            format!("{}  skipped {}: {}", mode, sha, reason)
        }
        ProgressEvent::InsertFailed { mode, sha, error } => {
            format!("{}  failed to store {}: {}", mode, sha, error)
        }
        ProgressEvent::Halted {
            mode,
            pages,
            reason,
        } => format!("{}  halted after {} pages: {}", mode, pages, reason),
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = json_event(&event);
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

fn json_event(event: &ProgressEvent) -> serde_json::Value {
    match event {
        ProgressEvent::WindowSelected { mode, window } => serde_json::json!({
            "event": "window",
            "mode": mode,
            "since": window.since.map(|ts| format_ts(&ts)),
            "until": window.until.map(|ts| format_ts(&ts)),
        }),
        ProgressEvent::PageListed {
            mode,
            page,
            listed,
            fresh,
        } => serde_json::json!({
            "event": "page",
            "mode": mode,
            "page": page,
            "listed": listed,
            "fresh": fresh,
        }),
        ProgressEvent::Inserted {
            mode,
            sha,
            committer_date,
            stored,
            estimate,
        } => serde_json::json!({
            "event": "inserted",
            "mode": mode,
            "sha": sha,
            "committer_date": format_ts(committer_date),
            "stored": stored,
            "estimate": estimate,
        }),
        ProgressEvent::Skipped { mode, sha, reason } => serde_json::json!({
            "event": "skipped",
            "mode": mode,
            "sha": sha,
            "reason": reason,
        }),
        ProgressEvent::InsertFailed { mode, sha, error } => serde_json::json!({
            "event": "insert_failed",
            "mode": mode,
            "sha": sha,
            "error": error,
        }),
        ProgressEvent::Halted {
            mode,
            pages,
            reason,
        } => serde_json::json!({
            "event": "halted",
            "mode": mode,
            "pages": pages,
            "reason": reason,
        }),
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// `3725` → `"1 hours, 2 minutes and 5 seconds"`.
pub fn format_hms(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!(
        "{} hours, {} minutes and {} seconds",
        hours, minutes, seconds
    )
}

/// Progress mode: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Resolve the `ingest.progress` setting (already validated).
    pub fn from_setting(setting: Option<&str>) -> Self {
        match setting {
            Some("human") => ProgressMode::Human,
            Some("json") => ProgressMode::Json,
            Some("off") => ProgressMode::Off,
            _ => Self::default_for_tty(),
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use commit_mirror_core::models::parse_ts;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn format_hms_splits_units() {
        assert_eq!(format_hms(0), "0 hours, 0 minutes and 0 seconds");
        assert_eq!(format_hms(3725), "1 hours, 2 minutes and 5 seconds");
    }

    #[test]
    fn inserted_line_shows_estimate() {
        let line = human_line(&ProgressEvent::Inserted {
            mode: "initial",
            sha: "abc".into(),
            committer_date: parse_ts("2020-01-01T00:00:00Z").unwrap(),
            stored: 1200,
            estimate: Some(5000),
        });
        assert_eq!(line, "initial  stored abc (2020-01-01T00:00:00Z)  1,200 / ~5,000");
    }

    #[test]
    fn json_window_uses_null_for_open_bounds() {
        let obj = json_event(&ProgressEvent::WindowSelected {
            mode: "catch-up",
            window: Window::new(Some(parse_ts("2020-01-01T00:00:00Z").unwrap()), None),
        });
        assert_eq!(obj["since"], "2020-01-01T00:00:00Z");
        assert!(obj["until"].is_null());
    }

    #[test]
    fn explicit_setting_wins_over_tty() {
        assert_eq!(ProgressMode::from_setting(Some("json")), ProgressMode::Json);
        assert_eq!(ProgressMode::from_setting(Some("off")), ProgressMode::Off);
    }
}
