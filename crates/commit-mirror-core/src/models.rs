//! Core data models used throughout commit-mirror.
//!
//! A commit enters the system as a [`CommitSummary`] returned by a listing
//! call, is enriched into a [`CommitRecord`] by a detail fetch, and is then
//! persisted once. Only the fields the controller reasons about are typed;
//! everything else travels as an opaque JSON payload.

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use std::fmt;

/// Canonical timestamp layout, e.g. `2020-01-01T00:00:00Z`.
///
/// Fixed width, so lexical order of formatted values equals time order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Document keys written alongside the opaque payload.
pub const KEY_SHA: &str = "sha";
pub const KEY_COMMITTER_DATE: &str = "committerDate";
pub const KEY_PROJECT_ID: &str = "projectId";
pub const KEY_FILES_MODIFIED: &str = "filesModified";
pub const KEY_STATS: &str = "stats";

/// Format a timestamp in [`TIMESTAMP_FORMAT`].
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse an RFC 3339 timestamp (any offset) into UTC.
///
/// Upstream payloads and stored values both go through here.
pub fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| anyhow!("invalid timestamp '{}': {}", s, e))
}

/// Parse a timestamp that must match [`TIMESTAMP_FORMAT`] exactly.
///
/// Used for operator input, where `2017-01-01` or `+02:00` offsets are
/// rejected rather than guessed at.
pub fn parse_ts_strict(s: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| {
            anyhow!(
                "invalid date '{}': expected YYYY-MM-DDTHH:MM:SSZ (e.g. 2017-01-01T00:00:00Z)",
                s.trim()
            )
        })
}

/// Lightweight listing result: identifier, detail URL, and whatever else
/// the listing endpoint returned.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitSummary {
    pub sha: String,
    pub url: String,
    pub payload: Value,
}

impl CommitSummary {
    /// Build a summary from one element of a listing response.
    ///
    /// Returns `None` when `sha` or `url` is missing.
    pub fn from_value(value: Value) -> Option<Self> {
        let sha = value.get("sha")?.as_str()?.to_string();
        let url = value.get("url")?.as_str()?.to_string();
        Some(Self {
            sha,
            url,
            payload: value,
        })
    }
}

/// A fully enriched commit, ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitRecord {
    /// Unique identifier and primary dedup key.
    pub sha: String,
    /// Ordering key for every range query.
    pub committer_date: DateTime<Utc>,
    /// Logical project the record belongs to.
    pub project_id: String,
    /// File-change entries attached at detail-fetch time.
    pub files_modified: Value,
    /// Aggregate change statistics attached at detail-fetch time.
    pub stats: Value,
    /// Everything else from the upstream response, passed through verbatim.
    pub payload: Map<String, Value>,
}

impl CommitRecord {
    /// Render the record as the stored document: the opaque payload with
    /// the typed fields written over it.
    pub fn to_document(&self) -> Value {
        let mut doc = self.payload.clone();
        doc.insert(KEY_SHA.to_string(), Value::String(self.sha.clone()));
        doc.insert(
            KEY_COMMITTER_DATE.to_string(),
            Value::String(format_ts(&self.committer_date)),
        );
        doc.insert(
            KEY_PROJECT_ID.to_string(),
            Value::String(self.project_id.clone()),
        );
        doc.insert(
            KEY_FILES_MODIFIED.to_string(),
            self.files_modified.clone(),
        );
        doc.insert(KEY_STATS.to_string(), self.stats.clone());
        Value::Object(doc)
    }

    /// Rebuild a record from a stored document.
    pub fn from_document(doc: Value) -> Result<Self> {
        let mut map = match doc {
            Value::Object(map) => map,
            other => return Err(anyhow!("stored document is not an object: {}", other)),
        };

        let sha = map
            .get(KEY_SHA)
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("stored document has no sha"))?
            .to_string();
        let committer_date = match map.remove(KEY_COMMITTER_DATE) {
            Some(Value::String(s)) => parse_ts(&s)?,
            _ => return Err(anyhow!("stored document {} has no committerDate", sha)),
        };
        let project_id = match map.remove(KEY_PROJECT_ID) {
            Some(Value::String(s)) => s,
            _ => return Err(anyhow!("stored document {} has no projectId", sha)),
        };
        let files_modified = map
            .remove(KEY_FILES_MODIFIED)
            .unwrap_or_else(|| Value::Array(Vec::new()));
        let stats = map
            .remove(KEY_STATS)
            .unwrap_or_else(|| Value::Object(Map::new()));

        Ok(Self {
            sha,
            committer_date,
            project_id,
            files_modified,
            stats,
            payload: map,
        })
    }
}

/// A `[since, until)` date range bounding one listing sweep.
///
/// Either side may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl Window {
    pub fn new(since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        Self { since, until }
    }

    /// Whether `ts` falls inside the window (`since` inclusive, `until` exclusive).
    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        self.since.map_or(true, |since| *ts >= since) && self.until.map_or(true, |until| *ts < until)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let since = self.since.map(|ts| format_ts(&ts));
        let until = self.until.map(|ts| format_ts(&ts));
        write!(
            f,
            "[{}, {})",
            since.as_deref().unwrap_or("open"),
            until.as_deref().unwrap_or("open")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts(s: &str) -> DateTime<Utc> {
        parse_ts(s).unwrap()
    }

    #[test]
    fn parse_ts_normalizes_offsets() {
        let a = parse_ts("2020-01-01T02:00:00+02:00").unwrap();
        assert_eq!(format_ts(&a), "2020-01-01T00:00:00Z");
    }

    #[test]
    fn strict_parse_rejects_dates_without_time() {
        assert!(parse_ts_strict("2017-01-01").is_err());
        assert!(parse_ts_strict("2017-01-01T00:00:00+00:00").is_err());
        assert_eq!(
            format_ts(&parse_ts_strict(" 2017-01-01T00:00:00Z\n").unwrap()),
            "2017-01-01T00:00:00Z"
        );
    }

    #[test]
    fn summary_requires_sha_and_url() {
        assert!(CommitSummary::from_value(json!({"sha": "abc"})).is_none());
        let s = CommitSummary::from_value(json!({"sha": "abc", "url": "https://x/abc"})).unwrap();
        assert_eq!(s.sha, "abc");
        assert_eq!(s.url, "https://x/abc");
    }

    #[test]
    fn document_carries_typed_fields_over_payload() {
        let mut payload = Map::new();
        payload.insert("sha".into(), json!("abc"));
        payload.insert("html_url".into(), json!("https://example/abc"));
        let record = CommitRecord {
            sha: "abc".into(),
            committer_date: ts("2020-03-04T05:06:07Z"),
            project_id: "vscode".into(),
            files_modified: json!([{"filename": "a.rs"}]),
            stats: json!({"total": 3}),
            payload,
        };

        let doc = record.to_document();
        assert_eq!(doc["committerDate"], "2020-03-04T05:06:07Z");
        assert_eq!(doc["projectId"], "vscode");
        assert_eq!(doc["html_url"], "https://example/abc");

        let back = CommitRecord::from_document(doc).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn document_without_date_is_rejected() {
        let err = CommitRecord::from_document(json!({"sha": "abc", "projectId": "p"})).unwrap_err();
        assert!(err.to_string().contains("committerDate"));
    }

    #[test]
    fn window_bounds_are_half_open() {
        let w = Window::new(Some(ts("2020-01-01T00:00:00Z")), Some(ts("2020-02-01T00:00:00Z")));
        assert!(w.contains(&ts("2020-01-01T00:00:00Z")));
        assert!(w.contains(&ts("2020-01-31T23:59:59Z")));
        assert!(!w.contains(&ts("2020-02-01T00:00:00Z")));
        assert!(Window::default().contains(&ts("1999-01-01T00:00:00Z")));
        assert_eq!(w.to_string(), "[2020-01-01T00:00:00Z, 2020-02-01T00:00:00Z)");
        assert_eq!(
            Window::new(None, Some(ts("2020-02-01T00:00:00Z"))).to_string(),
            "[open, 2020-02-01T00:00:00Z)"
        );
    }
}
