//! GitHub REST implementation of [`CommitSource`].
//!
//! Listing uses `GET /repos/{owner}/{project}/commits` with `since`, `until`,
//! `page` and `per_page`; details come from each summary's `url`. Every call
//! goes through the [`ResilientFetcher`], so quota and retry policy apply
//! uniformly.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use commit_mirror_core::models::{format_ts, parse_ts, CommitRecord, CommitSummary, Window};
use commit_mirror_core::source::{CommitSource, Outcome, SkipReason, DEFAULT_ESTIMATE};

use crate::config::Config;
use crate::fetcher::ResilientFetcher;
use crate::rate_governor::RateGovernor;
use crate::transport::{HttpResponse, ReqwestTransport, Transport};

pub struct GitHubSource {
    fetcher: ResilientFetcher,
    api_url: String,
    owner: String,
    project: String,
}

impl GitHubSource {
    pub fn new(fetcher: ResilientFetcher, api_url: &str, owner: &str, project: &str) -> Self {
        Self {
            fetcher,
            api_url: api_url.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            project: project.to_string(),
        }
    }

    /// Wire up transport, governor and fetcher from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(Duration::from_secs(
            config.upstream.timeout_secs,
        ))?);
        let governor = RateGovernor::new(
            transport.clone(),
            &config.upstream.api_url,
            config.tokens()?,
            config.rate_limit.clone(),
        )?;
        let fetcher = ResilientFetcher::new(transport, Arc::new(governor), &config.retry);
        Ok(Self::new(
            fetcher,
            &config.upstream.api_url,
            &config.upstream.owner,
            &config.upstream.project,
        ))
    }

    fn listing_url(&self, window: &Window, page: u32, per_page: u32) -> Result<String> {
        let base = format!(
            "{}/repos/{}/{}/commits",
            self.api_url, self.owner, self.project
        );
        let mut url = reqwest::Url::parse(&base).with_context(|| format!("bad API URL: {}", base))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("page", &page.to_string());
            query.append_pair("per_page", &per_page.to_string());
            if let Some(since) = window.since {
                query.append_pair("since", &format_ts(&since));
            }
            if let Some(until) = window.until {
                query.append_pair("until", &format_ts(&until));
            }
        }
        Ok(url.to_string())
    }

    async fn fetch_listing(
        &self,
        window: &Window,
        page: u32,
        per_page: u32,
    ) -> Outcome<HttpResponse> {
        match self.listing_url(window, page, per_page) {
            Ok(url) => self.fetcher.fetch(&url).await,
            Err(e) => Outcome::Skipped(SkipReason::Malformed(e.to_string())),
        }
    }

    fn record_from_detail(&self, detail: Value) -> Outcome<CommitRecord> {
        let mut payload = match detail {
            Value::Object(map) => map,
            _ => return Outcome::Skipped(SkipReason::Malformed("detail is not an object".into())),
        };

        let sha = match payload.get("sha").and_then(Value::as_str) {
            Some(sha) => sha.to_string(),
            None => return Outcome::Skipped(SkipReason::Malformed("detail has no sha".into())),
        };
        let committer_date = match payload
            .get("commit")
            .and_then(|c| c.get("committer"))
            .and_then(|c| c.get("date"))
            .and_then(Value::as_str)
            .map(parse_ts)
        {
            Some(Ok(date)) => date,
            Some(Err(e)) => return Outcome::Skipped(SkipReason::Malformed(e.to_string())),
            None => {
                return Outcome::Skipped(SkipReason::Malformed(format!(
                    "{} has no commit.committer.date",
                    sha
                )))
            }
        };

        let files_modified = payload
            .remove("files")
            .unwrap_or_else(|| Value::Array(Vec::new()));
        let stats = payload
            .remove("stats")
            .unwrap_or_else(|| Value::Object(Map::new()));

        Outcome::Fetched(CommitRecord {
            sha,
            committer_date,
            project_id: self.project.clone(),
            files_modified,
            stats,
            payload,
        })
    }
}

/// Page number of the `rel="last"` entry in a `Link` header.
pub fn last_page_from_link(link: &str) -> Option<u32> {
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        if !params.contains("rel=\"last\"") {
            return None;
        }
        let target = target.trim().trim_start_matches('<').trim_end_matches('>');
        let url = reqwest::Url::parse(target).ok()?;
        url.query_pairs()
            .find(|(key, _)| key == "page")
            .and_then(|(_, value)| value.parse().ok())
    })
}

fn summaries_from(response: &HttpResponse) -> Outcome<Vec<CommitSummary>> {
    let json = match response.json() {
        Ok(json) => json,
        Err(e) => return Outcome::Skipped(SkipReason::Malformed(e.to_string())),
    };
    match json {
        Value::Array(items) => {
            let total = items.len();
            let summaries: Vec<CommitSummary> =
                items.into_iter().filter_map(CommitSummary::from_value).collect();
            if summaries.len() < total {
                log::warn!(
                    "Dropped {} listing entries without sha or url",
                    total - summaries.len()
                );
            }
            Outcome::Fetched(summaries)
        }
        _ => Outcome::Skipped(SkipReason::Malformed(
            "listing response is not an array".into(),
        )),
    }
}

#[async_trait]
impl CommitSource for GitHubSource {
    fn project_id(&self) -> &str {
        &self.project
    }

    async fn list_page(
        &self,
        window: &Window,
        page: u32,
        per_page: u32,
    ) -> Outcome<Vec<CommitSummary>> {
        self.fetch_listing(window, page, per_page)
            .await
            .and_then(|response| summaries_from(&response))
    }

    async fn fetch_detail(&self, summary: &CommitSummary) -> Outcome<CommitRecord> {
        self.fetcher
            .fetch(&summary.url)
            .await
            .and_then(|response| match response.json() {
                Ok(json) => self.record_from_detail(json),
                Err(e) => Outcome::Skipped(SkipReason::Malformed(e.to_string())),
            })
    }

    async fn estimate_total(&self, since: Option<DateTime<Utc>>, per_page: u32) -> u64 {
        let window = Window::new(since, None);
        let response = match self.fetch_listing(&window, 1, per_page).await {
            Outcome::Fetched(response) => response,
            Outcome::Skipped(reason) => {
                log::warn!("Could not estimate total commits: {}", reason);
                return DEFAULT_ESTIMATE;
            }
        };

        if let Some(last) = response.link.as_deref().and_then(last_page_from_link) {
            return last as u64 * per_page as u64;
        }
        match summaries_from(&response) {
            // An empty first page says nothing about the history's size.
            Outcome::Fetched(items) if items.is_empty() => DEFAULT_ESTIMATE,
            Outcome::Fetched(items) => items.len() as u64 * 100,
            Outcome::Skipped(reason) => {
                log::warn!("Could not estimate total commits: {}", reason);
                DEFAULT_ESTIMATE
            }
        }
    }
}
