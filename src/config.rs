//! Configuration parsing and validation.
//!
//! Configuration is loaded from a TOML file (default `config/cmirror.toml`).
//! Only `[upstream]` and `[store]` are required; every other section falls
//! back to defaults.
//!
//! # Example
//!
//! ```toml
//! [upstream]
//! owner = "microsoft"
//! project = "vscode"
//! start_date = "2018-01-01T00:00:00Z"
//! per_page = 100
//!
//! [rate_limit]
//! threshold = 100
//!
//! [ingest]
//! workers = 10
//!
//! [store]
//! backend = "local"
//! path = "./data/commits.sqlite"
//! ```
//!
//! # Credentials
//!
//! API tokens are read from `GITHUB_TOKENS` (comma-separated), then
//! `GITHUB_TOKEN`, then `[upstream].tokens`. With more than one token the
//! rate governor rotates between them instead of waiting for a reset.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use commit_mirror_core::models::{parse_ts_strict, TIMESTAMP_FORMAT};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    pub owner: String,
    pub project: String,
    #[serde(default = "default_start_date")]
    pub start_date: String,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub tokens: Vec<String>,
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_start_date() -> String {
    "2018-01-01T00:00:00Z".to_string()
}
fn default_per_page() -> u32 {
    100
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    /// Rotate or wait once remaining quota drops below this.
    #[serde(default = "default_threshold")]
    pub threshold: u64,
    /// Log quota status every N checks.
    #[serde(default = "default_report_every")]
    pub report_every: u64,
    #[serde(default = "default_reset_margin_secs")]
    pub reset_margin_secs: u64,
    #[serde(default = "default_quota_retries")]
    pub quota_retries: u32,
    #[serde(default = "default_quota_retry_delay_secs")]
    pub quota_retry_delay_secs: u64,
    /// Sleep applied when the quota endpoint can't be reached at all.
    #[serde(default = "default_fallback_sleep_secs")]
    pub fallback_sleep_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            report_every: default_report_every(),
            reset_margin_secs: default_reset_margin_secs(),
            quota_retries: default_quota_retries(),
            quota_retry_delay_secs: default_quota_retry_delay_secs(),
            fallback_sleep_secs: default_fallback_sleep_secs(),
        }
    }
}

fn default_threshold() -> u64 {
    100
}
fn default_report_every() -> u64 {
    10
}
fn default_reset_margin_secs() -> u64 {
    5
}
fn default_quota_retries() -> u32 {
    3
}
fn default_quota_retry_delay_secs() -> u64 {
    5
}
fn default_fallback_sleep_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff after attempt `n` is `backoff_base_secs * 2^n`.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_secs() -> u64 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Width of the detail fan-out worker pool.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_elapsed_file")]
    pub elapsed_file: PathBuf,
    /// `human`, `json` or `off`. Unset: human on a TTY, otherwise off.
    #[serde(default)]
    pub progress: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            elapsed_file: default_elapsed_file(),
            progress: None,
        }
    }
}

fn default_workers() -> usize {
    10
}
fn default_elapsed_file() -> PathBuf {
    PathBuf::from("ingestion_time.json")
}

/// Which document store to mirror into.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// SQLite file on this machine.
    Local,
    /// PostgreSQL server.
    Remote,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// Connection URL for the remote backend. Falls back to `DATABASE_URL`.
    #[serde(default)]
    pub url: Option<String>,
}

fn default_backend() -> StoreBackend {
    StoreBackend::Local
}
fn default_store_path() -> PathBuf {
    PathBuf::from("./data/commits.sqlite")
}

impl Config {
    /// Project identifier stamped on stored records.
    pub fn project_id(&self) -> &str {
        &self.upstream.project
    }

    /// Lower bound for the initial sweep.
    pub fn start_date(&self) -> Result<DateTime<Utc>> {
        parse_ts_strict(&self.upstream.start_date).context("upstream.start_date")
    }

    /// API tokens, in rotation order.
    pub fn tokens(&self) -> Result<Vec<String>> {
        let from_env = std::env::var("GITHUB_TOKENS")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| std::env::var("GITHUB_TOKEN").ok());

        let tokens: Vec<String> = match from_env {
            Some(raw) => split_tokens(&raw),
            None => self
                .upstream
                .tokens
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        };

        if tokens.is_empty() {
            bail!("No API token configured: set GITHUB_TOKENS or GITHUB_TOKEN, or upstream.tokens");
        }
        Ok(tokens)
    }

    /// Connection URL for the remote store.
    pub fn remote_url(&self) -> Result<String> {
        match &self.store.url {
            Some(url) => Ok(url.clone()),
            None => std::env::var("DATABASE_URL")
                .context("store.url is not set and DATABASE_URL environment variable not set"),
        }
    }
}

fn split_tokens(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.upstream.owner.trim().is_empty() || config.upstream.project.trim().is_empty() {
        bail!("upstream.owner and upstream.project must be set");
    }

    if parse_ts_strict(&config.upstream.start_date).is_err() {
        bail!(
            "upstream.start_date must use the {} layout, got '{}'",
            TIMESTAMP_FORMAT,
            config.upstream.start_date
        );
    }

    if !(1..=100).contains(&config.upstream.per_page) {
        bail!("upstream.per_page must be in [1, 100]");
    }

    if config.retry.max_attempts == 0 {
        bail!("retry.max_attempts must be >= 1");
    }

    if config.ingest.workers == 0 {
        bail!("ingest.workers must be >= 1");
    }

    match config.ingest.progress.as_deref() {
        None | Some("human") | Some("json") | Some("off") => {}
        Some(other) => bail!(
            "Unknown ingest.progress: '{}'. Must be human, json, or off.",
            other
        ),
    }

    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}
