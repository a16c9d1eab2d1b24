//! Upstream quota tracking and credential rotation.
//!
//! Before every upstream call the fetcher asks the [`RateGovernor`] for
//! permission. The governor queries the quota endpoint with the active
//! credential and, when remaining quota is under the threshold, either
//! rotates to the next credential (preferred) or, once every credential
//! has been seen low, sleeps until the earliest of their resets and
//! resumes on the credential that resets first.
//!
//! # Shared state
//!
//! The active-credential index is the only mutable state and is shared by
//! every enrichment worker. Rotation is a compare-and-rotate under a
//! mutex: a worker only advances the index if it is still the one it
//! measured, so concurrent workers that saw the same exhausted credential
//! rotate once, not once each. The lock is never held across an await.
//!
//! # Failure handling
//!
//! If the quota endpoint can't be read after `quota_retries` attempts, the
//! governor sleeps `fallback_sleep_secs` and lets the call through.

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::RateLimitConfig;
use crate::progress::format_hms;
use crate::transport::{mask_token, Transport};

/// Remaining calls and the instant (epoch seconds) the window resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub remaining: u64,
    pub reset_epoch: i64,
}

struct GovernorState {
    active: usize,
    checks: u64,
}

pub struct RateGovernor {
    transport: Arc<dyn Transport>,
    quota_url: String,
    tokens: Vec<String>,
    settings: RateLimitConfig,
    state: Mutex<GovernorState>,
}

impl RateGovernor {
    pub fn new(
        transport: Arc<dyn Transport>,
        api_url: &str,
        tokens: Vec<String>,
        settings: RateLimitConfig,
    ) -> Result<Self> {
        if tokens.is_empty() {
            bail!("rate governor needs at least one credential");
        }
        Ok(Self {
            transport,
            quota_url: format!("{}/rate_limit", api_url.trim_end_matches('/')),
            tokens,
            settings,
            state: Mutex::new(GovernorState {
                active: 0,
                checks: 0,
            }),
        })
    }

    /// Credential every upstream call should currently use.
    pub fn active_token(&self) -> String {
        let index = self.state.lock().unwrap().active;
        self.tokens[index].clone()
    }

    pub fn active_index(&self) -> usize {
        self.state.lock().unwrap().active
    }

    /// Block until a call is permitted.
    ///
    /// Returns the remaining quota last observed, or `None` when the quota
    /// endpoint could not be read and the fallback sleep was applied.
    pub async fn acquire(&self) -> Option<u64> {
        let mut rotations = 0;
        // (reset_epoch, index) of the soonest-resetting low credential.
        let mut earliest: Option<(i64, usize)> = None;
        loop {
            let (index, token) = {
                let state = self.state.lock().unwrap();
                (state.active, self.tokens[state.active].clone())
            };

            let quota = match self.query_with_retries(&token).await {
                Some(quota) => quota,
                None => {
                    let fallback = Duration::from_secs(self.settings.fallback_sleep_secs);
                    log::warn!(
                        "Could not read rate limit after {} attempts; waiting {} seconds",
                        self.settings.quota_retries,
                        fallback.as_secs()
                    );
                    tokio::time::sleep(fallback).await;
                    return None;
                }
            };

            let checks = {
                let mut state = self.state.lock().unwrap();
                state.checks += 1;
                state.checks
            };
            let low = quota.remaining < self.settings.threshold;
            if low || checks % self.settings.report_every.max(1) == 0 {
                log::info!(
                    "Remaining requests with token {}: {}, next reset at {}",
                    mask_token(&token),
                    quota.remaining,
                    format_epoch(quota.reset_epoch)
                );
            }
            if !low {
                return Some(quota.remaining);
            }
            if earliest.map_or(true, |(reset, _)| quota.reset_epoch < reset) {
                earliest = Some((quota.reset_epoch, index));
            }

            // Prefer another credential over waiting, but only try each once.
            if rotations + 1 < self.tokens.len() {
                self.rotate_from(index);
                rotations += 1;
                continue;
            }

            let (reset_epoch, soonest) = earliest.unwrap_or((quota.reset_epoch, index));
            let wait = self.wait_until_reset(reset_epoch);
            log::info!(
                "Rate limit reached on every token; waiting {} (resumes after {})",
                format_hms(wait.as_secs()),
                format_epoch(reset_epoch)
            );
            tokio::time::sleep(wait).await;
            self.switch_to(soonest);
            return Some(quota.remaining);
        }
    }

    /// Advance to the next credential if `seen` is still the active one.
    fn rotate_from(&self, seen: usize) {
        let mut state = self.state.lock().unwrap();
        if state.active == seen {
            state.active = (seen + 1) % self.tokens.len();
            log::info!(
                "Rate limit low; switching to token {}",
                mask_token(&self.tokens[state.active])
            );
        }
    }

    fn switch_to(&self, index: usize) {
        let mut state = self.state.lock().unwrap();
        if state.active != index {
            state.active = index;
            log::info!(
                "Resuming with token {}",
                mask_token(&self.tokens[state.active])
            );
        }
    }

    fn wait_until_reset(&self, reset_epoch: i64) -> Duration {
        let now = Utc::now().timestamp();
        let secs = (reset_epoch - now + self.settings.reset_margin_secs as i64).max(0);
        Duration::from_secs(secs as u64)
    }

    async fn query_with_retries(&self, token: &str) -> Option<Quota> {
        let attempts = self.settings.quota_retries.max(1);
        for attempt in 1..=attempts {
            match self.query_quota(token).await {
                Ok(quota) => return Some(quota),
                Err(e) => {
                    log::warn!(
                        "Rate limit check failed (attempt {}/{}): {}",
                        attempt,
                        attempts,
                        e
                    );
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_secs(
                            self.settings.quota_retry_delay_secs,
                        ))
                        .await;
                    }
                }
            }
        }
        None
    }

    async fn query_quota(&self, token: &str) -> Result<Quota> {
        let response = self.transport.get(&self.quota_url, token).await?;
        if response.status != 200 {
            bail!("quota endpoint returned HTTP {}", response.status);
        }
        let json = response.json()?;
        let core = &json["resources"]["core"];
        let remaining = core["remaining"]
            .as_u64()
            .ok_or_else(|| anyhow!("quota response missing resources.core.remaining"))?;
        let reset_epoch = core["reset"]
            .as_i64()
            .ok_or_else(|| anyhow!("quota response missing resources.core.reset"))?;
        Ok(Quota {
            remaining,
            reset_epoch,
        })
    }
}

fn format_epoch(epoch: i64) -> String {
    chrono::DateTime::from_timestamp(epoch, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| epoch.to_string())
}
