//! One logical GET with bounded retries.
//!
//! Every attempt is gated by [`RateGovernor::acquire`] and sent with the
//! credential that is active at that moment, so a rotation that happens
//! mid-retry is picked up by the next attempt.
//!
//! Status handling:
//! - 200 → returned immediately.
//! - 400, 404, 409 → skipped, no retry.
//! - 500 → retried with exponential backoff.
//! - any other status → skipped as unexpected.
//! - transport errors (connect, timeout, broken body) → retried.
//!
//! Backoff after attempt `n` (1-based) is `backoff_base * 2^n`; there is
//! no sleep after the final attempt.

use std::sync::Arc;
use std::time::Duration;

use commit_mirror_core::source::{Outcome, SkipReason};

use crate::config::RetryConfig;
use crate::rate_governor::RateGovernor;
use crate::transport::{HttpResponse, Transport};

pub struct ResilientFetcher {
    transport: Arc<dyn Transport>,
    governor: Arc<RateGovernor>,
    max_attempts: u32,
    backoff_base: Duration,
}

impl ResilientFetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        governor: Arc<RateGovernor>,
        retry: &RetryConfig,
    ) -> Self {
        Self {
            transport,
            governor,
            max_attempts: retry.max_attempts.max(1),
            backoff_base: Duration::from_secs(retry.backoff_base_secs),
        }
    }

    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    pub async fn fetch(&self, url: &str) -> Outcome<HttpResponse> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            self.governor.acquire().await;
            let token = self.governor.active_token();

            match self.transport.get(url, &token).await {
                Ok(response) => match response.status {
                    200 => return Outcome::Fetched(response),
                    400 | 404 | 409 => {
                        log::warn!("{} returned HTTP {}; not retrying", url, response.status);
                        return Outcome::Skipped(SkipReason::ClientError(response.status));
                    }
                    500 => {
                        log::warn!(
                            "{} returned HTTP 500 (attempt {}/{})",
                            url,
                            attempt,
                            self.max_attempts
                        );
                        last_error = "HTTP 500".to_string();
                    }
                    other => {
                        log::warn!("{} returned unexpected HTTP {}", url, other);
                        return Outcome::Skipped(SkipReason::UnexpectedStatus(other));
                    }
                },
                Err(e) => {
                    log::warn!(
                        "Request to {} failed (attempt {}/{}): {}",
                        url,
                        attempt,
                        self.max_attempts,
                        e
                    );
                    last_error = e.to_string();
                }
            }

            if attempt < self.max_attempts {
                let delay = self.backoff_base * 2u32.pow(attempt.min(6));
                log::debug!("Retrying {} in {:?}", url, delay);
                tokio::time::sleep(delay).await;
            }
        }

        log::error!(
            "Giving up on {} after {} attempts: {}",
            url,
            self.max_attempts,
            last_error
        );
        Outcome::Skipped(SkipReason::Exhausted {
            attempts: self.max_attempts,
            last_error,
        })
    }
}
