//! Raw HTTP access to the hosting API.
//!
//! [`Transport`] performs exactly one authenticated GET and reports what came
//! back; it has no retry or quota policy. The rate governor and the
//! resilient fetcher build on top of it, which keeps both testable against
//! scripted responses.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

/// What one GET returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Raw `Link` header, when the endpoint paginates.
    pub link: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn json(&self) -> Result<serde_json::Value> {
        serde_json::from_str(&self.body).context("response body is not valid JSON")
    }
}

/// A single authenticated GET.
///
/// `Err` means no HTTP status was obtained at all (connect failure,
/// timeout, broken body); any status, including 5xx, is an `Ok`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, token: &str) -> Result<HttpResponse>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cmirror/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, token: &str) -> Result<HttpResponse> {
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("token {}", token))
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await?;

        let status = response.status().as_u16();
        let link = response
            .headers()
            .get(reqwest::header::LINK)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok(HttpResponse { status, link, body })
    }
}

/// Mask a credential for log output: first 8 characters, then `...`.
pub fn mask_token(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    format!("{}...", prefix)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_keeps_prefix_only() {
        assert_eq!(mask_token("ghp_1234567890abcdef"), "ghp_1234...");
        assert_eq!(mask_token("abc"), "abc...");
    }

    #[test]
    fn json_body_errors_are_reported() {
        let resp = HttpResponse {
            status: 200,
            link: None,
            body: "<html>".to_string(),
        };
        assert!(resp.json().is_err());
    }
}
