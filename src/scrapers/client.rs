use crate::scrapers::traits::DivarApi;
use anyhow::{Context, Result};
use async_trait::async_trait;
use backon::{ConstantBuilder, Retryable};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Bounded retry with a fixed delay, applied beneath every request
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// 429 and any 5xx are worth another attempt
    pub fn is_retryable(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    fn backoff(&self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(self.delay)
            .with_max_times(self.retries as usize)
    }
}

/// Failure of a single request attempt
#[derive(Debug, Error)]
enum SendError {
    #[error("failed to reach {path}")]
    Transport { path: String, source: reqwest::Error },

    #[error("upstream {path} returned status: {status}")]
    Status { path: String, status: StatusCode },

    #[error("invalid JSON from {path}")]
    Body { path: String, source: reqwest::Error },
}

impl SendError {
    fn is_retryable(&self) -> bool {
        matches!(self, SendError::Status { status, .. } if RetryPolicy::is_retryable(*status))
    }
}

/// reqwest-backed client for the listing service
pub struct DivarClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl DivarClient {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36")
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, path: &str, build: impl Fn() -> RequestBuilder) -> Result<Value> {
        let build = &build;
        let attempt = || async move {
            debug!(path, "Requesting upstream");
            let response = build().send().await.map_err(|source| SendError::Transport {
                path: path.to_string(),
                source,
            })?;

            let status = response.status();
            if !status.is_success() {
                return Err(SendError::Status {
                    path: path.to_string(),
                    status,
                });
            }
            response.json::<Value>().await.map_err(|source| SendError::Body {
                path: path.to_string(),
                source,
            })
        };

        let value = attempt
            .retry(self.retry.backoff())
            .sleep(tokio::time::sleep)
            .when(SendError::is_retryable)
            .notify(|err: &SendError, delay: Duration| {
                warn!(path, delay_ms = delay.as_millis(), error = %err, "Retryable upstream status, backing off");
            })
            .await?;
        Ok(value)
    }
}

#[async_trait]
impl DivarApi for DivarClient {
    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.url(path);
        self.send(path, || self.client.post(&url).json(body)).await
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let url = self.url(path);
        self.send(path, || {
            self.client
                .get(&url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
        })
        .await
    }
}
