//! Bounded retry for vendor REST calls.
//!
//! Only HTTP 429 is retried; transport errors and other statuses are returned
//! to the caller immediately.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound for any single wait, including server-provided `Retry-After`
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (0-based): `base * 2^retry`, or the
    /// server's `Retry-After`, capped at `max_delay`.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self.base_delay.saturating_mul(2u32.saturating_pow(retry));
        retry_after.unwrap_or(backoff).min(self.max_delay)
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Send a request built by `build`, retrying on 429 per `policy`.
///
/// `build` is called once per attempt because request bodies (multipart in
/// particular) cannot be replayed.
pub async fn send_with_retry<F>(policy: &RetryPolicy, service: &'static str, build: F) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let response = build()
            .send()
            .await
            .map_err(|e| AppError::upstream(service, e.to_string()))?;

        if response.status() != StatusCode::TOO_MANY_REQUESTS {
            return Ok(response);
        }
        if attempt >= policy.max_attempts {
            return Err(AppError::upstream(
                service,
                format!("rate limited after {} attempts", attempt),
            ));
        }

        let wait = policy.delay_for(attempt - 1, retry_after(&response));
        tracing::warn!(service, attempt, wait_ms = wait.as_millis() as u64, "429 received, backing off");
        tokio::time::sleep(wait).await;
    }
}

/// Turn a non-2xx response into an `Upstream` error carrying the body text.
pub async fn ensure_success(response: Response, service: &'static str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(500).collect();
    Err(AppError::upstream(service, format!("HTTP {}: {}", status, body)))
}

pub async fn json_body<T: DeserializeOwned>(response: Response, service: &'static str) -> Result<T> {
    let response = ensure_success(response, service).await?;
    response
        .json()
        .await
        .map_err(|e| AppError::upstream(service, format!("invalid response body: {}", e)))
}
