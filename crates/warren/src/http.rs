//! Outbound JSON POST with retry, shared by the embedding and LLM clients.
//!
//! - HTTP 429 and 5xx: retry with exponential backoff
//! - other 4xx: fail immediately
//! - network errors: retry
//!
//! Backoff doubles from `base` per attempt and is capped at `base × 32`.

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tracing::warn;

/// Default first retry delay.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum HttpFailure {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Network(String),
    #[error("invalid JSON response: {0}")]
    Decode(String),
}

impl HttpFailure {
    pub fn is_retryable(&self) -> bool {
        match self {
            HttpFailure::Status { status, .. } => *status == 429 || *status >= 500,
            HttpFailure::Network(_) => true,
            HttpFailure::Decode(_) => false,
        }
    }
}

/// Delay before retry `attempt` (1-based).
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * (1u32 << (attempt.saturating_sub(1)).min(5))
}

/// POST `body` to `url`, retrying up to `max_retries` times.
pub async fn post_json(
    client: &Client,
    url: &str,
    headers: &[(&str, String)],
    body: &serde_json::Value,
    max_retries: u32,
    base: Duration,
) -> Result<serde_json::Value, HttpFailure> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            tokio::time::sleep(backoff_delay(base, attempt)).await;
        }

        let mut request = client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        let err = match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| HttpFailure::Decode(e.to_string()));
                }
                let body = response.text().await.unwrap_or_default();
                HttpFailure::Status {
                    status: status.as_u16(),
                    body,
                }
            }
            Err(e) => HttpFailure::Network(e.to_string()),
        };

        if !err.is_retryable() {
            return Err(err);
        }
        warn!(url, attempt, error = %err, "retryable request failure");
        last_err = Some(err);
    }

    Err(last_err.unwrap_or_else(|| HttpFailure::Network("no attempts made".to_string())))
}
