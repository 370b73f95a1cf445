use async_trait::async_trait;
use railmind_common::{RailmindError, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::client::{LlmClient, LlmRequest, LlmResponse};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Retries rate-limited and 5xx failures with exponential backoff.
pub struct RetryingClient<T: LlmClient> {
    inner: T,
    config: RetryConfig,
}

impl<T: LlmClient> RetryingClient<T> {
    pub fn new(inner: T, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    fn parse_retry_after(error_msg: &str) -> Option<u64> {
        let lower = error_msg.to_lowercase();
        let pos = lower.find("retry-after")?;
        let after = &error_msg[pos..];
        for word in after.split_whitespace().skip(1) {
            let cleaned = word.trim_end_matches(|c: char| !c.is_ascii_digit());
            if let Ok(secs) = cleaned.parse::<u64>() {
                return Some(secs * 1000);
            }
        }
        None
    }

    fn compute_delay(&self, attempt: u32) -> u64 {
        let base = self.config.initial_delay_ms as f64
            * self.config.backoff_multiplier.powi(attempt as i32);
        let jitter = (base * 0.1 * rand_jitter(attempt)) as u64;
        let delay = (base as u64).saturating_add(jitter);
        delay.min(self.config.max_delay_ms)
    }

    fn delay_for(&self, error: &RailmindError, attempt: u32) -> u64 {
        let hinted = match error {
            RailmindError::RateLimited(msg) => Self::parse_retry_after(msg),
            _ => None,
        };
        hinted
            .map(|ms| ms.min(self.config.max_delay_ms))
            .unwrap_or_else(|| self.compute_delay(attempt))
    }
}

/// Deterministic jitter derived from the attempt number.
fn rand_jitter(attempt: u32) -> f64 {
    let x = attempt.wrapping_mul(2654435761);
    (x % 100) as f64 / 100.0
}

#[async_trait]
impl<T: LlmClient> LlmClient for RetryingClient<T> {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let mut attempt = 0;
        loop {
            let error = match self.inner.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if attempt >= self.config.max_retries || !error.is_transient() {
                return Err(error);
            }

            let delay = self.delay_for(&error, attempt);
            warn!(
                attempt = attempt + 1,
                max_retries = self.config.max_retries,
                delay_ms = delay,
                error = %error,
                "Retrying reasoning call"
            );
            tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
            attempt += 1;
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedClient;

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn default_retry_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_delay_ms, 500);
        assert_eq!(config.max_delay_ms, 30_000);
        assert!((config.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_retry_after_from_error() {
        let msg = "HTTP 429 Too Many Requests, Retry-After: 5: slow down";
        assert_eq!(RetryingClient::<ScriptedClient>::parse_retry_after(msg), Some(5000));
        assert_eq!(RetryingClient::<ScriptedClient>::parse_retry_after("HTTP 429"), None);
    }

    #[test]
    fn compute_delay_respects_max() {
        let client = RetryingClient::new(
            ScriptedClient::replying("{}"),
            RetryConfig {
                max_retries: 5,
                initial_delay_ms: 500,
                max_delay_ms: 2000,
                backoff_multiplier: 10.0,
            },
        );
        assert!(client.compute_delay(5) <= 2000);
    }

    #[tokio::test]
    async fn retries_rate_limit_then_succeeds() {
        let inner = ScriptedClient::from_fn(|_, call| {
            if call < 2 {
                Err(RailmindError::RateLimited("HTTP 429".to_string()))
            } else {
                Ok("{\"ok\": true}".to_string())
            }
        });
        let client = RetryingClient::new(inner.clone(), fast_config(3));
        let response = client.complete(LlmRequest::default()).await.unwrap();
        assert_eq!(response.content, "{\"ok\": true}");
        assert_eq!(inner.call_count(), 3);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let inner = ScriptedClient::failing(|| RailmindError::Provider("HTTP 401 Unauthorized".into()));
        let client = RetryingClient::new(inner.clone(), fast_config(3));
        assert!(client.complete(LlmRequest::default()).await.is_err());
        assert_eq!(inner.call_count(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let inner = ScriptedClient::failing(|| RailmindError::Provider("HTTP 503 Service Unavailable".into()));
        let client = RetryingClient::new(inner.clone(), fast_config(2));
        let err = client.complete(LlmRequest::default()).await.unwrap_err();
        assert!(matches!(err, RailmindError::Provider(_)));
        assert_eq!(inner.call_count(), 3);
    }
}
