use crate::error::SourceError;
use crate::observability::metrics;
use crate::pipeline::ingestion::rate_limiter::RateLimiter;
use crate::types::SourceTag;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded exponential backoff for retryable source failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first call
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 5_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base, 2x base, 4x base, ... capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

/// Wraps every outbound call of one source: rate limit, deadline, retry.
#[derive(Debug, Clone)]
pub struct RequestGovernor {
    limiter: RateLimiter,
    retry: RetryPolicy,
    timeout: Duration,
}

impl RequestGovernor {
    pub fn new(limiter: RateLimiter, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            limiter,
            retry,
            timeout,
        }
    }

    pub fn source(&self) -> SourceTag {
        self.limiter.source()
    }

    /// Run `op` under the governor. Each attempt takes a rate-limit slot and is
    /// cut off after the configured deadline.
    pub async fn call<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let source = self.source();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            self.limiter.acquire().await;
            let started = tokio::time::Instant::now();

            let outcome = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::Timeout {
                    after_secs: self.timeout.as_secs(),
                }),
            };
            metrics::sources::request_duration(source, started.elapsed().as_secs_f64());

            match outcome {
                Ok(value) => {
                    metrics::sources::request_success(source);
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        source = %source,
                        operation,
                        attempt,
                        error_kind = err.kind(),
                        delay_ms = delay.as_millis() as u64,
                        "retrying after {}",
                        err
                    );
                    metrics::sources::retry(source, err.kind());
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if let SourceError::RateLimitViolation(detail) = &err {
                        // The limiter should have prevented this
                        warn!(source = %source, operation, "provider rejected a governed call: {}", detail);
                    }
                    debug!(source = %source, operation, attempt, error_kind = err.kind(), "giving up");
                    metrics::sources::request_error(source, err.kind());
                    return Err(err);
                }
            }
        }
    }
}
