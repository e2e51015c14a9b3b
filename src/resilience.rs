//! Caller-side retry policy.
//!
//! The engines make one attempt per call. Callers that want retries wrap
//! the call in [`RetryPolicy::run`]: each attempt gets a timeout, and only
//! retryable errors ([`IndexError::is_retryable`]) are tried again, with
//! exponential backoff between attempts.

use std::future::Future;
use std::time::Duration;

use eprint_index_core::error::{IndexError, IndexResult};

use crate::config::ResilienceConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
        }
    }

    /// Backoff before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(20);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub async fn run<T, F, Fut>(&self, mut op: F) -> IndexResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = IndexResult<T>>,
    {
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                tokio::time::sleep(self.delay_for(attempt)).await;
            }

            let result = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(IndexError::Transient(anyhow::anyhow!(
                    "attempt timed out after {:?}",
                    self.attempt_timeout
                ))),
            };

            match result {
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, max_retries = self.max_retries, error = %e, "retrying");
                }
                other => return other,
            }
        }
    }
}
