//! Retry policy for remote calls.
//!
//! Transient failures (rate limiting, 5xx, network) are retried with
//! exponential backoff: `base_delay * 2^attempt`, capped at `max_delay`,
//! optionally jittered, and bounded by both an attempt count and a total
//! wait budget. Everything else fails immediately.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::RemoteError;

/// Decision for a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Retry after the computed backoff.
    Backoff,
    /// Retry after the given delay instead of the computed backoff.
    After(Duration),
    /// Do not retry.
    Fail,
}

/// Maps a remote error to a retry decision.
pub type Classifier = fn(&RemoteError) -> Retry;

/// Default classification: rate limits and transient failures retry.
pub fn default_classify(err: &RemoteError) -> Retry {
    match err {
        RemoteError::RateLimited {
            retry_after: Some(delay),
        } => Retry::After(*delay),
        RemoteError::RateLimited { retry_after: None } => Retry::Backoff,
        RemoteError::Transient(_) => Retry::Backoff,
        _ => Retry::Fail,
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound on the sum of all sleeps for one call.
    pub max_total_wait: Duration,
    /// Scale each delay by a random factor in `[0.5, 1.0]`.
    pub jitter: bool,
    pub classify: Classifier,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_total_wait: Duration::from_secs(120),
            jitter: true,
            classify: default_classify,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        }
    }

    /// Backoff before retry number `attempt` (0-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.5..=1.0);
        delay.mul_f64(factor)
    }

    /// Run `op` until it succeeds, fails permanently, or the policy is
    /// exhausted.
    pub async fn run<T, F, Fut>(&self, operation: &str, op: F) -> Result<T, RemoteError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut waited = Duration::ZERO;
        let mut attempt = 0;
        loop {
            let err = match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(operation, attempt, "[REMOTE] Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let delay = match (self.classify)(&err) {
                Retry::Fail => return Err(err),
                Retry::Backoff => self.jittered(self.backoff(attempt)),
                Retry::After(delay) => delay.min(self.max_delay),
            };

            attempt += 1;
            if attempt >= max_attempts || waited + delay > self.max_total_wait {
                warn!(operation, attempts = attempt, error = %err, "[REMOTE] Retries exhausted");
                return Err(RemoteError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "[REMOTE] Transient error, retrying"
            );
            tokio::time::sleep(delay).await;
            waited += delay;
        }
    }
}
