//! Retry policy for transient remote failures.
//!
//! Only [`FailureClass::Retryable`] errors are retried (network, 5xx, rate limit).
//! Backoff is exponential with jitter, bounded by attempt count and total
//! elapsed time. On exhaustion the last error is returned unchanged. A
//! `Retry-After` hint longer than `max_delay` ends retrying at once.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::{Instant, sleep};

use crate::config::RetryConfig;
use crate::error::{ClientError, FailureClass};

const MAX_BACKOFF_SHIFT: u32 = 16;

/// Tagged outcome of a single attempt.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    /// Operation succeeded.
    Success(T),
    /// Transient failure; another attempt may succeed.
    Retryable(ClientError),
    /// Permanent failure; return immediately.
    Fatal(ClientError),
}

impl<T> From<Result<T, ClientError>> for AttemptOutcome<T> {
    fn from(result: Result<T, ClientError>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(error) => match error.class() {
                FailureClass::Retryable => Self::Retryable(error),
                FailureClass::Fatal => Self::Fatal(error),
            },
        }
    }
}

/// Exponential backoff with jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Policy from settings.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Underlying settings.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Un-jittered delay after `failed_attempts` consecutive failures (1-based).
    #[must_use]
    pub fn backoff_ceiling(&self, failed_attempts: u32) -> Duration {
        let shift = failed_attempts.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        let base_ms = self.config.base_delay_ms.saturating_mul(1_u64 << shift);
        Duration::from_millis(base_ms.min(self.config.max_delay_ms))
    }

    /// Delay before the next attempt. A rate-limit hint wins over the computed
    /// backoff and is returned as given; [`RetryPolicy::run`] refuses to wait
    /// on a hint beyond `max_delay`.
    #[must_use]
    pub fn next_delay(&self, failed_attempts: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint;
        }
        let ceiling = self.backoff_ceiling(failed_attempts);
        if !self.config.jitter {
            return ceiling;
        }
        let ceiling_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        if ceiling_ms < 2 {
            return ceiling;
        }
        let jittered = rand::thread_rng().gen_range(ceiling_ms / 2..=ceiling_ms);
        Duration::from_millis(jittered)
    }

    /// Run `operation` until it succeeds, fails fatally, or the policy is exhausted.
    ///
    /// # Errors
    /// Returns the last [`ClientError`] as produced by `operation`.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let started = Instant::now();
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0_u32;
        loop {
            attempt = attempt.saturating_add(1);
            let error = match AttemptOutcome::from(attempt_fn().await) {
                AttemptOutcome::Success(value) => {
                    if attempt > 1 {
                        tracing::debug!(
                            event = "omem.retry.recovered",
                            operation,
                            attempt,
                            elapsed_ms = started.elapsed().as_millis(),
                            "operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                AttemptOutcome::Fatal(error) => {
                    tracing::debug!(
                        event = "omem.retry.fatal",
                        operation,
                        attempt,
                        error = %error,
                        "operation failed with non-retryable error"
                    );
                    return Err(error);
                }
                AttemptOutcome::Retryable(error) => error,
            };

            if attempt >= max_attempts {
                tracing::warn!(
                    event = "omem.retry.exhausted",
                    operation,
                    attempt,
                    reason = "max_attempts",
                    error = %error,
                    "retry budget exhausted"
                );
                return Err(error);
            }

            let hint = error.retry_after();
            if hint.is_some_and(|hint| hint > self.config.max_delay()) {
                tracing::warn!(
                    event = "omem.retry.exhausted",
                    operation,
                    attempt,
                    reason = "retry_after_exceeds_max_delay",
                    retry_after_ms = hint.map_or(0, |hint| hint.as_millis()),
                    error = %error,
                    "server asked to wait longer than allowed"
                );
                return Err(error);
            }

            let delay = self.next_delay(attempt, hint);
            if started.elapsed() + delay > self.config.max_elapsed() {
                tracing::warn!(
                    event = "omem.retry.exhausted",
                    operation,
                    attempt,
                    reason = "max_elapsed",
                    elapsed_ms = started.elapsed().as_millis(),
                    error = %error,
                    "retry budget exhausted"
                );
                return Err(error);
            }

            tracing::debug!(
                event = "omem.retry.scheduled",
                operation,
                attempt,
                delay_ms = delay.as_millis(),
                error = %error,
                "transient failure; retrying"
            );
            sleep(delay).await;
        }
    }
}
