//! Retry primitives shared by the paginator, the orchestrator, and the
//! download manager.
//!
//! Two recovery shapes exist: bounded exponential backoff with jitter for
//! rate-limit/5xx failures, and a fixed cancellable cooldown for network
//! failures that may persist for minutes (the cooldown repeats until the
//! request succeeds or the cycle is cancelled).

use std::future::Future;
use std::time::Duration;

use rand::Rng as _;
use tokio_util::sync::CancellationToken;

/// Retry decision returned by the error classifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// Exponential backoff configuration with jitter to prevent thundering herd
/// when multiple concurrent downloads hit the same transient failure.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_secs: 1,
            max_delay_secs: 60,
        }
    }
}

impl RetryConfig {
    /// Compute the delay for a given retry attempt (0-indexed).
    ///
    /// Formula: `min(base_delay * 2^retry, max_delay) + random_jitter(0..base_delay)`
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exp_delay = self
            .base_delay_secs
            .saturating_mul(1u64.checked_shl(retry).unwrap_or(u64::MAX));
        let capped = exp_delay.min(self.max_delay_secs);
        let jitter = if self.base_delay_secs > 0 {
            rand::thread_rng().gen_range(0..self.base_delay_secs)
        } else {
            0
        };
        Duration::from_secs(capped + jitter)
    }
}

/// Per-class recovery bounds applied by the orchestrator to page failures.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryPolicy {
    /// Backoff schedule for rate-limit and transient-server failures.
    pub backoff: RetryConfig,
    /// Re-authentication attempts before an auth failure becomes fatal.
    pub auth_attempts: u32,
    /// Cooldown between retries of a network failure. Unlike backoff this
    /// repeats without bound; only cancellation ends it.
    pub network_cooldown: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            backoff: RetryConfig::default(),
            auth_attempts: 3,
            network_cooldown: Duration::from_secs(60),
        }
    }
}

/// Sleep for `delay` unless cancelled first. Returns false when cancelled.
pub async fn cancellable_sleep(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Retry an async operation with exponential backoff and jitter.
///
/// - `config`: retry configuration
/// - `classifier`: inspects an error and returns `Retry` or `Abort`
/// - `operation`: the async closure to retry
///
/// Returns the first `Ok` result, or the last error if retries are exhausted
/// or the classifier returns `Abort`.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    classifier: C,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let total_attempts = config.max_retries + 1; // 1 initial + max_retries retries
    let mut last_err: Option<E> = None;

    for attempt in 0..total_attempts {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if classifier(&e) == RetryAction::Abort {
                    return Err(e);
                }
                let is_last = attempt + 1 >= total_attempts;
                if is_last {
                    last_err = Some(e);
                    break;
                }
                let delay = config.delay_for_retry(attempt);
                tracing::warn!(
                    "Retryable error (attempt {}/{}), retrying in {}s: {}",
                    attempt + 1,
                    total_attempts,
                    delay.as_secs(),
                    e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(last_err.expect("loop must have run at least once"))
}
