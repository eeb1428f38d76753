//! Timeout and retry guard for I/O-facing operations
//!
//! Every reader and writer call made by the pipeline goes through
//! [`invoke_with_timeout_retry`]. A call that times out or fails with a
//! retryable error is retried after a fixed delay, up to the policy's retry
//! limit. Cancellation interrupts both the call and the delay.

use crate::core::cancellation::CancellationSignal;
use crate::domain::{Result, VeilError};
use crate::log_retry_attempt;
use std::future::Future;
use std::time::Duration;

/// Timeout and retry settings for one class of operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Time allowed for a single attempt
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(timeout: Duration, max_retries: u32, delay: Duration) -> Self {
        Self {
            timeout,
            max_retries,
            delay,
        }
    }

    /// Single attempt, no retries
    pub fn no_retry(timeout: Duration) -> Self {
        Self::new(timeout, 0, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), 3, Duration::from_millis(1000))
    }
}

/// Run `operation` under `policy`
///
/// A timed-out attempt counts as a retryable failure and surfaces as
/// [`VeilError::Timeout`] once retries are exhausted. Errors for which
/// `is_retryable` returns false propagate immediately.
///
/// # Errors
///
/// Returns [`VeilError::Cancelled`] if `cancel` fires before the operation
/// succeeds, otherwise the last error observed.
pub async fn invoke_with_timeout_retry<T, F, Fut, R>(
    mut operation: F,
    policy: &RetryPolicy,
    is_retryable: R,
    cancel: &CancellationSignal,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: Fn(&VeilError) -> bool,
{
    let mut retry_count = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(VeilError::Cancelled("operation cancelled".to_string()));
        }

        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(VeilError::Cancelled("operation cancelled".to_string()));
            }
            outcome = tokio::time::timeout(policy.timeout, operation()) => outcome,
        };

        let (error, retryable) = match attempt {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                let retryable = is_retryable(&e);
                (e, retryable)
            }
            Err(_) => (
                VeilError::Timeout(format!(
                    "operation exceeded {}ms",
                    policy.timeout.as_millis()
                )),
                true,
            ),
        };

        if !retryable || retry_count >= policy.max_retries {
            return Err(error);
        }

        retry_count += 1;
        log_retry_attempt!(retry_count, policy.max_retries, error);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(VeilError::Cancelled("operation cancelled during retry delay".to_string()));
            }
            _ = tokio::time::sleep(policy.delay) => {}
        }
    }
}
