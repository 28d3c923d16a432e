//! Bounded retry with a fixed pause between attempts.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::StorageError;

/// How many times to try one remote operation and how long to wait in between.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.  Treated as at least 1.
    pub max_attempts: u32,
    /// Pause between consecutive attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

/// Run `op` until it succeeds, returns a non-retryable error, or the policy
/// runs out of attempts.  The error of the last attempt is returned.
///
/// Only the pause between attempts observes `cancel`; an attempt that has
/// started always runs to completion.  Cancellation during the pause yields
/// [`StorageError::Interrupted`].
pub async fn with_retries<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> Result<T, StorageError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !err.is_retryable() || attempt >= max_attempts {
            return Err(err);
        }
        debug!("{what} failed (try #{attempt}), retrying: {err}");

        tokio::select! {
            _ = tokio::time::sleep(policy.delay) => {}
            _ = cancel.cancelled() => {
                debug!("{what}: interrupted while waiting to retry");
                return Err(StorageError::Interrupted);
            }
        }
        attempt += 1;
    }
}
