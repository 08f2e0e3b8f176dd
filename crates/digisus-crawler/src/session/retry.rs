//! Optimistic reads of externally mutated DOM state.
//!
//! Selecting a facet makes the portal re-render, which can replace the very
//! elements being read. Reads are attempted optimistically and retried a
//! bounded number of times when they report [`SessionError::StaleReference`].

use super::{SessionError, SessionResult};
use std::future::Future;
use std::time::{Duration, Instant};

/// Bounded retry for stale reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

/// Run `read` until it returns something other than a stale reference or the
/// attempt budget is spent. Non-stale errors are returned immediately.
pub async fn retry_stale<T, F, Fut>(policy: RetryPolicy, mut read: F) -> SessionResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SessionResult<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match read().await {
            Err(SessionError::StaleReference(what)) if attempt < attempts => {
                tracing::debug!("stale read of {what} (attempt {attempt}/{attempts}), retrying");
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Poll `probe` every `interval` until it yields `Some`, or `timeout` passes.
/// Returns `Ok(None)` on timeout; probe errors end the wait.
pub async fn poll_until<T, F, Fut>(
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> SessionResult<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SessionResult<Option<T>>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = probe().await? {
            return Ok(Some(value));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}
