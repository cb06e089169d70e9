//! Bounded retry with exponential backoff and per-call timeouts.

use std::future::Future;
use std::time::Duration;

use crate::error::LlmError;

const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_BASE_BACKOFF_MS: u64 = 500;
const MAX_SHIFT: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` disables retrying.
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff: Duration::from_millis(DEFAULT_BASE_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (zero-based): `base * 2^attempt`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(1u32 << attempt.min(MAX_SHIFT))
    }
}

/// Run `f`, retrying transient failures up to `policy.max_retries` times.
///
/// Non-transient errors are returned immediately.
///
/// # Errors
///
/// Returns the last error once retries are exhausted, or the first
/// non-transient error.
pub async fn with_retry<T, F, Fut>(op: &str, policy: &RetryPolicy, mut f: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                let delay = policy.delay(attempt);
                tracing::warn!(
                    op,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    "transient backend error, retrying in {}ms: {e}",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Bound a backend call by `timeout`, mapping expiry to [`LlmError::Timeout`].
///
/// # Errors
///
/// Returns [`LlmError::Timeout`] if the deadline passes, otherwise the
/// wrapped call's own error.
pub async fn with_timeout<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T, LlmError>>,
) -> Result<T, LlmError> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| LlmError::Timeout(timeout))?
}
