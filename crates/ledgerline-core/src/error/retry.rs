//! Retry policy for transient database failures.
//!
//! Deadlocks and serialization failures are expected under concurrent
//! tenant-scoped writes. The query executor re-runs the whole transaction
//! with exponential backoff rather than surfacing them to callers.

use std::time::Duration;

use super::types::CoreError;

/// Exponential-backoff retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Backoff multiplier applied per attempt
    pub multiplier: u32,
    /// Total attempts, including the first
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(50),
            multiplier: 2,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * self.multiplier.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Run `operation` until it succeeds, fails permanently, or exhausts the
/// policy. Only errors with [`CoreError::is_retryable`] are retried; the
/// final transient error escalates as-is.
pub async fn retry_with_policy<T, F>(policy: RetryPolicy, mut operation: F) -> Result<T, CoreError>
where
    F: FnMut() -> Result<T, CoreError>,
{
    let mut attempt = 1;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient database failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(50));
        assert_eq!(policy.delay_for(2), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = retry_with_policy(RetryPolicy::default(), || {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CoreError::retryable("deadlock detected"))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_conflict() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_policy(RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::conflict("duplicate external_id"))
        })
        .await;

        assert!(matches!(result, Err(CoreError::Conflict { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_policy(RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::retryable("could not serialize access"))
        })
        .await;

        assert!(matches!(result, Err(CoreError::Retryable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
