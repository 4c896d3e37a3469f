//! Bounded retry with exponential backoff
//!
//! TigerStyle: Bounded iteration, retries only for retriable errors.

use crate::constants::{CONNECT_RETRY_BASE_MS, CONNECT_RETRY_COUNT_MAX, CONNECT_RETRY_DELAY_MS_MAX};
use crate::error::Result;
use crate::io::TimeProvider;
use std::future::Future;

/// Exponential backoff policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub attempt_count_max: u32,
    /// Delay before the second attempt in milliseconds
    pub base_delay_ms: u64,
    /// Upper bound on a single delay in milliseconds
    pub delay_ms_max: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_count_max: CONNECT_RETRY_COUNT_MAX,
            base_delay_ms: CONNECT_RETRY_BASE_MS,
            delay_ms_max: CONNECT_RETRY_DELAY_MS_MAX,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            attempt_count_max: 1,
            base_delay_ms: 0,
            delay_ms_max: 0,
        }
    }

    /// Policy for tests with tight delays
    pub fn for_testing() -> Self {
        Self {
            attempt_count_max: 3,
            base_delay_ms: 1,
            delay_ms_max: 10,
        }
    }

    /// Delay before the attempt with the given index (0-based)
    ///
    /// Attempt 0 runs immediately; attempt n waits `base * 2^(n-1)`, capped.
    pub fn delay_for_attempt_ms(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }
        let shift = (attempt - 1).min(32);
        self.base_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.delay_ms_max)
    }

    /// Run the operation, retrying retriable errors up to the attempt limit
    pub async fn run<T, F, Fut>(&self, time: &dyn TimeProvider, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        assert!(self.attempt_count_max >= 1, "at least one attempt required");

        let mut attempt = 0;
        loop {
            let delay_ms = self.delay_for_attempt_ms(attempt);
            if delay_ms > 0 {
                time.sleep_ms(delay_ms).await;
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retriable() && attempt + 1 < self.attempt_count_max => {
                    tracing::debug!(
                        attempt = attempt,
                        error = %err,
                        "retriable failure, backing off"
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::io::MockClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            attempt_count_max: 10,
            base_delay_ms: 100,
            delay_ms_max: 1000,
        };

        assert_eq!(policy.delay_for_attempt_ms(0), 0);
        assert_eq!(policy.delay_for_attempt_ms(1), 100);
        assert_eq!(policy.delay_for_attempt_ms(2), 200);
        assert_eq!(policy.delay_for_attempt_ms(3), 400);
        assert_eq!(policy.delay_for_attempt_ms(8), 1000);
        assert_eq!(policy.delay_for_attempt_ms(32), 1000);
    }

    #[tokio::test]
    async fn test_run_retries_transient_failures() {
        let clock = MockClock::new(0);
        let attempts = AtomicU32::new(0);

        let result = RetryPolicy::for_testing()
            .run(&clock, || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Error::transport("connection refused"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_does_not_retry_permanent_failures() {
        let clock = MockClock::new(0);
        let attempts = AtomicU32::new(0);

        let result: Result<()> = RetryPolicy::for_testing()
            .run(&clock, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::internal("boom")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_exhausts_attempts() {
        let clock = MockClock::new(0);
        let attempts = AtomicU32::new(0);

        let result: Result<()> = RetryPolicy::for_testing()
            .run(&clock, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::transport("down")) }
            })
            .await;

        assert!(matches!(result, Err(Error::Transport { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
