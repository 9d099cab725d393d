//! Exponential backoff for transient RPC failures

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry schedule: `initial × 2^retry`, clamped to `max`, for at most `max_retries` retries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 250,
            max_delay_ms: 8_000,
            max_retries: 5,
        }
    }
}

/// Why a retried operation finally gave up
#[derive(Debug)]
pub enum RetryOutcome<E> {
    /// Non-transient error, returned on first sight
    Fatal(E),
    /// Transient errors until the retry ceiling; carries the last one
    Exhausted { attempts: u32, last: E },
}

impl BackoffPolicy {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Delay before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.min(32)).unwrap_or(u64::MAX);
        let delay_ms = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the retry
    /// ceiling is reached. `op` receives the 1-based attempt number.
    pub async fn retry<F, Fut, T, E, P>(&self, mut op: F, is_transient: P) -> Result<T, RetryOutcome<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !is_transient(&err) => return Err(RetryOutcome::Fatal(err)),
                Err(err) if attempt > self.max_retries => {
                    warn!(attempts = attempt, "giving up after transient errors: {}", err);
                    return Err(RetryOutcome::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                Err(err) => {
                    let delay = self.delay_for(attempt - 1);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient error, backing off: {}",
                        err
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles_and_clamps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(10), Duration::from_millis(8_000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(8_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryOutcome<String>> = BackoffPolicy::default()
            .retry(
                |_| {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err("429".to_string())
                        } else {
                            Ok(7)
                        }
                    }
                },
                |_| true,
            )
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryOutcome<String>> = BackoffPolicy::default()
            .retry(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("nonce too low".to_string()) }
                },
                |_| false,
            )
            .await;

        assert!(matches!(result, Err(RetryOutcome::Fatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_reached() {
        let policy = BackoffPolicy {
            max_retries: 2,
            ..BackoffPolicy::default()
        };
        let result: Result<(), RetryOutcome<String>> = policy
            .retry(|_| async { Err("too many requests".to_string()) }, |_| true)
            .await;

        match result {
            Err(RetryOutcome::Exhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected {other:?}"),
        }
    }
}
