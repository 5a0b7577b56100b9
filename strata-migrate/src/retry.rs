//! Bounded retry with doubling backoff.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How often and how patiently to retry lock or connection acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `0` means try once.
    pub max_retries: u32,
    /// Wait before the first retry, in milliseconds.
    pub interval_ms: u64,
    /// Upper bound on a single wait, in milliseconds.
    pub max_interval_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 50,
            interval_ms: 100,
            max_interval_ms: 10_000,
        }
    }
}

/// The outcome of [`RetryPolicy::run`] when every attempt came back empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exhausted {
    /// Attempts made.
    pub attempts: u32,
    /// Total time slept between attempts.
    pub waited: Duration,
}

impl RetryPolicy {
    /// Create a policy.
    pub fn new(max_retries: u32, interval: Duration, max_interval: Duration) -> Self {
        Self {
            max_retries,
            interval_ms: interval.as_millis() as u64,
            max_interval_ms: max_interval.as_millis() as u64,
        }
    }

    /// Try once, never wait.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            interval_ms: 0,
            max_interval_ms: 0,
        }
    }

    /// Set the retry count.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the initial interval.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the interval cap.
    pub fn max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval_ms = max_interval.as_millis() as u64;
        self
    }

    /// Wait before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
        let millis = self
            .interval_ms
            .saturating_mul(factor)
            .min(self.max_interval_ms.max(self.interval_ms));
        Duration::from_millis(millis)
    }

    /// Call `attempt` until it yields `Some`, sleeping between calls.
    ///
    /// Errors from `attempt` are returned immediately; only `None` is retried.
    pub async fn run<T, E, F, Fut>(&self, mut attempt: F) -> Result<Result<T, Exhausted>, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let mut waited = Duration::ZERO;
        let mut tries = 0u32;

        loop {
            tries += 1;
            if let Some(value) = attempt(tries).await? {
                return Ok(Ok(value));
            }
            if tries > self.max_retries {
                return Ok(Err(Exhausted {
                    attempts: tries,
                    waited,
                }));
            }
            let delay = self.delay_for(tries);
            tracing::debug!(attempt = tries, delay_ms = delay.as_millis() as u64, "retrying");
            tokio::time::sleep(delay).await;
            waited += delay;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(70), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_succeeds_after_retries() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10), Duration::from_millis(100));
        let outcome: Result<Result<u32, Exhausted>, ()> = policy
            .run(|attempt| async move { Ok(if attempt == 3 { Some(attempt) } else { None }) })
            .await;
        assert_eq!(outcome, Ok(Ok(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exhausts() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10), Duration::from_millis(100));
        let outcome: Result<Result<(), Exhausted>, ()> =
            policy.run(|_| async { Ok(None) }).await;
        let exhausted = outcome.unwrap().unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.waited, Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_run_propagates_errors() {
        let outcome: Result<Result<(), Exhausted>, &str> = RetryPolicy::default()
            .run(|_| async { Err("boom") })
            .await;
        assert_eq!(outcome, Err("boom"));
    }

    #[test]
    fn test_deserialize_partial() {
        let policy: RetryPolicy = toml::from_str("max_retries = 3").unwrap();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.interval_ms, 100);
    }
}
