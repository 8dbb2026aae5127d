//! Retry Policy
//!
//! Exponential backoff with jitter, plus a separate delay for rate-limit
//! responses. Used by every upstream call the enricher makes.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::ports::MetadataError;

/// Errors the retry loop knows how to classify
pub trait Retryable {
    /// Whether another attempt might succeed
    fn is_retryable(&self) -> bool;

    /// Rate-limit responses wait `rate_limit_delay` (or this hint) instead of backing off
    fn rate_limit_hint(&self) -> Option<Option<Duration>>;
}

impl Retryable for MetadataError {
    fn is_retryable(&self) -> bool {
        MetadataError::is_retryable(self)
    }

    fn rate_limit_hint(&self) -> Option<Option<Duration>> {
        match self {
            MetadataError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// All attempts failed (or the error was not retryable)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryFailure<E> {
    pub attempts: u32,
    pub error: E,
}

/// Backoff configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay after the first failure
    #[serde(with = "millis")]
    pub base_delay: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Upper bound for any single delay
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// Random extra delay as a fraction of the backoff (0.0 - 1.0)
    pub jitter: f64,
    /// Delay after a rate-limit response when the server gives no hint
    #[serde(with = "millis")]
    pub rate_limit_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
            rate_limit_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Policy without any waiting, for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
            jitter: 0.0,
            rate_limit_delay: Duration::ZERO,
        }
    }

    /// Deterministic backoff after failed attempt `attempt` (0-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(30) as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Delay before the next attempt, given the error that ended `attempt`
    pub fn delay_for<E: Retryable>(&self, attempt: u32, error: &E) -> Duration {
        if let Some(hint) = error.rate_limit_hint() {
            return hint.unwrap_or(self.rate_limit_delay).min(self.max_delay.max(self.rate_limit_delay));
        }

        let backoff = self.backoff_delay(attempt);
        if self.jitter <= 0.0 || backoff.is_zero() {
            return backoff;
        }
        let fraction = rand::thread_rng().gen_range(0.0..=self.jitter.min(1.0));
        backoff + backoff.mul_f64(fraction)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    /// `op` receives the 0-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryFailure<E>>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    let attempts = attempt + 1;
                    if !error.is_retryable() || attempts >= max_attempts {
                        return Err(RetryFailure { attempts, error });
                    }

                    let delay = self.delay_for(attempt, &error);
                    tracing::debug!(
                        "{} failed ({}), retrying in {:?} (attempt {}/{})",
                        label,
                        error,
                        delay,
                        attempts,
                        max_attempts
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Durations in config files are written as integer milliseconds
mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::{assert_err, assert_ok};

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = no_jitter();
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_capped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(3),
            ..no_jitter()
        };
        assert_eq!(policy.backoff_delay(5), Duration::from_secs(3));
    }

    #[test]
    fn test_rate_limit_uses_own_delay() {
        let policy = no_jitter();
        let limited = MetadataError::RateLimited { retry_after: None };
        assert_eq!(policy.delay_for(0, &limited), Duration::from_secs(5));

        let hinted = MetadataError::RateLimited {
            retry_after: Some(Duration::from_millis(1500)),
        };
        assert_eq!(policy.delay_for(2, &hinted), Duration::from_millis(1500));
    }

    #[test]
    fn test_jitter_bounded() {
        let policy = RetryPolicy {
            jitter: 0.5,
            ..RetryPolicy::default()
        };
        let err = MetadataError::Transient("503".into());
        for _ in 0..50 {
            let delay = policy.delay_for(1, &err);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_secs(3));
        }
    }

    #[tokio::test]
    async fn test_run_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::immediate(3)
            .run("test", |_| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(MetadataError::Transient("503".into()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(assert_ok!(result), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(3)
            .run("test", |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(MetadataError::RateLimited { retry_after: None })
            })
            .await;

        let failure = assert_err!(result);
        assert_eq!(failure.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(3)
            .run("test", |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(MetadataError::Permanent("bad json".into()))
            })
            .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sleeps_between_attempts() {
        let start = tokio::time::Instant::now();
        let _: Result<(), _> = no_jitter()
            .run("test", |_| async { Err(MetadataError::Transient("timeout".into())) })
            .await;

        // 1s + 2s between three attempts, no sleep after the last
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_millis(3100));
    }

    #[test]
    fn test_deserialize_millis() {
        let policy: RetryPolicy = toml::from_str(
            r#"
max_attempts = 4
base_delay = 250
rate_limit_delay = 2000
"#,
        )
        .unwrap();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.rate_limit_delay, Duration::from_secs(2));
        assert_eq!(policy.multiplier, 2.0);
    }
}
