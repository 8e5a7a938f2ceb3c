//! Classified retry with exponential backoff and jitter.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use trader_core::ExchangeError;

/// Retry schedule for exchange calls.
///
/// Delay for attempt `k` is `min(base * 2^k, max) * (1 ± jitter)`. Whether a
/// fault is retried at all is decided by [`ExchangeError::is_retryable`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential: bool,
    /// Relative jitter in [0, 1).
    pub jitter_factor: f64,
}

impl RetryPolicy {
    pub const DEFAULT: Self = Self {
        max_retries: 3,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        exponential: true,
        jitter_factor: 0.2,
    };

    pub const AGGRESSIVE: Self = Self {
        max_retries: 5,
        base_delay: Duration::from_millis(500),
        max_delay: Duration::from_secs(60),
        exponential: true,
        jitter_factor: 0.2,
    };

    pub const CONSERVATIVE: Self = Self {
        max_retries: 2,
        base_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(120),
        exponential: true,
        jitter_factor: 0.1,
    };

    pub const NONE: Self = Self {
        max_retries: 0,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        exponential: false,
        jitter_factor: 0.0,
    };

    /// Backoff before retry attempt `attempt` (0-based), without jitter.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        if !self.exponential {
            return self.base_delay.min(self.max_delay);
        }
        let factor = 2u64.saturating_pow(attempt.min(32));
        self.base_delay
            .saturating_mul(factor.min(u64::from(u32::MAX)) as u32)
            .min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_factor <= 0.0 || delay.is_zero() {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(-self.jitter_factor..=self.jitter_factor);
        delay.mul_f64((1.0 + jitter).max(0.0))
    }

    /// Run `op`, retrying retryable faults up to `max_retries` times.
    ///
    /// A rate-limit rejection that carries its own delay hint waits at least
    /// that long.
    pub async fn execute<T, F, Fut>(&self, name: &str, mut op: F) -> Result<T, ExchangeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExchangeError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let mut delay = self.jittered(self.base_delay_for(attempt));
                    if let ExchangeError::RateLimited {
                        retry_after_ms: Some(ms),
                    } = &e
                    {
                        delay = delay.max(Duration::from_millis(*ms));
                    }
                    debug!(
                        op = name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after fault"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if attempt > 0 {
                        warn!(op = name, attempts = attempt + 1, error = %e, "giving up");
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            exponential: true,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn test_exponential_delay_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            exponential: true,
            jitter_factor: 0.0,
        };
        assert_eq!(policy.base_delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.base_delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.base_delay_for(4), Duration::from_secs(16));
        assert_eq!(policy.base_delay_for(5), Duration::from_secs(30));
        assert_eq!(policy.base_delay_for(30), Duration::from_secs(30));
    }

    #[test]
    fn test_cumulative_delay_bound() {
        let policy = RetryPolicy::DEFAULT;
        let total: Duration = (0..policy.max_retries).map(|k| policy.base_delay_for(k)).sum();
        let bound: Duration = (0..policy.max_retries)
            .map(|k| {
                policy
                    .base_delay
                    .saturating_mul(2u32.pow(k))
                    .min(policy.max_delay)
            })
            .sum();
        assert!(total <= bound.mul_f64(1.0 + policy.jitter_factor));
    }

    #[tokio::test]
    async fn test_retries_transient_fault_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let result = fast_policy(3)
            .execute("test", move || {
                let calls = calls_in.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ExchangeError::transport("flaky"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let result: Result<(), _> = fast_policy(5)
            .execute("test", move || {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ExchangeError::Authentication("bad signature".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(ExchangeError::Authentication(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_bounded_by_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let result: Result<(), _> = fast_policy(2)
            .execute("test", move || {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ExchangeError::transport("down"))
                }
            })
            .await;

        assert!(result.is_err());
        // 1 initial + 2 retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_none_policy_never_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let result: Result<(), _> = RetryPolicy::NONE
            .execute("test", move || {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ExchangeError::transport("down"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
