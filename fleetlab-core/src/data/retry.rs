//! Retry with exponential backoff for transient provider failures.
//!
//! Only `Network` and `RateLimited` errors are retried; an open circuit
//! breaker ends the loop at once. The wait before
//! attempt `n` (1-based, n > 1) is `base_delay * 2^(n-2)` plus up to 25%
//! jitter, raised to any server-requested `Retry-After` and capped at
//! `max_delay`.

use rand::Rng;
use std::time::Duration;

use super::provider::ProviderError;

/// Retry settings for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. 1 disables retries.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before retry number `retry` (1 = first retry), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn delay_for(&self, retry: u32, err: &ProviderError) -> Duration {
        let backoff = self.backoff(retry);
        let jitter_cap = backoff.as_millis() as u64 / 4;
        let jitter = if jitter_cap > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_cap))
        } else {
            Duration::ZERO
        };
        let delay = backoff + jitter;
        let delay = match err.retry_after() {
            Some(requested) => delay.max(requested),
            None => delay,
        };
        delay.min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. `what` names the call in log output.
pub fn with_retry<T, F>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Result<T, ProviderError>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < attempts => {
                let delay = policy.delay_for(attempt, &e);
                tracing::warn!(
                    call = what,
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after transient failure"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(350));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let out = with_retry(&fast(), "test", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(ProviderError::Network("reset".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(out, Ok(42));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let out: Result<(), _> = with_retry(&fast(), "test", || {
            calls.set(calls.get() + 1);
            Err(ProviderError::RateLimited {
                retry_after_secs: None,
            })
        });
        assert!(matches!(out, Err(ProviderError::RateLimited { .. })));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn deterministic_errors_are_not_retried() {
        let calls = Cell::new(0);
        let out: Result<(), _> = with_retry(&fast(), "test", || {
            calls.set(calls.get() + 1);
            Err(ProviderError::NotFound("nope".into()))
        });
        assert!(out.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn open_breaker_stops_without_sleeping() {
        let calls = Cell::new(0);
        let slow = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(1),
        };
        let start = std::time::Instant::now();
        let out: Result<(), _> = with_retry(&slow, "test", || {
            calls.set(calls.get() + 1);
            Err(ProviderError::CircuitOpen {
                retry_after_secs: Some(297),
            })
        });
        assert!(matches!(out, Err(ProviderError::CircuitOpen { .. })));
        assert_eq!(calls.get(), 1);
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn retry_after_is_capped_by_max_delay() {
        let p = fast();
        let e = ProviderError::RateLimited {
            retry_after_secs: Some(60),
        };
        assert_eq!(p.delay_for(1, &e), p.max_delay);
    }
}
