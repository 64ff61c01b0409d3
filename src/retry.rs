//! Bounded exponential backoff for provider calls.

use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::embedder::ProviderError;

/// Attempt ceiling plus backoff schedule, applied to one batch at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls allowed per batch, including the first (at least 1).
    pub max_attempts: u32,
    /// Delay unit; retry `n` waits `base_delay * 2^min(n, max_exponent)`.
    pub base_delay: Duration,
    pub max_exponent: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_exponent: 5,
        }
    }
}

/// The last error once every attempt was spent, or a permanent error.
#[derive(Debug, Error)]
#[error("gave up after {attempts} attempt(s): {last}")]
pub struct RetryExhausted {
    pub attempts: u32,
    #[source]
    pub last: ProviderError,
}

impl RetryPolicy {
    /// Policy that tries once and never sleeps.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_exponent: 0,
        }
    }

    /// Wait before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.min(self.max_exponent);
        self.base_delay.saturating_mul(1u32 << exponent.min(31))
    }

    /// Runs `call` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `call` receives the 1-based attempt number.
    pub fn run<T, F>(&self, mut call: F) -> Result<T, RetryExhausted>
    where
        F: FnMut(u32) -> Result<T, ProviderError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(attempt, max_attempts, ?delay, error = %err, "provider call failed; retrying");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(last) => {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn unavailable() -> ProviderError {
        ProviderError::Status {
            status: 503,
            body: "busy".into(),
        }
    }

    fn instant(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            max_exponent: 5,
        }
    }

    #[test]
    fn schedule_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(16_000));
        assert_eq!(policy.delay_for(9), Duration::from_millis(16_000));
    }

    #[test]
    fn transient_failures_are_retried_until_success() {
        let mut calls = Vec::new();
        let value = instant(5)
            .run(|attempt| {
                calls.push(attempt);
                if attempt < 3 {
                    Err(unavailable())
                } else {
                    Ok("done")
                }
            })
            .expect("third attempt succeeds");
        assert_eq!(value, "done");
        assert_eq!(calls, vec![1, 2, 3]);
    }

    #[test]
    fn attempts_are_bounded() {
        let mut calls = 0;
        let err = instant(4)
            .run(|_| -> Result<(), _> {
                calls += 1;
                Err(unavailable())
            })
            .expect_err("never succeeds");
        assert_eq!(calls, 4);
        assert_eq!(err.attempts, 4);
    }

    #[test]
    fn permanent_failures_stop_immediately() {
        let mut calls = 0;
        let err = instant(5)
            .run(|_| -> Result<(), _> {
                calls += 1;
                Err(ProviderError::Decode("garbage".into()))
            })
            .expect_err("permanent");
        assert_eq!(calls, 1);
        assert!(matches!(err.last, ProviderError::Decode(_)));
    }
}
