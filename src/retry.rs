//! Bounded-jitter retry for mapping-source fetches.
//!
//! Delays follow a deterministic exponential schedule (200 ms doubling
//! up to a 5 s cap by default) with a small uniform jitter, at most
//! [`MAX_JITTER`], added on top of each delay. Keeping the jitter
//! additive and bounded de-synchronizes concurrent pollers without
//! stretching the worst-case wait the way interval-proportional
//! randomization would.
//!
//! Whether a failure is worth retrying at all is the error's call, not
//! this module's: see [`Error::is_transient`].

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use rand::Rng;
use tokio::time::sleep;
use tracing::debug;

use crate::config::RetryConfig;
use crate::Error;

const MAX_JITTER_MS: u64 = 50;

/// Upper bound on the jitter added to each retry delay.
pub const MAX_JITTER: Duration = Duration::from_millis(MAX_JITTER_MS);

/// Retry policy for mapping-source fetches.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Attempt budget, including the first try.
    pub max_attempts: u32,
    /// First delay of the exponential schedule.
    pub initial_backoff: Duration,
    /// Ceiling of the exponential schedule, before jitter.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Create from config
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            multiplier: config.multiplier,
        }
    }

    /// The deterministic part of the delay sequence.
    ///
    /// Randomization stays off here: the crate's factor scales with the
    /// current interval, which near the cap would smear delays by
    /// seconds. The bounded jitter is added in [`Self::next_delay`].
    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: self.multiplier,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }

    /// Advance the schedule one step: exponential delay plus up to
    /// [`MAX_JITTER`] of uniform jitter.
    fn next_delay(&self, schedule: &mut ExponentialBackoff) -> Duration {
        let base = schedule.next_backoff().unwrap_or(self.max_backoff);
        base + jitter()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

/// Uniform jitter in `0..=MAX_JITTER`.
fn jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..=MAX_JITTER_MS))
}

/// Run `f` until it succeeds, fails permanently, or the attempt budget
/// is spent. A zero `max_attempts` still gets one try.
///
/// # Errors
///
/// Returns the first non-transient error unchanged, or the last
/// transient one once every attempt has been used.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation: &str,
    mut f: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let budget = policy.max_attempts.max(1);
    let mut schedule = policy.schedule();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let error = match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "fetch succeeded after retrying");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !error.is_transient() {
            return Err(error);
        }
        if attempt >= budget {
            debug!(
                operation,
                attempt,
                error = %error,
                "attempt budget spent, giving up"
            );
            return Err(error);
        }

        let delay = policy.next_delay(&mut schedule);
        debug!(
            operation,
            attempt,
            next_in_ms = delay.as_millis() as u64,
            error = %error,
            "transient fetch failure, backing off"
        );
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            multiplier: 2.0,
        }
    }

    // ── Delay schedule ──────────────────────────────────────────────────

    #[test]
    fn delays_follow_the_schedule_with_bounded_jitter() {
        let policy = RetryPolicy::default();
        let mut schedule = policy.schedule();

        // 200 ms doubling, capped at 5 s, then held there.
        let bases_ms = [200u64, 400, 800, 1600, 3200, 5000, 5000];
        for base_ms in bases_ms {
            let base = Duration::from_millis(base_ms);
            let delay = policy.next_delay(&mut schedule);
            assert!(delay >= base, "delay {delay:?} below base {base:?}");
            assert!(
                delay <= base + MAX_JITTER,
                "delay {delay:?} exceeds base {base:?} + {MAX_JITTER:?}"
            );
        }
    }

    #[test]
    fn jitter_never_exceeds_its_bound() {
        for _ in 0..200 {
            assert!(jitter() <= MAX_JITTER);
        }
    }

    // ── with_retry ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn first_success_takes_one_attempt() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Error>(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(), "op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Source("flaky".to_string()))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn budget_bounds_the_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Error> = with_retry(&fast_policy(), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Source("down".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_budget_still_tries_once() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 0,
            ..fast_policy()
        };
        let result: Result<(), Error> = with_retry(&policy, "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Source("down".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Error> = with_retry(&fast_policy(), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Mapping("invalid".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
