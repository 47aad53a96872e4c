use std::future::Future;
use std::time::Duration;

use crate::core::config::{BackoffSettings, Settings};

const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Failures that may succeed when the same call is repeated.
pub(crate) trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub(crate) max_attempts: u32,
    pub(crate) initial_delay: Duration,
    pub(crate) multiplier: f64,
    pub(crate) max_delay: Duration,
    pub(crate) jitter: bool,
}

impl RetryPolicy {
    pub(crate) fn from_backoff(settings: BackoffSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            multiplier: settings.multiplier.max(1.0),
            max_delay: DEFAULT_MAX_DELAY,
            jitter: true,
        }
    }

    /// Delay before the attempt that follows `attempt` (1-based), without jitter.
    pub(crate) fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Longest a `run_with_backoff` call can take when every attempt is cut off at
    /// `per_attempt`: all attempts time out and every wait gets maximum jitter.
    pub(crate) fn worst_case_duration(&self, per_attempt: Duration) -> Duration {
        let waits: Duration = (1..self.max_attempts)
            .map(|attempt| {
                let delay = self.delay_after(attempt);
                if self.jitter {
                    (delay + delay / 4).min(self.max_delay).max(delay)
                } else {
                    delay
                }
            })
            .sum();
        per_attempt * self.max_attempts + waits
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }

        let spread = (delay.as_millis() as u64 / 4).max(1);
        let extra = rand::random::<u64>() % (spread + 1);
        (delay + Duration::from_millis(extra)).min(self.max_delay)
    }
}

/// One policy per outbound call site.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicies {
    pub(crate) evaluation: RetryPolicy,
    pub(crate) transcription: RetryPolicy,
    pub(crate) sync: RetryPolicy,
    pub(crate) notification: RetryPolicy,
}

impl RetryPolicies {
    pub(crate) fn from_settings(settings: &Settings) -> Self {
        let retry = settings.retry();
        Self {
            evaluation: RetryPolicy::from_backoff(retry.evaluation),
            transcription: RetryPolicy::from_backoff(retry.transcription),
            sync: RetryPolicy::from_backoff(retry.sync),
            notification: RetryPolicy::from_backoff(retry.notification),
        }
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the policy's
/// attempts are used up. The closure receives the 1-based attempt number.
pub(crate) async fn run_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() {
                    tracing::warn!(operation, attempt, error = %err, "Permanent failure, not retrying");
                    return Err(err);
                }
                if attempt >= policy.max_attempts {
                    tracing::warn!(operation, attempt, error = %err, "Retries exhausted");
                    return Err(err);
                }

                let delay = policy.jittered(policy.delay_after(attempt));
                tracing::info!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError {
        retryable: bool,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (retryable: {})", self.retryable)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(10),
            jitter: false,
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestError> = run_with_backoff(&fast_policy(3), "test", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(TestError { retryable: true })
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.expect("third attempt succeeds"), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = run_with_backoff(&fast_policy(5), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError { retryable: true }) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn permanent_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = run_with_backoff(&fast_policy(5), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError { retryable: false }) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_grows_geometrically_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(500),
            jitter: false,
        };

        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(500));
    }

    #[test]
    fn jitter_never_exceeds_max_delay() {
        let policy = RetryPolicy { jitter: true, ..fast_policy(3) };
        for attempt in 1..20 {
            assert!(policy.jittered(policy.delay_after(attempt)) <= policy.max_delay);
        }
    }

    #[test]
    fn worst_case_covers_every_timeout_and_wait() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: false,
        };

        // 5 x 30 s timeouts plus 1 + 2 + 4 + 8 s of backoff.
        assert_eq!(policy.worst_case_duration(Duration::from_secs(30)), Duration::from_secs(165));

        let jittered = RetryPolicy { jitter: true, ..policy };
        assert!(jittered.worst_case_duration(Duration::from_secs(30)) >= Duration::from_secs(165));
    }
}
