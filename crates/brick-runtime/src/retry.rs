//! Waiting between attempts of a retried sub-pipeline.

use std::future::Future;
use std::time::Duration;

use brick_types::Result;

/// How long to wait after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Retry straight away.
    Immediate,
    Fixed(Duration),
    /// `initial`, doubled after every failure, never above `cap`.
    Exponential { initial: Duration, cap: Duration },
}

impl BackoffPolicy {
    /// Wait after `failures` failed attempts (1 after the first failure).
    pub fn wait_after(&self, failures: usize) -> Duration {
        match *self {
            BackoffPolicy::Immediate => Duration::ZERO,
            BackoffPolicy::Fixed(interval) => interval,
            BackoffPolicy::Exponential { initial, cap } => {
                let doublings = u32::try_from(failures.saturating_sub(1)).unwrap_or(u32::MAX);
                let factor = 2u32.checked_pow(doublings).unwrap_or(u32::MAX);
                initial.saturating_mul(factor).min(cap)
            }
        }
    }
}

/// Call `attempt` with the 0-based attempt number until it succeeds or
/// `max_attempts` calls have failed, waiting per `policy` in between.
///
/// The final failure is returned untouched. `max_attempts == 0` still makes
/// one call.
pub async fn retry_with_backoff<F, Fut, T>(
    mut attempt: F,
    max_attempts: usize,
    policy: &BackoffPolicy,
    label: &str,
) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut failures = 0;
    loop {
        let error = match attempt(failures).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        failures += 1;
        if failures >= max_attempts {
            tracing::debug!(step = %label, failures, "Giving up");
            return Err(error);
        }

        let wait = policy.wait_after(failures);
        tracing::warn!(
            step = %label,
            failures,
            max_attempts,
            wait_ms = wait.as_millis() as u64,
            error = %error,
            "Attempt failed, retrying"
        );
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brick_types::BrickError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn waits_per_policy() {
        let exponential = BackoffPolicy::Exponential {
            initial: ms(100),
            cap: ms(500),
        };
        let cases = [
            (BackoffPolicy::Immediate, 1, Duration::ZERO),
            (BackoffPolicy::Immediate, 50, Duration::ZERO),
            (BackoffPolicy::Fixed(ms(250)), 1, ms(250)),
            (BackoffPolicy::Fixed(ms(250)), 9, ms(250)),
            (exponential, 1, ms(100)),
            (exponential, 2, ms(200)),
            (exponential, 3, ms(400)),
            (exponential, 4, ms(500)),
            (exponential, usize::MAX, ms(500)),
        ];
        for (policy, failures, expected) in cases {
            assert_eq!(policy.wait_after(failures), expected, "{policy:?} after {failures}");
        }
    }

    #[tokio::test]
    async fn first_success_makes_one_call() {
        let calls = AtomicUsize::new(0);
        let value = retry_with_backoff(
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(7) }
            },
            5,
            &BackoffPolicy::Immediate,
            "@brick/retry",
        )
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_on_a_later_attempt() {
        let value = retry_with_backoff(
            |attempt| async move {
                if attempt < 2 {
                    Err(BrickError::Business(format!("not yet ({attempt})")))
                } else {
                    Ok(attempt)
                }
            },
            3,
            &BackoffPolicy::Immediate,
            "@brick/retry",
        )
        .await
        .unwrap();

        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn exhausted_attempts_return_the_final_error() {
        let calls = AtomicUsize::new(0);
        let err = retry_with_backoff::<_, _, ()>(
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(BrickError::Business(format!("failure {attempt}"))) }
            },
            4,
            &BackoffPolicy::Immediate,
            "@brick/retry",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, BrickError::Business(msg) if msg == "failure 3"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn zero_attempts_still_calls_once() {
        let calls = AtomicUsize::new(0);
        let result = retry_with_backoff::<_, _, ()>(
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BrickError::Other("down".into())) }
            },
            0,
            &BackoffPolicy::Immediate,
            "@brick/retry",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_between_attempts_but_not_after_the_last() {
        let started = tokio::time::Instant::now();
        let result = retry_with_backoff::<_, _, ()>(
            |_| async { Err(BrickError::Other("down".into())) },
            3,
            &BackoffPolicy::Fixed(ms(50)),
            "@brick/retry",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(started.elapsed(), ms(100));
    }
}
