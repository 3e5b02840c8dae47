//! Bounded retries with an increasing backoff schedule.
//!
//! Wraps the two remote calls a multi-hour job cannot afford to die on: the
//! LLM request and the store patch. The schedule is injected so tests run
//! with zero-duration backoffs.

use std::time::Duration;

use tracing::warn;

use tagrail_shared::{Result, TagrailError};

/// Retry policy: attempt budget plus a backoff schedule whose last entry
/// repeats once the schedule is exhausted.
#[derive(Debug, Clone)]
pub struct Retry {
    max_attempts: usize,
    backoff: Vec<Duration>,
}

impl Retry {
    pub fn new(max_attempts: usize, backoff: Vec<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Build from a seconds schedule, as configured in `[normalize]`.
    pub fn from_secs(max_attempts: usize, backoff_secs: &[u64]) -> Self {
        Self::new(
            max_attempts,
            backoff_secs.iter().map(|s| Duration::from_secs(*s)).collect(),
        )
    }

    /// Policy with no sleeps, for tests.
    pub fn immediate(max_attempts: usize) -> Self {
        Self::new(max_attempts, Vec::new())
    }

    /// Re-invoke `op` until it succeeds or the attempt budget is spent,
    /// sleeping between attempts. The final error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        for attempt in 1..=self.max_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt == self.max_attempts => {
                    warn!(
                        op = op_name,
                        attempts = self.max_attempts,
                        error = %err,
                        "retries exhausted"
                    );
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        op = op_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_secs = delay.as_secs_f64(),
                        error = %err,
                        "attempt failed, backing off"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        // max_attempts >= 1, so the loop always returns.
        Err(TagrailError::validation("retry loop exited without result"))
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        match self.backoff.as_slice() {
            [] => Duration::ZERO,
            schedule => schedule[(attempt - 1).min(schedule.len() - 1)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = AtomicUsize::new(0);
        let retry = Retry::immediate(5);

        let result = retry
            .run("test-op", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(TagrailError::Network("connection reset".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        // Failed twice, succeeded on the third attempt — exactly 3 calls
        assert_eq!(result, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_the_last_error() {
        let attempts = AtomicUsize::new(0);
        let retry = Retry::immediate(4);

        let err = retry
            .run("test-op", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err::<(), _>(TagrailError::Network(format!("failure #{n}"))) }
            })
            .await
            .unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(err.to_string(), "network error: failure #4");
    }

    #[tokio::test]
    async fn first_try_success_makes_one_attempt() {
        let attempts = AtomicUsize::new(0);
        let retry = Retry::immediate(5);

        retry
            .run("test-op", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_schedule_repeats_last_entry() {
        let retry = Retry::new(
            10,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(5),
            ],
        );
        assert_eq!(retry.delay_for(1), Duration::from_secs(1));
        assert_eq!(retry.delay_for(3), Duration::from_secs(5));
        assert_eq!(retry.delay_for(9), Duration::from_secs(5));
    }
}
