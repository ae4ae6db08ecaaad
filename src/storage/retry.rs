//! Bounded retry with a fixed backoff schedule.
//!
//! Every external write (database upsert, snapshot flush, collector push) runs
//! through one [`RetryPolicy`] so all of them share the same failure tolerance.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default backoff schedule: 1s, 3s, 5s (four attempts in total).
pub const DEFAULT_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

/// Retry policy with an explicit, ascending delay schedule.
///
/// An operation is attempted at most `delays.len() + 1` times. After the
/// `i`-th failure the caller sleeps for `delays[i]`; once the schedule is
/// exhausted the last error is returned. The sleep suspends only the calling
/// task.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    delays: Arc<[Duration]>,
}

impl RetryPolicy {
    /// Create a policy from a delay schedule.
    pub fn new(delays: impl Into<Vec<Duration>>) -> Self {
        let delays: Vec<Duration> = delays.into();
        Self {
            delays: delays.into(),
        }
    }

    /// Policy that never retries (a single attempt).
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    /// The configured delay schedule.
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Maximum number of attempts.
    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Run `op` until it succeeds or the delay schedule is exhausted.
    ///
    /// `label` names the operation in log output.
    pub async fn run<F, Fut, T, E>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(
                            operation = label,
                            attempts = attempt + 1,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => {
                    let Some(delay) = self.delays.get(attempt).copied() else {
                        tracing::error!(
                            operation = label,
                            attempts = attempt + 1,
                            error = %e,
                            "Retries exhausted"
                        );
                        return Err(e);
                    };
                    tracing::warn!(
                        operation = label,
                        attempt = attempt + 1,
                        retry_in = ?delay,
                        error = %e,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAYS.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(vec![
            Duration::from_millis(1),
            Duration::from_millis(2),
            Duration::from_millis(3),
        ])
    }

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delays(), &DEFAULT_RETRY_DELAYS);
        assert_eq!(policy.max_attempts(), 4);
    }

    #[tokio::test]
    async fn test_succeeds_after_k_failures() {
        let policy = fast_policy();
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Result<&str, String> = policy
            .run("flaky", || {
                let calls = Arc::clone(&calls);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(format!("failure {n}"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_always_failing_returns_last_error() {
        let policy = fast_policy();
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Result<(), String> = policy
            .run("broken", || {
                let calls = Arc::clone(&calls);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    Err(format!("failure {n}"))
                }
            })
            .await;

        assert_eq!(result.unwrap_err(), "failure 3");
        assert_eq!(calls.load(Ordering::SeqCst), policy.max_attempts());
    }

    #[tokio::test]
    async fn test_no_retry_policy_single_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Result<(), &str> = RetryPolicy::none()
            .run("once", || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("nope")
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_path_sleeps_for_consumed_delays() {
        let policy = RetryPolicy::new(vec![Duration::from_millis(20), Duration::from_millis(30)]);
        let start = tokio::time::Instant::now();

        let _: Result<(), &str> = policy.run("slow", || async { Err("down") }).await;

        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
