//! Poller
//!
//! Evaluates a probe until its matcher holds or the deadline passes. A
//! timed-out poll is a result, not an error: the caller decides how to fail.
//! Evaluation errors count as "not yet" because the platform may be
//! transiently unreachable.

mod log_tail;

pub use log_tail::{tail_snapshots_until, tail_until, LogTail};

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::common::{truncate, Error, Result};

/// Interval and deadline of one poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollBudget {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// An observation function paired with its success predicate
pub struct Probe<F, M> {
    evaluate: F,
    matcher: M,
    budget: PollBudget,
}

impl<T, F, Fut, M> Probe<F, M>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    M: Fn(&T) -> bool,
{
    pub fn new(evaluate: F, matcher: M, budget: PollBudget) -> Self {
        Self {
            evaluate,
            matcher,
            budget,
        }
    }

    /// Run the poll loop
    ///
    /// Evaluations are strictly sequential. Returns no later than
    /// `timeout + interval` plus the duration of one evaluation.
    pub async fn poll(mut self) -> PollResult<T> {
        let PollBudget { interval, timeout } = self.budget;
        let started = Instant::now();
        let mut attempts = 0u32;
        let mut last_observed = None;

        loop {
            attempts += 1;
            let last_error = match (self.evaluate)().await {
                Ok(value) => {
                    let matched = (self.matcher)(&value);
                    last_observed = Some(value);
                    if matched {
                        return PollResult {
                            satisfied: true,
                            last_observed,
                            last_error: None,
                            elapsed: started.elapsed(),
                            attempts,
                        };
                    }
                    None
                }
                Err(e) => {
                    tracing::trace!(attempt = attempts, "probe evaluation failed: {}", e);
                    Some(e.to_string())
                }
            };

            if started.elapsed() >= timeout {
                return PollResult {
                    satisfied: false,
                    last_observed,
                    last_error,
                    elapsed: started.elapsed(),
                    attempts,
                };
            }

            tokio::time::sleep(interval).await;
        }
    }
}

/// Convenience wrapper around [`Probe::poll`]
pub async fn poll<T, F, Fut, M>(budget: PollBudget, evaluate: F, matcher: M) -> PollResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    M: Fn(&T) -> bool,
{
    Probe::new(evaluate, matcher, budget).poll().await
}

/// Terminal result of one poll loop
#[derive(Debug, Clone)]
pub struct PollResult<T> {
    pub satisfied: bool,
    /// Most recent successfully evaluated value
    pub last_observed: Option<T>,
    /// Error from the most recent evaluation, if it failed
    pub last_error: Option<String>,
    pub elapsed: Duration,
    pub attempts: u32,
}

impl<T: Debug> PollResult<T> {
    /// What the probe saw last, for failure reports
    pub fn describe_last(&self) -> String {
        match (&self.last_error, &self.last_observed) {
            (Some(err), _) => format!("error: {}", truncate(err, 300)),
            (None, Some(value)) => truncate(&format!("{:?}", value), 300),
            (None, None) => "nothing observed".to_string(),
        }
    }

    /// Turn an unsatisfied poll into a `Timeout` error
    pub fn into_result(self, operation: &str) -> Result<T> {
        if self.satisfied {
            if let Some(value) = self.last_observed {
                return Ok(value);
            }
        }
        let last = self.describe_last();
        Err(Error::timeout(operation, self.elapsed, Some(last)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    fn budget(interval_secs: u64, timeout_secs: u64) -> PollBudget {
        PollBudget::new(
            Duration::from_secs(interval_secs),
            Duration::from_secs(timeout_secs),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_satisfied_immediately() {
        let result = poll(budget(2, 30), || async { Ok(42) }, |v| *v == 42).await;
        assert!(result.satisfied);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.last_observed, Some(42));
        assert_eq!(result.elapsed, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_value_stabilizes_within_timeout() {
        let start = Instant::now();
        let result = poll(
            budget(2, 30),
            || async move { Ok(start.elapsed().as_secs()) },
            |secs| *secs >= 7,
        )
        .await;

        assert!(result.satisfied);
        assert_eq!(result.last_observed, Some(8));
        assert!(result.elapsed <= Duration::from_secs(32));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_matches_returns_unsatisfied_once() {
        let start = Instant::now();
        let result = poll(budget(2, 30), || async { Ok("STARTING") }, |s| *s == "RUNNING").await;

        assert!(!result.satisfied);
        assert_eq!(result.last_observed, Some("STARTING"));
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() <= Duration::from_secs(32));
        assert_eq!(result.attempts, 16);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_count_as_not_yet() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = poll(
            budget(1, 10),
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(Error::Internal("connection refused".into()))
                    } else {
                        Ok("Hi, I'm Dora!".to_string())
                    }
                }
            },
            |body| body.contains("Dora"),
        )
        .await;

        assert!(result.satisfied);
        assert_eq!(result.attempts, 4);
        assert!(result.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_endpoint_keeps_error_marker() {
        let result: PollResult<String> = poll(
            budget(2, 30),
            || async { Err(Error::Internal("connection refused".into())) },
            |_| true,
        )
        .await;

        assert!(!result.satisfied);
        assert!(result.last_observed.is_none());
        assert!(result.describe_last().contains("connection refused"));

        let err = result.into_result("curl CATS-APP-123").unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_instance_leaves_and_returns_to_running() {
        // RUNNING for 12s, STOPPING until 20s, RUNNING afterwards
        let start = Instant::now();
        let state = move || {
            let t = start.elapsed();
            async move {
                if t >= Duration::from_secs(12) && t < Duration::from_secs(20) {
                    Ok("STOPPING")
                } else {
                    Ok("RUNNING")
                }
            }
        };

        let left = poll(budget(2, 35), state, |s| *s != "RUNNING").await;
        assert!(left.satisfied);
        assert_eq!(left.last_observed, Some("STOPPING"));
        assert!(start.elapsed() >= Duration::from_secs(12));
        assert!(start.elapsed() <= Duration::from_secs(15));

        let back = poll(budget(2, 35), state, |s| *s == "RUNNING").await;
        assert!(back.satisfied);
        assert!(start.elapsed() >= Duration::from_secs(20));
        assert!(start.elapsed() <= Duration::from_secs(22));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evaluations_never_overlap() {
        let in_flight = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&in_flight);
        let result = poll(
            PollBudget::new(Duration::from_millis(10), Duration::from_secs(1)),
            move || {
                let flag = Arc::clone(&flag);
                async move {
                    assert!(!flag.swap(true, Ordering::SeqCst), "concurrent evaluation");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    flag.store(false, Ordering::SeqCst);
                    Ok(())
                }
            },
            |_| false,
        )
        .await;

        assert!(!result.satisfied);
        assert!(result.attempts > 1);
    }
}
