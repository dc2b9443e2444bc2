//! Bounded polling.
//!
//! Every wait in proxyctl (process appearing, process exiting, health check)
//! is expressed as [`poll_until`]: probe, sleep a fixed interval, probe again,
//! give up after a fixed number of attempts. Nothing blocks indefinitely.

use std::future::Future;
use std::time::Duration;
use tokio_retry::Retry;
use tokio_retry::strategy::FixedInterval;

/// Attempt budget for [`poll_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    /// Total number of probes, at least one is always made
    pub attempts: u32,
    /// Sleep between probes
    pub interval: Duration,
}

impl PollBudget {
    #[must_use]
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts,
            interval,
        }
    }

    /// Upper bound of the time spent sleeping.
    #[must_use]
    pub fn max_wait(&self) -> Duration {
        self.interval * self.attempts.saturating_sub(1)
    }
}

/// Run `probe` until it yields `Some`, or the budget is exhausted.
///
/// Returns the first `Some` value, or `None` after `budget.attempts` probes.
pub async fn poll_until<T, F, Fut>(budget: PollBudget, mut probe: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let strategy =
        FixedInterval::new(budget.interval).take(budget.attempts.saturating_sub(1) as usize);
    let mut attempt = 0u32;

    Retry::start(strategy, || {
        attempt += 1;
        let current = attempt;
        let fut = probe();
        async move {
            match fut.await {
                Some(value) => Ok(value),
                None => {
                    tracing::trace!(target: "poll", "probe {current} not satisfied");
                    Err(())
                }
            }
        }
    })
    .await
    .ok()
}

/// Boolean form of [`poll_until`].
pub async fn poll_until_true<F, Fut>(budget: PollBudget, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    poll_until(budget, || {
        let fut = probe();
        async move { fut.await.then_some(()) }
    })
    .await
    .is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> PollBudget {
        PollBudget::new(attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_returns_first_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = poll_until(fast(10), move || {
            let n = c.fetch_add(1, Ordering::SeqCst) + 1;
            async move { (n == 3).then_some(n) }
        })
        .await;

        assert_eq!(result, Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let ok = poll_until_true(fast(4), move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { false }
        })
        .await;

        assert!(!ok);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_zero_budget_still_probes_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let ok = poll_until_true(fast(0), move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { true }
        })
        .await;

        assert!(ok);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_max_wait() {
        let budget = PollBudget::new(30, Duration::from_secs(1));
        assert_eq!(budget.max_wait(), Duration::from_secs(29));
    }
}
