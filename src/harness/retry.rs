//! Bounded retry with a fixed interval
//!
//! The sleep is injected through [`Sleeper`] so polling logic can be driven
//! without real delays.

use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Source of blocking waits
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Attempt count and the fixed delay between attempts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryBudget {
    pub attempts: u32,
    pub interval: Duration,
}

impl RetryBudget {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }
}

/// What a single probe observed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Probe<T> {
    /// The awaited condition holds
    Ready(T),
    /// Not yet; the observation is kept for reporting
    NotYet(T),
}

/// Result of a budgeted retry
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Succeeded { attempt: u32, value: T },
    Exhausted { attempts: u32, last: Option<T> },
}

/// Run `probe` until it reports [`Probe::Ready`] or the budget runs out.
///
/// At least one probe always runs, even with a zero budget. The interval is
/// slept between attempts only, never after the final one. A probe error
/// ends the retry immediately.
pub async fn retry_with_budget<T, F, Fut>(
    budget: RetryBudget,
    sleeper: &dyn Sleeper,
    mut probe: F,
) -> Result<RetryOutcome<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Probe<T>>>,
{
    let attempts = budget.attempts.max(1);
    let mut last = None;

    for attempt in 1..=attempts {
        match probe(attempt).await? {
            Probe::Ready(value) => return Ok(RetryOutcome::Succeeded { attempt, value }),
            Probe::NotYet(value) => {
                debug!("Attempt {}/{} not ready", attempt, attempts);
                last = Some(value);
            }
        }

        if attempt < attempts {
            sleeper.sleep(budget.interval).await;
        }
    }

    Ok(RetryOutcome::Exhausted { attempts, last })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records requested sleeps instead of waiting
    #[derive(Default)]
    pub(crate) struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        pub(crate) fn sleeps(&self) -> Vec<Duration> {
            self.slept.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    fn budget() -> RetryBudget {
        RetryBudget::new(10, Duration::from_secs(10))
    }

    #[test]
    fn test_succeeds_on_first_attempt() {
        let sleeper = RecordingSleeper::default();
        let outcome = tokio_test::block_on(retry_with_budget(budget(), &sleeper, |_| async {
            Ok(Probe::Ready("2047"))
        }))
        .unwrap();

        assert_eq!(
            outcome,
            RetryOutcome::Succeeded {
                attempt: 1,
                value: "2047"
            }
        );
        assert!(sleeper.sleeps().is_empty());
    }

    #[test]
    fn test_exhausts_budget() {
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let outcome = tokio_test::block_on(retry_with_budget(budget(), &sleeper, |attempt| {
            calls += 1;
            async move { Ok(Probe::NotYet(attempt)) }
        }))
        .unwrap();

        assert_eq!(
            outcome,
            RetryOutcome::Exhausted {
                attempts: 10,
                last: Some(10)
            }
        );
        assert_eq!(calls, 10);
        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(10); 9]);
    }

    #[test]
    fn test_zero_budget_still_probes_once() {
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let outcome = tokio_test::block_on(retry_with_budget(
            RetryBudget::new(0, Duration::from_secs(1)),
            &sleeper,
            |_| {
                calls += 1;
                async { Ok(Probe::NotYet(())) }
            },
        ))
        .unwrap();

        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 1, .. }));
        assert_eq!(calls, 1);
        assert!(sleeper.sleeps().is_empty());
    }

    #[test]
    fn test_probe_error_stops_retry() {
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let result: Result<RetryOutcome<()>> =
            tokio_test::block_on(retry_with_budget(budget(), &sleeper, |_| {
                calls += 1;
                async { Err(anyhow::anyhow!("session dropped")) }
            }));

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
