use std::future::Future;
use std::time::Duration;

use cadence_common::CadenceError;
use cadence_drivers::Checkpoint;

/// Bounded exponential backoff for transient task failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `2` means up to three attempts.
    pub max_retries: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_secs(3),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    /// Every attempt failed transiently.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: CadenceError },
    /// A non-retryable condition: interlock, storage, configuration or cancellation.
    #[error(transparent)]
    Aborted(CadenceError),
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Aborted(_) => 0,
        }
    }
}

/// Run `attempt` until it succeeds, fails with a non-transient error, or the
/// retry budget is spent. Backoff waits go through `checkpoint`, so a stop or
/// an interlock trip ends the wait early.
///
/// `attempt` receives the 1-based attempt number.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    checkpoint: &Checkpoint,
    mut attempt: F,
) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = cadence_common::Result<T>>,
{
    let mut n = 0;
    loop {
        n += 1;
        match attempt(n).await {
            Ok(v) => return Ok(v),
            Err(e) if !e.is_transient() => return Err(RetryError::Aborted(e)),
            Err(e) if n > policy.max_retries => {
                return Err(RetryError::Exhausted {
                    attempts: n,
                    last: e,
                })
            }
            Err(e) => {
                let delay = policy.delay_for(n);
                tracing::warn!(
                    target = "cadence-actors",
                    attempt = n,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retry.transient"
                );
                checkpoint.sleep(delay).await.map_err(RetryError::Aborted)?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_common::Region;
    use cadence_drivers::SafetyInterlock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    fn checkpoint() -> (Checkpoint, CancellationToken) {
        let cancel = CancellationToken::new();
        let interlock = SafetyInterlock::new(Region::screen(800.0, 600.0), 3.0);
        (Checkpoint::new(cancel.clone(), interlock), cancel)
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let p = RetryPolicy {
            max_retries: 6,
            backoff: Duration::from_secs(3),
            max_backoff: Duration::from_secs(20),
        };
        let delays: Vec<u64> = (1..=5).map(|r| p.delay_for(r).as_secs()).collect();
        assert_eq!(delays, vec![3, 6, 12, 20, 20]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_then_exhausted() {
        let (cp, _cancel) = checkpoint();
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = retry_transient(&RetryPolicy::default(), &cp, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CadenceError::Transient("input region not ready".into())) }
        })
        .await;
        let err = res.unwrap_err();
        assert_eq!(err.attempts(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_a_retry_is_returned() {
        let (cp, _cancel) = checkpoint();
        let res = retry_transient(&RetryPolicy::default(), &cp, |n| async move {
            if n == 1 {
                Err(CadenceError::Transient("flaky".into()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(res.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let (cp, _cancel) = checkpoint();
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = retry_transient(&RetryPolicy::default(), &cp, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CadenceError::Interlock { x: 0.0, y: 0.0 }) }
        })
        .await;
        assert!(matches!(
            res,
            Err(RetryError::Aborted(CadenceError::Interlock { .. }))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_backoff() {
        let (cp, cancel) = checkpoint();
        cancel.cancel();
        let res: Result<(), _> = retry_transient(&RetryPolicy::default(), &cp, |_| async {
            Err(CadenceError::Transient("down".into()))
        })
        .await;
        assert!(matches!(res, Err(RetryError::Aborted(CadenceError::Cancelled))));
    }
}
