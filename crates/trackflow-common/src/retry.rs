//! Retry policies for transient infrastructure failures
//!
//! Two policies cover every retrying call in the pipeline:
//!
//! - fixed delay (object store operations, bus handler redelivery)
//! - exponential backoff (worker HTTP calls to collaborating services)
//!
//! Only [`FlowError::Transient`] is re-attempted. Anything else fails the
//! operation immediately, and once a policy's attempts are exhausted the last
//! transient error escalates to [`FlowError::Terminal`] and is never retried
//! again by the caller.

use std::future::Future;
use std::time::Duration;

use tokio_retry2::strategy::{ExponentialBackoff, FixedInterval};
use tokio_retry2::{Retry, RetryError};

use crate::error::{FlowError, Result};

/// Fixed-delay strategy: `attempts` total tries, `delay_ms` between them.
pub fn fixed_delay(attempts: usize, delay_ms: u64) -> impl Iterator<Item = Duration> {
    FixedInterval::from_millis(delay_ms).take(attempts.saturating_sub(1))
}

/// Exponential strategy: `attempts` total tries, delays of `initial_ms`,
/// `initial_ms * 2`, `initial_ms * 4`, ... capped at 30s.
pub fn exponential(attempts: usize, initial_ms: u64) -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(2)
        .factor(initial_ms / 2)
        .max_delay(Duration::from_secs(30))
        .take(attempts.saturating_sub(1))
}

/// Run `op` under a retry strategy, re-attempting transient errors only.
pub async fn run<I, F, Fut, T>(strategy: I, mut op: F) -> Result<T>
where
    I: IntoIterator<Item = Duration>,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    Retry::spawn(strategy, || {
        let fut = op();
        async move {
            fut.await.map_err(|err| {
                if err.is_retryable() {
                    tracing::warn!(error = %err, "transient failure, will retry");
                    RetryError::Transient {
                        err,
                        retry_after: None,
                    }
                } else {
                    RetryError::Permanent(err)
                }
            })
        }
    })
    .await
    .map_err(FlowError::into_terminal)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fixed_delay_spacing() {
        let delays: Vec<_> = fixed_delay(3, 2000).collect();
        assert_eq!(delays, vec![Duration::from_millis(2000); 2]);
    }

    #[test]
    fn exponential_doubles() {
        let delays: Vec<_> = exponential(3, 2000).collect();
        assert_eq!(
            delays,
            vec![Duration::from_millis(2000), Duration::from_millis(4000)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let calls = AtomicUsize::new(0);
        let result = run(fixed_delay(3, 10), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(FlowError::Transient("blip".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_escalates_to_terminal() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = run(fixed_delay(3, 10), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FlowError::Transient("still down".into()))
        })
        .await;
        assert!(matches!(result, Err(FlowError::Terminal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_fail_fast() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = run(fixed_delay(3, 10), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FlowError::Validation("not an mp3".into()))
        })
        .await;
        assert!(matches!(result, Err(FlowError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
