//! Exponential backoff for node and log round trips.

use std::future::Future;
use std::time::Duration;

use chainscan_core::RetryConfig;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::SourceError;

/// Stateless retry policy: computes the next delay given the attempt number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before the `attempt`-th retry (1-based), `None` once
    /// `max_retries` is exceeded.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.should_retry(attempt) {
            return None;
        }
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let base_ms = self.config.initial_backoff_ms as f64 * self.config.multiplier.powi(exp);
        let capped = base_ms.min(self.config.max_backoff_ms as f64);
        Some(Duration::from_millis(capped as u64))
    }

    /// Returns `true` if retries remain after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.config.max_retries.map_or(true, |max| attempt <= max)
    }

    /// Run `op` until it succeeds, fails permanently, runs out of retries or
    /// `cancel` fires ([`SourceError::Closed`]).
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        what: &str,
        mut op: F,
    ) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut attempt = 0u32;
        loop {
            let err = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SourceError::Closed),
                res = op() => match res {
                    Ok(value) => return Ok(value),
                    Err(e) => e,
                },
            };
            if !err.is_retryable() {
                return Err(err);
            }
            attempt = attempt.saturating_add(1);
            let Some(delay) = self.next_delay(attempt) else {
                return Err(SourceError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            };
            warn!(op = what, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
            tokio::select! {
                _ = cancel.cancelled() => return Err(SourceError::Closed),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainscan_core::NodeError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: Option<u32>) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            initial_backoff_ms: 100,
            max_backoff_ms: 500,
            multiplier: 2.0,
        })
    }

    #[test]
    fn delays_double_then_cap() {
        let p = policy(Some(5));
        assert_eq!(p.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(p.next_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(p.next_delay(3), Some(Duration::from_millis(400)));
        assert_eq!(p.next_delay(4), Some(Duration::from_millis(500)));
        assert_eq!(p.next_delay(6), None);
    }

    #[test]
    fn unbounded_never_gives_up() {
        let p = policy(None);
        assert!(p.should_retry(u32::MAX));
        assert_eq!(p.next_delay(1_000), Some(Duration::from_millis(500)));
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let p = RetryPolicy::new(RetryConfig::fixed(Duration::from_millis(1), Some(5)));
        let calls = AtomicU32::new(0);
        let out = p
            .run(&CancellationToken::new(), "test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SourceError::Node(NodeError::Rpc("unavailable".into())))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_return_immediately() {
        let p = RetryPolicy::new(RetryConfig::fixed(Duration::from_millis(1), None));
        let calls = AtomicU32::new(0);
        let err = p
            .run(&CancellationToken::new(), "test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(SourceError::Connect("refused".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Connect(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_keep_last_error() {
        let p = RetryPolicy::new(RetryConfig::fixed(Duration::from_millis(1), Some(2)));
        let err = p
            .run(&CancellationToken::new(), "test", || async {
                Err::<(), _>(SourceError::Node(NodeError::Rpc("down".into())))
            })
            .await
            .unwrap_err();
        match err {
            SourceError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, SourceError::Node(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let p = RetryPolicy::new(RetryConfig::fixed(Duration::from_secs(3_600), None));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = p
            .run(&cancel, "test", || async {
                Err::<(), _>(SourceError::Node(NodeError::Rpc("down".into())))
            })
            .await
            .unwrap_err();
        assert!(err.is_closed());
    }
}
