//! Bounded retries with exponential backoff
//!
//! Only transient errors (timeouts, dropped connections) are retried, and at
//! most `max_retries` times. Anything else is returned on the first failure.

use crate::config::RetryConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy shared by store and network calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_interval: Duration,
    max_interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_interval: Duration, max_interval: Duration) -> Self {
        Self {
            max_retries,
            initial_interval,
            max_interval: max_interval.max(initial_interval),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.initial_interval_ms),
            Duration::from_millis(config.max_interval_ms),
        )
    }

    /// Policy that never retries
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Run `op` until it succeeds, fails permanently, or runs out of retries
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.backoff();
        let mut retries = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if retries >= self.max_retries => {
                    return Err(AppError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: retries + 1,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    retries += 1;
                    let delay = backoff.next_backoff().unwrap_or(self.max_interval);
                    warn!(
                        operation,
                        attempt = retries,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    metrics::record_retry(operation);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Bound a single call with a timeout
pub async fn with_timeout<T, Fut>(operation: &str, timeout: Duration, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout {
            operation: operation.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::from_millis(2))
    }

    fn transient() -> AppError {
        AppError::Cache {
            message: "connection reset by peer".into(),
            transient: true,
        }
    }

    #[tokio::test]
    async fn test_recovers_from_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .run("SCARD", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast_policy(2)
            .run("SADD", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            })
            .await;

        assert!(matches!(
            result,
            Err(AppError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast_policy(5)
            .run("GET", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::Cache {
                    message: "NOAUTH Authentication required".into(),
                    transient: false,
                })
            })
            .await;

        assert!(matches!(result, Err(AppError::Cache { transient: false, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout() {
        let result: Result<()> = with_timeout("PING", Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(err, AppError::Timeout { timeout_ms: 5, .. }));
    }
}
