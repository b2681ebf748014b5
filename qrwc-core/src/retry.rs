//! Retry with exponential backoff, grounded on the grounding crate's
//! `RetryExecutor`/`RetryConfig` (`knhk-sidecar/src/retry.rs`), adapted so
//! callers can pass a per-call policy instead of one crate-wide config,
//! and to distinguish the default read (2) vs. write (0) retry counts.

use crate::error::{is_retryable, BridgeError};
use tokio::time::{sleep, Duration};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub factor: f64,
}

impl RetryConfig {
    /// Default policy for QRWC reads.
    pub fn reads() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 100,
            factor: 2.0,
        }
    }

    /// Default policy for QRWC writes.
    pub fn writes() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 100,
            factor: 2.0,
        }
    }
}

pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub async fn execute<F, Fut, T>(&self, mut f: F) -> Result<T, BridgeError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, BridgeError>>,
    {
        let mut delay_ms = self.config.base_delay_ms;

        for attempt in 0..=self.config.max_retries {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.config.max_retries && is_retryable(&e) => {
                    tracing::warn!(attempt, error = %e, delay_ms, "retrying after transient error");
                    sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = ((delay_ms as f64) * self.config.factor) as u64;
                }
                Err(e) => return Err(e),
            }
        }

        unreachable!("loop always returns on its final iteration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn retries_transient_errors_up_to_limit() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(RetryConfig {
            max_retries: 3,
            base_delay_ms: 1,
            factor: 1.0,
        });

        let calls2 = Arc::clone(&calls);
        let result: Result<(), BridgeError> = executor.execute(|| {
            let calls = Arc::clone(&calls2);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BridgeError::Timeout(5000))
            }
        }).await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(RetryConfig::reads());

        let calls2 = Arc::clone(&calls);
        let result: Result<(), BridgeError> = executor.execute(|| {
            let calls = Arc::clone(&calls2);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BridgeError::AuthInvalid)
            }
        }).await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_without_retry_when_first_call_ok() {
        let executor = RetryExecutor::new(RetryConfig::writes());
        let result = executor.execute(|| async { Ok::<_, BridgeError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
