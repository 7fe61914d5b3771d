//! Retry and timeout helpers for provider round trips
//!
//! Registration is the only operation retried automatically. Every provider
//! call issued by the session actor is bounded by [`with_timeout`].

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::error::{SoftphoneError, SoftphoneResult};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Short delays, for tests and LAN deployments
    pub fn quick() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_multiplier: 1.5,
            use_jitter: false,
        }
    }

    /// Patient retries for flaky links
    pub fn slow() -> Self {
        Self {
            max_attempts: 8,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 3.0,
            use_jitter: true,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay before the retry following `attempt` (1-based), before jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

/// Failure after retries, with the number of attempts made
#[derive(Debug, Clone, PartialEq)]
pub struct RetryExhausted {
    pub error: SoftphoneError,
    pub attempts: u32,
}

/// Retry an operation with exponential backoff
pub async fn retry_with_backoff<T, F, Fut>(
    operation_name: &str,
    config: RetryConfig,
    operation: F,
) -> SoftphoneResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SoftphoneResult<T>>,
{
    retry_counted(operation_name, &config, operation)
        .await
        .map(|(value, _)| value)
        .map_err(|exhausted| exhausted.error)
}

/// Like [`retry_with_backoff`] but reports how many attempts were made
///
/// Only errors for which [`SoftphoneError::is_recoverable`] holds are retried.
pub async fn retry_counted<T, F, Fut>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<(T, u32), RetryExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SoftphoneResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        debug!(operation = operation_name, attempt, max_attempts, "Attempting operation");

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "Operation succeeded after retries");
                }
                return Ok((result, attempt));
            }
            Err(e) if e.is_recoverable() && attempt < max_attempts => {
                let delay = jittered(config.delay_for(attempt), config.use_jitter);
                warn!(
                    operation = operation_name,
                    attempt,
                    error = %e,
                    category = e.category(),
                    next_delay_ms = delay.as_millis() as u64,
                    "Recoverable error, will retry"
                );
                sleep(delay).await;
            }
            Err(e) => {
                if e.is_recoverable() {
                    error!(operation = operation_name, attempts = attempt, error = %e, "Operation failed after all retry attempts");
                } else {
                    error!(operation = operation_name, error = %e, category = e.category(), "Non-recoverable error, not retrying");
                }
                return Err(RetryExhausted { error: e, attempts: attempt });
            }
        }
    }
}

fn jittered(delay: Duration, use_jitter: bool) -> Duration {
    if !use_jitter {
        return delay;
    }
    // ±10%
    let jitter = (rand::random::<f64>() - 0.5) * 0.2;
    Duration::from_millis((delay.as_millis() as f64 * (1.0 + jitter)) as u64)
}

/// Context-aware error wrapper
pub trait ErrorContext<T> {
    /// Add context to the error
    fn context(self, context: &str) -> SoftphoneResult<T>;

    /// Add context with lazy evaluation
    fn with_context<F>(self, f: F) -> SoftphoneResult<T>
    where
        F: FnOnce() -> String;
}

impl<T> ErrorContext<T> for SoftphoneResult<T> {
    fn context(self, context: &str) -> SoftphoneResult<T> {
        self.with_context(|| context.to_string())
    }

    fn with_context<F>(self, f: F) -> SoftphoneResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| match e {
            // recoverable and caller-facing variants keep their identity
            e if e.is_recoverable() || e.is_caller_misuse() => e,
            SoftphoneError::ProviderError { .. } | SoftphoneError::ShutDown => e,
            other => {
                let context = f();
                debug!(error = %other, context = %context, category = other.category(), "Operation failed with context");
                SoftphoneError::InternalError {
                    message: format!("{}: {}", context, other),
                }
            }
        })
    }
}

/// Bound a provider round trip
pub async fn with_timeout<T, F>(operation_name: &str, timeout: Duration, future: F) -> SoftphoneResult<T>
where
    F: Future<Output = SoftphoneResult<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => {
            error!(operation = operation_name, timeout_ms = timeout.as_millis() as u64, "Operation timed out");
            Err(SoftphoneError::OperationTimeout {
                duration_ms: timeout.as_millis() as u64,
            })
        }
    }
}
