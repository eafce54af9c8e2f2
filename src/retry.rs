//! Retry with bounded attempts and pluggable backoff
//!
//! Re-invokes a failing operation up to `max_attempts` (including the first
//! try). The attempt counter lives on the call stack, never on the shared
//! instance, so concurrent callers cannot corrupt each other's counts.
//! Reported retries = attempts - 1.

use crate::error::{resolve_fallback, BoxError, Result, SuojaError};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Delay policy between attempts
#[derive(Debug, Clone, Copy)]
pub enum BackoffPolicy {
    /// Same delay before every retry
    Fixed(Duration),
    /// `initial * multiplier^(attempt - 1)`, capped at `max`
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
}

/// Predicate deciding whether an error is worth retrying
pub type RetryPredicate = Arc<dyn Fn(&BoxError) -> bool + Send + Sync>;

/// Configuration for a retry executor
#[derive(Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first try
    pub max_attempts: u32,
    /// Delay policy between attempts
    pub backoff: BackoffPolicy,
    /// Retry only errors matching this predicate; `None` retries everything
    pub retry_on: Option<RetryPredicate>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::Exponential {
                initial: Duration::from_millis(100),
                multiplier: 2.0,
                max: Duration::from_secs(10),
            },
            retry_on: None,
        }
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("retry_on", &self.retry_on.is_some())
            .finish()
    }
}

/// Retry executor instance
///
/// Stateless apart from its configuration; safe to share freely.
pub struct Retry {
    name: String,
    config: RetryConfig,
}

impl Retry {
    /// Create a new retry executor
    pub fn new(name: impl Into<String>, config: RetryConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// Instance name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured attempt bound (at least 1)
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Run the operation with retries; the last error goes to the fallback.
    pub async fn execute<T, F, Fut, FB>(&self, op: F, fallback: FB) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>>,
        FB: FnOnce(&SuojaError) -> std::result::Result<T, BoxError>,
    {
        match self.call(op).await {
            Ok(value) => Ok(value),
            Err(err) => resolve_fallback(err, fallback),
        }
    }

    /// Run the operation with retries, without fallback resolution.
    pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>>,
    {
        // Attempt count is call-scoped by construction.
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(retry = %self.name, retries = attempt - 1, "succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if attempt >= self.max_attempts() || !self.should_retry(&err) {
                        debug!(retry = %self.name, attempts = attempt, error = %err, "attempts exhausted");
                        return Err(SuojaError::Operation(err));
                    }
                    let delay = self.delay_for(attempt);
                    debug!(
                        retry = %self.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    pub(crate) fn should_retry(&self, err: &BoxError) -> bool {
        self.config.retry_on.as_ref().map_or(true, |p| p(err))
    }

    /// Delay before the retry following `attempt` (1-based).
    pub(crate) fn delay_for(&self, attempt: u32) -> Duration {
        match self.config.backoff {
            BackoffPolicy::Fixed(delay) => delay,
            BackoffPolicy::Exponential {
                initial,
                multiplier,
                max,
            } => {
                // A multiplier below 1 would shrink the backoff; clamp it.
                let factor = multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
                let secs = (initial.as_secs_f64() * factor).min(max.as_secs_f64());
                Duration::from_secs_f64(secs)
            }
        }
    }
}
