//! Wall-clock bound for async operations
//!
//! Races the operation's future against a deadline; exactly one side wins.
//! On overrun the behavior depends on `cancel_on_timeout`:
//!
//! - `true`: the future is dropped, cancelling the operation at its next
//!   suspension point.
//! - `false`: the operation is detached onto the runtime and left to finish
//!   in the background; its late result is discarded.
//!
//! Cancellation is best effort either way. An operation that never yields
//! is not interrupted and will hold its resources until it returns on its
//! own.

use crate::error::{resolve_fallback, BoxError, Result, SuojaError};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Configuration for a time limiter
#[derive(Debug, Clone, Copy)]
pub struct TimeLimiterConfig {
    /// Deadline for the wrapped operation
    pub timeout: Duration,
    /// Drop the future on overrun instead of detaching it
    pub cancel_on_timeout: bool,
}

impl Default for TimeLimiterConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            cancel_on_timeout: true,
        }
    }
}

/// Time limiter instance
pub struct TimeLimiter {
    name: String,
    config: TimeLimiterConfig,
    timeouts_total: AtomicU64,
}

impl TimeLimiter {
    /// Create a new time limiter
    pub fn new(name: impl Into<String>, config: TimeLimiterConfig) -> Self {
        Self {
            name: name.into(),
            config,
            timeouts_total: AtomicU64::new(0),
        }
    }

    /// Instance name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total calls that hit the deadline
    pub fn timeouts_total(&self) -> u64 {
        self.timeouts_total.load(Ordering::Relaxed)
    }

    /// Race an already-constructed future against the deadline.
    ///
    /// Always cancels by dropping on overrun; use [`call`](Self::call) for
    /// detach-on-timeout semantics.
    pub async fn limit<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = std::result::Result<T, BoxError>>,
    {
        match tokio::time::timeout(self.config.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(SuojaError::Operation(err)),
            Err(_) => self.deadline_exceeded(),
        }
    }

    /// Run the operation under the deadline, honoring `cancel_on_timeout`.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>> + Send + 'static,
        T: Send + 'static,
    {
        if self.config.cancel_on_timeout {
            return self.limit(op()).await;
        }

        // Detached mode: the task survives the deadline; dropping the join
        // handle on overrun discards its eventual result.
        let handle = tokio::spawn(op());
        match tokio::time::timeout(self.config.timeout, handle).await {
            Ok(Ok(outcome)) => outcome.map_err(SuojaError::Operation),
            Ok(Err(join_err)) => Err(SuojaError::Operation(Box::new(join_err))),
            Err(_) => self.deadline_exceeded(),
        }
    }

    /// Run the operation under the deadline; timeouts and failures go to
    /// the fallback.
    pub async fn execute<T, F, Fut, FB>(&self, op: F, fallback: FB) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>> + Send + 'static,
        T: Send + 'static,
        FB: FnOnce(&SuojaError) -> std::result::Result<T, BoxError>,
    {
        match self.call(op).await {
            Ok(value) => Ok(value),
            Err(err) => resolve_fallback(err, fallback),
        }
    }

    fn deadline_exceeded<T>(&self) -> Result<T> {
        self.timeouts_total.fetch_add(1, Ordering::Relaxed);
        debug!(
            limiter = %self.name,
            timeout_ms = self.config.timeout.as_millis() as u64,
            "deadline exceeded"
        );
        Err(SuojaError::Timeout {
            name: self.name.clone(),
            timeout: self.config.timeout,
        })
    }
}
