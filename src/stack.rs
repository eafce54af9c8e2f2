//! Stack - composition of protective layers around one call site
//!
//! Builds a decorator chain explicitly instead of through interception.
//! Layers apply in a fixed order, outermost first:
//!
//! ```text
//! RateLimiter ──► Retry ──► CircuitBreaker ──► Bulkhead ──► TimeLimiter ──► op
//! ```
//!
//! Every layer sees only its own operation's direct outcome. Rejections
//! raised by one layer pass through the others untouched: the retry layer
//! re-invokes on operation failures only, and the circuit breaker records
//! operation failures and timeouts but not bulkhead rejections (the
//! operation never ran, so there is nothing to learn about the dependency).
//!
//! # Example
//!
//! ```ignore
//! use suoja::{Registry, Stack};
//!
//! let registry = Registry::new();
//! let stack = Stack::new()
//!     .with_retry(registry.retry_or_default("backend"))
//!     .with_circuit_breaker(registry.circuit_breaker_or_default("backend"))
//!     .with_time_limiter(registry.time_limiter_or_default("backend"));
//!
//! let reply = stack
//!     .execute(|| async { fetch_quote().await }, |_| Ok(Quote::cached()))
//!     .await?;
//! ```

use crate::bulkhead::Bulkhead;
use crate::circuit_breaker::CircuitBreaker;
use crate::error::{resolve_fallback, BoxError, Result, SuojaError};
use crate::rate_limiter::RateLimiter;
use crate::retry::Retry;
use crate::time_limiter::TimeLimiter;
use std::future::Future;
use std::sync::Arc;

/// Composition of protective layers; any subset may be configured.
#[derive(Default)]
pub struct Stack {
    rate_limiter: Option<Arc<RateLimiter>>,
    retry: Option<Arc<Retry>>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    bulkhead: Option<Arc<Bulkhead>>,
    time_limiter: Option<Arc<TimeLimiter>>,
}

impl Stack {
    /// Start an empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit calls through this rate limiter
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Retry failed operation attempts with this executor
    pub fn with_retry(mut self, retry: Arc<Retry>) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Guard attempts with this circuit breaker
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    /// Run attempts inside this bulkhead's slot pool
    pub fn with_bulkhead(mut self, bulkhead: Arc<Bulkhead>) -> Self {
        self.bulkhead = Some(bulkhead);
        self
    }

    /// Bound each attempt's duration with this time limiter
    pub fn with_time_limiter(mut self, limiter: Arc<TimeLimiter>) -> Self {
        self.time_limiter = Some(limiter);
        self
    }

    /// Run the operation through the configured layers; any rejection or
    /// final failure is handed to the fallback.
    pub async fn execute<T, F, Fut, FB>(&self, op: F, fallback: FB) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>> + Send + 'static,
        T: Send + 'static,
        FB: FnOnce(&SuojaError) -> std::result::Result<T, BoxError>,
    {
        match self.call(op).await {
            Ok(value) => Ok(value),
            Err(err) => resolve_fallback(err, fallback),
        }
    }

    /// Run the operation through the configured layers without fallback
    /// resolution.
    pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>> + Send + 'static,
        T: Send + 'static,
    {
        // The rate limiter admits the logical call once; retries of an
        // admitted call do not consume further permits.
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await?;
        }

        let max_attempts = self.retry.as_ref().map_or(1, |r| r.max_attempts());
        let mut attempt = 1u32;
        loop {
            match self.attempt_once(&mut op).await {
                Ok(value) => return Ok(value),
                Err(SuojaError::Operation(err)) => {
                    let Some(retry) = &self.retry else {
                        return Err(SuojaError::Operation(err));
                    };
                    if attempt >= max_attempts || !retry.should_retry(&err) {
                        return Err(SuojaError::Operation(err));
                    }
                    tokio::time::sleep(retry.delay_for(attempt)).await;
                    attempt += 1;
                }
                // Rejections belong to their own layer; never retried here.
                Err(rejection) => return Err(rejection),
            }
        }
    }

    /// One protected attempt: breaker admission, bulkhead slot, bounded run.
    async fn attempt_once<T, F, Fut>(&self, op: &mut F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>> + Send + 'static,
        T: Send + 'static,
    {
        let token = match &self.circuit_breaker {
            Some(breaker) => Some(breaker.try_acquire()?),
            None => None,
        };

        let slot = match &self.bulkhead {
            Some(bulkhead) => match bulkhead.acquire().await {
                Ok(slot) => Some(slot),
                Err(rejection) => {
                    // The operation never ran; return the breaker's trial
                    // slot instead of recording an outcome.
                    if let (Some(breaker), Some(token)) = (&self.circuit_breaker, token) {
                        breaker.cancel(token);
                    }
                    return Err(rejection);
                }
            },
            None => None,
        };

        let outcome = match &self.time_limiter {
            Some(limiter) => limiter.call(|| op()).await,
            None => op().await.map_err(SuojaError::Operation),
        };
        drop(slot);

        if let (Some(breaker), Some(token)) = (&self.circuit_breaker, token) {
            // Timeouts count as failures toward the breaker window.
            breaker.record(token, outcome.is_err());
        }
        outcome
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::bulkhead::BulkheadConfig;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::rate_limiter::RateLimiterConfig;
    use crate::retry::{BackoffPolicy, RetryConfig};
    use crate::time_limiter::TimeLimiterConfig;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn quick_retry(max_attempts: u32) -> Arc<Retry> {
        Arc::new(Retry::new(
            "stack",
            RetryConfig {
                max_attempts,
                backoff: BackoffPolicy::Fixed(Duration::from_millis(1)),
                retry_on: None,
            },
        ))
    }

    fn breaker(min_calls: usize) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "stack",
            CircuitBreakerConfig {
                failure_rate_threshold: 50.0,
                min_calls,
                window_size: min_calls,
                open_duration: Duration::from_secs(60),
                half_open_max_calls: 1,
            },
        ))
    }

    #[tokio::test]
    async fn test_empty_stack_runs_operation_directly() {
        let stack = Stack::new();
        let result = stack.call(|| async { Ok::<_, BoxError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_retry_then_breaker_sees_each_attempt() {
        let cb = breaker(4);
        let stack = Stack::new()
            .with_retry(quick_retry(3))
            .with_circuit_breaker(Arc::clone(&cb));

        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = stack
            .call(move || {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err::<&str, BoxError>("transient".into())
                    } else {
                        Ok("recovered")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Each attempt was recorded individually: two failures, one success
        assert_eq!(cb.recorded_calls(), 3);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_open_breaker_rejection_is_not_retried() {
        let cb = breaker(2);
        // Trip the breaker
        for _ in 0..2 {
            let _ = cb
                .call(|| async { Err::<(), BoxError>("down".into()) })
                .await;
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let stack = Stack::new()
            .with_retry(quick_retry(5))
            .with_circuit_breaker(cb);

        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = stack
            .call(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(())
                }
            })
            .await;

        // The circuit-open rejection surfaced once; retry stayed out of it
        assert!(matches!(result, Err(SuojaError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_rejection_reaches_fallback_untouched() {
        let limiter = Arc::new(RateLimiter::new(
            "stack",
            RateLimiterConfig {
                window: Duration::from_secs(60),
                permits_per_window: 0,
                max_wait: None,
            },
        ));
        let stack = Stack::new()
            .with_rate_limiter(limiter)
            .with_retry(quick_retry(5));

        let result = stack
            .execute(
                || async { Ok("real") },
                |err| {
                    assert!(matches!(err, SuojaError::RateLimited { .. }));
                    Ok("shed")
                },
            )
            .await;
        assert_eq!(result.unwrap(), "shed");
    }

    #[tokio::test]
    async fn test_timeout_recorded_as_breaker_failure() {
        let cb = breaker(2);
        let tl = Arc::new(TimeLimiter::new(
            "stack",
            TimeLimiterConfig {
                timeout: Duration::from_millis(5),
                cancel_on_timeout: true,
            },
        ));
        let stack = Stack::new()
            .with_circuit_breaker(Arc::clone(&cb))
            .with_time_limiter(tl);

        for _ in 0..2 {
            let result = stack
                .call(|| async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, BoxError>(())
                })
                .await;
            assert!(matches!(result, Err(SuojaError::Timeout { .. })));
        }

        // Two timeouts = 100% failure ratio over min volume
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_bulkhead_rejection_not_recorded_by_breaker() {
        let cb = breaker(1);
        let bulkhead = Arc::new(Bulkhead::new(
            "stack",
            BulkheadConfig {
                max_concurrent: 1,
                max_queue: 0,
                max_wait: Duration::from_millis(1),
            },
        ));

        let held = bulkhead.acquire().await.unwrap();
        let stack = Stack::new()
            .with_circuit_breaker(Arc::clone(&cb))
            .with_bulkhead(Arc::clone(&bulkhead));

        let result = stack.call(|| async { Ok::<_, BoxError>(()) }).await;
        assert!(matches!(result, Err(SuojaError::BulkheadFull { .. })));
        drop(held);

        // min_calls is 1, so a recorded failure would have opened the
        // breaker; slot starvation is not a dependency failure.
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.recorded_calls(), 0);
    }

    #[tokio::test]
    async fn test_full_stack_happy_path() {
        let registry = crate::registry::Registry::new();
        let stack = Stack::new()
            .with_rate_limiter(registry.rate_limiter_or_default("svc"))
            .with_retry(registry.retry_or_default("svc"))
            .with_circuit_breaker(registry.circuit_breaker_or_default("svc"))
            .with_bulkhead(registry.bulkhead_or_default("svc"))
            .with_time_limiter(registry.time_limiter_or_default("svc"));

        let result = stack.call(|| async { Ok::<_, BoxError>("through") }).await;
        assert_eq!(result.unwrap(), "through");
    }
}
