//! Circuit breaker for failing-fast on unhealthy dependencies
//!
//! Tracks the failure ratio over a sliding window of recent call outcomes
//! and short-circuits calls once the ratio crosses a threshold.
//!
//! # States
//!
//! ```text
//! Closed ──► Open:      failure ratio > threshold over ≥ min_calls outcomes
//! Open ──► HalfOpen:    open_duration elapsed since opening
//! HalfOpen ──► Closed:  all trial calls succeeded
//! HalfOpen ──► Open:    any trial call failed
//! ```
//!
//! The instance lock guards state and window bookkeeping only; the wrapped
//! operation always runs outside the lock. Outcomes that come back after a
//! concurrent transition (the breaker opened or reset while the operation
//! was in flight) are dropped rather than recorded into the wrong window.

use crate::error::{resolve_fallback, BoxError, Result, SuojaError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through, outcomes are recorded
    Closed,
    /// Calls are rejected without invoking the operation
    Open,
    /// A limited number of trial calls probe the dependency
    HalfOpen,
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure ratio (percent, 0-100) above which the circuit opens
    pub failure_rate_threshold: f64,
    /// Minimum recorded calls before the ratio is evaluated
    pub min_calls: usize,
    /// Sliding window size; clamped up to `min_calls` if smaller
    pub window_size: usize,
    /// How long the circuit stays open before probing
    pub open_duration: Duration,
    /// Trial calls allowed while half-open; all must succeed to close
    pub half_open_max_calls: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            min_calls: 10,
            window_size: 16,
            open_duration: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

/// Token handed out per admitted call, returned when recording the outcome.
///
/// The generation stamp lets the breaker drop outcomes that raced with a
/// state transition.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallToken {
    kind: CallKind,
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Normal,
    Trial,
}

struct Inner {
    state: CircuitState,
    /// Last K outcomes, `true` = failure
    window: VecDeque<bool>,
    /// Only meaningful while `state` is `Open`
    opened_at: Instant,
    trials_started: usize,
    trials_succeeded: usize,
    /// Bumped on every transition; stale outcomes are dropped
    generation: u64,
}

/// Circuit breaker instance
///
/// Shared across call sites via the registry; all mutation goes through
/// `execute`/`call`.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    window_capacity: usize,
    trial_calls: usize,
    inner: Mutex<Inner>,
    rejected_total: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker in the `Closed` state
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let window_capacity = config.window_size.max(config.min_calls).max(1);
        let trial_calls = config.half_open_max_calls.max(1);
        Self {
            name: name.into(),
            config,
            window_capacity,
            trial_calls,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window: VecDeque::with_capacity(window_capacity),
                opened_at: Instant::now(),
                trials_started: 0,
                trials_succeeded: 0,
                generation: 0,
            }),
            rejected_total: AtomicU64::new(0),
        }
    }

    /// Instance name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Outcomes currently recorded in the sliding window
    pub fn recorded_calls(&self) -> usize {
        self.inner.lock().window.len()
    }

    /// Total calls rejected while open or half-open saturated
    pub fn rejected_total(&self) -> u64 {
        self.rejected_total.load(Ordering::Relaxed)
    }

    /// Run the operation through the breaker; rejections and failures are
    /// handed to the fallback.
    pub async fn execute<T, F, Fut, FB>(&self, op: F, fallback: FB) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>>,
        FB: FnOnce(&SuojaError) -> std::result::Result<T, BoxError>,
    {
        match self.call(op).await {
            Ok(value) => Ok(value),
            Err(err) => resolve_fallback(err, fallback),
        }
    }

    /// Like [`execute`](Self::execute), but a caller-supplied classifier can
    /// mark an `Ok` outcome as a failure for recording purposes (an HTTP 500
    /// carried in the success value, say). The value is still returned.
    pub async fn execute_classified<T, F, Fut, C, FB>(
        &self,
        op: F,
        classify: C,
        fallback: FB,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>>,
        C: FnOnce(&T) -> bool,
        FB: FnOnce(&SuojaError) -> std::result::Result<T, BoxError>,
    {
        match self.call_classified(op, classify).await {
            Ok(value) => Ok(value),
            Err(err) => resolve_fallback(err, fallback),
        }
    }

    /// Run the operation through the breaker without fallback resolution.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>>,
    {
        self.call_classified(op, |_| false).await
    }

    /// Core call path: admit, run outside the lock, record.
    pub async fn call_classified<T, F, Fut, C>(&self, op: F, classify: C) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>>,
        C: FnOnce(&T) -> bool,
    {
        let token = self.try_acquire()?;
        match op().await {
            Ok(value) => {
                self.record(token, classify(&value));
                Ok(value)
            }
            Err(err) => {
                self.record(token, true);
                Err(SuojaError::Operation(err))
            }
        }
    }

    /// Admit or reject a call. On admission the returned token must be
    /// resolved with [`record`](Self::record) or [`cancel`](Self::cancel).
    pub(crate) fn try_acquire(&self) -> Result<CallToken> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(CallToken {
                kind: CallKind::Normal,
                generation: inner.generation,
            }),
            CircuitState::Open => {
                if inner.opened_at.elapsed() >= self.config.open_duration {
                    self.half_open_locked(&mut inner);
                    inner.trials_started = 1;
                    Ok(CallToken {
                        kind: CallKind::Trial,
                        generation: inner.generation,
                    })
                } else {
                    drop(inner);
                    self.reject()
                }
            }
            CircuitState::HalfOpen => {
                if inner.trials_started < self.trial_calls {
                    inner.trials_started += 1;
                    Ok(CallToken {
                        kind: CallKind::Trial,
                        generation: inner.generation,
                    })
                } else {
                    drop(inner);
                    self.reject()
                }
            }
        }
    }

    /// Record the outcome of an admitted call, `failure = true` for errors
    /// and classified failures.
    pub(crate) fn record(&self, token: CallToken, failure: bool) {
        let mut inner = self.inner.lock();
        if token.generation != inner.generation {
            debug!(breaker = %self.name, "stale outcome dropped");
            return;
        }
        match token.kind {
            CallKind::Trial => {
                if failure {
                    warn!(breaker = %self.name, "trial call failed, reopening circuit");
                    self.open_locked(&mut inner);
                } else {
                    inner.trials_succeeded += 1;
                    if inner.trials_succeeded >= self.trial_calls {
                        self.close_locked(&mut inner);
                    }
                }
            }
            CallKind::Normal => {
                if inner.window.len() == self.window_capacity {
                    inner.window.pop_front();
                }
                inner.window.push_back(failure);
                if inner.window.len() >= self.config.min_calls {
                    let ratio = failure_ratio(&inner.window);
                    if ratio > self.config.failure_rate_threshold {
                        warn!(
                            breaker = %self.name,
                            failure_rate = ratio,
                            recorded = inner.window.len(),
                            "failure rate over threshold, opening circuit"
                        );
                        self.open_locked(&mut inner);
                    }
                }
            }
        }
    }

    /// Return an unused trial slot, for admitted calls whose operation never
    /// ran (a downstream layer rejected first).
    pub(crate) fn cancel(&self, token: CallToken) {
        if token.kind != CallKind::Trial {
            return;
        }
        let mut inner = self.inner.lock();
        if token.generation == inner.generation && inner.trials_started > 0 {
            inner.trials_started -= 1;
        }
    }

    fn reject<T>(&self) -> Result<T> {
        self.rejected_total.fetch_add(1, Ordering::Relaxed);
        debug!(breaker = %self.name, "call rejected, circuit open");
        Err(SuojaError::CircuitOpen {
            name: self.name.clone(),
        })
    }

    fn open_locked(&self, inner: &mut Inner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Instant::now();
        inner.generation += 1;
    }

    fn half_open_locked(&self, inner: &mut Inner) {
        inner.state = CircuitState::HalfOpen;
        inner.trials_started = 0;
        inner.trials_succeeded = 0;
        inner.generation += 1;
        info!(breaker = %self.name, "open interval elapsed, circuit half-open");
    }

    fn close_locked(&self, inner: &mut Inner) {
        inner.state = CircuitState::Closed;
        inner.window.clear();
        inner.generation += 1;
        info!(breaker = %self.name, "trial calls succeeded, circuit closed");
    }
}

fn failure_ratio(window: &VecDeque<bool>) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    let failures = window.iter().filter(|failed| **failed).count();
    failures as f64 * 100.0 / window.len() as f64
}
