//! Fixed-window rate limiter
//!
//! Admits at most `permits_per_window` calls per window. The window reset is
//! atomic with the check-and-increment (one lock), so a burst straddling a
//! window boundary can never see two windows' permits summed.
//!
//! With `max_wait` configured, a rejected caller sleeps until the current
//! window expires (bounded by `max_wait`) and retries once in the new
//! window; otherwise rejection is immediate.

use crate::error::{resolve_fallback, BoxError, Result, SuojaError};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Configuration for a rate limiter
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Window length
    pub window: Duration,
    /// Calls admitted per window
    pub permits_per_window: u32,
    /// How long a caller may wait for the next window; `None` rejects
    /// immediately
    pub max_wait: Option<Duration>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(1),
            permits_per_window: 50,
            max_wait: None,
        }
    }
}

struct Window {
    started: Instant,
    consumed: u32,
}

/// Rate limiter instance
pub struct RateLimiter {
    name: String,
    config: RateLimiterConfig,
    window: Mutex<Window>,
    rejected_total: AtomicU64,
}

impl RateLimiter {
    /// Create a new rate limiter with a fresh window starting now
    pub fn new(name: impl Into<String>, config: RateLimiterConfig) -> Self {
        Self {
            name: name.into(),
            config,
            window: Mutex::new(Window {
                started: Instant::now(),
                consumed: 0,
            }),
            rejected_total: AtomicU64::new(0),
        }
    }

    /// Instance name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Permits left in the current window
    pub fn available_permits(&self) -> u32 {
        let window = self.window.lock();
        if window.started.elapsed() >= self.config.window {
            self.config.permits_per_window
        } else {
            self.config.permits_per_window.saturating_sub(window.consumed)
        }
    }

    /// Total calls rejected after wait exhaustion
    pub fn rejected_total(&self) -> u64 {
        self.rejected_total.load(Ordering::Relaxed)
    }

    /// Consume a permit if one is available in the current window.
    ///
    /// Expiring the old window and taking the first permit of the new one
    /// happen under a single lock acquisition.
    pub fn try_acquire(&self) -> bool {
        let mut window = self.window.lock();
        let now = Instant::now();
        if now.duration_since(window.started) >= self.config.window {
            window.started = now;
            window.consumed = 0;
        }
        if window.consumed < self.config.permits_per_window {
            window.consumed += 1;
            true
        } else {
            false
        }
    }

    /// Acquire a permit, waiting for the next window if configured.
    pub async fn acquire(&self) -> Result<()> {
        if self.try_acquire() {
            return Ok(());
        }
        if let Some(max_wait) = self.config.max_wait {
            let wait = self.time_to_next_window().min(max_wait);
            debug!(limiter = %self.name, wait_ms = wait.as_millis() as u64, "window exhausted, waiting");
            tokio::time::sleep(wait).await;
            if self.try_acquire() {
                return Ok(());
            }
        }
        self.rejected_total.fetch_add(1, Ordering::Relaxed);
        debug!(limiter = %self.name, "rate limited");
        Err(SuojaError::RateLimited {
            name: self.name.clone(),
        })
    }

    /// Run the operation if a permit is available; otherwise fall back.
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

    /// Run the operation if a permit is available, without fallback
    /// resolution.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>>,
    {
        self.acquire().await?;
        op().await.map_err(SuojaError::Operation)
    }

    fn time_to_next_window(&self) -> Duration {
        let window = self.window.lock();
        self.config.window.saturating_sub(window.started.elapsed())
    }
}
