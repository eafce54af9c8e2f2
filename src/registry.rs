//! Named-instance registry
//!
//! Maps a name to one shared protective instance per pattern, so every call
//! site using the same name cooperates through the same state (window,
//! permits, slots). Populated at startup, looked up on every call, entries
//! live for the life of the process.
//!
//! The registry is an explicit object passed to the components that need
//! it; there is no ambient global.

use crate::bulkhead::{Bulkhead, BulkheadConfig};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::retry::{Retry, RetryConfig};
use crate::time_limiter::{TimeLimiter, TimeLimiterConfig};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Default configurations applied when a name is first materialized via the
/// `*_or_default` lookups.
#[derive(Debug, Clone, Default)]
pub struct Defaults {
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub rate_limiter: RateLimiterConfig,
    pub bulkhead: BulkheadConfig,
    pub time_limiter: TimeLimiterConfig,
}

/// Registry of shared protective instances
pub struct Registry {
    defaults: Defaults,
    circuit_breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    retries: RwLock<HashMap<String, Arc<Retry>>>,
    rate_limiters: RwLock<HashMap<String, Arc<RateLimiter>>>,
    bulkheads: RwLock<HashMap<String, Arc<Bulkhead>>>,
    time_limiters: RwLock<HashMap<String, Arc<TimeLimiter>>>,
}

impl Registry {
    /// Create an empty registry with stock defaults
    pub fn new() -> Self {
        Self::with_defaults(Defaults::default())
    }

    /// Create an empty registry with caller-supplied defaults
    pub fn with_defaults(defaults: Defaults) -> Self {
        Self {
            defaults,
            circuit_breakers: RwLock::new(HashMap::new()),
            retries: RwLock::new(HashMap::new()),
            rate_limiters: RwLock::new(HashMap::new()),
            bulkheads: RwLock::new(HashMap::new()),
            time_limiters: RwLock::new(HashMap::new()),
        }
    }

    /// Register-or-get the circuit breaker for `name`.
    ///
    /// The first registration wins; later calls return the existing
    /// instance and ignore their config.
    pub fn circuit_breaker(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let (instance, created) = get_or_register(&self.circuit_breakers, name, || {
            CircuitBreaker::new(name, config)
        });
        if created {
            info!(name = %name, "registered circuit breaker");
        }
        instance
    }

    /// Register-or-get a circuit breaker with the registry default config
    pub fn circuit_breaker_or_default(&self, name: &str) -> Arc<CircuitBreaker> {
        self.circuit_breaker(name, self.defaults.circuit_breaker.clone())
    }

    /// Look up an already-registered circuit breaker
    pub fn get_circuit_breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.circuit_breakers.read().get(name).map(Arc::clone)
    }

    /// Register-or-get the retry executor for `name`
    pub fn retry(&self, name: &str, config: RetryConfig) -> Arc<Retry> {
        let (instance, created) = get_or_register(&self.retries, name, || Retry::new(name, config));
        if created {
            info!(name = %name, "registered retry");
        }
        instance
    }

    /// Register-or-get a retry executor with the registry default config
    pub fn retry_or_default(&self, name: &str) -> Arc<Retry> {
        self.retry(name, self.defaults.retry.clone())
    }

    /// Look up an already-registered retry executor
    pub fn get_retry(&self, name: &str) -> Option<Arc<Retry>> {
        self.retries.read().get(name).map(Arc::clone)
    }

    /// Register-or-get the rate limiter for `name`
    pub fn rate_limiter(&self, name: &str, config: RateLimiterConfig) -> Arc<RateLimiter> {
        let (instance, created) =
            get_or_register(&self.rate_limiters, name, || RateLimiter::new(name, config));
        if created {
            info!(name = %name, "registered rate limiter");
        }
        instance
    }

    /// Register-or-get a rate limiter with the registry default config
    pub fn rate_limiter_or_default(&self, name: &str) -> Arc<RateLimiter> {
        self.rate_limiter(name, self.defaults.rate_limiter)
    }

    /// Look up an already-registered rate limiter
    pub fn get_rate_limiter(&self, name: &str) -> Option<Arc<RateLimiter>> {
        self.rate_limiters.read().get(name).map(Arc::clone)
    }

    /// Register-or-get the bulkhead for `name`
    pub fn bulkhead(&self, name: &str, config: BulkheadConfig) -> Arc<Bulkhead> {
        let (instance, created) =
            get_or_register(&self.bulkheads, name, || Bulkhead::new(name, config));
        if created {
            info!(name = %name, "registered bulkhead");
        }
        instance
    }

    /// Register-or-get a bulkhead with the registry default config
    pub fn bulkhead_or_default(&self, name: &str) -> Arc<Bulkhead> {
        self.bulkhead(name, self.defaults.bulkhead)
    }

    /// Look up an already-registered bulkhead
    pub fn get_bulkhead(&self, name: &str) -> Option<Arc<Bulkhead>> {
        self.bulkheads.read().get(name).map(Arc::clone)
    }

    /// Register-or-get the time limiter for `name`
    pub fn time_limiter(&self, name: &str, config: TimeLimiterConfig) -> Arc<TimeLimiter> {
        let (instance, created) =
            get_or_register(&self.time_limiters, name, || TimeLimiter::new(name, config));
        if created {
            info!(name = %name, "registered time limiter");
        }
        instance
    }

    /// Register-or-get a time limiter with the registry default config
    pub fn time_limiter_or_default(&self, name: &str) -> Arc<TimeLimiter> {
        self.time_limiter(name, self.defaults.time_limiter)
    }

    /// Look up an already-registered time limiter
    pub fn get_time_limiter(&self, name: &str) -> Option<Arc<TimeLimiter>> {
        self.time_limiters.read().get(name).map(Arc::clone)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Fast-path read, double-checked write on miss.
fn get_or_register<T>(
    map: &RwLock<HashMap<String, Arc<T>>>,
    name: &str,
    build: impl FnOnce() -> T,
) -> (Arc<T>, bool) {
    {
        let map = map.read();
        if let Some(existing) = map.get(name) {
            return (Arc::clone(existing), false);
        }
    }

    let mut map = map.write();
    if let Some(existing) = map.get(name) {
        return (Arc::clone(existing), false);
    }
    let instance = Arc::new(build());
    map.insert(name.to_string(), Arc::clone(&instance));
    (instance, true)
}
