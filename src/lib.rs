//! SUOJA - Composable Fault-Tolerance Toolkit
//!
//! Wraps arbitrary unreliable async operations (typically remote calls)
//! with protective decorators: circuit breaking, retries, rate limiting,
//! bulkhead isolation, and time limits.
//!
//! # Architecture
//!
//! ```text
//! caller ──► Stack ──► RateLimiter ─► Retry ─► CircuitBreaker ─► Bulkhead ─► TimeLimiter ─► op
//!                                              │
//!                                              └─► fallback on rejection / failure / timeout
//! ```
//!
//! Each pattern is also usable on its own via `execute(operation, fallback)`.
//! A [`Registry`] maps names to shared instances so independent call sites
//! cooperate through the same state.
//!
//! # Example
//!
//! ```ignore
//! use suoja::{CircuitBreakerConfig, Registry, Stack};
//!
//! let registry = Registry::new();
//! let breaker = registry.circuit_breaker("payments", CircuitBreakerConfig::default());
//!
//! let receipt = breaker
//!     .execute(
//!         || async { charge_card().await },
//!         |err| Ok(Receipt::deferred(err.to_string())),
//!     )
//!     .await?;
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod bulkhead;
pub mod circuit_breaker;
pub mod error;
pub mod rate_limiter;
pub mod registry;
pub mod retry;
pub mod stack;
pub mod time_limiter;

pub use bulkhead::{Bulkhead, BulkheadConfig, SlotPermit};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::{BoxError, Result, SuojaError};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use registry::{Defaults, Registry};
pub use retry::{BackoffPolicy, Retry, RetryConfig, RetryPredicate};
pub use stack::Stack;
pub use time_limiter::{TimeLimiter, TimeLimiterConfig};
