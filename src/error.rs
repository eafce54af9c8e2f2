//! Error types for SUOJA

use std::time::Duration;
use thiserror::Error;

/// Boxed error produced by wrapped operations and fallbacks.
///
/// Operations hand SUOJA whatever error type they like behind this alias;
/// fallbacks and retry predicates can downcast when they need the concrete type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for guarded calls.
pub type Result<T> = std::result::Result<T, SuojaError>;

/// Main error type for SUOJA
///
/// One variant per protective layer, plus `Operation` for failures of the
/// wrapped call itself and `Fallback` for a fallback that failed in turn.
/// Rejection variants carry the name of the instance that rejected the call.
#[derive(Error, Debug)]
pub enum SuojaError {
    /// The wrapped operation failed
    #[error("operation failed: {0}")]
    Operation(BoxError),

    /// Circuit breaker short-circuited the call
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    /// No permit available and the wait (if any) was exhausted
    #[error("rate limiter '{name}' rejected the call")]
    RateLimited { name: String },

    /// No execution slot or queue space and the wait was exhausted
    #[error("bulkhead '{name}' is full")]
    BulkheadFull { name: String },

    /// Deadline exceeded
    #[error("call through '{name}' timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    /// The fallback itself failed; the original cause is preserved
    #[error("fallback failed: {error} (original cause: {cause})")]
    Fallback {
        error: BoxError,
        cause: Box<SuojaError>,
    },
}

impl SuojaError {
    /// Whether this error is a rejection raised by a protective layer
    /// (as opposed to a failure of the wrapped operation or its fallback).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SuojaError::CircuitOpen { .. }
                | SuojaError::RateLimited { .. }
                | SuojaError::BulkheadFull { .. }
                | SuojaError::Timeout { .. }
        )
    }

    /// The error that originally triggered this one.
    ///
    /// For `Fallback` this walks to the innermost cause; for everything else
    /// it is the error itself.
    pub fn original_cause(&self) -> &SuojaError {
        match self {
            SuojaError::Fallback { cause, .. } => cause.original_cause(),
            other => other,
        }
    }
}

/// Resolve an error through a caller-supplied fallback.
///
/// The fallback sees the triggering error and produces a substitute result.
/// If the fallback itself fails, both errors are surfaced together so the
/// original cause is never dropped.
pub(crate) fn resolve_fallback<T, FB>(cause: SuojaError, fallback: FB) -> Result<T>
where
    FB: FnOnce(&SuojaError) -> std::result::Result<T, BoxError>,
{
    match fallback(&cause) {
        Ok(value) => Ok(value),
        Err(error) => Err(SuojaError::Fallback {
            error,
            cause: Box::new(cause),
        }),
    }
}
