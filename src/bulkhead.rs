//! Bulkhead isolation for concurrent capacity
//!
//! Bounds how many executions of an operation may be in flight at once, so
//! saturation of one dependency cannot starve the rest of the process.
//! Implemented as a counting semaphore with a bounded wait queue: callers
//! beyond the slot count wait up to `max_wait` as long as queue capacity
//! allows, and are rejected otherwise.
//!
//! Slots are released through an RAII permit, so release happens on every
//! exit path: normal completion, operation error, and caller cancellation.

use crate::error::{resolve_fallback, BoxError, Result, SuojaError};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Configuration for a bulkhead
#[derive(Debug, Clone, Copy)]
pub struct BulkheadConfig {
    /// Maximum concurrent executions
    pub max_concurrent: usize,
    /// Callers allowed to wait for a slot; 0 rejects immediately when full
    pub max_queue: usize,
    /// Longest a queued caller may wait for a slot
    pub max_wait: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            max_queue: 25,
            max_wait: Duration::from_secs(1),
        }
    }
}

/// RAII guard for one execution slot; dropping it releases the slot.
#[must_use]
#[derive(Debug)]
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
}

/// Decrements the queued-waiters count on every exit path, including
/// cancellation of the waiting caller.
struct QueueGuard<'a>(&'a AtomicUsize);

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bulkhead instance
pub struct Bulkhead {
    name: String,
    config: BulkheadConfig,
    slots: Arc<Semaphore>,
    queued: AtomicUsize,
    rejected_total: AtomicU64,
}

impl Bulkhead {
    /// Create a new bulkhead with all slots free
    pub fn new(name: impl Into<String>, config: BulkheadConfig) -> Self {
        Self {
            name: name.into(),
            slots: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
            queued: AtomicUsize::new(0),
            rejected_total: AtomicU64::new(0),
        }
    }

    /// Instance name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execution slots currently free
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Callers currently waiting for a slot
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Total calls rejected for lack of slot or queue space
    pub fn rejected_total(&self) -> u64 {
        self.rejected_total.load(Ordering::Relaxed)
    }

    /// Acquire an execution slot, waiting up to `max_wait` if queue capacity
    /// allows.
    pub async fn acquire(&self) -> Result<SlotPermit> {
        if let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() {
            return Ok(SlotPermit { _permit: permit });
        }

        let waiting = self.queued.fetch_add(1, Ordering::SeqCst);
        let guard = QueueGuard(&self.queued);
        if waiting >= self.config.max_queue {
            drop(guard);
            return self.reject("wait queue full");
        }

        let acquired = tokio::time::timeout(
            self.config.max_wait,
            Arc::clone(&self.slots).acquire_owned(),
        )
        .await;
        drop(guard);

        match acquired {
            Ok(Ok(permit)) => Ok(SlotPermit { _permit: permit }),
            // The semaphore is never closed; treat both shapes as exhaustion.
            Ok(Err(_)) | Err(_) => self.reject("wait timed out"),
        }
    }

    /// Run the operation in a slot; rejections and failures go to the
    /// fallback.
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

    /// Run the operation in a slot, without fallback resolution.
    ///
    /// The slot is held for the duration of the operation and released
    /// before the result reaches the caller.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>>,
    {
        let slot = self.acquire().await?;
        let outcome = op().await;
        drop(slot);
        outcome.map_err(SuojaError::Operation)
    }

    fn reject<T>(&self, reason: &str) -> Result<T> {
        self.rejected_total.fetch_add(1, Ordering::Relaxed);
        debug!(bulkhead = %self.name, reason, "call rejected");
        Err(SuojaError::BulkheadFull {
            name: self.name.clone(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn config(slots: usize, queue: usize, wait_ms: u64) -> BulkheadConfig {
        BulkheadConfig {
            max_concurrent: slots,
            max_queue: queue,
            max_wait: Duration::from_millis(wait_ms),
        }
    }

    #[tokio::test]
    async fn test_in_flight_never_exceeds_capacity() {
        let bulkhead = Arc::new(Bulkhead::new("db", config(2, 10, 500)));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..6 {
            let bulkhead = Arc::clone(&bulkhead);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                bulkhead
                    .call(|| async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, BoxError>(())
                    })
                    .await
            }));
        }

        let results = futures::future::join_all(handles).await;
        assert!(results.into_iter().all(|r| r.unwrap().is_ok()));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(bulkhead.available_slots(), 2);
    }

    #[tokio::test]
    async fn test_rejects_immediately_with_zero_queue() {
        let bulkhead = Arc::new(Bulkhead::new("db", config(1, 0, 500)));

        let held = Arc::clone(&bulkhead).acquire().await.unwrap();
        let err = bulkhead.acquire().await.unwrap_err();
        assert!(matches!(err, SuojaError::BulkheadFull { .. }));
        assert_eq!(bulkhead.rejected_total(), 1);
        drop(held);

        // Slot came back
        assert!(bulkhead.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_queued_caller_gets_slot_when_released() {
        let bulkhead = Arc::new(Bulkhead::new("db", config(1, 5, 500)));

        let held = bulkhead.acquire().await.unwrap();
        let waiter = {
            let bulkhead = Arc::clone(&bulkhead);
            tokio::spawn(async move { bulkhead.acquire().await.is_ok() })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bulkhead.queued(), 1);

        drop(held);
        assert!(waiter.await.unwrap());
        assert_eq!(bulkhead.queued(), 0);
    }

    #[tokio::test]
    async fn test_wait_timeout_rejects() {
        let bulkhead = Arc::new(Bulkhead::new("db", config(1, 5, 10)));

        let _held = bulkhead.acquire().await.unwrap();
        let err = bulkhead.acquire().await.unwrap_err();
        assert!(matches!(err, SuojaError::BulkheadFull { .. }));
    }

    #[tokio::test]
    async fn test_queue_capacity_is_a_hard_limit() {
        let bulkhead = Arc::new(Bulkhead::new("db", config(1, 1, 200)));

        let _held = bulkhead.acquire().await.unwrap();

        // One caller fits in the queue...
        let queued = {
            let bulkhead = Arc::clone(&bulkhead);
            tokio::spawn(async move { bulkhead.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bulkhead.queued(), 1);

        // ...the next is rejected without waiting.
        let err = bulkhead.acquire().await.unwrap_err();
        assert!(matches!(err, SuojaError::BulkheadFull { .. }));

        queued.abort();
    }

    #[tokio::test]
    async fn test_slot_released_on_operation_error() {
        let bulkhead = Bulkhead::new("db", config(1, 0, 10));

        let result = bulkhead
            .call(|| async { Err::<(), BoxError>("boom".into()) })
            .await;
        assert!(matches!(result, Err(SuojaError::Operation(_))));

        // No slot leaked
        assert_eq!(bulkhead.available_slots(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_queue() {
        let bulkhead = Arc::new(Bulkhead::new("db", config(1, 5, 60_000)));

        let _held = bulkhead.acquire().await.unwrap();
        let waiter = {
            let bulkhead = Arc::clone(&bulkhead);
            tokio::spawn(async move {
                let _ = bulkhead.acquire().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bulkhead.queued(), 1);

        waiter.abort();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bulkhead.queued(), 0);
    }

    #[tokio::test]
    async fn test_fallback_on_rejection() {
        let bulkhead = Arc::new(Bulkhead::new("db", config(1, 0, 10)));

        let _held = bulkhead.acquire().await.unwrap();
        let result = bulkhead
            .execute(
                || async { Ok("real") },
                |err| {
                    assert!(matches!(err, SuojaError::BulkheadFull { .. }));
                    Ok("shed load")
                },
            )
            .await;
        assert_eq!(result.unwrap(), "shed load");
    }
}
