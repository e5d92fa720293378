//! Process-wide bound on in-flight external invocations.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Errors from the dispatch layer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Dispatch limiter is closed")]
    Closed,

    #[error("Invocation timed out after {}s", .after.as_secs_f64())]
    Timeout { after: Duration },
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

#[derive(Debug)]
struct Gauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounds concurrent stage invocations across all jobs.
///
/// Admission is FIFO: waiters are served in the order they called
/// `acquire`. Cloning shares the same limit.
#[derive(Debug, Clone)]
pub struct DispatchLimiter {
    semaphore: Arc<Semaphore>,
    gauge: Arc<Gauge>,
    max_concurrency: usize,
    stage_timeout: Duration,
}

impl DispatchLimiter {
    /// Create a limiter. A ceiling of zero is raised to one.
    pub fn new(max_concurrency: usize, stage_timeout: Duration) -> Self {
        let max_concurrency = max_concurrency.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            gauge: Arc::new(Gauge {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
            max_concurrency,
            stage_timeout,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Default timeout applied to each invocation.
    pub fn stage_timeout(&self) -> Duration {
        self.stage_timeout
    }

    /// Wait until a slot is free and take it.
    pub async fn acquire(&self) -> DispatchResult<DispatchSlot> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::Closed)?;
        Ok(self.slot(permit))
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<DispatchSlot> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        Some(self.slot(permit))
    }

    /// Return a slot early. Dropping the slot has the same effect.
    pub fn release(&self, slot: DispatchSlot) {
        drop(slot);
    }

    /// Stop admitting new invocations. Pending `acquire` calls fail.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.gauge.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of slots ever held at once.
    pub fn peak_in_flight(&self) -> usize {
        self.gauge.peak.load(Ordering::SeqCst)
    }

    /// Free slots.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    fn slot(&self, permit: OwnedSemaphorePermit) -> DispatchSlot {
        self.gauge.enter();
        DispatchSlot {
            _permit: permit,
            gauge: Arc::clone(&self.gauge),
        }
    }
}

/// One unit of dispatch concurrency, released exactly once on drop.
#[derive(Debug)]
pub struct DispatchSlot {
    _permit: OwnedSemaphorePermit,
    gauge: Arc<Gauge>,
}

impl DispatchSlot {
    /// Run an invocation while holding this slot.
    ///
    /// The slot is released when the invocation finishes, times out, or
    /// the returned future is dropped. On timeout the invocation future
    /// is dropped.
    pub async fn run_with_timeout<F, T>(self, timeout: Duration, invocation: F) -> DispatchResult<T>
    where
        F: Future<Output = T>,
    {
        let result = tokio::time::timeout(timeout, invocation).await;
        drop(self);
        result.map_err(|_| DispatchError::Timeout { after: timeout })
    }
}

impl Drop for DispatchSlot {
    fn drop(&mut self) {
        self.gauge.exit();
    }
}
