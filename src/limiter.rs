use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{AcquireError, Notify, OwnedSemaphorePermit, Semaphore};

/// Counting gate bounding how many task executions run at once.
#[derive(Debug, Clone)]
pub(crate) struct AdmissionLimiter {
  semaphore: Arc<Semaphore>,
  limit: usize,
}

impl AdmissionLimiter {
  pub(crate) fn new(limit: usize) -> Self {
    Self {
      semaphore: Arc::new(Semaphore::new(limit)),
      limit,
    }
  }

  /// Waits for a free slot. The slot is released when the permit is dropped.
  ///
  /// Cancel safe: dropping the future before it resolves takes no slot.
  /// Errors only on a closed semaphore, and nothing here closes it.
  pub(crate) async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
    self.semaphore.clone().acquire_owned().await
  }

  pub(crate) fn limit(&self) -> usize {
    self.limit
  }

  /// Number of slots currently held by running executions.
  pub(crate) fn active(&self) -> usize {
    self.limit.saturating_sub(self.semaphore.available_permits())
  }
}

/// Counts tasks accepted by the coordinator but not yet completed.
///
/// Incremented by the coordinator on acceptance, decremented from any
/// execution context on completion. The coordinator is woken whenever the
/// count drops to zero.
#[derive(Debug, Default)]
pub(crate) struct InFlightTracker {
  count: AtomicUsize,
  quiescent: Notify,
}

impl InFlightTracker {
  pub(crate) fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub(crate) fn accept(&self) {
    self.count.fetch_add(1, Ordering::AcqRel);
  }

  pub(crate) fn complete(&self) {
    let previous = self.count.fetch_sub(1, Ordering::AcqRel);
    debug_assert!(previous > 0, "in-flight count underflow");
    if previous == 1 {
      // notify_one keeps a permit if the coordinator is not parked yet.
      self.quiescent.notify_one();
    }
  }

  pub(crate) fn count(&self) -> usize {
    self.count.load(Ordering::Acquire)
  }

  pub(crate) fn is_quiescent(&self) -> bool {
    self.count() == 0
  }

  pub(crate) async fn quiescent(&self) {
    self.quiescent.notified().await
  }
}
