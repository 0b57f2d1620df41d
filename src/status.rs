use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a group.
///
/// `Open -> Draining` is taken once by the first `wait` or `release` call.
/// `Draining -> Closed` is taken only by the coordinator once the queue is
/// empty and nothing is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
  /// Accepting submissions.
  Open,
  /// No new submissions. Queued and running tasks are still being processed.
  Draining,
  /// Terminal. The coordinator has exited.
  Closed,
}

impl GroupStatus {
  fn as_u8(self) -> u8 {
    match self {
      GroupStatus::Open => 0,
      GroupStatus::Draining => 1,
      GroupStatus::Closed => 2,
    }
  }

  fn from_u8(value: u8) -> Self {
    match value {
      0 => GroupStatus::Open,
      1 => GroupStatus::Draining,
      _ => GroupStatus::Closed,
    }
  }
}

#[derive(Debug)]
pub(crate) struct AtomicStatus(AtomicU8);

impl AtomicStatus {
  pub(crate) fn new() -> Self {
    Self(AtomicU8::new(GroupStatus::Open.as_u8()))
  }

  pub(crate) fn load(&self) -> GroupStatus {
    GroupStatus::from_u8(self.0.load(Ordering::Acquire))
  }

  /// Returns `true` only for the caller that performed the transition.
  pub(crate) fn transition(&self, from: GroupStatus, to: GroupStatus) -> bool {
    self
      .0
      .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }
}
