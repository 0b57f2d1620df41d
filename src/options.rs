use crate::error::TaskFault;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use tokio::sync::Semaphore;

lazy_static::lazy_static! {
  static ref NEXT_GROUP_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Callback invoked with every fault caught at the isolation boundary.
pub type FaultHandler = Arc<dyn Fn(TaskFault) + Send + Sync + 'static>;

/// A sink for fault records, used when no fault handler is configured.
///
/// Any `Fn(fmt::Arguments<'_>) + Send + Sync` closure is a logger.
pub trait FaultLogger: Send + Sync + 'static {
  /// Writes one formatted record. Must not block indefinitely.
  fn write_record(&self, args: fmt::Arguments<'_>);
}

impl<F> FaultLogger for F
where
  F: Fn(fmt::Arguments<'_>) + Send + Sync + 'static,
{
  fn write_record(&self, args: fmt::Arguments<'_>) {
    self(args)
  }
}

/// The default logger. Emits each record as a `tracing` error event; the
/// installed subscriber decides timestamps and destination.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl FaultLogger for TracingLogger {
  fn write_record(&self, args: fmt::Arguments<'_>) {
    tracing::error!(target: "futures_taskgroup::fault", "{}", args);
  }
}

/// Configuration applied when a [`TaskGroup`](crate::TaskGroup) is built.
/// Immutable once the group exists.
#[derive(Clone)]
pub struct GroupOptions {
  pub(crate) name: Option<String>,
  pub(crate) fault_handler: Option<FaultHandler>,
  pub(crate) logger: Option<Arc<dyn FaultLogger>>,
}

impl Default for GroupOptions {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for GroupOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GroupOptions")
      .field("name", &self.name)
      .field("has_fault_handler", &self.fault_handler.is_some())
      .field("has_custom_logger", &self.logger.is_some())
      .finish()
  }
}

impl GroupOptions {
  pub fn new() -> Self {
    Self {
      name: None,
      fault_handler: None,
      logger: None,
    }
  }

  /// Sets the name used in log fields and spans.
  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  /// Routes task faults to `handler` instead of the logger.
  pub fn with_fault_handler(mut self, handler: impl Fn(TaskFault) + Send + Sync + 'static) -> Self {
    self.fault_handler = Some(Arc::new(handler));
    self
  }

  pub fn with_logger(mut self, logger: Arc<dyn FaultLogger>) -> Self {
    self.logger = Some(logger);
    self
  }

  /// Fills in defaults for everything left unset.
  pub(crate) fn resolve(self) -> ResolvedOptions {
    let name = self.name.unwrap_or_else(|| {
      let id = NEXT_GROUP_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
      format!("taskgroup-{}", id)
    });
    ResolvedOptions {
      name: Arc::new(name),
      fault_handler: self.fault_handler,
      logger: self.logger.unwrap_or_else(|| Arc::new(TracingLogger)),
    }
  }
}

/// Options after defaults are applied. Shared by every execution of a group.
#[derive(Clone)]
pub(crate) struct ResolvedOptions {
  pub(crate) name: Arc<String>,
  pub(crate) fault_handler: Option<FaultHandler>,
  pub(crate) logger: Arc<dyn FaultLogger>,
}

/// Resolves a requested concurrency limit. Zero means "use the host's
/// available parallelism". Limits above what a semaphore can hold are
/// clamped to `Semaphore::MAX_PERMITS`.
pub(crate) fn resolve_concurrency_limit(requested: usize) -> usize {
  let limit = if requested > 0 {
    requested
  } else {
    std::thread::available_parallelism()
      .map(std::num::NonZeroUsize::get)
      .unwrap_or(1)
  };
  limit.min(Semaphore::MAX_PERMITS)
}
