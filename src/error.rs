use crate::panic_trace::take_panic_trace;

use std::any::Any;
use std::backtrace::Backtrace;
use std::error::Error as StdError;

use thiserror::Error;

/// Boxed error type accepted from fallible tasks.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A fault raised by a task and caught at the group's isolation boundary.
///
/// Faults never propagate to the submitter or to sibling tasks. They are
/// handed to the configured fault handler, or written to the configured
/// logger when no handler is set.
#[derive(Error, Debug)]
pub enum TaskFault {
  #[error("task panicked: {message}")]
  Panicked {
    /// Best-effort rendering of the panic payload.
    message: String,
    /// The payload exactly as passed to `panic!` or `std::panic::panic_any`.
    payload: Box<dyn Any + Send + 'static>,
    /// Backtrace recorded where the task panicked, when the panic happened
    /// while the group was running it.
    trace: Option<Box<Backtrace>>,
  },

  #[error("task failed: {0}")]
  Failed(#[source] BoxError),
}

impl TaskFault {
  pub(crate) fn from_panic(payload: Box<dyn Any + Send + 'static>) -> Self {
    let message = panic_message(payload.as_ref());
    TaskFault::Panicked {
      message,
      payload,
      trace: take_panic_trace().map(Box::new),
    }
  }

  /// A short human readable description of the fault.
  pub fn message(&self) -> String {
    match self {
      TaskFault::Panicked { message, .. } => message.clone(),
      TaskFault::Failed(source) => source.to_string(),
    }
  }

  pub fn is_panic(&self) -> bool {
    matches!(self, TaskFault::Panicked { .. })
  }

  /// The backtrace of the panic site, if one was recorded.
  pub fn panic_trace(&self) -> Option<&Backtrace> {
    match self {
      TaskFault::Panicked { trace, .. } => trace.as_deref(),
      TaskFault::Failed(_) => None,
    }
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&'static str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
