use crate::error::TaskFault;
use crate::limiter::InFlightTracker;
use crate::options::ResolvedOptions;
use crate::panic_trace::with_capture;
use crate::task::{TaskToExecute, DISPATCH_SEQ};

use std::backtrace::Backtrace;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{error, trace};

/// Releases the admission slot and then marks the task complete, on every
/// exit path of an execution, including the future being dropped mid-run.
struct CompletionGuard {
  permit: Option<OwnedSemaphorePermit>,
  tracker: Arc<InFlightTracker>,
}

impl Drop for CompletionGuard {
  fn drop(&mut self) {
    drop(self.permit.take());
    self.tracker.complete();
  }
}

/// Runs one dispatched task behind the isolation boundary.
///
/// Never panics and never returns a fault to its caller.
pub(crate) async fn run_isolated(
  task: TaskToExecute,
  permit: OwnedSemaphorePermit,
  tracker: Arc<InFlightTracker>,
  options: Arc<ResolvedOptions>,
  dispatch_seq: u64,
) {
  let _guard = CompletionGuard {
    permit: Some(permit),
    tracker,
  };

  // Every poll runs under panic-site capture, so the fault carries the
  // stack of the frame that panicked.
  let mut task = task;
  let captured = futures::future::poll_fn(move |cx| with_capture(|| task.as_mut().poll(cx)));

  let fault = match AssertUnwindSafe(DISPATCH_SEQ.scope(dispatch_seq, captured)).catch_unwind().await {
    Ok(Ok(())) => None,
    Ok(Err(fault)) => Some(fault),
    Err(payload) => Some(TaskFault::from_panic(payload)),
  };

  match fault {
    None => trace!(group = %*options.name, dispatch_seq, "Task completed."),
    Some(fault) => report_fault(&options, dispatch_seq, fault),
  }
}

/// Hands a fault to the configured handler, or to the logger when no handler
/// is set. A panicking handler or logger is contained here.
///
/// Logged panics carry the trace of their panic site. Faults without one
/// (`Err` outputs) are logged with a trace of this call.
pub(crate) fn report_fault(options: &ResolvedOptions, dispatch_seq: u64, fault: TaskFault) {
  if let Some(handler) = &options.fault_handler {
    if catch_unwind(AssertUnwindSafe(|| handler(fault))).is_err() {
      error!(group = %*options.name, dispatch_seq, "Fault handler panicked while handling a task fault.");
    }
    return;
  }

  let boundary_trace;
  let backtrace = match fault.panic_trace() {
    Some(trace) => trace,
    None => {
      boundary_trace = Backtrace::force_capture();
      &boundary_trace
    }
  };
  let logged = catch_unwind(AssertUnwindSafe(|| {
    options.logger.write_record(format_args!(
      "group {}: task {} fault: {}\n{}",
      options.name, dispatch_seq, fault, backtrace
    ));
  }));
  if logged.is_err() {
    error!(group = %*options.name, dispatch_seq, "Fault logger panicked while writing a record.");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::limiter::AdmissionLimiter;
  use crate::options::GroupOptions;
  use crate::task::from_future;
  use parking_lot::Mutex;
  use std::fmt;

  fn capturing_options() -> (Arc<ResolvedOptions>, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = lines.clone();
    let options = GroupOptions::new()
      .with_name("exec-test")
      .with_logger(Arc::new(move |args: fmt::Arguments<'_>| sink.lock().push(args.to_string())))
      .resolve();
    (Arc::new(options), lines)
  }

  #[tokio::test]
  async fn test_panic_is_logged_and_slot_released() {
    let (options, lines) = capturing_options();
    let limiter = AdmissionLimiter::new(1);
    let tracker = InFlightTracker::new();
    tracker.accept();

    let permit = limiter.acquire().await.unwrap();
    let task = from_future::<_, ()>(async {
      panic!("exec boom");
    });
    run_isolated(task, permit, tracker.clone(), options, 7).await;

    assert_eq!(limiter.active(), 0);
    assert!(tracker.is_quiescent());
    let lines = lines.lock();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("group exec-test: task 7 fault: task panicked: exec boom"));
  }

  #[inline(never)]
  fn panic_in_exec_frame() {
    panic!("deep exec boom");
  }

  #[tokio::test]
  async fn test_panic_fault_carries_the_panic_site_trace() {
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    let options = Arc::new(
      GroupOptions::new()
        .with_fault_handler(move |fault: TaskFault| {
          *sink.lock() = fault.panic_trace().map(|trace| trace.to_string());
        })
        .resolve(),
    );
    let limiter = AdmissionLimiter::new(1);
    let tracker = InFlightTracker::new();
    tracker.accept();

    let permit = limiter.acquire().await.unwrap();
    run_isolated(from_future(async { panic_in_exec_frame() }), permit, tracker, options, 3).await;

    let trace = seen.lock().take().expect("Panic fault must carry a trace.");
    assert!(trace.contains("panic_in_exec_frame"));
  }

  #[tokio::test]
  async fn test_panicking_handler_does_not_leak_the_slot() {
    let options = Arc::new(
      GroupOptions::new()
        .with_fault_handler(|_fault| panic!("handler is broken"))
        .resolve(),
    );
    let limiter = AdmissionLimiter::new(1);
    let tracker = InFlightTracker::new();
    tracker.accept();

    let permit = limiter.acquire().await.unwrap();
    let task = from_future(async { Err::<(), _>("refused") });
    run_isolated(task, permit, tracker.clone(), options, 0).await;

    assert_eq!(limiter.active(), 0);
    assert!(tracker.is_quiescent());
  }

  #[tokio::test]
  async fn test_dropped_execution_still_completes() {
    let (options, _lines) = capturing_options();
    let limiter = AdmissionLimiter::new(1);
    let tracker = InFlightTracker::new();
    tracker.accept();

    let permit = limiter.acquire().await.unwrap();
    let task = from_future(std::future::pending::<()>());
    let execution = tokio::spawn(run_isolated(task, permit, tracker.clone(), options, 1));
    tokio::task::yield_now().await;
    assert_eq!(limiter.active(), 1);

    execution.abort();
    let _ = execution.await;
    assert_eq!(limiter.active(), 0);
    assert!(tracker.is_quiescent());
  }
}
