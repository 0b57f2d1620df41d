use crate::error::{BoxError, TaskFault};
use crate::panic_trace::with_capture;

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;

use futures_util::FutureExt;

/// The erased form of every task the group executes.
///
/// Panics are not part of the output; they are caught by the execution
/// wrapper around this future.
pub(crate) type TaskToExecute = Pin<Box<dyn Future<Output = Result<(), TaskFault>> + Send + 'static>>;

tokio::task_local! {
  pub(crate) static DISPATCH_SEQ: u64;
}

/// The dispatch sequence number of the task currently running on this
/// context, or `None` outside of a group execution.
///
/// Numbers start at 0 for each coordinator run and increase by one per
/// dispatched task, so they reflect the order tasks left the queue.
pub fn current_dispatch_seq() -> Option<u64> {
  DISPATCH_SEQ.try_with(|seq| *seq).ok()
}

/// Output types a task may produce.
///
/// `()` never faults. `Result<(), E>` faults with [`TaskFault::Failed`] on `Err`.
pub trait TaskOutcome: Send + 'static {
  fn into_fault(self) -> Option<TaskFault>;
}

impl TaskOutcome for () {
  fn into_fault(self) -> Option<TaskFault> {
    None
  }
}

impl<E> TaskOutcome for Result<(), E>
where
  E: Into<BoxError> + Send + 'static,
{
  fn into_fault(self) -> Option<TaskFault> {
    self.err().map(|e| TaskFault::Failed(e.into()))
  }
}

fn into_result<O: TaskOutcome>(outcome: O) -> Result<(), TaskFault> {
  match outcome.into_fault() {
    Some(fault) => Err(fault),
    None => Ok(()),
  }
}

/// Erases an async task.
pub(crate) fn from_future<Fut, O>(future: Fut) -> TaskToExecute
where
  Fut: Future<Output = O> + Send + 'static,
  O: TaskOutcome,
{
  Box::pin(future.map(into_result))
}

/// Erases a blocking closure. It runs on Tokio's blocking pool once dispatched,
/// and a panic inside it is recovered on that pool thread.
pub(crate) fn from_blocking<F, O>(f: F) -> TaskToExecute
where
  F: FnOnce() -> O + Send + 'static,
  O: TaskOutcome,
{
  Box::pin(async move {
    let dispatch_seq = current_dispatch_seq();
    // The panic is caught on the blocking thread itself, where its trace was
    // recorded.
    let blocking = tokio::task::spawn_blocking(move || {
      let run = || match dispatch_seq {
        Some(seq) => DISPATCH_SEQ.sync_scope(seq, f),
        None => f(),
      };
      match catch_unwind(AssertUnwindSafe(|| with_capture(run))) {
        Ok(outcome) => into_result(outcome),
        Err(payload) => Err(TaskFault::from_panic(payload)),
      }
    });
    match blocking.await {
      Ok(result) => result,
      Err(join_error) if join_error.is_panic() => Err(TaskFault::from_panic(join_error.into_panic())),
      Err(join_error) => Err(TaskFault::Failed(Box::new(join_error))),
    }
  })
}
