use crate::coordinator::{Generation, Handoff};
use crate::limiter::AdmissionLimiter;
use crate::options::{resolve_concurrency_limit, GroupOptions, ResolvedOptions};
use crate::status::GroupStatus;
use crate::task::{from_blocking, from_future, TaskOutcome, TaskToExecute};

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::oneshot;
use tracing::{debug, info, trace};

/// A bounded-concurrency group of independent tasks.
///
/// Tasks submitted from any number of producers are queued in submission
/// order and dispatched, at most `concurrency_limit` at a time, onto the
/// Tokio runtime the group was built with. A group is drained either by
/// [`wait`](Self::wait), which resolves once everything accepted has run, or
/// by [`release`](Self::release), which lets the remaining work finish in the
/// background.
///
/// None of the operations fail. Faults raised by tasks go to the configured
/// fault handler or logger (see [`GroupOptions`]). Submissions made after a
/// drain has begun are dropped silently; a closed group only accepts work
/// again after an explicit [`reopen`](Self::reopen).
///
/// Dropping the last handle behaves like `release`.
pub struct TaskGroup {
  options: Arc<ResolvedOptions>,
  limiter: AdmissionLimiter,
  tokio_handle: TokioHandle,
  generation: RwLock<Arc<Generation>>,
}

impl TaskGroup {
  /// Creates an open group and starts its coordinator on `tokio_handle`.
  ///
  /// A `concurrency_limit` of 0 is replaced by the host's available
  /// parallelism.
  pub fn new(concurrency_limit: usize, tokio_handle: TokioHandle, options: GroupOptions) -> Arc<Self> {
    let options = Arc::new(options.resolve());
    let limiter = AdmissionLimiter::new(resolve_concurrency_limit(concurrency_limit));
    let generation = Generation::start(limiter.clone(), options.clone(), &tokio_handle);

    debug!(group = %*options.name, limit = limiter.limit(), "Task group created.");
    Arc::new(Self {
      options,
      limiter,
      tokio_handle,
      generation: RwLock::new(Arc::new(generation)),
    })
  }

  pub fn name(&self) -> &str {
    &self.options.name
  }

  pub fn concurrency_limit(&self) -> usize {
    self.limiter.limit()
  }

  pub fn status(&self) -> GroupStatus {
    self.current().status.load()
  }

  /// Tasks accepted but not yet completed, queued or running.
  pub fn in_flight_count(&self) -> usize {
    self.current().tracker.count()
  }

  /// Tasks currently holding an execution slot.
  pub fn active_task_count(&self) -> usize {
    self.limiter.active()
  }

  /// Submits an async task.
  ///
  /// Resolves once the coordinator has queued the task, not once it has run.
  /// If the group is draining or closed the task is dropped without running.
  ///
  /// Returns `true` when the coordinator accepted the task. An accepted task
  /// runs exactly once, even if a drain starts right after.
  pub async fn submit<Fut, O>(&self, task: Fut) -> bool
  where
    Fut: Future<Output = O> + Send + 'static,
    O: TaskOutcome,
  {
    self.handoff(from_future(task)).await
  }

  /// Submits a blocking closure. Once dispatched it runs on Tokio's blocking
  /// pool while holding one execution slot.
  pub async fn submit_fn<F, O>(&self, f: F) -> bool
  where
    F: FnOnce() -> O + Send + 'static,
    O: TaskOutcome,
  {
    self.handoff(from_blocking(f)).await
  }

  /// [`submit`](Self::submit) for producer threads outside the runtime.
  ///
  /// Must not be called from an async context; it parks the calling thread.
  pub fn submit_blocking<Fut, O>(&self, task: Fut) -> bool
  where
    Fut: Future<Output = O> + Send + 'static,
    O: TaskOutcome,
  {
    futures::executor::block_on(self.submit(task))
  }

  /// [`submit_fn`](Self::submit_fn) for producer threads outside the runtime.
  pub fn submit_fn_blocking<F, O>(&self, f: F) -> bool
  where
    F: FnOnce() -> O + Send + 'static,
    O: TaskOutcome,
  {
    futures::executor::block_on(self.submit_fn(f))
  }

  /// Stops accepting submissions and resolves once every accepted task has
  /// completed and the group is closed.
  ///
  /// Safe to call repeatedly and from several callers at once; all of them
  /// resolve when the group closes.
  pub async fn wait(&self) {
    let generation = self.current();
    if generation.begin_drain() {
      info!(group = %*self.options.name, in_flight = generation.tracker.count(), "Wait: draining group.");
    }
    generation.closed_token.cancelled().await;
    trace!(group = %*self.options.name, "Wait: group closed.");
  }

  /// [`wait`](Self::wait) for threads outside the runtime.
  ///
  /// Must not be called from an async context; it parks the calling thread.
  pub fn wait_blocking(&self) {
    futures::executor::block_on(self.wait())
  }

  /// Stops accepting submissions without waiting. Accepted tasks keep running
  /// in the background until the group closes.
  pub fn release(&self) {
    let generation = self.current();
    if generation.begin_drain() {
      info!(group = %*self.options.name, in_flight = generation.tracker.count(), "Release: draining group in the background.");
    }
  }

  /// Reopens a closed group with a fresh queue, counters and coordinator.
  ///
  /// Returns `false`, changing nothing, unless the group is `Closed`.
  /// Submissions never reopen a group on their own.
  pub fn reopen(&self) -> bool {
    let mut current = self.generation.write();
    if current.status.load() != GroupStatus::Closed {
      return false;
    }
    *current = Arc::new(Generation::start(
      self.limiter.clone(),
      self.options.clone(),
      &self.tokio_handle,
    ));
    info!(group = %*self.options.name, "Group reopened.");
    true
  }

  fn current(&self) -> Arc<Generation> {
    self.generation.read().clone()
  }

  async fn handoff(&self, task: TaskToExecute) -> bool {
    let generation = self.current();
    let status = generation.status.load();
    if status != GroupStatus::Open {
      debug!(group = %*self.options.name, ?status, "Submit: group is not open. Task dropped.");
      return false;
    }

    let (accepted_tx, accepted_rx) = oneshot::channel();
    let handoff = Handoff {
      task,
      accepted: accepted_tx,
    };
    if generation.handoff_tx.send(handoff).await.is_err() {
      debug!(group = %*self.options.name, "Submit: handoff closed by drain. Task dropped.");
      return false;
    }
    match accepted_rx.await {
      Ok(()) => true,
      Err(_) => {
        debug!(group = %*self.options.name, "Submit: drain began before the task was accepted. Task dropped.");
        false
      }
    }
  }
}

impl std::fmt::Debug for TaskGroup {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TaskGroup")
      .field("name", &self.options.name)
      .field("concurrency_limit", &self.limiter.limit())
      .field("status", &self.status())
      .field("in_flight", &self.in_flight_count())
      .finish_non_exhaustive()
  }
}

impl Drop for TaskGroup {
  fn drop(&mut self) {
    // The coordinator sees the handoff sender go away and drains on its own.
    if self.status() == GroupStatus::Open {
      debug!(
        group = %*self.options.name,
        in_flight = self.in_flight_count(),
        "TaskGroup dropped while open. Remaining tasks finish in the background."
      );
    }
  }
}
