use crate::group::TaskGroup;
use crate::task::TaskOutcome;

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// A [`TaskGroup`] whose tasks all share one handler and differ only by
/// payload.
///
/// ```no_run
/// # use futures_taskgroup::{GroupOptions, HandlerGroup, TaskGroup};
/// # async fn demo() {
/// let group = TaskGroup::new(4, tokio::runtime::Handle::current(), GroupOptions::new());
/// let fetches = HandlerGroup::new(group, |url: String| async move {
///   println!("fetching {}", url);
/// });
/// fetches.submit("https://example.com".to_string()).await;
/// fetches.wait().await;
/// # }
/// ```
pub struct HandlerGroup<T, F> {
  group: Arc<TaskGroup>,
  handler: Arc<F>,
  _payload: PhantomData<fn(T)>,
}

impl<T, F, Fut, O> HandlerGroup<T, F>
where
  T: Send + 'static,
  F: Fn(T) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = O> + Send + 'static,
  O: TaskOutcome,
{
  pub fn new(group: Arc<TaskGroup>, handler: F) -> Self {
    Self {
      group,
      handler: Arc::new(handler),
      _payload: PhantomData,
    }
  }

  /// Submits a task that runs the handler on `payload`. Returns whether the
  /// group accepted it.
  pub async fn submit(&self, payload: T) -> bool {
    let handler = self.handler.clone();
    self.group.submit(async move { (*handler)(payload).await }).await
  }

  /// [`submit`](Self::submit) for producer threads outside the runtime.
  pub fn submit_blocking(&self, payload: T) -> bool {
    futures::executor::block_on(self.submit(payload))
  }

  pub async fn wait(&self) {
    self.group.wait().await
  }

  pub fn release(&self) {
    self.group.release()
  }

  pub fn group(&self) -> &Arc<TaskGroup> {
    &self.group
  }
}
