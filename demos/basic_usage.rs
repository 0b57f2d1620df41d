use futures_taskgroup::{GroupOptions, TaskGroup};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Basic Usage Example ---");

  let group = TaskGroup::new(10, Handle::current(), GroupOptions::new().with_name("basic_group"));
  let sum = Arc::new(AtomicI64::new(0));

  for i in 0..=100i64 {
    let sum = sum.clone();
    group
      .submit(async move {
        sum.fetch_add(i, Ordering::SeqCst);
      })
      .await;
  }

  info!("All tasks submitted. Waiting for the group to drain.");
  group.wait().await;
  info!("Group closed. Sum of 0..=100 is {}.", sum.load(Ordering::SeqCst));
  info!("--- Basic Usage Example End ---");
}
