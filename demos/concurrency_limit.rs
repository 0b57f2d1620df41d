use futures_taskgroup::{current_dispatch_seq, GroupOptions, TaskGroup};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::info;

async fn long_task_fn(id: usize) {
  info!(
    "Task {} starting as dispatch #{:?} (concurrency test - should take 1s)",
    id,
    current_dispatch_seq()
  );
  tokio::time::sleep(Duration::from_secs(1)).await;
  info!("Task {} finished", id);
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Concurrency Limit Example (Limit: 2) ---");

  let concurrency_limit = 2;
  let group = TaskGroup::new(concurrency_limit, Handle::current(), GroupOptions::new().with_name("concurrency_group"));

  let num_tasks = 5;
  info!(
    "Submitting {} tasks, each takes 1 sec. With concurrency {}, this should take ~{} secs.",
    num_tasks,
    concurrency_limit,
    (num_tasks as f32 / concurrency_limit as f32).ceil()
  );

  let started = Instant::now();
  for i in 0..num_tasks {
    group.submit(long_task_fn(i)).await;
  }

  group.release();
  info!("Released after {:?}; tasks keep running in the background.", started.elapsed());

  group.wait().await;
  info!("All tasks processed after {:?}.", started.elapsed());
  info!("--- Concurrency Limit Example End ---");
}
