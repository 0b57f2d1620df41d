use futures_taskgroup::{GroupOptions, TaskFault, TaskGroup};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Task Panic Example ---");

  let group = TaskGroup::new(
    1, // Concurrency limit
    Handle::current(),
    GroupOptions::new()
      .with_name("panic_group")
      .with_fault_handler(|fault: TaskFault| warn!("Fault handler caught: {}", fault)),
  );

  group
    .submit::<_, ()>(async {
      info!("Panicking Task: Starting...");
      tokio::time::sleep(Duration::from_millis(100)).await;
      info!("Panicking Task: About to panic!");
      panic!("This task is designed to panic!");
    })
    .await;

  group
    .submit(async {
      info!("Sibling Task: Still runs after the panic.");
    })
    .await;

  group.wait().await;
  info!("Group closed. The panic never reached this caller.");
  info!("--- Task Panic Example End ---");
}
