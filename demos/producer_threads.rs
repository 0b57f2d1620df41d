use futures_taskgroup::{GroupOptions, TaskGroup};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();
  info!("--- Producer Threads Example ---");

  let runtime = tokio::runtime::Builder::new_multi_thread()
    .enable_all()
    .build()
    .expect("Failed to build Tokio runtime");
  let group = TaskGroup::new(4, runtime.handle().clone(), GroupOptions::new().with_name("threads_group"));
  let total = Arc::new(AtomicI64::new(0));

  let producers: Vec<_> = (0..3i64)
    .map(|producer| {
      let group = group.clone();
      let total = total.clone();
      thread::spawn(move || {
        for i in 0..10i64 {
          let total = total.clone();
          group.submit_fn_blocking(move || {
            thread::sleep(Duration::from_millis(20));
            total.fetch_add(producer * 100 + i, Ordering::SeqCst);
          });
        }
        info!("Producer {} done submitting.", producer);
      })
    })
    .collect();

  for producer in producers {
    producer.join().expect("Producer thread panicked");
  }

  group.wait_blocking();
  info!("Group closed. Total: {}", total.load(Ordering::SeqCst));
  info!("--- Producer Threads Example End ---");
}
