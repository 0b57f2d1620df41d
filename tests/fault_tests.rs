use futures_taskgroup::{FaultLogger, GroupOptions, GroupStatus, TaskFault, TaskGroup};
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,futures_taskgroup=debug"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

/// Collects every record written to it.
#[derive(Default)]
struct CapturingLogger {
  records: Mutex<Vec<String>>,
}

impl FaultLogger for CapturingLogger {
  fn write_record(&self, args: fmt::Arguments<'_>) {
    self.records.lock().push(args.to_string());
  }
}

// Handler that keeps (is_panic, message) for every fault it sees.
fn recording_handler() -> (Arc<Mutex<Vec<(bool, String)>>>, impl Fn(TaskFault) + Send + Sync + 'static) {
  let seen = Arc::new(Mutex::new(Vec::new()));
  let sink = seen.clone();
  (seen, move |fault: TaskFault| sink.lock().push((fault.is_panic(), fault.message())))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panicking_task_does_not_disturb_siblings() {
  setup_tracing_for_test();
  let (seen, handler) = recording_handler();
  let group = TaskGroup::new(
    4,
    tokio::runtime::Handle::current(),
    GroupOptions::new().with_name("test_fault_siblings").with_fault_handler(handler),
  );
  let sum = Arc::new(AtomicI64::new(0));

  for i in 0..=100i64 {
    let sum = sum.clone();
    group
      .submit(async move {
        if i == 50 {
          panic!("task {} intentionally panicked", i);
        }
        sum.fetch_add(i, Ordering::SeqCst);
      })
      .await;
  }

  timeout(Duration::from_secs(5), group.wait())
    .await
    .expect("Wait must not hang after a task panics.");

  assert_eq!(sum.load(Ordering::SeqCst), 5050 - 50);
  assert_eq!(*seen.lock(), vec![(true, "task 50 intentionally panicked".to_string())]);
  assert_eq!(group.status(), GroupStatus::Closed);
  assert_eq!(group.active_task_count(), 0);
}

#[tokio::test]
async fn test_failed_task_is_routed_to_handler() {
  setup_tracing_for_test();
  let (seen, handler) = recording_handler();
  let group = TaskGroup::new(
    2,
    tokio::runtime::Handle::current(),
    GroupOptions::new().with_name("test_fault_failed").with_fault_handler(handler),
  );

  group
    .submit(async { Err::<(), _>(io::Error::new(io::ErrorKind::NotFound, "missing input")) })
    .await;
  group.submit(async { Ok::<(), io::Error>(()) }).await;
  group.wait().await;

  assert_eq!(*seen.lock(), vec![(false, "missing input".to_string())]);
}

#[inline(never)]
fn explode_in_named_frame() {
  panic!("logged boom");
}

#[tokio::test]
async fn test_logger_receives_fault_with_backtrace_when_no_handler() {
  setup_tracing_for_test();
  let logger = Arc::new(CapturingLogger::default());
  let group = TaskGroup::new(
    1,
    tokio::runtime::Handle::current(),
    GroupOptions::new()
      .with_name("test_fault_logger")
      .with_logger(logger.clone()),
  );

  group.submit(async { explode_in_named_frame() }).await;
  group.wait().await;

  let records = logger.records.lock();
  assert_eq!(records.len(), 1);
  assert!(records[0].starts_with("group test_fault_logger: task 0 fault: task panicked: logged boom\n"));
  // The backtrace is taken where the task panicked, not after unwinding.
  assert!(
    records[0].contains("explode_in_named_frame"),
    "Record should include the panicking frame: {}",
    records[0]
  );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_handler_does_not_block_the_group() {
  setup_tracing_for_test();
  let handled = Arc::new(AtomicUsize::new(0));
  let handled_clone = handled.clone();
  let group = TaskGroup::new(
    1,
    tokio::runtime::Handle::current(),
    GroupOptions::new()
      .with_name("test_fault_bad_handler")
      .with_fault_handler(move |_fault| {
        handled_clone.fetch_add(1, Ordering::SeqCst);
        panic!("fault handler is broken too");
      }),
  );
  let completed = Arc::new(AtomicUsize::new(0));

  for i in 0..6 {
    let completed = completed.clone();
    group
      .submit(async move {
        if i % 2 == 0 {
          panic!("even task {} panics", i);
        }
        completed.fetch_add(1, Ordering::SeqCst);
      })
      .await;
  }

  timeout(Duration::from_secs(5), group.wait())
    .await
    .expect("A panicking fault handler must not leak execution slots.");
  assert_eq!(completed.load(Ordering::SeqCst), 3);
  assert_eq!(handled.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_closure_panic_is_isolated() {
  setup_tracing_for_test();
  let (seen, handler) = recording_handler();
  let group = TaskGroup::new(
    2,
    tokio::runtime::Handle::current(),
    GroupOptions::new().with_name("test_fault_blocking").with_fault_handler(handler),
  );
  let completed = Arc::new(AtomicUsize::new(0));

  group.submit_fn(|| -> () { panic!("blocking task panicked") }).await;
  let completed_clone = completed.clone();
  group
    .submit_fn(move || {
      completed_clone.fetch_add(1, Ordering::SeqCst);
    })
    .await;
  group.wait().await;

  assert_eq!(completed.load(Ordering::SeqCst), 1);
  assert_eq!(*seen.lock(), vec![(true, "blocking task panicked".to_string())]);
}
