//! Backtraces captured at the panic site of a task.
//!
//! By the time `catch_unwind` returns, the stack that panicked is gone. A
//! process-wide panic hook, chained in front of whatever hook was installed
//! before, records a backtrace into a thread-local slot while the current
//! thread is polling a group task. The isolation boundary then takes it from
//! that slot when it builds the fault.

use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::sync::Once;

static INSTALL_HOOK: Once = Once::new();

thread_local! {
  static CAPTURING: Cell<bool> = const { Cell::new(false) };
  static LAST_PANIC_TRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

fn install_hook() {
  INSTALL_HOOK.call_once(|| {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
      if CAPTURING.try_with(Cell::get).unwrap_or(false) {
        let _ = LAST_PANIC_TRACE.try_with(|slot| *slot.borrow_mut() = Some(Backtrace::force_capture()));
      }
      previous(info);
    }));
  });
}

struct CaptureScope {
  was_capturing: bool,
}

impl Drop for CaptureScope {
  fn drop(&mut self) {
    CAPTURING.with(|flag| flag.set(self.was_capturing));
  }
}

/// Runs `f` with panic-site capture enabled on this thread. A trace left
/// over from an earlier call is discarded first.
pub(crate) fn with_capture<R>(f: impl FnOnce() -> R) -> R {
  install_hook();
  LAST_PANIC_TRACE.with(|slot| slot.borrow_mut().take());
  let _scope = CaptureScope {
    was_capturing: CAPTURING.with(|flag| flag.replace(true)),
  };
  f()
}

/// Takes the backtrace recorded by the most recent captured panic on this
/// thread.
pub(crate) fn take_panic_trace() -> Option<Backtrace> {
  LAST_PANIC_TRACE.try_with(|slot| slot.borrow_mut().take()).ok().flatten()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::panic::{catch_unwind, AssertUnwindSafe};

  #[inline(never)]
  fn fail_inside_capture_test_frame() {
    panic!("captured");
  }

  #[test]
  fn test_trace_recorded_only_inside_capture() {
    let _ = catch_unwind(AssertUnwindSafe(|| with_capture(fail_inside_capture_test_frame)));
    let trace = take_panic_trace().expect("A panic inside with_capture must leave a trace.");
    assert!(trace.to_string().contains("fail_inside_capture_test_frame"));
    assert!(take_panic_trace().is_none());

    let _ = catch_unwind(fail_inside_capture_test_frame);
    assert!(take_panic_trace().is_none());
  }

  #[test]
  fn test_nested_capture_restores_flag() {
    with_capture(|| {
      with_capture(|| ());
      assert!(CAPTURING.with(Cell::get));
    });
    assert!(!CAPTURING.with(Cell::get));
  }
}
