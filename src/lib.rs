//! A Tokio-based bounded-concurrency task group with FIFO dispatch,
//! blocking and background drains, and per-task fault isolation.

mod coordinator;
mod error;
mod execution;
mod group;
mod handler_group;
mod limiter;
mod options;
mod panic_trace;
mod status;
mod task;

pub use error::{BoxError, TaskFault};
pub use group::TaskGroup;
pub use handler_group::HandlerGroup;
pub use options::{FaultHandler, FaultLogger, GroupOptions, TracingLogger};
pub use status::GroupStatus;
pub use task::{current_dispatch_seq, TaskOutcome};
