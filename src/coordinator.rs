use crate::execution::run_isolated;
use crate::limiter::{AdmissionLimiter, InFlightTracker};
use crate::options::ResolvedOptions;
use crate::status::{AtomicStatus, GroupStatus};
use crate::task::TaskToExecute;

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::runtime::Handle as TokioHandle;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// A task on its way from a producer to the coordinator. The coordinator
/// answers on `accepted` once the task is in its queue.
pub(crate) struct Handoff {
  pub(crate) task: TaskToExecute,
  pub(crate) accepted: oneshot::Sender<()>,
}

/// The state shared between a group's facade and one coordinator run.
///
/// A reopened group gets a fresh generation; nothing carries over.
pub(crate) struct Generation {
  pub(crate) handoff_tx: mpsc::Sender<Handoff>,
  pub(crate) status: Arc<AtomicStatus>,
  pub(crate) drain_token: CancellationToken,
  pub(crate) closed_token: CancellationToken,
  pub(crate) tracker: Arc<InFlightTracker>,
}

impl Generation {
  /// Creates the generation and spawns its coordinator.
  pub(crate) fn start(limiter: AdmissionLimiter, options: Arc<ResolvedOptions>, tokio_handle: &TokioHandle) -> Self {
    // Capacity 1 plus the acceptance ack makes submit a rendezvous.
    let (handoff_tx, handoff_rx) = mpsc::channel(1);
    let generation = Self {
      handoff_tx,
      status: Arc::new(AtomicStatus::new()),
      drain_token: CancellationToken::new(),
      closed_token: CancellationToken::new(),
      tracker: InFlightTracker::new(),
    };

    let coordinator = Coordinator {
      handoff_rx,
      status: generation.status.clone(),
      drain_token: generation.drain_token.clone(),
      closed_token: generation.closed_token.clone(),
      tracker: generation.tracker.clone(),
      limiter,
      options: options.clone(),
      tasks_tokio_handle: tokio_handle.clone(),
    };
    tokio_handle.spawn(
      coordinator
        .run()
        .instrument(info_span!("taskgroup_coordinator", group = %*options.name)),
    );

    generation
  }

  /// Moves the generation from `Open` to `Draining`. Only the winning caller
  /// signals the coordinator; everyone else is a no-op.
  pub(crate) fn begin_drain(&self) -> bool {
    if self.status.transition(GroupStatus::Open, GroupStatus::Draining) {
      self.drain_token.cancel();
      true
    } else {
      false
    }
  }
}

struct Coordinator {
  handoff_rx: mpsc::Receiver<Handoff>,
  status: Arc<AtomicStatus>,
  drain_token: CancellationToken,
  closed_token: CancellationToken,
  tracker: Arc<InFlightTracker>,
  limiter: AdmissionLimiter,
  options: Arc<ResolvedOptions>,
  tasks_tokio_handle: TokioHandle,
}

impl Coordinator {
  async fn run(mut self) {
    info!(group = %*self.options.name, limit = self.limiter.limit(), "Coordinator started.");

    let mut queue: VecDeque<TaskToExecute> = VecDeque::new();
    let mut accepting = true;
    let mut next_dispatch_seq: u64 = 0;

    loop {
      if !accepting && queue.is_empty() && self.tracker.is_quiescent() {
        break;
      }

      // Unbiased: accepting and dispatching compete on equal terms.
      tokio::select! {
        _ = self.drain_token.cancelled(), if accepting => {
          debug!(group = %*self.options.name, queued = queue.len(), "Drain requested. No longer accepting submissions.");
          accepting = false;
          self.stop_accepting();
        }

        handoff = self.handoff_rx.recv(), if accepting => {
          match handoff {
            Some(handoff) if self.status.load() == GroupStatus::Open => {
              queue.push_back(handoff.task);
              self.tracker.accept();
              // A producer that gave up waiting is fine; the task stays queued.
              let _ = handoff.accepted.send(());
              trace!(group = %*self.options.name, queued = queue.len(), "Accepted submission.");
            }
            Some(handoff) => {
              // Drain began between the producer's send and this receive.
              drop(handoff);
              accepting = false;
              self.stop_accepting();
            }
            None => {
              info!(group = %*self.options.name, "All group handles dropped. Finishing remaining tasks in the background.");
              self.status.transition(GroupStatus::Open, GroupStatus::Draining);
              accepting = false;
            }
          }
        }

        permit = self.limiter.acquire(), if !queue.is_empty() => {
          let permit = match permit {
            Ok(permit) => permit,
            // Unreachable in practice: the limiter never closes its semaphore,
            // and `AcquireError` only comes from a closed one.
            Err(_) => {
              error!(group = %*self.options.name, dropped = queue.len(), "Admission semaphore closed. Dropping queued tasks.");
              for _ in queue.drain(..) {
                self.tracker.complete();
              }
              continue;
            }
          };

          if let Some(task) = queue.pop_front() {
            let dispatch_seq = next_dispatch_seq;
            next_dispatch_seq += 1;
            debug!(
              group = %*self.options.name,
              dispatch_seq,
              active = self.limiter.active(),
              queued = queue.len(),
              "Dispatching task."
            );
            self.tasks_tokio_handle.spawn(
              run_isolated(task, permit, self.tracker.clone(), self.options.clone(), dispatch_seq)
                .instrument(info_span!("task_execution", group = %*self.options.name, dispatch_seq)),
            );
          }
        }

        _ = self.tracker.quiescent(), if !accepting => {
          trace!(group = %*self.options.name, in_flight = self.tracker.count(), "Completion observed while draining.");
        }
      }
    }

    if !self.status.transition(GroupStatus::Draining, GroupStatus::Closed) {
      warn!(group = %*self.options.name, status = ?self.status.load(), "Coordinator closing from an unexpected status.");
    }
    self.closed_token.cancel();
    info!(group = %*self.options.name, dispatched = next_dispatch_seq, "Coordinator stopped. Group closed.");
  }

  /// Closes the handoff and drops submissions that were never acknowledged.
  /// Their producers return without the task having been accepted.
  fn stop_accepting(&mut self) {
    self.handoff_rx.close();
    let mut dropped = 0usize;
    while let Ok(handoff) = self.handoff_rx.try_recv() {
      drop(handoff);
      dropped += 1;
    }
    if dropped > 0 {
      debug!(group = %*self.options.name, dropped, "Dropped submissions that arrived after drain began.");
    }
  }
}
