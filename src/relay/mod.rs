//! Asynchronous relay that serializes many producers onto one delivery thread.
//!
//! Producers hand records to a bounded queue; a single worker thread replays them in order to
//! the inner sink. The worker's lifecycle is an atomic state machine:
//!
//! ```text
//! Idle --start--> Running <--> Blocking (waiting for work or a wake-up)
//!                    |  \
//!            stop()  |   \ stop_now()
//!                    v    v
//!     RunningUntilEmpty   Stop
//! ```
//!
//! Transitions out of `Blocking` use compare-and-swap so that a stop request racing with a
//! dequeue is unambiguous: a record that was already taken off the queue is still delivered
//! before the worker exits.
//!
//! With deduplication enabled the worker looks ahead after each dequeue and folds immediately
//! following identical records into one, annotated with the repeat count and elapsed time.

mod worker;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, bounded};
use thiserror::Error;

use crate::metrics::MetricsSnapshot;
use crate::record::LogRecord;
use crate::sink::{Sink, SinkError};
use worker::{Shared, WorkerState};

/// Logger name used for records the relay synthesizes itself.
pub const RELAY_LOGGER: &str = "relaylog";

/// Errors raised by relay construction and start requests.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A zero-capacity queue cannot buffer anything.
    #[error("relay queue capacity must be greater than zero")]
    ZeroCapacity,
    /// `start()` was called on a relay configured to start on first use.
    #[error("relay is configured to start automatically; explicit start is not allowed")]
    AutomaticStartConfigured,
    /// The worker thread could not be spawned.
    #[error("failed to spawn relay worker: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Behavior of `log` when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Wait until space frees up.
    Block,
    /// Wait up to the given duration, then drop the record.
    Timeout(Duration),
    /// Drop the record immediately.
    Drop,
}

/// How the worker thread gets started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Started by the first `log` call; `start()` is rejected.
    Automatic,
    /// Started only by `start()`; records logged before that wait in the queue.
    Manual,
}

/// Relay settings.
#[derive(Debug, Clone, Copy)]
pub struct RelayConfig {
    /// Maximum number of queued records.
    pub capacity: usize,
    /// Full-queue behavior.
    pub overflow: OverflowPolicy,
    /// Look-ahead window for folding duplicates; `None` disables deduplication and
    /// `Some(Duration::ZERO)` only folds duplicates already queued.
    pub dedup_window: Option<Duration>,
    /// Worker start discipline.
    pub start_mode: StartMode,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            overflow: OverflowPolicy::Timeout(Duration::from_millis(100)),
            dedup_window: None,
            start_mode: StartMode::Automatic,
        }
    }
}

/// Sink decorator that queues records and delivers them from a dedicated thread.
pub struct AsyncRelay {
    shared: Arc<Shared>,
    sender: Sender<LogRecord>,
    wake: Sender<()>,
    overflow: OverflowPolicy,
    start_mode: StartMode,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncRelay {
    /// Wrap `inner` with a relay.
    pub fn new(inner: Arc<dyn Sink>, config: RelayConfig) -> Result<Self, RelayError> {
        if config.capacity == 0 {
            return Err(RelayError::ZeroCapacity);
        }
        let (sender, receiver) = bounded(config.capacity);
        let (wake, wake_receiver) = bounded(1);
        tracing::debug!(
            capacity = config.capacity,
            overflow = ?config.overflow,
            dedup_window = ?config.dedup_window,
            start_mode = ?config.start_mode,
            "Configured relay"
        );

        Ok(Self {
            shared: Arc::new(Shared::new(
                inner,
                receiver,
                wake_receiver,
                config.dedup_window,
            )),
            sender,
            wake,
            overflow: config.overflow,
            start_mode: config.start_mode,
            worker: Mutex::new(None),
        })
    }

    /// Snapshot of the relay counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Stop the worker immediately. Records still queued are discarded.
    pub fn stop_now(&self) {
        self.shutdown(WorkerState::Stop);
    }

    fn ensure_started(&self) {
        if self.shared.state() != WorkerState::Idle {
            return;
        }
        if let Err(error) = self.spawn_worker() {
            tracing::error!(%error, "Failed to start relay worker on first use");
        }
    }

    fn spawn_worker(&self) -> Result<(), RelayError> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_some() {
            return Ok(());
        }
        self.shared.clear_wakeups();
        self.shared.set_state(WorkerState::Running);

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("relaylog-relay".into())
            .spawn(move || shared.run())
            .map_err(|error| {
                self.shared.set_state(WorkerState::Idle);
                RelayError::Spawn(error)
            })?;
        *worker = Some(handle);
        tracing::debug!("Relay worker started");
        Ok(())
    }

    fn shutdown(&self, target: WorkerState) {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = worker.take() {
            self.shared.request(target);
            // Capacity one: repeated requests collapse into a single interrupt.
            let _ = self.wake.try_send(());
            if handle.join().is_err() {
                tracing::error!("Relay worker panicked");
            }
            self.shared.set_state(WorkerState::Idle);
            tracing::debug!(?target, "Relay worker stopped");
        }
        if target == WorkerState::Stop {
            let discarded = self.shared.discard_queued();
            if discarded > 0 {
                tracing::debug!(discarded, "Discarded queued records on immediate stop");
            }
        }
        drop(worker);
        self.shared.inner.stop();
    }
}

impl Sink for AsyncRelay {
    fn log(&self, record: LogRecord) -> bool {
        if self.start_mode == StartMode::Automatic {
            self.ensure_started();
        }
        let queued = match self.overflow {
            OverflowPolicy::Block => self.sender.send(record).is_ok(),
            OverflowPolicy::Timeout(wait) => self.sender.send_timeout(record, wait).is_ok(),
            OverflowPolicy::Drop => self.sender.try_send(record).is_ok(),
        };
        if queued {
            self.shared.metrics.record_enqueued();
        } else {
            self.shared.dropped.fetch_add(1, Ordering::AcqRel);
            self.shared.metrics.record_dropped();
        }
        queued
    }

    fn start(&self) -> Result<(), SinkError> {
        if self.start_mode == StartMode::Automatic {
            return Err(RelayError::AutomaticStartConfigured.into());
        }
        self.shared.inner.start()?;
        self.spawn_worker()?;
        Ok(())
    }

    /// Drain the queue, then stop the worker and the inner sink.
    fn stop(&self) {
        self.shutdown(WorkerState::RunningUntilEmpty);
    }
}

impl Drop for AsyncRelay {
    fn drop(&mut self) {
        let running = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        if running {
            self.shutdown(WorkerState::RunningUntilEmpty);
        }
    }
}

#[cfg(test)]
mod tests;
