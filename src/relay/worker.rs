//! Worker-side half of the relay: the state cell, dequeue loop, and duplicate folding.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, select};

use super::RELAY_LOGGER;
use crate::metrics::RelayMetrics;
use crate::record::{Level, LogRecord};
use crate::sink::Sink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(super) enum WorkerState {
    Idle = 0,
    Running = 1,
    Blocking = 2,
    RunningUntilEmpty = 3,
    Stop = 4,
}

impl WorkerState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Running,
            2 => Self::Blocking,
            3 => Self::RunningUntilEmpty,
            4 => Self::Stop,
            _ => Self::Idle,
        }
    }
}

/// A dequeued record plus the duplicates folded into it.
struct Collapsed {
    record: LogRecord,
    repeats: u64,
    last_timestamp: i64,
}

impl Collapsed {
    fn new(record: LogRecord) -> Self {
        let last_timestamp = record.timestamp_millis;
        Self {
            record,
            repeats: 0,
            last_timestamp,
        }
    }

    fn finish(mut self) -> LogRecord {
        if self.repeats > 0 {
            let elapsed = self.last_timestamp - self.record.timestamp_millis;
            self.record.text.push_str(&format!(
                " [repeated {} times over {} ms]",
                self.repeats, elapsed
            ));
        }
        self.record
    }
}

pub(super) struct Shared {
    pub(super) inner: Arc<dyn Sink>,
    pub(super) metrics: RelayMetrics,
    pub(super) dropped: AtomicU64,
    receiver: Receiver<LogRecord>,
    wake: Receiver<()>,
    state: AtomicU8,
    dedup_window: Option<Duration>,
}

impl Shared {
    pub(super) fn new(
        inner: Arc<dyn Sink>,
        receiver: Receiver<LogRecord>,
        wake: Receiver<()>,
        dedup_window: Option<Duration>,
    ) -> Self {
        Self {
            inner,
            metrics: RelayMetrics::new(),
            dropped: AtomicU64::new(0),
            receiver,
            wake,
            state: AtomicU8::new(WorkerState::Idle as u8),
            dedup_window,
        }
    }

    pub(super) fn state(&self) -> WorkerState {
        WorkerState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub(super) fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Move a live worker toward `target`. An immediate stop is never downgraded to a drain.
    pub(super) fn request(&self, target: WorkerState) {
        let mut current = self.state();
        loop {
            if matches!(current, WorkerState::Idle | WorkerState::Stop) || current == target {
                return;
            }
            if self.transition(current, target) {
                return;
            }
            current = self.state();
        }
    }

    pub(super) fn clear_wakeups(&self) {
        while self.wake.try_recv().is_ok() {}
    }

    pub(super) fn discard_queued(&self) -> usize {
        self.receiver.try_iter().count()
    }

    pub(super) fn run(&self) {
        let mut pending: Option<LogRecord> = None;
        loop {
            // A record read ahead is still queued as far as an immediate stop is concerned.
            if self.state() == WorkerState::Stop {
                break;
            }
            let record = match pending.take() {
                Some(record) => record,
                None => match self.next_record() {
                    Some(record) => record,
                    None => break,
                },
            };
            let (collapsed, following) = self.collapse(record);
            pending = following;
            self.deliver(collapsed);
        }
    }

    fn next_record(&self) -> Option<LogRecord> {
        loop {
            match self.state() {
                WorkerState::Running => {
                    if !self.transition(WorkerState::Running, WorkerState::Blocking) {
                        continue;
                    }
                    let received = select! {
                        recv(self.receiver) -> message => message.map(Some),
                        recv(self.wake) -> signal => signal.map(|()| None),
                    };
                    // Fails when a stop request landed during the wait; that request wins,
                    // but a record already received is still handed back for delivery.
                    self.transition(WorkerState::Blocking, WorkerState::Running);
                    match received {
                        Ok(Some(record)) => return Some(record),
                        Ok(None) => continue,
                        Err(_) => {
                            self.set_state(WorkerState::Stop);
                            return None;
                        }
                    }
                }
                WorkerState::RunningUntilEmpty => return self.receiver.try_recv().ok(),
                WorkerState::Stop | WorkerState::Blocking | WorkerState::Idle => return None,
            }
        }
    }

    /// Fold immediately following duplicates of `record` into it.
    ///
    /// Returns the folded record and the first non-matching record read during look-ahead,
    /// which must be processed next.
    fn collapse(&self, record: LogRecord) -> (Collapsed, Option<LogRecord>) {
        let mut collapsed = Collapsed::new(record);
        let Some(window) = self.dedup_window else {
            return (collapsed, None);
        };

        let deadline = Instant::now() + window;
        loop {
            let state = self.state();
            if state == WorkerState::Stop {
                return (collapsed, None);
            }
            let candidate = if window.is_zero() || state != WorkerState::Running {
                self.receiver.try_recv().ok()
            } else {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    None
                } else {
                    let waited = select! {
                        recv(self.receiver) -> message => Some(message.ok()),
                        recv(self.wake) -> _ => None,
                        default(remaining) => Some(None),
                    };
                    match waited {
                        Some(candidate) => candidate,
                        // A stop request ends the wait; duplicates already queued still fold.
                        None => continue,
                    }
                }
            };

            match candidate {
                Some(next) if next.is_duplicate_of(&collapsed.record) => {
                    collapsed.repeats += 1;
                    collapsed.last_timestamp = next.timestamp_millis;
                }
                Some(next) => return (collapsed, Some(next)),
                None => return (collapsed, None),
            }
        }
    }

    fn deliver(&self, collapsed: Collapsed) {
        if collapsed.repeats > 0 {
            self.metrics.record_merged(collapsed.repeats);
        }
        if self.inner.log(collapsed.finish()) {
            self.metrics.record_delivered();
            self.report_drops();
        }
    }

    /// Report queue overflow straight to the inner sink, bypassing the queue.
    fn report_drops(&self) {
        let dropped = self.dropped.swap(0, Ordering::AcqRel);
        if dropped == 0 {
            return;
        }
        let notice = LogRecord::now(
            RELAY_LOGGER,
            Level::Warn,
            format!("{dropped} log records dropped because the relay queue was full"),
        );
        if !self.inner.log(notice) {
            self.dropped.fetch_add(dropped, Ordering::AcqRel);
        }
    }
}
