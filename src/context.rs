//! Explicit logging context owning the active sink and the minimum level.
//!
//! A [`LogContext`] is constructed with [`LogContext::init`] and handed to whoever logs. The
//! active sink can be swapped with [`LogContext::replace`] while other threads are logging:
//! each call holds a read lock for as long as the sink takes, and a replacement waits for those
//! calls before stopping the previous sink, so an accepted record is never sent to a stopped one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::encoder::{Arg, encode};
use crate::record::{Level, LogRecord, Marker};
use crate::sink::{Sink, SinkError};

/// Handle through which application code emits records.
pub struct LogContext {
    sink: RwLock<Arc<dyn Sink>>,
    minimum: RwLock<Level>,
    closed: AtomicBool,
}

impl LogContext {
    /// Start `sink` and build a context that forwards records at or above `minimum`.
    pub fn init(sink: Arc<dyn Sink>, minimum: Level) -> Result<Self, SinkError> {
        sink.start()?;
        tracing::debug!(%minimum, "Initialized logging context");
        Ok(Self {
            sink: RwLock::new(sink),
            minimum: RwLock::new(minimum),
            closed: AtomicBool::new(false),
        })
    }

    /// Start `sink`, make it active, then stop and return the previous one.
    ///
    /// Calls already in flight complete on the previous sink before it is stopped. A context
    /// that was shut down is reopened.
    pub fn replace(&self, sink: Arc<dyn Sink>) -> Result<Arc<dyn Sink>, SinkError> {
        sink.start()?;
        let previous = {
            let mut active = self.sink.write().unwrap_or_else(PoisonError::into_inner);
            self.closed.store(false, Ordering::Release);
            std::mem::replace(&mut *active, sink)
        };
        previous.stop();
        tracing::debug!("Replaced active sink");
        Ok(previous)
    }

    /// Stop the active sink. Later calls to [`LogContext::log`] are refused until
    /// [`LogContext::replace`] installs a new sink.
    pub fn shutdown(&self) {
        let active = {
            let active = self.sink.write().unwrap_or_else(PoisonError::into_inner);
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            Arc::clone(&active)
        };
        active.stop();
        tracing::debug!("Logging context shut down");
    }

    /// Current minimum level.
    pub fn minimum_level(&self) -> Level {
        *self.minimum.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change the minimum level for subsequent calls.
    pub fn set_minimum_level(&self, level: Level) {
        *self.minimum.write().unwrap_or_else(PoisonError::into_inner) = level;
    }

    /// Whether a record at `level` would be forwarded.
    pub fn enabled(&self, level: Level) -> bool {
        !self.closed.load(Ordering::Acquire) && level.passes(self.minimum_level())
    }

    /// Encode `template` with `args` and hand the record to the active sink.
    ///
    /// Returns `false` when the level is filtered out, the context is shut down, or the sink
    /// did not record the event.
    pub fn log(
        &self,
        logger: &str,
        level: Level,
        marker: Option<&Marker>,
        template: &str,
        args: &[Arg<'_>],
    ) -> bool {
        if !self.enabled(level) {
            return false;
        }
        let encoded = encode(template, args);
        let mut record = LogRecord::now(logger, level, encoded.text);
        if let Some(marker) = marker {
            record = record.with_marker(marker.clone());
        }
        if let Some(error) = encoded.error {
            record = record.with_error(error);
        }
        let active = self.sink.read().unwrap_or_else(PoisonError::into_inner);
        // Re-checked under the lock: shutdown flips the flag while holding it exclusively.
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        active.log(record)
    }
}
