//! Sink contract shared by every log destination.

mod console;
pub mod format;

pub use console::ConsoleSink;
pub use format::{format_record, format_timestamp};

use crate::file::FileSinkError;
use crate::record::LogRecord;
use crate::relay::RelayError;
use thiserror::Error;

/// Errors surfaced when starting a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The file sink could not open its first file.
    #[error("file sink failed to start: {0}")]
    File(#[from] FileSinkError),
    /// The relay rejected the start request.
    #[error("relay failed to start: {0}")]
    Relay(#[from] RelayError),
}

/// Destination that records finalized log lines.
///
/// `log` returns `false` when the record was not durably recorded (dropped by backpressure or
/// refused for lack of disk space); callers are not expected to retry.
pub trait Sink: Send + Sync {
    /// Record one log event.
    fn log(&self, record: LogRecord) -> bool;

    /// Prepare the sink eagerly. Sinks that start lazily may ignore this.
    fn start(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Flush and release resources. Must be safe to call more than once.
    fn stop(&self) {}
}

impl<S: Sink + ?Sized> Sink for std::sync::Arc<S> {
    fn log(&self, record: LogRecord) -> bool {
        (**self).log(record)
    }

    fn start(&self) -> Result<(), SinkError> {
        (**self).start()
    }

    fn stop(&self) {
        (**self).stop()
    }
}
