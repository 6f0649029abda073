use std::io::{self, Write};

use super::{Sink, format_record};
use crate::record::{Level, LogRecord};

/// Writes records to stdout, or stderr for `WARN` and above.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl ConsoleSink {
    /// Create a console sink.
    pub const fn new() -> Self {
        Self
    }
}

impl Sink for ConsoleSink {
    fn log(&self, record: LogRecord) -> bool {
        let line = format_record(&record);
        let result = if matches!(record.level, Level::Warn | Level::Error) {
            io::stderr().lock().write_all(line.as_bytes())
        } else {
            io::stdout().lock().write_all(line.as_bytes())
        };
        result.is_ok()
    }

    fn stop(&self) {
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
    }
}
