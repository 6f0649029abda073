//! Log record data model shared by the encoder, the relay, and every sink.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::encoder::render_error;

/// Severity attached to every record.
///
/// Ordering follows severity, with [`Level::Log`] above everything else so that it always
/// passes a minimum-level filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Fine-grained tracing output.
    Trace,
    /// Developer diagnostics.
    Debug,
    /// Normal operational messages.
    Info,
    /// Something unexpected that the application recovered from.
    Warn,
    /// A failure the application could not recover from locally.
    Error,
    /// Unconditional output that bypasses level filters.
    Log,
}

impl Level {
    /// Upper-case label used in formatted lines.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Log => "LOG",
        }
    }

    /// Whether a record at this level passes the given minimum level.
    pub fn passes(self, minimum: Level) -> bool {
        self == Self::Log || self >= minimum
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Level {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "log" => Ok(Self::Log),
            _ => Err(()),
        }
    }
}

/// Named tag attached to a record.
///
/// Two markers are the same marker only when they share the same allocation; creating two
/// markers with an identical name yields distinct markers.
#[derive(Debug, Clone)]
pub struct Marker(Arc<str>);

impl Marker {
    /// Create a new marker with its own identity.
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    /// Marker name as supplied at construction.
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Identity comparison between optional markers.
    pub fn same(left: Option<&Marker>, right: Option<&Marker>) -> bool {
        match (left, right) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(&a.0, &b.0),
            _ => false,
        }
    }
}

/// Owned snapshot of an error and its source chain.
///
/// Errors are captured eagerly at encode time so the record can cross to the relay worker
/// without borrowing from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// `Display` rendering of the top-level error.
    pub message: String,
    /// `Display` renderings of each `source()` in order.
    pub causes: Vec<String>,
}

impl ErrorInfo {
    /// Capture an error and walk its source chain.
    ///
    /// A chain element whose `Display` fails or panics is recorded as
    /// [`RENDER_FAILURE`](crate::encoder::RENDER_FAILURE).
    pub fn capture(error: &(dyn StdError + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut current = error.source();
        while let Some(cause) = current {
            causes.push(render_error(cause));
            current = cause.source();
        }
        Self {
            message: render_error(error),
            causes,
        }
    }

    /// Render the error as indented trace lines, one per chain element.
    pub fn trace_lines(&self) -> impl Iterator<Item = String> + '_ {
        std::iter::once(format!("  error: {}", self.message)).chain(
            self.causes
                .iter()
                .map(|cause| format!("  caused by: {cause}")),
        )
    }
}

/// One finalized log event handed to a sink.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Name of the logger that produced the record.
    pub logger: String,
    /// Milliseconds since the Unix epoch at which the record was created.
    pub timestamp_millis: i64,
    /// Record severity.
    pub level: Level,
    /// Optional marker.
    pub marker: Option<Marker>,
    /// Finalized message text with arguments substituted.
    pub text: String,
    /// Error extracted from the arguments, rendered by sinks as a trace.
    pub error: Option<ErrorInfo>,
}

impl LogRecord {
    /// Build a record stamped with the current wall-clock time.
    pub fn now(logger: impl Into<String>, level: Level, text: impl Into<String>) -> Self {
        Self {
            logger: logger.into(),
            timestamp_millis: current_millis(),
            level,
            marker: None,
            text: text.into(),
            error: None,
        }
    }

    /// Attach a marker.
    pub fn with_marker(mut self, marker: Marker) -> Self {
        self.marker = Some(marker);
        self
    }

    /// Attach an extracted error.
    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        self.error = Some(error);
        self
    }

    /// Whether two records are field-for-field duplicates for deduplication purposes.
    ///
    /// Logger, level, text and marker identity decide; timestamps and attached errors are
    /// ignored, so a folded record keeps the error of the first occurrence.
    pub fn is_duplicate_of(&self, other: &LogRecord) -> bool {
        self.level == other.level
            && self.logger == other.logger
            && self.text == other.text
            && Marker::same(self.marker.as_ref(), other.marker.as_ref())
    }
}

/// Milliseconds since the Unix epoch according to the system clock.
pub fn current_millis() -> i64 {
    let now = time::OffsetDateTime::now_utc();
    (now.unix_timestamp_nanos() / 1_000_000) as i64
}
