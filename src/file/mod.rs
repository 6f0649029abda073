//! Quota-aware rotating file sink.

mod compress;
pub mod naming;
mod open_file;
mod sink;

pub use compress::{CompressionError, CompressionOutcome, compress_and_prune};
pub use naming::{
    CleanupReport, DatedNaming, NamingError, NamingStrategy, RetentionPolicy, compressed_sibling,
};
pub use sink::RotatingFileSink;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Errors raised while opening a log file.
#[derive(Debug, Error)]
pub enum FileSinkError {
    /// The naming strategy could not produce a path.
    #[error(transparent)]
    Naming(#[from] NamingError),
    /// Something other than a regular file sits at the chosen path.
    #[error("log path {} exists and is not a regular file", .0.display())]
    NotAFile(PathBuf),
    /// The log directory could not be created.
    #[error("failed to create log directory {}: {source}", .path.display())]
    CreateDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The log file could not be opened or its header written.
    #[error("failed to open log file {}: {source}", .path.display())]
    Open {
        /// File that could not be opened.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Why a log file was closed; written into its footer line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The sink was stopped.
    Shutdown,
    /// The file grew past the configured maximum size.
    FileTooLarge,
    /// A write to the file failed.
    WriteFailure,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Shutdown => "shutdown",
            Self::FileTooLarge => "file too large",
            Self::WriteFailure => "failure to write",
        })
    }
}

/// Settings for [`RotatingFileSink`].
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Directory holding the log files.
    pub directory: PathBuf,
    /// Rotate once a file grows past this many bytes.
    pub max_file_size: Option<u64>,
    /// Free bytes to leave on the filesystem; writes are refused below this.
    pub reserved_bytes: Option<u64>,
    /// Hand every record to the OS immediately instead of buffering.
    pub flush_every_write: bool,
    /// Gzip each file after it is closed.
    pub compress_on_close: bool,
    /// Minimum time between free-space measurements.
    pub space_check_interval: Duration,
}

impl FileSinkConfig {
    /// Defaults for files written under `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            max_file_size: None,
            reserved_bytes: None,
            flush_every_write: false,
            compress_on_close: false,
            space_check_interval: Duration::from_secs(5),
        }
    }
}

/// Measures free space on the filesystem holding a path.
pub trait SpaceProbe: Send + Sync {
    /// Bytes available to unprivileged writers on the filesystem containing `path`.
    fn available_space(&self, path: &Path) -> io::Result<u64>;
}

/// [`SpaceProbe`] backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSpaceProbe;

impl SpaceProbe for FsSpaceProbe {
    fn available_space(&self, path: &Path) -> io::Result<u64> {
        fs2::available_space(path)
    }
}
