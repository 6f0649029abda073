//! File naming and retention policies for the rotating file sink.
//!
//! A [`NamingStrategy`] answers two questions: which file to write next, and which old files may
//! be deleted. [`DatedNaming`] names files `<date>.<ext>` or `<date>.<time>.<ext>` (UTC), adding
//! a `.<N>` suffix before the extension when the plain name is taken.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};
use walkdir::WalkDir;

/// Upper bound on `.<N>` suffixes probed before giving up.
pub const MAX_NAME_ATTEMPTS: usize = 1000;

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");
const DATE_TIME_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day].[hour]-[minute]-[second]");

/// Errors produced while choosing the next log file.
#[derive(Debug, Error)]
pub enum NamingError {
    /// Every probed name was already taken.
    #[error("no free log file name in {} after {attempts} attempts", .directory.display())]
    Exhausted {
        /// Directory that was probed.
        directory: PathBuf,
        /// Number of names tried.
        attempts: usize,
    },
    /// The timestamp could not be rendered into a file name.
    #[error("failed to format log file name: {0}")]
    Format(#[from] time::error::Format),
}

/// Outcome of one retention pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// Files deleted, oldest first.
    pub deleted: Vec<PathBuf>,
    /// Files kept because their name carried a timestamp in the future.
    pub future_dated: Vec<PathBuf>,
    /// Files whose deletion failed.
    pub failed: Vec<PathBuf>,
}

/// Policy deciding the next log file path and which old files may be deleted.
pub trait NamingStrategy: Send + Sync {
    /// Choose the path of the next file to write in `directory`.
    ///
    /// `max_size` lets the strategy skip existing files that are already full.
    fn next_file(
        &self,
        directory: &Path,
        max_size: Option<u64>,
        now: OffsetDateTime,
    ) -> Result<PathBuf, NamingError>;

    /// Delete old files according to the retention policy. `current` is never deleted.
    fn cleanup(&self, directory: &Path, current: Option<&Path>, now: OffsetDateTime)
    -> CleanupReport;

    /// Whether an existing file at the chosen path is truncated rather than appended to.
    fn truncate_existing(&self) -> bool {
        false
    }
}

/// Limits applied to rotated files during cleanup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Total bytes the eligible old files may occupy; `None` disables deletion.
    pub max_total_bytes: Option<u64>,
    /// Files younger than this are never deleted.
    pub min_age: Option<Duration>,
}

/// Date-stamped file names with numeric collision suffixes.
#[derive(Debug, Clone)]
pub struct DatedNaming {
    extension: String,
    include_time: bool,
    retention: RetentionPolicy,
}

struct RetentionCandidate {
    path: PathBuf,
    timestamp: OffsetDateTime,
    index: u32,
    size: u64,
}

impl DatedNaming {
    /// Name files `<date>.<extension>`.
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            include_time: false,
            retention: RetentionPolicy::default(),
        }
    }

    /// Include the time of day (`<date>.<HH-MM-SS>.<extension>`).
    pub fn with_time(mut self, include_time: bool) -> Self {
        self.include_time = include_time;
        self
    }

    /// Apply a retention policy during cleanup.
    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    fn stem(&self, now: OffsetDateTime) -> Result<String, time::error::Format> {
        if self.include_time {
            now.format(DATE_TIME_FORMAT)
        } else {
            now.date().format(DATE_FORMAT)
        }
    }

    fn candidate_name(&self, stem: &str, attempt: usize) -> String {
        if attempt == 0 {
            format!("{stem}.{}", self.extension)
        } else {
            format!("{stem}.{attempt}.{}", self.extension)
        }
    }

    fn is_usable(&self, candidate: &Path, max_size: Option<u64>) -> bool {
        if compressed_sibling(candidate).exists() {
            return false;
        }
        match fs::symlink_metadata(candidate) {
            Ok(meta) => {
                meta.is_file()
                    && !self.truncate_existing()
                    && max_size.is_none_or(|max| meta.len() < max)
            }
            // Anything else surfaces when the sink tries to open the path.
            Err(_) => true,
        }
    }

    /// Parse a file name produced by this strategy into its timestamp and suffix.
    fn parse_name(&self, name: &str) -> Option<(OffsetDateTime, u32)> {
        let name = name.strip_suffix(".gz").unwrap_or(name);
        let rest = name
            .strip_suffix(self.extension.as_str())?
            .strip_suffix('.')?;
        let (stem, index) = match rest.rsplit_once('.') {
            Some((stem, suffix)) if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) => {
                (stem, suffix.parse().ok()?)
            }
            _ => (rest, 0),
        };
        let timestamp = if self.include_time {
            PrimitiveDateTime::parse(stem, DATE_TIME_FORMAT).ok()?
        } else {
            Date::parse(stem, DATE_FORMAT).ok()?.midnight()
        };
        Some((timestamp.assume_utc(), index))
    }

    fn collect_candidates(
        &self,
        directory: &Path,
        current: Option<&Path>,
        now: OffsetDateTime,
        report: &mut CleanupReport,
    ) -> Vec<RetentionCandidate> {
        let mut candidates = Vec::new();
        for entry in WalkDir::new(directory).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    tracing::warn!(%error, directory = %directory.display(), "Failed to list log directory");
                    continue;
                }
            };
            if !entry.file_type().is_file() || current == Some(entry.path()) {
                continue;
            }
            let Some((timestamp, index)) = entry
                .file_name()
                .to_str()
                .and_then(|name| self.parse_name(name))
            else {
                continue;
            };
            if timestamp > now {
                tracing::warn!(file = %entry.path().display(), "Keeping log file dated in the future");
                report.future_dated.push(entry.path().to_path_buf());
                continue;
            }
            let size = entry.metadata().map(|meta| meta.len()).unwrap_or(0);
            candidates.push(RetentionCandidate {
                path: entry.into_path(),
                timestamp,
                index,
                size,
            });
        }
        candidates.sort_by_key(|candidate| (candidate.timestamp, candidate.index));
        candidates
    }
}

impl NamingStrategy for DatedNaming {
    fn next_file(
        &self,
        directory: &Path,
        max_size: Option<u64>,
        now: OffsetDateTime,
    ) -> Result<PathBuf, NamingError> {
        let stem = self.stem(now)?;
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = directory.join(self.candidate_name(&stem, attempt));
            if self.is_usable(&candidate, max_size) {
                return Ok(candidate);
            }
        }
        Err(NamingError::Exhausted {
            directory: directory.to_path_buf(),
            attempts: MAX_NAME_ATTEMPTS,
        })
    }

    fn cleanup(
        &self,
        directory: &Path,
        current: Option<&Path>,
        now: OffsetDateTime,
    ) -> CleanupReport {
        let mut report = CleanupReport::default();
        let Some(budget) = self.retention.max_total_bytes else {
            return report;
        };

        let cutoff = match self.retention.min_age {
            Some(min_age) => match time::Duration::try_from(min_age)
                .ok()
                .and_then(|age| now.checked_sub(age))
            {
                Some(cutoff) => cutoff,
                None => return report,
            },
            None => now,
        };

        let eligible: Vec<RetentionCandidate> = self
            .collect_candidates(directory, current, now, &mut report)
            .into_iter()
            .filter(|candidate| candidate.timestamp <= cutoff)
            .collect();
        let mut remaining: u64 = eligible.iter().map(|candidate| candidate.size).sum();

        for candidate in eligible {
            if remaining <= budget {
                break;
            }
            match fs::remove_file(&candidate.path) {
                Ok(()) => {
                    remaining = remaining.saturating_sub(candidate.size);
                    tracing::debug!(file = %candidate.path.display(), size = candidate.size, "Deleted old log file");
                    report.deleted.push(candidate.path);
                }
                Err(error) => {
                    tracing::warn!(%error, file = %candidate.path.display(), "Failed to delete old log file");
                    report.failed.push(candidate.path);
                }
            }
        }
        report
    }
}

/// Path of the gzip copy written next to `path`.
pub fn compressed_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(OsStr::new(".gz"));
    PathBuf::from(name)
}
