//! Environment-driven configuration for the relay and the rotating file sink.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::file::{DatedNaming, FileSinkConfig, RetentionPolicy};
use crate::record::Level;
use crate::relay::{OverflowPolicy, RelayConfig, StartMode};

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// How long a producer may wait for room in a full relay queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnqueueWait {
    /// Wait until room frees up.
    Block,
    /// Drop immediately.
    Drop,
    /// Wait up to this many milliseconds, then drop.
    Millis(u64),
}

impl EnqueueWait {
    /// Relay overflow policy for this wait setting.
    pub fn policy(self) -> OverflowPolicy {
        match self {
            Self::Block => OverflowPolicy::Block,
            Self::Drop => OverflowPolicy::Drop,
            Self::Millis(millis) => OverflowPolicy::Timeout(Duration::from_millis(millis)),
        }
    }
}

impl std::str::FromStr for EnqueueWait {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "drop" => Ok(Self::Drop),
            other => other.parse().map(Self::Millis).map_err(|_| ()),
        }
    }
}

/// Runtime configuration for the logging pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Directory holding the log files.
    pub directory: PathBuf,
    /// Log file extension, without the leading dot.
    pub extension: String,
    /// Whether file names carry the time of day as well as the date.
    pub include_time: bool,
    /// Minimum level forwarded to the sinks.
    pub level: Level,
    /// Relay queue capacity.
    pub queue_capacity: usize,
    /// Behavior when the relay queue is full.
    pub enqueue_wait: EnqueueWait,
    /// Duplicate-collapsing window; `None` disables deduplication.
    pub dedup_window_ms: Option<u64>,
    /// Free bytes to keep on the log filesystem.
    pub reserved_bytes: Option<u64>,
    /// Size that triggers rotation.
    pub max_file_size: Option<u64>,
    /// Flush every record to the OS.
    pub flush_every_write: bool,
    /// Gzip files once closed.
    pub compress: bool,
    /// Byte budget for rotated files.
    pub retention_bytes: Option<u64>,
    /// Rotated files younger than this are never deleted.
    pub min_retention_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
            extension: "log".to_string(),
            include_time: false,
            level: Level::Info,
            queue_capacity: 1024,
            enqueue_wait: EnqueueWait::Millis(100),
            dedup_window_ms: None,
            reserved_bytes: None,
            max_file_size: None,
            flush_every_write: false,
            compress: false,
            retention_bytes: None,
            min_retention_secs: None,
        }
    }
}

impl Config {
    /// Load configuration from `RELAYLOG_*` environment variables, reading `.env` first.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|key| env::var(key).ok())?;
        tracing::debug!(
            directory = %config.directory.display(),
            level = %config.level,
            queue_capacity = config.queue_capacity,
            enqueue_wait = ?config.enqueue_wait,
            dedup_window_ms = ?config.dedup_window_ms,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let defaults = Self::default();
        Ok(Self {
            directory: vars
                .optional("RELAYLOG_DIRECTORY")
                .map_or(defaults.directory, PathBuf::from),
            extension: vars
                .optional("RELAYLOG_EXTENSION")
                .map(|value| value.trim_start_matches('.').to_string())
                .unwrap_or(defaults.extension),
            include_time: vars
                .parsed("RELAYLOG_INCLUDE_TIME", parse_bool)?
                .unwrap_or(defaults.include_time),
            level: vars
                .parsed("RELAYLOG_LEVEL", |value| value.parse().ok())?
                .unwrap_or(defaults.level),
            queue_capacity: match vars.parsed("RELAYLOG_QUEUE_CAPACITY", |value| value.parse().ok())? {
                Some(0) => return Err(ConfigError::InvalidValue("RELAYLOG_QUEUE_CAPACITY".into())),
                Some(capacity) => capacity,
                None => defaults.queue_capacity,
            },
            enqueue_wait: vars
                .parsed("RELAYLOG_ENQUEUE_WAIT", |value| value.parse().ok())?
                .unwrap_or(defaults.enqueue_wait),
            dedup_window_ms: vars.parsed("RELAYLOG_DEDUP_WINDOW_MS", |value| value.parse().ok())?,
            reserved_bytes: vars.parsed("RELAYLOG_RESERVED_BYTES", |value| value.parse().ok())?,
            max_file_size: vars.parsed("RELAYLOG_MAX_FILE_SIZE", |value| value.parse().ok())?,
            flush_every_write: vars
                .parsed("RELAYLOG_FLUSH_EVERY_WRITE", parse_bool)?
                .unwrap_or(defaults.flush_every_write),
            compress: vars
                .parsed("RELAYLOG_COMPRESS", parse_bool)?
                .unwrap_or(defaults.compress),
            retention_bytes: vars.parsed("RELAYLOG_RETENTION_BYTES", |value| value.parse().ok())?,
            min_retention_secs: vars
                .parsed("RELAYLOG_MIN_RETENTION_SECS", |value| value.parse().ok())?,
        })
    }

    /// Relay settings. The relay waits for an explicit `start`, as issued by
    /// [`LogContext::init`](crate::context::LogContext::init).
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            capacity: self.queue_capacity,
            overflow: self.enqueue_wait.policy(),
            dedup_window: self.dedup_window_ms.map(Duration::from_millis),
            start_mode: StartMode::Manual,
        }
    }

    /// File sink settings.
    pub fn file_sink_config(&self) -> FileSinkConfig {
        let mut config = FileSinkConfig::new(&self.directory);
        config.max_file_size = self.max_file_size;
        config.reserved_bytes = self.reserved_bytes;
        config.flush_every_write = self.flush_every_write;
        config.compress_on_close = self.compress;
        config
    }

    /// Naming and retention strategy.
    pub fn naming(&self) -> DatedNaming {
        DatedNaming::new(self.extension.clone())
            .with_time(self.include_time)
            .with_retention(RetentionPolicy {
                max_total_bytes: self.retention_bytes,
                min_age: self.min_retention_secs.map(Duration::from_secs),
            })
    }
}

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    fn parsed<T>(
        &self,
        key: &str,
        parse: impl FnOnce(&str) -> Option<T>,
    ) -> Result<Option<T>, ConfigError> {
        self.optional(key)
            .map(|value| parse(value.trim()).ok_or_else(|| ConfigError::InvalidValue(key.to_string())))
            .transpose()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = load(&[]).unwrap();
        assert_eq!(config.directory, PathBuf::from("logs"));
        assert_eq!(config.level, Level::Info);

        let relay = config.relay_config();
        assert_eq!(relay.capacity, 1024);
        assert_eq!(relay.overflow, OverflowPolicy::Timeout(Duration::from_millis(100)));
        assert_eq!(relay.dedup_window, None);
        assert_eq!(relay.start_mode, StartMode::Manual);
    }

    #[test]
    fn reads_every_variable() {
        let config = load(&[
            ("RELAYLOG_DIRECTORY", "/var/log/app"),
            ("RELAYLOG_EXTENSION", ".txt"),
            ("RELAYLOG_INCLUDE_TIME", "yes"),
            ("RELAYLOG_LEVEL", "warn"),
            ("RELAYLOG_QUEUE_CAPACITY", "64"),
            ("RELAYLOG_ENQUEUE_WAIT", "block"),
            ("RELAYLOG_DEDUP_WINDOW_MS", "0"),
            ("RELAYLOG_RESERVED_BYTES", "1048576"),
            ("RELAYLOG_MAX_FILE_SIZE", "4096"),
            ("RELAYLOG_FLUSH_EVERY_WRITE", "true"),
            ("RELAYLOG_COMPRESS", "1"),
            ("RELAYLOG_RETENTION_BYTES", "100000"),
            ("RELAYLOG_MIN_RETENTION_SECS", "3600"),
        ])
        .unwrap();

        assert_eq!(config.extension, "txt");
        assert!(config.include_time);
        assert_eq!(config.level, Level::Warn);

        let relay = config.relay_config();
        assert_eq!(relay.capacity, 64);
        assert_eq!(relay.overflow, OverflowPolicy::Block);
        assert_eq!(relay.dedup_window, Some(Duration::ZERO));

        let file = config.file_sink_config();
        assert_eq!(file.directory, PathBuf::from("/var/log/app"));
        assert_eq!(file.max_file_size, Some(4096));
        assert_eq!(file.reserved_bytes, Some(1_048_576));
        assert!(file.flush_every_write && file.compress_on_close);

        assert_eq!(config.retention_bytes, Some(100_000));
        assert_eq!(config.min_retention_secs, Some(3600));
    }

    #[test]
    fn parses_enqueue_wait() {
        assert_eq!("drop".parse(), Ok(EnqueueWait::Drop));
        assert_eq!("BLOCK".parse(), Ok(EnqueueWait::Block));
        assert_eq!("250".parse(), Ok(EnqueueWait::Millis(250)));
        assert_eq!("soon".parse::<EnqueueWait>(), Err(()));
    }

    #[test]
    fn rejects_invalid_values() {
        let error = load(&[("RELAYLOG_MAX_FILE_SIZE", "big")]).unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue(ref key) if key == "RELAYLOG_MAX_FILE_SIZE"));

        let error = load(&[("RELAYLOG_QUEUE_CAPACITY", "0")]).unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue(_)));

        let error = load(&[("RELAYLOG_COMPRESS", "maybe")]).unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = load(&[("RELAYLOG_DIRECTORY", "  "), ("RELAYLOG_LEVEL", "")]).unwrap();
        assert_eq!(config.directory, PathBuf::from("logs"));
        assert_eq!(config.level, Level::Info);
    }
}
