//! Size-rotating file sink with a free-space reservation and background retention.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use time::OffsetDateTime;

use super::compress::compress_and_prune;
use super::naming::{CleanupReport, NamingStrategy};
use super::open_file::OpenFile;
use super::{CloseReason, FileSinkConfig, FileSinkError, FsSpaceProbe, SpaceProbe};
use crate::record::{LogRecord, current_millis};
use crate::sink::{Sink, SinkError, format_record, format_timestamp};

/// Sink that appends formatted records to a file, rotating by size.
///
/// Files are opened lazily through the [`NamingStrategy`], start with an `opened at` header and
/// end with a `closed at ... (<reason>)` footer. When a reserved free-space threshold is set,
/// the sink refuses writes while the filesystem is below it and leaves a single marker line per
/// exhaustion episode. Opening a file kicks off a background retention pass; `stop` waits for it.
pub struct RotatingFileSink {
    config: FileSinkConfig,
    naming: Arc<dyn NamingStrategy>,
    probe: Arc<dyn SpaceProbe>,
    current: Mutex<Option<OpenFile>>,
    retention: Arc<Retention>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

/// Retention state shared with the background cleanup thread.
struct Retention {
    naming: Arc<dyn NamingStrategy>,
    directory: PathBuf,
    /// Most recently opened file. Held for the whole of a pass, so a file opened meanwhile
    /// waits for the pass and is never listed as a candidate.
    active: Mutex<Option<PathBuf>>,
    schedule: Mutex<Schedule>,
}

#[derive(Default)]
struct Schedule {
    running: bool,
    requested: bool,
}

impl Retention {
    fn run_pass(&self) -> CleanupReport {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        self.naming
            .cleanup(&self.directory, active.as_deref(), OffsetDateTime::now_utc())
    }

    fn set_active(&self, path: &Path) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(path.to_path_buf());
    }

    fn lock_schedule(&self) -> MutexGuard<'_, Schedule> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run passes until no further pass was requested while one was in progress.
    fn run_background(&self) {
        loop {
            let report = self.run_pass();
            if !report.deleted.is_empty() {
                tracing::info!(deleted = report.deleted.len(), "Retention cleanup removed old log files");
            }
            let mut schedule = self.lock_schedule();
            if schedule.requested {
                schedule.requested = false;
                continue;
            }
            schedule.running = false;
            return;
        }
    }
}

impl RotatingFileSink {
    /// Create a sink writing under `config.directory` with names chosen by `naming`.
    pub fn new(config: FileSinkConfig, naming: Arc<dyn NamingStrategy>) -> Self {
        tracing::debug!(
            directory = %config.directory.display(),
            max_file_size = ?config.max_file_size,
            reserved_bytes = ?config.reserved_bytes,
            compress_on_close = config.compress_on_close,
            "Configured rotating file sink"
        );
        let retention = Arc::new(Retention {
            naming: Arc::clone(&naming),
            directory: config.directory.clone(),
            active: Mutex::new(None),
            schedule: Mutex::new(Schedule::default()),
        });
        Self {
            config,
            naming,
            probe: Arc::new(FsSpaceProbe),
            current: Mutex::new(None),
            retention,
            cleanup: Mutex::new(None),
        }
    }

    /// Replace the free-space probe.
    pub fn with_probe(mut self, probe: Arc<dyn SpaceProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Path of the file currently open, if any.
    pub fn current_path(&self) -> Option<PathBuf> {
        self.lock_current()
            .as_ref()
            .map(|file| file.path().to_path_buf())
    }

    /// Run a retention pass synchronously, sparing the active file.
    pub fn run_cleanup(&self) -> CleanupReport {
        self.retention.run_pass()
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<OpenFile>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self) -> Result<OpenFile, FileSinkError> {
        let path = self.naming.next_file(
            &self.config.directory,
            self.config.max_file_size,
            OffsetDateTime::now_utc(),
        )?;
        if let Ok(meta) = fs::symlink_metadata(&path) {
            if !meta.is_file() {
                return Err(FileSinkError::NotAFile(path));
            }
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| FileSinkError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        self.retention.set_active(&path);
        let mut file = OpenFile::open(&path, self.naming.truncate_existing()).map_err(|source| {
            FileSinkError::Open {
                path: path.clone(),
                source,
            }
        })?;
        let header = format!("Log file opened at {}\n", format_timestamp(current_millis()));
        file.write(header.as_bytes())
            .map_err(|source| FileSinkError::Open {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(path = %path.display(), "Opened log file");
        self.spawn_cleanup();
        Ok(file)
    }

    fn spawn_cleanup(&self) {
        {
            let mut schedule = self.retention.lock_schedule();
            if schedule.running {
                schedule.requested = true;
                tracing::trace!("Retention cleanup already running; queued another pass");
                return;
            }
            schedule.running = true;
        }

        let mut slot = self.cleanup.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(finished) = slot.take() {
            let _ = finished.join();
        }
        let retention = Arc::clone(&self.retention);
        let spawned = thread::Builder::new()
            .name("relaylog-cleanup".into())
            .spawn(move || retention.run_background());
        match spawned {
            Ok(handle) => *slot = Some(handle),
            Err(error) => {
                self.retention.lock_schedule().running = false;
                tracing::warn!(%error, "Failed to spawn retention cleanup");
            }
        }
    }

    fn append(&self, file: &mut OpenFile, bytes: &[u8]) -> std::io::Result<bool> {
        file.write(bytes)?;
        if self.config.flush_every_write {
            file.flush()?;
        }
        Ok(self
            .config
            .max_file_size
            .is_some_and(|max| file.size() > max))
    }

    fn has_capacity(&self, file: &mut OpenFile) -> bool {
        let Some(reserved) = self.config.reserved_bytes else {
            return true;
        };

        let due = file
            .last_space_check
            .is_none_or(|at| at.elapsed() >= self.config.space_check_interval);
        if due {
            self.measure_space(file);
        }
        if space_left(file) >= reserved {
            clear_exhaustion(file);
            return true;
        }

        if !file.cleanup_attempted {
            file.cleanup_attempted = true;
            let report = self.retention.run_pass();
            tracing::info!(deleted = report.deleted.len(), "Ran retention cleanup to recover disk space");
            self.measure_space(file);
            if space_left(file) >= reserved {
                clear_exhaustion(file);
                return true;
            }
        }

        if !file.capacity_warning_emitted {
            file.capacity_warning_emitted = true;
            tracing::warn!(
                path = %file.path().display(),
                reserved,
                free = ?file.free_space,
                "Log file capacity exhausted; refusing writes"
            );
            let sentinel = format!(
                "Log file capacity exhausted at {}; records are discarded until space is available\n",
                format_timestamp(current_millis())
            );
            if let Err(error) = file.write(sentinel.as_bytes()).and_then(|()| file.flush()) {
                tracing::warn!(%error, "Failed to write capacity marker");
            }
        }
        false
    }

    fn measure_space(&self, file: &mut OpenFile) {
        let directory = match file.path().parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        match self.probe.available_space(directory) {
            Ok(free) => file.free_space = Some(free),
            Err(error) => {
                tracing::warn!(%error, directory = %directory.display(), "Failed to measure free space");
                file.free_space = None;
            }
        }
        file.last_space_check = Some(Instant::now());
    }

    fn close(&self, mut file: OpenFile, reason: CloseReason) {
        let footer = format!(
            "Log file closed at {} ({reason})\n",
            format_timestamp(current_millis())
        );
        if let Err(error) = file.write(footer.as_bytes()).and_then(|()| file.flush()) {
            tracing::warn!(%error, path = %file.path().display(), "Failed to finish log file");
        }
        let path = file.path().to_path_buf();
        drop(file);
        tracing::debug!(path = %path.display(), %reason, "Closed log file");

        if self.config.compress_on_close {
            if let Err(error) = compress_and_prune(&path) {
                tracing::error!(%error, "Failed to compress closed log file");
            }
        }
    }
}

fn space_left(file: &OpenFile) -> u64 {
    file.free_space
        .map_or(u64::MAX, |free| free.saturating_sub(file.buffered()))
}

fn clear_exhaustion(file: &mut OpenFile) {
    if file.capacity_warning_emitted {
        tracing::info!(path = %file.path().display(), "Disk space recovered; resuming log writes");
    }
    file.capacity_warning_emitted = false;
    file.cleanup_attempted = false;
}

impl Sink for RotatingFileSink {
    fn log(&self, record: LogRecord) -> bool {
        let line = format_record(&record);
        let mut current = self.lock_current();
        if current.is_none() {
            match self.open() {
                Ok(file) => *current = Some(file),
                Err(error) => {
                    tracing::error!(%error, "Failed to open log file; retrying on next write");
                    return false;
                }
            }
        }
        let Some(file) = current.as_mut() else {
            return false;
        };
        if !self.has_capacity(file) {
            return false;
        }

        match self.append(file, line.as_bytes()) {
            Ok(false) => true,
            Ok(true) => {
                if let Some(file) = current.take() {
                    self.close(file, CloseReason::FileTooLarge);
                }
                true
            }
            Err(error) => {
                tracing::error!(%error, "Failed to write log file; reopening on next write");
                if let Some(file) = current.take() {
                    self.close(file, CloseReason::WriteFailure);
                }
                false
            }
        }
    }

    fn start(&self) -> Result<(), SinkError> {
        let mut current = self.lock_current();
        if current.is_none() {
            *current = Some(self.open()?);
        }
        Ok(())
    }

    fn stop(&self) {
        let open = self.lock_current().take();
        if let Some(file) = open {
            self.close(file, CloseReason::Shutdown);
        }
        let pending = self
            .cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = pending {
            if handle.join().is_err() {
                tracing::error!("Retention cleanup thread panicked");
            }
        }
    }
}

impl Drop for RotatingFileSink {
    fn drop(&mut self) {
        self.stop();
    }
}
