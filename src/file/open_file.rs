//! Handle on the active log file: chunked write buffer and size accounting.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Buffered bytes are handed to the OS once they reach this size.
pub(crate) const FLUSH_CHUNK: usize = 8 * 1024;

/// The file currently being written, with its size and free-space bookkeeping.
pub(crate) struct OpenFile {
    path: PathBuf,
    file: Box<dyn Write + Send>,
    buffer: Vec<u8>,
    flushed: u64,
    pub(crate) free_space: Option<u64>,
    pub(crate) last_space_check: Option<Instant>,
    pub(crate) cleanup_attempted: bool,
    pub(crate) capacity_warning_emitted: bool,
}

impl OpenFile {
    /// Open `path` for appending, or truncate it first when `truncate` is set.
    pub(crate) fn open(path: &Path, truncate: bool) -> io::Result<Self> {
        let mut options = OpenOptions::new();
        options.create(true);
        if truncate {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        let file = options.open(path)?;
        let flushed = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: Box::new(file),
            buffer: Vec::with_capacity(FLUSH_CHUNK),
            flushed,
            free_space: None,
            last_space_check: None,
            cleanup_attempted: false,
            capacity_warning_emitted: false,
        })
    }

    /// Swap the underlying writer, keeping the size accounting.
    #[cfg(test)]
    pub(crate) fn replace_writer(&mut self, writer: Box<dyn Write + Send>) {
        self.file = writer;
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes on disk plus bytes still buffered.
    pub(crate) fn size(&self) -> u64 {
        self.flushed + self.buffered()
    }

    pub(crate) fn buffered(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub(crate) fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() >= FLUSH_CHUNK {
            self.drain_buffer()?;
        }
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> io::Result<()> {
        self.drain_buffer()?;
        self.file.flush()
    }

    fn drain_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let result = self.file.write_all(&self.buffer);
        // Counted even when the write fails; callers close the file on error.
        self.flushed += self.buffer.len() as u64;
        self.buffer.clear();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn tracks_buffered_and_flushed_bytes_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        let mut file = OpenFile::open(&path, false).unwrap();

        file.write(b"hello\n").unwrap();
        assert_eq!(file.size(), 6);
        assert_eq!(file.buffered(), 6);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

        file.flush().unwrap();
        assert_eq!(file.size(), 6);
        assert_eq!(file.buffered(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }

    #[test]
    fn drains_in_chunks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        let mut file = OpenFile::open(&path, false).unwrap();

        file.write(&vec![b'x'; FLUSH_CHUNK + 1]).unwrap();
        assert_eq!(file.buffered(), 0);
        assert_eq!(file.size(), (FLUSH_CHUNK + 1) as u64);
    }

    #[test]
    fn append_counts_existing_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "0123456789").unwrap();

        assert_eq!(OpenFile::open(&path, false).unwrap().size(), 10);
        assert_eq!(OpenFile::open(&path, true).unwrap().size(), 0);
    }
}
