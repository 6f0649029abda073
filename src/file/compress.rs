//! Gzip compression of closed log files.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use thiserror::Error;

use super::naming::compressed_sibling;

/// Failures while compressing a closed log file. The original is always preserved.
#[derive(Debug, Error)]
pub enum CompressionError {
    /// Reading the source or writing the archive failed.
    #[error("failed to compress {}: {source}", .path.display())]
    Io {
        /// File being compressed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The archive ended up empty.
    #[error("compressing {} produced an empty archive", .path.display())]
    EmptyOutput {
        /// File being compressed.
        path: PathBuf,
    },
}

/// What compression did with a closed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompressionOutcome {
    /// Nothing to do: the file was empty, missing, or already had a compressed copy.
    Skipped,
    /// The archive was kept and the original deleted.
    KeptCompressed(PathBuf),
    /// The archive was larger than the original and was deleted.
    KeptOriginal(PathBuf),
}

/// Gzip `path` into `<path>.gz`, then delete whichever of the two is larger.
///
/// Ties keep the compressed copy.
pub fn compress_and_prune(path: &Path) -> Result<CompressionOutcome, CompressionError> {
    compress_with(path, write_archive)
}

fn compress_with(
    path: &Path,
    write: impl FnOnce(&Path, &Path) -> io::Result<()>,
) -> Result<CompressionOutcome, CompressionError> {
    let archive = compressed_sibling(path);
    let original_size = match fs::metadata(path) {
        Ok(meta) if meta.len() > 0 && !archive.exists() => meta.len(),
        _ => return Ok(CompressionOutcome::Skipped),
    };

    let io_error = |source: io::Error| CompressionError::Io {
        path: path.to_path_buf(),
        source,
    };
    write(path, &archive).map_err(io_error)?;
    let archive_size = fs::metadata(&archive).map_err(io_error)?.len();
    if archive_size == 0 {
        return Err(CompressionError::EmptyOutput {
            path: path.to_path_buf(),
        });
    }

    if archive_size <= original_size {
        fs::remove_file(path).map_err(io_error)?;
        tracing::debug!(file = %archive.display(), original_size, archive_size, "Compressed log file");
        Ok(CompressionOutcome::KeptCompressed(archive))
    } else {
        fs::remove_file(&archive).map_err(io_error)?;
        tracing::debug!(file = %path.display(), original_size, archive_size, "Compression did not shrink log file");
        Ok(CompressionOutcome::KeptOriginal(path.to_path_buf()))
    }
}

fn write_archive(source: &Path, archive: &Path) -> io::Result<()> {
    let mut reader = BufReader::new(File::open(source)?);
    let writer = BufWriter::new(File::create(archive)?);
    let mut encoder = GzEncoder::new(writer, Compression::default());
    io::copy(&mut reader, &mut encoder)?;
    let mut writer = encoder.finish()?;
    io::Write::flush(&mut writer)?;
    Ok(())
}
