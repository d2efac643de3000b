//! Record files.

use super::Record;
use crate::arena::BLOCK_HEADER_SIZE;
use crate::error::{RelocError, Result};
use fs2::FileExt;
use memmap2::MmapOptions;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

fn io_error(path: &Path, cause: impl Into<String>) -> RelocError {
    RelocError::RecordIo {
        path: path.to_path_buf(),
        cause: cause.into(),
    }
}

/// Write `record` to `path`, replacing any existing file.
///
/// The file is held under an exclusive lock while it is written. With `sync`
/// set, the data is flushed to disk before returning.
pub fn write_record_file(path: impl AsRef<Path>, record: &Record, sync: bool) -> Result<()> {
    let path = path.as_ref();

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| io_error(path, format!("Failed to create record file: {}", e)))?;

    file.lock_exclusive()
        .map_err(|e| io_error(path, format!("Failed to acquire exclusive lock: {}", e)))?;

    file.write_all(record.as_bytes())
        .map_err(|e| io_error(path, format!("Failed to write record: {}", e)))?;

    if sync {
        file.sync_all()
            .map_err(|e| io_error(path, format!("Failed to sync to disk: {}", e)))?;
    }

    // Lock is released when file is dropped
    tracing::debug!(path = %path.display(), bytes = record.byte_len(), sync, "Wrote record file");
    Ok(())
}

/// Read a record written by [`write_record_file`].
///
/// The file is mapped under a shared lock, validated, and copied out.
pub fn read_record_file(path: impl AsRef<Path>) -> Result<Record> {
    let path = path.as_ref();

    let file = File::open(path).map_err(|e| io_error(path, format!("Failed to open record file: {}", e)))?;

    // Use explicit fs2::FileExt call to avoid conflict with std lock_shared (1.89+)
    FileExt::lock_shared(&file)
        .map_err(|e| io_error(path, format!("Failed to acquire shared lock: {}", e)))?;

    let len = file
        .metadata()
        .map_err(|e| io_error(path, e.to_string()))?
        .len();
    if len < BLOCK_HEADER_SIZE as u64 {
        return Err(RelocError::InvalidRecord {
            cause: format!("File holds {} bytes, less than a header", len),
        });
    }

    // SAFETY: the shared lock keeps cooperating writers out while the map is
    // alive, and the bytes are copied before it is dropped.
    let mmap = unsafe {
        MmapOptions::new()
            .len(len as usize)
            .map(&file)
            .map_err(|e| io_error(path, format!("Failed to map record file: {}", e)))?
    };

    let record = Record::from_bytes(mmap[..].to_vec())?;
    tracing::debug!(path = %path.display(), bytes = record.byte_len(), "Read record file");
    Ok(record)
}
