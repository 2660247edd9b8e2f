//! File I/O utilities with atomic writes
//!
//! Index files and artifacts are written to a temporary sibling first, synced,
//! then renamed over the target, so a crash never leaves a half-written file.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;

use crate::error::ExchangeError;

/// Read JSON from a file, returning a default value if file doesn't exist
pub fn read_json<T, P>(path: P) -> Result<T, ExchangeError>
where
    T: DeserializeOwned + Default,
    P: AsRef<Path>,
{
    let path = path.as_ref();

    if !path.exists() {
        return Ok(T::default());
    }

    let file = File::open(path)
        .map_err(|e| ExchangeError::Storage(format!("Failed to open {}: {}", path.display(), e)))?;

    let reader = BufReader::new(file);
    serde_json::from_reader(reader)
        .map_err(|e| ExchangeError::Storage(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Write JSON to a file atomically (write to temp, then rename)
pub fn write_json_atomic<T, P>(path: P, data: &T) -> Result<(), ExchangeError>
where
    T: Serialize,
    P: AsRef<Path>,
{
    write_atomic(path.as_ref(), |writer| {
        serde_json::to_writer_pretty(writer, data)
            .map_err(|e| ExchangeError::Storage(format!("Failed to serialize data: {}", e)))
    })
}

/// Write raw bytes to a file atomically
pub fn write_bytes_atomic<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<(), ExchangeError> {
    write_atomic(path.as_ref(), |writer| {
        writer
            .write_all(bytes)
            .map_err(|e| ExchangeError::Storage(format!("Failed to write data: {}", e)))
    })
}

fn write_atomic<F>(path: &Path, fill: F) -> Result<(), ExchangeError>
where
    F: FnOnce(&mut BufWriter<NamedTempFile>) -> Result<(), ExchangeError>,
{
    ensure_parent(path)?;

    // Same directory as the target so the rename stays on one filesystem.
    // Every writer gets its own uniquely named temp file.
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let temp = NamedTempFile::new_in(dir)
        .map_err(|e| ExchangeError::Storage(format!("Failed to create temp file: {}", e)))?;

    // On any early return the temp file is removed when dropped
    let mut writer = BufWriter::new(temp);
    fill(&mut writer)?;
    let temp = writer
        .into_inner()
        .map_err(|e| ExchangeError::Storage(format!("Failed to flush data: {}", e.error())))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| ExchangeError::Storage(format!("Failed to sync data: {}", e)))?;

    temp.persist(path)
        .map_err(|e| ExchangeError::Storage(format!("Failed to rename temp file: {}", e.error)))?;

    Ok(())
}

/// Create the parent directory of `path` if needed
pub fn ensure_parent(path: &Path) -> Result<(), ExchangeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            ExchangeError::Storage(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }
    Ok(())
}
