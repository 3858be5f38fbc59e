//! Atomic file writes for config and environment markers.
//!
//! Writes go to a temp file with a PID suffix, are synced to disk, then
//! renamed over the target. A reader never observes a half-written file.

use crate::{NidamError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process;
use tracing::debug;

/// Read and parse a JSON file.
///
/// Returns `None` if the file doesn't exist, or an error if parsing fails.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(NidamError::io_with_path(e, path)),
    };

    let data: T = serde_json::from_str(&contents).map_err(|e| NidamError::Json {
        message: format!("Failed to parse {}: {}", path.display(), e),
        source: Some(e),
    })?;

    Ok(Some(data))
}

/// Serialize `data` as pretty JSON and write it atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(data).map_err(|e| NidamError::Json {
        message: format!("Failed to serialize data: {}", e),
        source: Some(e),
    })?;
    atomic_write(path, serialized.as_bytes())
}

/// Write raw bytes to `path` atomically, creating parent directories.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| NidamError::io_with_path(e, parent))?;
        }
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, process::id()));

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| NidamError::io_with_path(e, &temp_path))?;

        file.write_all(contents)
            .map_err(|e| NidamError::io_with_path(e, &temp_path))?;
        file.sync_all()
            .map_err(|e| NidamError::io_with_path(e, &temp_path))?;
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        NidamError::io_with_path(e, path)
    })?;

    debug!("Atomically wrote {}", path.display());
    Ok(())
}
