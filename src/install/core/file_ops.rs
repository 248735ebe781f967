//! Atomic file writes for the metadata record.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::InstallerError;

/// Write file atomically so a reader never observes a half-written record
pub(crate) fn write_file_atomic(path: &Path, content: &str) -> Result<(), InstallerError> {
    let temp_path = path.with_extension("tmp");

    {
        let mut file = fs::File::create(&temp_path).map_err(|e| {
            InstallerError::Persistence(format!("Failed to create temp file: {}", e))
        })?;

        file.write_all(content.as_bytes()).map_err(|e| {
            InstallerError::Persistence(format!("Failed to write temp file: {}", e))
        })?;

        file.sync_all().map_err(|e| {
            InstallerError::Persistence(format!("Failed to sync temp file: {}", e))
        })?;
    }

    fs::rename(&temp_path, path).map_err(|e| {
        InstallerError::Persistence(format!("Failed to rename temp file: {}", e))
    })?;

    Ok(())
}
