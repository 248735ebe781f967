//! Installed server metadata record (`server-info.txt`)
//!
//! One line, `"<version-or-description> (<arch>)"`, written after a
//! successful install and read on demand. The "server type" shown to users
//! is derived from the current file contents every time instead of being
//! cached.

use std::fmt;

use log::warn;

use super::core::{InstallLayout, write_file_atomic};
use crate::error::InstallerError;

/// Version label prefix used for hand-picked files
pub const MANUAL_INSTALL_PREFIX: &str = "Manual Installation";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledServerMetadata {
    /// Release tag or manual-install description
    pub version: String,
    pub arch: String,
}

impl InstalledServerMetadata {
    pub fn new(version: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            arch: arch.into(),
        }
    }

    /// Record for a file imported by hand
    pub fn manual(file_name: &str, arch: Option<&str>) -> Self {
        Self::new(
            format!("{MANUAL_INSTALL_PREFIX} ({file_name})"),
            arch.unwrap_or("Unknown"),
        )
    }

    /// Parse a record line; `None` when it does not end in `" (<arch>)"`
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (version, rest) = line.rsplit_once(" (")?;
        let arch = rest.strip_suffix(')')?;
        if version.is_empty() || arch.is_empty() {
            return None;
        }
        Some(Self::new(version, arch))
    }
}

impl fmt::Display for InstalledServerMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.version, self.arch)
    }
}

/// Persist the record next to the binary
pub fn write_metadata(
    layout: &InstallLayout,
    metadata: &InstalledServerMetadata,
) -> Result<(), InstallerError> {
    write_file_atomic(&layout.info_path(), &metadata.to_string())
}

/// The raw record line, only when both the binary and the record exist.
///
/// An unreadable record yields `"Unknown version"`.
pub fn installed_server_info(layout: &InstallLayout) -> Option<String> {
    let info_path = layout.info_path();
    if !layout.server_path().exists() || !info_path.exists() {
        return None;
    }

    match std::fs::read_to_string(&info_path) {
        Ok(content) => Some(content.lines().next().unwrap_or_default().to_string()),
        Err(e) => {
            warn!("Failed to read {}: {}", info_path.display(), e);
            Some("Unknown version".to_string())
        }
    }
}

/// Parsed form of [`installed_server_info`]
pub fn read_metadata(layout: &InstallLayout) -> Option<InstalledServerMetadata> {
    installed_server_info(layout).and_then(|line| InstalledServerMetadata::parse(&line))
}

/// Human readable server type derived from the record line
pub fn server_type(info: Option<&str>) -> String {
    match info {
        None => "Unknown".to_string(),
        Some(line) if line.starts_with(MANUAL_INSTALL_PREFIX) => line.to_string(),
        Some(line) => format!("Downloaded: {line}"),
    }
}

/// Delete the record; a missing file is not an error
pub fn remove_metadata(layout: &InstallLayout) -> Result<(), InstallerError> {
    match std::fs::remove_file(layout.info_path()) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(InstallerError::Persistence(format!(
            "Failed to remove {}: {}",
            layout.info_path().display(),
            e
        ))),
    }
}
