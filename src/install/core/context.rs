//! Filesystem layout of an installation

use std::path::{Path, PathBuf};

use crate::config::InstallerConfig;

/// File name of the installed server executable
pub const SERVER_BINARY_NAME: &str = "frida-server";

/// Single-line metadata record stored next to the executable
pub const SERVER_INFO_FILE: &str = "server-info.txt";

/// Paths used by the pipeline.
///
/// `internal_dir` holds exactly one executable and its metadata record.
/// `download_dir` is a user visible cache of retained compressed artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    internal_dir: PathBuf,
    download_dir: PathBuf,
}

impl InstallLayout {
    pub fn new(internal_dir: impl Into<PathBuf>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            internal_dir: internal_dir.into(),
            download_dir: download_dir.into(),
        }
    }

    pub fn from_config(config: &InstallerConfig) -> Self {
        Self::new(config.internal_dir(), config.download_dir())
    }

    pub fn internal_dir(&self) -> &Path {
        &self.internal_dir
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// `<internal>/frida-server`
    pub fn server_path(&self) -> PathBuf {
        self.internal_dir.join(SERVER_BINARY_NAME)
    }

    /// `<internal>/server-info.txt`
    pub fn info_path(&self) -> PathBuf {
        self.internal_dir.join(SERVER_INFO_FILE)
    }

    /// Create the internal directory if needed
    pub async fn ensure_internal_dir(&self) -> std::io::Result<&Path> {
        tokio::fs::create_dir_all(&self.internal_dir).await?;
        Ok(&self.internal_dir)
    }
}
