//! Error types for the install pipeline and the server supervisor.

use std::time::Duration;

/// Result type alias for installer operations.
pub type Result<T> = std::result::Result<T, InstallerError>;

/// Errors produced while installing or supervising the server.
#[derive(Debug, thiserror::Error)]
pub enum InstallerError {
    // =========================================================================
    // Environment
    // =========================================================================
    /// The superuser shell is unavailable or does not report uid 0.
    #[error("Root access is required but not available")]
    NoRoot,

    /// The host could not be described (ABI, directories, ...).
    #[error("environment error: {0}")]
    Environment(String),

    // =========================================================================
    // Resolution
    // =========================================================================
    /// The release carries no asset for this architecture.
    #[error("No matching server binary found for architecture: {arch} (release {version})")]
    NoMatchingAsset { version: String, arch: String },

    /// A requested release tag is not present in the feed.
    #[error("release not found: {0}")]
    ReleaseNotFound(String),

    // =========================================================================
    // Transfer
    // =========================================================================
    /// The remote answered with a non-success status.
    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },

    /// Transport level failure.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The release feed answered with something we cannot use.
    #[error("release feed error: {0}")]
    Feed(String),

    // =========================================================================
    // Integrity
    // =========================================================================
    /// Decompression of the artifact failed.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// A user supplied file did not pass validation.
    #[error("{0}")]
    Rejected(String),

    // =========================================================================
    // Permission / persistence / process
    // =========================================================================
    /// chmod failed or the executable bit is still missing afterwards.
    #[error("permission error: {0}")]
    Permission(String),

    /// The metadata record could not be written or removed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Spawning, signalling or querying a process failed.
    #[error("process error: {0}")]
    Process(String),

    // =========================================================================
    // Timeouts and cancellation
    // =========================================================================
    /// An operation did not finish in time.
    #[error("{operation} timed out after {}s", after.as_secs())]
    Timeout { operation: String, after: Duration },

    /// The run was cancelled (token fired or the event consumer went away).
    #[error("operation cancelled")]
    Cancelled,

    /// Plain I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl InstallerError {
    /// Taxonomy label used in logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::NoRoot | Self::Environment(_) => "environment",
            Self::NoMatchingAsset { .. } | Self::ReleaseNotFound(_) => "resolution",
            Self::Http { .. } | Self::Network(_) | Self::Feed(_) => "transfer",
            Self::Extraction(_) | Self::Rejected(_) => "integrity",
            Self::Permission(_) => "permission",
            Self::Persistence(_) => "persistence",
            Self::Process(_) => "process",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::Io(_) => "io",
            Self::Config(_) => "config",
        }
    }

    pub(crate) fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }
}
