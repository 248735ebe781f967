//! Installation progress events and the reporter that pushes them to the
//! presentation layer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::warn;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::InstallerError;

/// One entry of the event stream produced by an install or start run.
///
/// Every orchestration run ends with exactly one terminal event
/// ([`InstallEvent::Success`] or [`InstallEvent::Error`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallEvent {
    /// Human readable step description
    Progress(String),
    /// Transfer sample. `percent` and `total` are `None` when the server did
    /// not announce a content length.
    DownloadProgress {
        percent: Option<u8>,
        downloaded: u64,
        total: Option<u64>,
    },
    Success(String),
    Error(String),
}

impl InstallEvent {
    pub fn progress(message: impl Into<String>) -> Self {
        Self::Progress(message.into())
    }

    /// Build a transfer sample; percent is `floor(downloaded * 100 / total)`
    pub fn download(downloaded: u64, total: Option<u64>) -> Self {
        let total = total.filter(|t| *t > 0);
        let percent = total.map(|t| {
            let pct = (downloaded as u128 * 100) / t as u128;
            pct.min(100) as u8
        });
        Self::DownloadProgress {
            percent,
            downloaded,
            total,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success(_) | Self::Error(_))
    }
}

/// Sender side of the event stream.
///
/// Step events are critical: if the consumer went away the run is aborted.
/// Download samples are best effort and silently stop once the channel closes.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::Sender<InstallEvent>,
    samples_disabled: Arc<AtomicBool>,
}

impl ProgressReporter {
    pub fn new(tx: mpsc::Sender<InstallEvent>) -> Self {
        Self {
            tx,
            samples_disabled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Emit a `Progress` event
    pub async fn step(&self, message: impl Into<String>) -> Result<(), InstallerError> {
        self.tx
            .send(InstallEvent::Progress(message.into()))
            .await
            .map_err(|_| InstallerError::Cancelled)
    }

    /// Emit a transfer sample without waiting for channel capacity
    pub fn sample(&self, event: InstallEvent) {
        if self.samples_disabled.load(Ordering::Relaxed) {
            return;
        }
        if let Err(TrySendError::Closed(_)) = self.tx.try_send(event) {
            warn!("Progress channel closed, continuing download without updates");
            self.samples_disabled.store(true, Ordering::Relaxed);
        }
    }

    /// Emit the terminal event of a run
    pub async fn finish(&self, event: InstallEvent) {
        debug_assert!(event.is_terminal());
        if self.tx.send(event).await.is_err() {
            warn!("Progress channel closed before the terminal event was delivered");
        }
    }

    /// Forward a line without failing when the consumer is gone
    pub(crate) async fn forward(&self, message: String) -> bool {
        self.tx.send(InstallEvent::Progress(message)).await.is_ok()
    }
}
