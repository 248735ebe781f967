//! Artifact transfer with progress tracking

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use log::{debug, warn};
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::InstallerError;
use crate::install::core::{InstallEvent, ProgressReporter};

/// Streams remote artifacts into the retained download directory
#[derive(Debug, Clone)]
pub struct ArtifactDownloader {
    client: reqwest::Client,
    inactivity_timeout: Duration,
}

impl ArtifactDownloader {
    pub fn new(
        connect_timeout: Duration,
        inactivity_timeout: Duration,
    ) -> Result<Self, InstallerError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("frida-installer/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            inactivity_timeout,
        })
    }

    /// Download `url` to `<dest_dir>/<last path segment>`, overwriting any
    /// previous file of that name. The file is kept after the install.
    ///
    /// A non-success status fails before anything is written.
    pub async fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, InstallerError> {
        let file_name = file_name_from_url(url)?;

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(InstallerError::Cancelled),
            res = self.client.get(url).send() => res?,
        };

        if !response.status().is_success() {
            return Err(InstallerError::Http {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let total_bytes = response.content_length();
        debug!("Downloading {url} ({total_bytes:?} bytes)");

        tokio::fs::create_dir_all(dest_dir).await?;
        let output_path = dest_dir.join(&file_name);
        let mut file = tokio::fs::File::create(&output_path).await?;
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(InstallerError::Cancelled),
                next = timeout(self.inactivity_timeout, stream.next()) => next,
            };

            let chunk = match next {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(None) => break,
                Err(_) => {
                    return Err(InstallerError::timeout(
                        format!(
                            "download of {file_name} (no data received, {downloaded} bytes so far)"
                        ),
                        self.inactivity_timeout,
                    ));
                }
            };

            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            progress.sample(InstallEvent::download(downloaded, total_bytes));
        }

        file.flush().await?;
        file.sync_all().await?;

        if let Some(total) = total_bytes
            && total != downloaded
        {
            warn!("Expected {total} bytes for {file_name}, received {downloaded}");
        }

        Ok(output_path)
    }
}

/// Final path segment of a URL, used as the local file name
pub fn file_name_from_url(url: &str) -> Result<String, InstallerError> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| InstallerError::Feed(format!("Invalid download URL {url}: {e}")))?;

    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| InstallerError::Feed(format!("Download URL has no file name: {url}")))
}
