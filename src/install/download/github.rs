//! GitHub release feed interaction and artifact location

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;

use crate::error::InstallerError;
use crate::install::core::AsyncTask;

/// One published version of the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseDescriptor {
    pub tag_name: String,
    /// Display name; the tag when the feed has none
    pub name: String,
    pub published_at: Option<DateTime<Utc>>,
    pub prerelease: bool,
    pub assets: Vec<ReleaseAsset>,
}

/// Downloadable asset of a release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

impl ReleaseDescriptor {
    /// Tag, flagged when the release is a prerelease
    pub fn display_name(&self) -> String {
        if self.prerelease {
            format!("{} (Pre-release)", self.tag_name)
        } else {
            self.tag_name.clone()
        }
    }

    /// Whether the release ships at least one Android server build
    pub fn has_android_assets(&self) -> bool {
        self.assets
            .iter()
            .any(|a| a.name.contains("android") && a.name.contains("frida-server"))
    }
}

/// Release metadata as served by the API. Only these fields are read; a
/// release without a tag and assets without a name or URL are dropped.
#[derive(Deserialize, Debug)]
struct WireRelease {
    tag_name: Option<String>,
    name: Option<String>,
    published_at: Option<String>,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    assets: Vec<WireAsset>,
}

#[derive(Deserialize, Debug)]
struct WireAsset {
    name: Option<String>,
    browser_download_url: Option<String>,
}

impl WireRelease {
    fn into_descriptor(self) -> Option<ReleaseDescriptor> {
        let tag_name = self.tag_name?;
        let assets = self
            .assets
            .into_iter()
            .filter_map(|a| {
                Some(ReleaseAsset {
                    name: a.name?,
                    browser_download_url: a.browser_download_url?,
                })
            })
            .collect();
        let published_at = self
            .published_at
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Some(ReleaseDescriptor {
            name: self
                .name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| tag_name.clone()),
            tag_name,
            published_at,
            prerelease: self.prerelease,
            assets,
        })
    }
}

/// Parse a single release object
pub fn parse_release(body: &str) -> Result<ReleaseDescriptor, InstallerError> {
    let wire: WireRelease = serde_json::from_str(body)
        .map_err(|e| InstallerError::Feed(format!("Invalid release object: {e}")))?;
    wire.into_descriptor()
        .ok_or_else(|| InstallerError::Feed("Release has no tag_name".to_string()))
}

/// Parse a release array, keeping only releases with Android server assets
pub fn parse_release_list(body: &str) -> Result<Vec<ReleaseDescriptor>, InstallerError> {
    let wire: Vec<serde_json::Value> = serde_json::from_str(body)
        .map_err(|e| InstallerError::Feed(format!("Invalid release list: {e}")))?;
    Ok(wire
        .into_iter()
        .filter_map(|value| serde_json::from_value::<WireRelease>(value).ok())
        .filter_map(WireRelease::into_descriptor)
        .filter(ReleaseDescriptor::has_android_assets)
        .collect())
}

/// Expected asset file name for a version and feed architecture
pub fn expected_asset_name(version: &str, arch: &str) -> String {
    format!("frida-server-{version}-android-{arch}.xz")
}

/// Exact, case-sensitive asset lookup.
///
/// Returns the download URL when exactly one asset carries the expected name.
pub fn find_asset(release: &ReleaseDescriptor, arch: &str) -> Option<String> {
    let expected = expected_asset_name(&release.tag_name, arch);
    let mut matches = release.assets.iter().filter(|a| a.name == expected);

    match (matches.next(), matches.next()) {
        (Some(asset), None) => Some(asset.browser_download_url.clone()),
        (Some(_), Some(_)) => {
            debug!("Ambiguous asset name {expected} in release {}", release.tag_name);
            None
        }
        _ => None,
    }
}

/// Source of release descriptors.
pub trait ReleaseFeed: Send + Sync {
    /// Newest release
    fn latest(&self) -> AsyncTask<Result<ReleaseDescriptor, InstallerError>>;

    /// Recent releases that ship Android server builds
    fn list(&self) -> AsyncTask<Result<Vec<ReleaseDescriptor>, InstallerError>>;
}

/// Release feed backed by the GitHub REST API
#[derive(Debug, Clone)]
pub struct GitHubReleaseFeed {
    client: reqwest::Client,
    latest_url: String,
    releases_url: String,
    per_page: u32,
}

impl GitHubReleaseFeed {
    /// `connect_timeout` bounds connection setup only; a slow API response
    /// is not cut off
    pub fn new(
        latest_url: impl Into<String>,
        releases_url: impl Into<String>,
        per_page: u32,
        connect_timeout: Duration,
    ) -> Result<Self, InstallerError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("frida-installer/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            client,
            latest_url: latest_url.into(),
            releases_url: releases_url.into(),
            per_page,
        })
    }
}

async fn fetch_text(client: reqwest::Client, url: String) -> Result<String, InstallerError> {
    let response = client.get(&url).send().await?;

    if !response.status().is_success() {
        return Err(InstallerError::Http {
            status: response.status().as_u16(),
            url,
        });
    }

    Ok(response.text().await?)
}

impl ReleaseFeed for GitHubReleaseFeed {
    fn latest(&self) -> AsyncTask<Result<ReleaseDescriptor, InstallerError>> {
        let client = self.client.clone();
        let url = self.latest_url.clone();
        AsyncTask::from_future(async move {
            let body = fetch_text(client, url).await?;
            parse_release(&body)
        })
    }

    fn list(&self) -> AsyncTask<Result<Vec<ReleaseDescriptor>, InstallerError>> {
        let client = self.client.clone();
        let url = format!("{}?per_page={}", self.releases_url, self.per_page);
        AsyncTask::from_future(async move {
            let body = fetch_text(client, url).await?;
            parse_release_list(&body)
        })
    }
}
