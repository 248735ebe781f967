//! Install pipelines
//!
//! Every entry point runs on its own background task and reports through the
//! event stream only:
//!
//! `StopExisting → CheckRoot → DetectArch → Locate/Validate → Transfer/Copy →
//! Decompress/Place → SetPermissions → PersistMetadata → Success`
//!
//! The first failing step ends the run with a single `Error` event. The
//! caller must not run two installs against the same internal directory at
//! once; no lock is taken.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::core::{InstallEvent, InstallLayout, ProgressReporter};
use super::detection::is_server_already_installed;
use super::download::{
    ArchiveFormat, ArtifactDownloader, GitHubReleaseFeed, ReleaseDescriptor, ReleaseFeed,
    arch_from_file_name, detect_device_abi, extract_server_binary, find_asset, resolve_arch,
};
use super::metadata::{
    InstalledServerMetadata, installed_server_info, remove_metadata, server_type, write_metadata,
};
use super::privilege::{PrivilegedShell, SuShell, check_root, set_executable_permissions};
use super::validation::{ValidationVerdict, format_file_size, validate_server_binary};
use crate::config::InstallerConfig;
use crate::control::{ServerSupervisor, SupervisorSettings};
use crate::error::InstallerError;

struct InstallerInner {
    layout: InstallLayout,
    shell: Arc<dyn PrivilegedShell>,
    feed: Arc<dyn ReleaseFeed>,
    downloader: ArtifactDownloader,
    supervisor: ServerSupervisor,
    device_abi: Option<String>,
    cancel: CancellationToken,
}

/// Entry points for installing and inspecting the server. Cheap to clone.
#[derive(Clone)]
pub struct Installer {
    inner: Arc<InstallerInner>,
}

/// Builder for [`Installer`]; collaborators default to the real superuser
/// shell and the GitHub release feed.
pub struct InstallerBuilder {
    config: InstallerConfig,
    shell: Option<Arc<dyn PrivilegedShell>>,
    feed: Option<Arc<dyn ReleaseFeed>>,
    cancel: Option<CancellationToken>,
}

impl InstallerBuilder {
    pub fn from_config(config: InstallerConfig) -> Self {
        Self {
            config,
            shell: None,
            feed: None,
            cancel: None,
        }
    }

    pub fn shell(mut self, shell: Arc<dyn PrivilegedShell>) -> Self {
        self.shell = Some(shell);
        self
    }

    pub fn feed(mut self, feed: Arc<dyn ReleaseFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Parent token; cancelling it aborts every run of the built installer
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> Result<Installer, InstallerError> {
        let config = self.config;
        if config.releases_per_page() == 0 {
            return Err(InstallerError::Config(
                "releases_per_page must be at least 1".to_string(),
            ));
        }
        let layout = InstallLayout::from_config(&config);
        let cancel = self.cancel.unwrap_or_default();

        let shell = match self.shell {
            Some(shell) => shell,
            None => Arc::new(SuShell::new(config.su_program(), config.shell_timeout())),
        };
        let feed = match self.feed {
            Some(feed) => feed,
            None => Arc::new(GitHubReleaseFeed::new(
                config.latest_release_url(),
                config.releases_url(),
                config.releases_per_page(),
                config.connect_timeout(),
            )?),
        };
        let downloader =
            ArtifactDownloader::new(config.connect_timeout(), config.inactivity_timeout())?;
        let supervisor = ServerSupervisor::new(
            shell.clone(),
            layout.clone(),
            SupervisorSettings::from_config(&config),
            cancel.child_token(),
        );

        Ok(Installer {
            inner: Arc::new(InstallerInner {
                layout,
                shell,
                feed,
                downloader,
                supervisor,
                device_abi: config.device_abi.clone(),
                cancel,
            }),
        })
    }
}

impl Installer {
    pub fn layout(&self) -> &InstallLayout {
        &self.inner.layout
    }

    /// Supervisor sharing this installer's shell and managed process
    pub fn supervisor(&self) -> &ServerSupervisor {
        &self.inner.supervisor
    }

    /// Abort every in-flight run
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    /// Ensure the newest release is installed. Without `force` an existing
    /// installation is reported and left alone, with no network call.
    pub fn install_latest(&self, force: bool, tx: mpsc::Sender<InstallEvent>) -> JoinHandle<()> {
        self.spawn_run(tx, "Installation failed", move |this, reporter, cancel| async move {
            this.run_latest(force, &reporter, &cancel).await
        })
    }

    /// Install a specific release, replacing whatever is installed
    pub fn install_release(
        &self,
        release: ReleaseDescriptor,
        force: bool,
        tx: mpsc::Sender<InstallEvent>,
    ) -> JoinHandle<()> {
        self.spawn_run(tx, "Installation failed", move |this, reporter, cancel| async move {
            this.run_release(&release, force, &reporter, &cancel).await
        })
    }

    /// Install a user supplied file after validating it
    pub fn install_from_file(
        &self,
        path: impl AsRef<Path>,
        tx: mpsc::Sender<InstallEvent>,
    ) -> JoinHandle<()> {
        let path = path.as_ref().to_path_buf();
        self.spawn_run(
            tx,
            "Manual installation failed",
            move |this, reporter, cancel| async move {
                this.run_manual(&path, &reporter, &cancel).await
            },
        )
    }

    /// Releases that ship Android server builds
    pub async fn fetch_releases(&self) -> Result<Vec<ReleaseDescriptor>, InstallerError> {
        let cancel = self.inner.cancel.child_token();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(InstallerError::Cancelled),
            res = self.inner.feed.list() => res,
        }
    }

    /// Look a release up by tag in the releases list
    pub async fn release_by_tag(&self, tag: &str) -> Result<ReleaseDescriptor, InstallerError> {
        self.fetch_releases()
            .await?
            .into_iter()
            .find(|r| r.tag_name == tag)
            .ok_or_else(|| InstallerError::ReleaseNotFound(tag.to_string()))
    }

    pub fn is_server_already_installed(&self) -> bool {
        is_server_already_installed(&self.inner.layout)
    }

    pub fn installed_server_info(&self) -> Option<String> {
        installed_server_info(&self.inner.layout)
    }

    /// Derived from the metadata record on every call
    pub fn current_server_type(&self) -> String {
        server_type(self.installed_server_info().as_deref())
    }

    /// Stop the server, then delete the binary and its metadata record.
    /// Removal failures are logged only.
    pub async fn remove_existing_installation(&self) {
        self.inner.supervisor.stop().await;
        self.remove_installation_files().await;
    }

    async fn remove_installation_files(&self) {
        let server = self.inner.layout.server_path();
        match tokio::fs::remove_file(&server).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {e}", server.display()),
        }
        if let Err(e) = remove_metadata(&self.inner.layout) {
            warn!("{e}");
        }
        info!("Existing Frida installation removed");
    }

    /// Run `run` on its own task and turn its outcome into exactly one
    /// terminal event. A panic inside the pipeline is reported generically.
    fn spawn_run<F, Fut>(
        &self,
        tx: mpsc::Sender<InstallEvent>,
        failure_prefix: &'static str,
        run: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Installer, ProgressReporter, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<String, InstallerError>> + Send + 'static,
    {
        let this = self.clone();
        let reporter = ProgressReporter::new(tx);
        let cancel = self.inner.cancel.child_token();

        tokio::spawn(async move {
            let worker = tokio::spawn(run(this, reporter.clone(), cancel));
            let event = match worker.await {
                Ok(Ok(message)) => InstallEvent::Success(message),
                Ok(Err(e)) => {
                    error!("{failure_prefix} [{}]: {e}", e.category());
                    InstallEvent::Error(terminal_message(&e, failure_prefix))
                }
                Err(e) => {
                    error!("{failure_prefix}: install task aborted: {e}");
                    InstallEvent::Error(format!("{failure_prefix}: internal error"))
                }
            };
            reporter.finish(event).await;
        })
    }

    // ---------------------------------------------------------------------
    // Pipelines
    // ---------------------------------------------------------------------

    async fn run_latest(
        &self,
        force: bool,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<String, InstallerError> {
        self.stop_and_check_root(reporter, cancel).await?;
        let arch = self.detect_arch(reporter).await?;

        if !force && self.is_server_already_installed() {
            let info = self.installed_server_info();
            reporter
                .step(format!(
                    "📋 Found existing server: {}",
                    info.as_deref().unwrap_or("Unknown version")
                ))
                .await?;
            return Ok(format!(
                "✅ Frida server already installed! {}",
                info.unwrap_or_default()
            )
            .trim_end()
            .to_string());
        }

        reporter
            .step("🌐 Fetching latest Frida release from GitHub...")
            .await?;
        let release = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(InstallerError::Cancelled),
            res = self.inner.feed.latest() => res,
        };
        let release = match release {
            Ok(release) => release,
            Err(e) => return failed(reporter, "Failed to fetch release information", e).await,
        };
        reporter
            .step(format!("✅ Latest Frida version found: {}", release.tag_name))
            .await?;

        self.install_artifact(&release, &arch, reporter, cancel)
            .await?;
        Ok(format!(
            "Frida server {} installed successfully!",
            release.tag_name
        ))
    }

    async fn run_release(
        &self,
        release: &ReleaseDescriptor,
        force: bool,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<String, InstallerError> {
        self.stop_and_check_root(reporter, cancel).await?;
        let arch = self.detect_arch(reporter).await?;

        // With force the extract step overwrites the binary anyway
        if !force && self.is_server_already_installed() {
            reporter
                .step(format!(
                    "📋 Found existing server: {}",
                    self.installed_server_info()
                        .as_deref()
                        .unwrap_or("Unknown version")
                ))
                .await?;
            reporter
                .step("🗑️ Removing existing installation to install selected version...")
                .await?;
            self.remove_installation_files().await;
            reporter.step("✅ Previous installation removed").await?;
        }

        reporter
            .step(format!("✅ Selected Frida version: {}", release.tag_name))
            .await?;
        self.install_artifact(release, &arch, reporter, cancel)
            .await?;
        Ok(format!(
            "Frida server {} installed successfully!",
            release.tag_name
        ))
    }

    async fn run_manual(
        &self,
        source: &Path,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<String, InstallerError> {
        self.stop_and_check_root(reporter, cancel).await?;

        let Ok(meta) = tokio::fs::metadata(source).await else {
            return failed(
                reporter,
                format!("Selected file does not exist: {}", source.display()),
                InstallerError::Rejected("Selected file does not exist".into()),
            )
            .await;
        };
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        reporter
            .step(format!(
                "📁 Processing selected file: {} ({})",
                file_name,
                format_file_size(meta.len())
            ))
            .await?;

        reporter.step("🔎 Validating selected file...").await?;
        let kind = match validate_server_binary(source) {
            ValidationVerdict::Accepted(kind) => kind,
            ValidationVerdict::Rejected(reason) => {
                return failed(
                    reporter,
                    format!("Validation failed: {reason}"),
                    InstallerError::Rejected(reason),
                )
                .await;
            }
        };
        reporter.step("✅ File validation passed").await?;

        self.inner.layout.ensure_internal_dir().await?;
        self.clear_stale_record(reporter).await?;
        let target = self.inner.layout.server_path();

        let placed = match kind.archive_format() {
            Some(format) => {
                reporter
                    .step(format!(
                        "📦 Processing compressed file (.{})...",
                        extension_label(format)
                    ))
                    .await?;
                self.place_compressed(source, &target, format, reporter)
                    .await
            }
            None => {
                reporter.step("📁 Processing raw binary file...").await?;
                place_raw(source, &target).await
            }
        };
        if let Err(e) = placed {
            return failed(reporter, "File processing failed", e).await;
        }
        reporter.step("✅ File processing completed").await?;

        let metadata = InstalledServerMetadata::manual(&file_name, arch_from_file_name(&file_name));
        self.grant_and_record(&metadata, reporter, cancel).await?;
        Ok("✅ Frida server installed successfully from manual file!".to_string())
    }

    // ---------------------------------------------------------------------
    // Steps
    // ---------------------------------------------------------------------

    async fn stop_and_check_root(
        &self,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<(), InstallerError> {
        reporter
            .step("🛑 Stopping any running Frida server...")
            .await?;
        self.inner.supervisor.stop().await;

        reporter.step("🔐 Checking root permissions...").await?;
        if !check_root(self.inner.shell.as_ref(), cancel).await {
            if cancel.is_cancelled() {
                return Err(InstallerError::Cancelled);
            }
            return failed(reporter, "Root check failed - No root access", InstallerError::NoRoot)
                .await;
        }
        reporter
            .step("✅ Root access confirmed - Device is rooted")
            .await
    }

    async fn detect_arch(&self, reporter: &ProgressReporter) -> Result<String, InstallerError> {
        reporter.step("📱 Detecting device architecture...").await?;
        let abi = match &self.inner.device_abi {
            Some(abi) => abi.clone(),
            None => tokio::task::spawn_blocking(detect_device_abi)
                .await
                .map_err(|e| InstallerError::Environment(format!("ABI detection failed: {e}")))?,
        };
        let arch = resolve_arch(&abi);
        reporter
            .step(format!("✅ Device architecture detected: {arch}"))
            .await?;
        Ok(arch)
    }

    /// Locate, download, extract, chmod and record one release artifact
    async fn install_artifact(
        &self,
        release: &ReleaseDescriptor,
        arch: &str,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<(), InstallerError> {
        let layout = &self.inner.layout;

        reporter
            .step(format!("🔍 Finding matching server binary for {arch}..."))
            .await?;
        let Some(url) = find_asset(release, arch) else {
            return failed(
                reporter,
                format!("No matching binary found for {arch}"),
                InstallerError::NoMatchingAsset {
                    version: release.tag_name.clone(),
                    arch: arch.to_string(),
                },
            )
            .await;
        };
        reporter.step("✅ Found matching binary for download").await?;

        reporter
            .step(format!(
                "📥 Starting download to {}/...",
                layout.download_dir().display()
            ))
            .await?;
        let downloaded = match self
            .inner
            .downloader
            .download(&url, layout.download_dir(), reporter, cancel)
            .await
        {
            Ok(path) => path,
            Err(e) => return failed(reporter, "Download failed", e).await,
        };
        reporter
            .step(format!(
                "✅ Download completed: {}",
                downloaded
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            ))
            .await?;

        layout.ensure_internal_dir().await?;
        self.clear_stale_record(reporter).await?;
        reporter.step("📦 Extracting server binary...").await?;
        let format = ArchiveFormat::from_path(&downloaded).unwrap_or(ArchiveFormat::Xz);
        if let Err(e) = extract_server_binary(&downloaded, &layout.server_path(), format).await {
            return failed(reporter, "Extraction failed", e).await;
        }
        reporter.step("✅ Extraction completed").await?;

        let metadata = InstalledServerMetadata::new(&release.tag_name, arch);
        self.grant_and_record(&metadata, reporter, cancel).await
    }

    /// Copy to a scratch file beside the target, decompress, drop the scratch
    async fn place_compressed(
        &self,
        source: &Path,
        target: &Path,
        format: ArchiveFormat,
        reporter: &ProgressReporter,
    ) -> Result<(), InstallerError> {
        let scratch = tempfile::Builder::new()
            .prefix("temp-server")
            .suffix(&format!(".{}", extension_label(format)))
            .tempfile_in(self.inner.layout.internal_dir())?;
        tokio::fs::copy(source, scratch.path()).await?;

        reporter.step("📦 Extracting server binary...").await?;
        extract_server_binary(scratch.path(), target, format).await?;
        Ok(())
    }

    /// Drop the record of the binary about to be replaced. A failed run
    /// must not leave the old label next to a new file.
    async fn clear_stale_record(&self, reporter: &ProgressReporter) -> Result<(), InstallerError> {
        match remove_metadata(&self.inner.layout) {
            Ok(()) => Ok(()),
            Err(e) => failed(reporter, "Failed to clear previous server info", e).await,
        }
    }

    async fn grant_and_record(
        &self,
        metadata: &InstalledServerMetadata,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<(), InstallerError> {
        let server = self.inner.layout.server_path();

        reporter
            .step("🔧 Setting executable permissions with root...")
            .await?;
        if let Err(e) = set_executable_permissions(self.inner.shell.as_ref(), &server, cancel).await
        {
            return failed(reporter, "Permission setting failed", e).await;
        }
        reporter
            .step("✅ Executable permissions set successfully")
            .await?;

        if let Err(e) = write_metadata(&self.inner.layout, metadata) {
            warn!("Failed to save server info: {e}");
        }
        Ok(())
    }
}

/// Delete any existing target first, then copy the raw binary in place.
///
/// The copy is created `0644` whatever the source mode, so only the
/// permission step can make it executable. A failed copy removes the target.
async fn place_raw(source: &Path, target: &Path) -> Result<(), InstallerError> {
    match tokio::fs::remove_file(target).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    if let Err(e) = copy_non_executable(source, target).await {
        if let Err(cleanup) = tokio::fs::remove_file(target).await
            && cleanup.kind() != std::io::ErrorKind::NotFound
        {
            warn!("Failed to remove partial copy {}: {}", target.display(), cleanup);
        }
        return Err(e.into());
    }
    Ok(())
}

async fn copy_non_executable(source: &Path, target: &Path) -> std::io::Result<u64> {
    let mut input = tokio::fs::File::open(source).await?;
    let mut output = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o644)
        .open(target)
        .await?;
    let copied = tokio::io::copy(&mut input, &mut output).await?;
    output.flush().await?;
    output.sync_all().await?;
    Ok(copied)
}

fn extension_label(format: ArchiveFormat) -> &'static str {
    match format {
        ArchiveFormat::Xz => "xz",
        ArchiveFormat::Gzip => "gz",
        ArchiveFormat::Zip => "zip",
    }
}

/// Emit the step's failure note, then fail with `err`
async fn failed<T>(
    reporter: &ProgressReporter,
    note: impl Into<String>,
    err: InstallerError,
) -> Result<T, InstallerError> {
    reporter.step(format!("❌ {}", note.into())).await?;
    Err(err)
}

/// Text of the terminal `Error` event
fn terminal_message(err: &InstallerError, prefix: &str) -> String {
    match err {
        InstallerError::NoRoot
        | InstallerError::NoMatchingAsset { .. }
        | InstallerError::Rejected(_) => err.to_string(),
        _ => format!("{prefix}: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn user_facing_errors_keep_their_own_text() {
        assert_eq!(
            terminal_message(&InstallerError::NoRoot, "Installation failed"),
            "Root access is required but not available"
        );
        assert_eq!(
            terminal_message(
                &InstallerError::Rejected("File too small (10B) - likely not a Frida server binary".into()),
                "Manual installation failed"
            ),
            "File too small (10B) - likely not a Frida server binary"
        );
        assert_eq!(
            terminal_message(
                &InstallerError::Http {
                    status: 404,
                    url: "https://x/a.xz".into()
                },
                "Installation failed"
            ),
            "Installation failed: HTTP 404 for https://x/a.xz"
        );
    }

    #[tokio::test]
    async fn raw_placement_replaces_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("frida-server-16.0.0-android-arm64");
        let target = dir.path().join("frida-server");
        std::fs::write(&source, b"\x7fELFnew").unwrap();
        std::fs::write(&target, b"\x7fELFold").unwrap();

        place_raw(&source, &target).await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"\x7fELFnew");
        assert!(source.exists());
    }

    #[tokio::test]
    async fn raw_placement_drops_source_execute_bits() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("frida-server-16.0.0-android-arm64");
        let target = dir.path().join("frida-server");
        std::fs::write(&source, b"\x7fELF").unwrap();
        std::fs::set_permissions(&source, std::fs::Permissions::from_mode(0o755)).unwrap();

        place_raw(&source, &target).await.unwrap();

        let mode = std::fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0, "mode {mode:o}");
    }

    #[tokio::test]
    async fn failed_raw_placement_leaves_no_target() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("picked");
        let target = dir.path().join("frida-server");
        std::fs::create_dir(&source).unwrap();
        std::fs::write(&target, b"\x7fELFold").unwrap();

        assert!(place_raw(&source, &target).await.is_err());
        assert!(!target.exists());
    }
}
