//! Lifecycle supervision of the installed server process
//!
//! The supervisor owns at most one managed process: the superuser shell that
//! runs the server in the foreground. Its stdout and stderr are forwarded
//! line by line as progress events for as long as the process lives.
//! `stop()` additionally sweeps for same-named processes this handle never
//! launched (for example from an earlier session).

mod output;

pub use output::OutputStream;

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::process::Child;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::InstallerConfig;
use crate::error::InstallerError;
use crate::install::core::{InstallEvent, InstallLayout, ProgressReporter, SERVER_BINARY_NAME};
use crate::install::metadata::{installed_server_info, server_type};
use crate::install::privilege::{PrivilegedShell, ShellCommand};

/// Upper bound for a forwarder to notice cancellation
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Launch parameters and the delays around start/stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub working_dir: String,
    pub listen_address: String,
    /// Wait after launch before the status query
    pub start_settle: Duration,
    /// Grace period between SIGTERM and the forced kill
    pub stop_grace: Duration,
    /// Wait after the process sweep
    pub stop_settle: Duration,
}

impl SupervisorSettings {
    pub fn from_config(config: &InstallerConfig) -> Self {
        Self {
            working_dir: config.working_dir().to_string(),
            listen_address: config.listen_address().to_string(),
            start_settle: config.start_settle(),
            stop_grace: config.stop_grace(),
            stop_settle: config.stop_settle(),
        }
    }
}

/// The process launched by this supervisor plus its output forwarders
struct ManagedServer {
    child: Child,
    readers: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl ManagedServer {
    /// SIGTERM, grace period, forced kill; then stop the forwarders
    async fn shutdown(mut self, grace: Duration) {
        match self.child.try_wait() {
            Ok(Some(status)) => debug!("Managed server already exited: {status}"),
            _ => {
                terminate(&self.child);
                match timeout(grace, self.child.wait()).await {
                    Ok(Ok(status)) => info!("Managed server exited: {status}"),
                    Ok(Err(e)) => warn!("Failed to wait for managed server: {e}"),
                    Err(_) => {
                        warn!(
                            "Managed server still alive after {}ms, killing",
                            grace.as_millis()
                        );
                        if let Err(e) = self.child.start_kill() {
                            warn!("Failed to kill managed server: {e}");
                        } else if timeout(grace, self.child.wait()).await.is_err() {
                            warn!("Managed server did not exit after kill");
                        }
                    }
                }
            }
        }

        drop(self.child.stdin.take());
        self.cancel.cancel();
        for mut reader in self.readers {
            if timeout(READER_JOIN_TIMEOUT, &mut reader).await.is_err() {
                warn!("Output forwarder did not stop, aborting it");
                reader.abort();
            }
        }
    }
}

fn terminate(child: &Child) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => info!("Sent SIGTERM to managed server (PID: {pid})"),
            Err(e) => warn!("Failed SIGTERM to managed server (PID: {pid}): {e}"),
        }
    }
}

struct SupervisorInner {
    shell: Arc<dyn PrivilegedShell>,
    layout: InstallLayout,
    settings: SupervisorSettings,
    cancel: CancellationToken,
    managed: Mutex<Option<ManagedServer>>,
}

/// Starts, stops and queries the server. Cheap to clone; clones share the
/// managed process handle.
#[derive(Clone)]
pub struct ServerSupervisor {
    inner: Arc<SupervisorInner>,
}

impl ServerSupervisor {
    pub fn new(
        shell: Arc<dyn PrivilegedShell>,
        layout: InstallLayout,
        settings: SupervisorSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                shell,
                layout,
                settings,
                cancel,
                managed: Mutex::new(None),
            }),
        }
    }

    /// Launch the installed server on a background task.
    ///
    /// Events: step progress, then one terminal event after the settle
    /// delay, then forwarded output lines until the process ends or is
    /// stopped.
    pub fn start(&self, tx: mpsc::Sender<InstallEvent>) -> JoinHandle<()> {
        let this = self.clone();
        let reporter = ProgressReporter::new(tx);

        tokio::spawn(async move {
            let worker_reporter = reporter.clone();
            let worker = tokio::spawn(async move {
                let outcome = this.run_start(&worker_reporter).await;
                match outcome {
                    Ok(event) => worker_reporter.finish(event).await,
                    Err(e) => {
                        error!("Failed to start server [{}]: {e}", e.category());
                        worker_reporter
                            .finish(InstallEvent::Error(format!("Failed to start server: {e}")))
                            .await;
                    }
                }
            });

            if let Err(e) = worker.await {
                error!("Start task failed: {e}");
                reporter
                    .finish(InstallEvent::Error("Failed to start server: internal error".into()))
                    .await;
            }
        })
    }

    async fn run_start(&self, reporter: &ProgressReporter) -> Result<InstallEvent, InstallerError> {
        let inner = &self.inner;
        let binary = inner.layout.server_path();
        if !binary.exists() {
            return Ok(InstallEvent::Error(
                "Frida server not found. Please install it first.".to_string(),
            ));
        }

        reporter.step("🛑 Stopping any existing Frida server...").await?;
        self.stop().await;

        let kind = server_type(installed_server_info(&inner.layout).as_deref());
        reporter.step(format!("🚀 Starting Frida server: {kind}")).await?;
        reporter
            .step(format!(
                "📡 Server will listen on {}",
                inner.settings.listen_address
            ))
            .await?;
        reporter.step("📝 Real-time output will be shown below:").await?;

        let mut child = inner
            .shell
            .launch(ShellCommand::Launch {
                working_dir: inner.settings.working_dir.clone(),
                binary,
                listen: inner.settings.listen_address.clone(),
            })
            .await?;
        info!("Server shell spawned (PID: {:?})", child.id());

        let cancel = inner.cancel.child_token();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(output::spawn_line_forwarder(
                stdout,
                OutputStream::Stdout,
                reporter.clone(),
                cancel.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(output::spawn_line_forwarder(
                stderr,
                OutputStream::Stderr,
                reporter.clone(),
                cancel.clone(),
            ));
        }

        *inner.managed.lock().await = Some(ManagedServer {
            child,
            readers,
            cancel,
        });

        tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => return Err(InstallerError::Cancelled),
            _ = tokio::time::sleep(inner.settings.start_settle) => {}
        }

        if self.status().await {
            Ok(InstallEvent::Success(
                "✅ Frida server started successfully! Output will continue to be displayed in real-time."
                    .to_string(),
            ))
        } else {
            Ok(InstallEvent::Error(
                "❌ Failed to start Frida server. Check output above for errors.".to_string(),
            ))
        }
    }

    /// Best-effort stop of the managed process and of any other process with
    /// the server's name. Never fails; the managed handle is always cleared.
    pub async fn stop(&self) {
        let inner = &self.inner;
        let managed = inner.managed.lock().await.take();
        if let Some(managed) = managed {
            managed.shutdown(inner.settings.stop_grace).await;
        }

        let sweep = ShellCommand::Pkill {
            name: SERVER_BINARY_NAME.to_string(),
        };
        match inner.shell.execute(sweep, inner.cancel.child_token()).await {
            Ok(output) => debug!("pkill exit code: {:?}", output.exit_code),
            Err(e) => warn!("Failed to sweep {SERVER_BINARY_NAME} processes: {e}"),
        }

        tokio::time::sleep(inner.settings.stop_settle).await;
    }

    /// True iff `pgrep` exits 0 and reports a process id
    pub async fn status(&self) -> bool {
        let query = ShellCommand::Pgrep {
            name: SERVER_BINARY_NAME.to_string(),
        };
        match self
            .inner
            .shell
            .execute(query, self.inner.cancel.child_token())
            .await
        {
            Ok(output) => {
                debug!("Server check PID: {:?}", output.first_line());
                debug!("Server check exit code: {:?}", output.exit_code);
                output.success() && output.first_line().is_some_and(|pid| !pid.trim().is_empty())
            }
            Err(e) => {
                error!("Failed to check server status: {e}");
                false
            }
        }
    }

    /// Whether this supervisor currently holds a launched process
    pub async fn is_managing(&self) -> bool {
        self.inner.managed.lock().await.is_some()
    }
}
