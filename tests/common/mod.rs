#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;

use frida_installer::InstallEvent;
use frida_installer::InstallerConfig;
use frida_installer::InstallerError;
use frida_installer::install::core::AsyncTask;
use frida_installer::install::{PrivilegedShell, ShellCommand, ShellOutput};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What the fake shell does with `chmod`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChmodBehaviour {
    /// Apply the mode and exit 0
    Apply,
    /// Leave the file alone and exit 1
    Fail,
    /// Leave the file alone but exit 0
    Ignore,
}

/// Stand-in for the superuser shell. Records every rendered command, applies
/// chmod for real and launches `sh -c <launch_script>` for the server.
pub struct FakeShell {
    pub rooted: bool,
    pub launch_script: String,
    pub chmod: ChmodBehaviour,
    commands: Mutex<Vec<String>>,
    launched: Mutex<bool>,
}

impl FakeShell {
    pub fn rooted() -> Self {
        Self::new(true)
    }

    pub fn unprivileged() -> Self {
        Self::new(false)
    }

    pub fn with_chmod(chmod: ChmodBehaviour) -> Self {
        Self {
            chmod,
            ..Self::new(true)
        }
    }

    fn new(rooted: bool) -> Self {
        Self {
            rooted,
            launch_script: "echo 'Frida server listening'; echo 'warning: test' >&2; exec sleep 30"
                .to_string(),
            chmod: ChmodBehaviour::Apply,
            commands: Mutex::new(Vec::new()),
            launched: Mutex::new(false),
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

fn reply(code: i32, stdout: &str) -> ShellOutput {
    ShellOutput {
        exit_code: Some(code),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

impl PrivilegedShell for FakeShell {
    fn execute(
        &self,
        command: ShellCommand,
        _cancel: CancellationToken,
    ) -> AsyncTask<Result<ShellOutput, InstallerError>> {
        self.commands.lock().unwrap().push(command.render());

        let out = match &command {
            ShellCommand::Identity if self.rooted => reply(0, "uid=0(root) gid=0(root)\n"),
            ShellCommand::Identity => reply(1, "uid=2000(shell) gid=2000(shell)\n"),
            ShellCommand::Chmod { .. } if self.chmod == ChmodBehaviour::Fail => reply(1, ""),
            ShellCommand::Chmod { .. } if self.chmod == ChmodBehaviour::Ignore => reply(0, ""),
            ShellCommand::Chmod { mode, path } => {
                match std::fs::set_permissions(path, std::fs::Permissions::from_mode(*mode)) {
                    Ok(()) => reply(0, ""),
                    Err(_) => reply(1, ""),
                }
            }
            ShellCommand::Pkill { .. } => {
                *self.launched.lock().unwrap() = false;
                reply(1, "")
            }
            ShellCommand::Pgrep { .. } if *self.launched.lock().unwrap() => reply(0, "4242\n"),
            _ => reply(1, ""),
        };
        AsyncTask::ready(Ok(out))
    }

    fn launch(&self, command: ShellCommand) -> AsyncTask<Result<Child, InstallerError>> {
        self.commands.lock().unwrap().push(command.render());
        *self.launched.lock().unwrap() = true;

        let spawned = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.launch_script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| InstallerError::Process(e.to_string()));
        AsyncTask::ready(spawned)
    }
}

/// Config rooted in `root` with fast supervisor delays
pub fn test_config(root: &Path) -> InstallerConfig {
    InstallerConfig {
        internal_dir: Some(root.join("frida")),
        download_dir: Some(root.join("downloads")),
        device_abi: Some("arm64-v8a".to_string()),
        latest_release_url: Some("http://127.0.0.1:9/latest".to_string()),
        releases_url: Some("http://127.0.0.1:9/releases".to_string()),
        start_settle_secs: Some(0),
        stop_grace_ms: Some(200),
        stop_settle_ms: Some(0),
        ..InstallerConfig::default()
    }
}

/// Collect events until every sender is gone
pub async fn collect(mut rx: mpsc::Receiver<InstallEvent>) -> Vec<InstallEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

pub fn terminal_events(events: &[InstallEvent]) -> Vec<&InstallEvent> {
    events.iter().filter(|e| e.is_terminal()).collect()
}

/// Deterministic bytes that do not compress
pub fn noise(len: usize) -> Vec<u8> {
    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}

pub fn xz(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    lzma_rs::xz_compress(&mut &data[..], &mut out).unwrap();
    out
}

/// 2 MiB file starting with the ELF magic
pub fn elf_payload() -> Vec<u8> {
    let mut data = noise(2 * 1024 * 1024);
    data[..4].copy_from_slice(b"\x7fELF");
    data
}
