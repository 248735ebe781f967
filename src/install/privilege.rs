//! Superuser shell channel
//!
//! Every privileged operation is one [`ShellCommand`] submitted to a freshly
//! spawned superuser shell and terminated with an explicit `exit`. The exit
//! status and the captured output are the only information extracted. Shell
//! sessions are never pooled: one operation, one session.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use log::{debug, error};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use super::core::AsyncTask;
use super::detection::is_executable;
use crate::error::InstallerError;

/// Substring of `id` output that identifies the superuser
pub const ROOT_IDENTITY_MARKER: &str = "uid=0";

/// Typed privileged operation, rendered to shell syntax in exactly one place
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    /// `id`
    Identity,
    /// `chmod <mode> <path>`
    Chmod { mode: u32, path: PathBuf },
    /// `pkill <name>`
    Pkill { name: String },
    /// `pgrep <name>`
    Pgrep { name: String },
    /// `cd <dir> && <binary> -l <listen>`
    Launch {
        working_dir: String,
        binary: PathBuf,
        listen: String,
    },
}

impl ShellCommand {
    pub fn chmod_executable(path: impl Into<PathBuf>) -> Self {
        Self::Chmod {
            mode: 0o755,
            path: path.into(),
        }
    }

    /// Literal shell text submitted to the superuser shell
    pub fn render(&self) -> String {
        match self {
            Self::Identity => "id".to_string(),
            Self::Chmod { mode, path } => {
                format!("chmod {:o} {}", mode, quote(&path.to_string_lossy()))
            }
            Self::Pkill { name } => format!("pkill {}", quote(name)),
            Self::Pgrep { name } => format!("pgrep {}", quote(name)),
            Self::Launch {
                working_dir,
                binary,
                listen,
            } => format!(
                "cd {} && {} -l {}",
                quote(working_dir),
                quote(&binary.to_string_lossy()),
                quote(listen)
            ),
        }
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Single-quote an argument unless it is made of shell-inert characters
fn quote(arg: &str) -> String {
    let inert = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if inert {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// What one shell round trip produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// First line of standard output
    pub fn first_line(&self) -> Option<&str> {
        self.stdout.lines().next()
    }

    pub fn stderr_lines(&self) -> impl Iterator<Item = &str> {
        self.stderr.lines().filter(|l| !l.trim().is_empty())
    }
}

/// Superuser command channel.
pub trait PrivilegedShell: Send + Sync {
    /// Run one command to completion in its own shell session
    fn execute(
        &self,
        command: ShellCommand,
        cancel: CancellationToken,
    ) -> AsyncTask<Result<ShellOutput, InstallerError>>;

    /// Submit a long-running command and hand back the live shell process
    /// with stdout and stderr piped. Stdin stays open so the session is not
    /// torn down behind the caller's back.
    fn launch(&self, command: ShellCommand) -> AsyncTask<Result<Child, InstallerError>>;
}

/// Production channel: spawns `su` (or the configured program)
#[derive(Debug, Clone)]
pub struct SuShell {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl SuShell {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout,
        }
    }

    /// Extra arguments passed to the shell program
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl PrivilegedShell for SuShell {
    fn execute(
        &self,
        command: ShellCommand,
        cancel: CancellationToken,
    ) -> AsyncTask<Result<ShellOutput, InstallerError>> {
        let cmd = self.command();
        let program = self.program.clone();
        let limit = self.timeout;
        let script = command.render();

        AsyncTask::from_future(async move {
            let round_trip = run_script(cmd, &program, &script);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(InstallerError::Cancelled),
                res = tokio::time::timeout(limit, round_trip) => match res {
                    Ok(out) => out,
                    Err(_) => Err(InstallerError::timeout(format!("`{script}`"), limit)),
                },
            }
        })
    }

    fn launch(&self, command: ShellCommand) -> AsyncTask<Result<Child, InstallerError>> {
        let mut cmd = self.command();
        let program = self.program.clone();
        let limit = self.timeout;
        let script = command.render();

        AsyncTask::from_future(async move {
            let mut child = cmd
                .spawn()
                .map_err(|e| InstallerError::Process(format!("Failed to spawn {program}: {e}")))?;
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| InstallerError::Process(format!("{program} has no stdin")))?;

            let submit = async {
                stdin.write_all(format!("{script}\n").as_bytes()).await?;
                stdin.flush().await
            };
            match tokio::time::timeout(limit, submit).await {
                Ok(res) => res?,
                Err(_) => return Err(InstallerError::timeout(format!("`{script}`"), limit)),
            }

            child.stdin = Some(stdin);
            Ok(child)
        })
    }
}

async fn run_script(
    mut cmd: Command,
    program: &str,
    script: &str,
) -> Result<ShellOutput, InstallerError> {
    let mut child = cmd
        .spawn()
        .map_err(|e| InstallerError::Process(format!("Failed to spawn {program}: {e}")))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| InstallerError::Process(format!("{program} has no stdin")))?;
    stdin
        .write_all(format!("{script}\nexit\n").as_bytes())
        .await?;
    stdin.flush().await?;
    drop(stdin);

    let output = child.wait_with_output().await?;
    Ok(ShellOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Advisory root check: true iff `id` exits 0 and reports uid 0.
///
/// Any spawn, I/O, wait or timeout failure counts as "not rooted".
pub async fn check_root(shell: &dyn PrivilegedShell, cancel: &CancellationToken) -> bool {
    match shell.execute(ShellCommand::Identity, cancel.clone()).await {
        Ok(output) => {
            debug!("Root check output: {:?}", output.first_line());
            debug!("Root check exit code: {:?}", output.exit_code);
            output.success()
                && output
                    .first_line()
                    .is_some_and(|line| line.contains(ROOT_IDENTITY_MARKER))
        }
        Err(e) => {
            error!("Root check failed: {e}");
            false
        }
    }
}

/// `chmod 755` through the superuser shell, then confirm with the OS that
/// the file really is executable.
pub async fn set_executable_permissions(
    shell: &dyn PrivilegedShell,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<(), InstallerError> {
    let output = shell
        .execute(ShellCommand::chmod_executable(path), cancel.clone())
        .await?;

    for line in output.stderr_lines() {
        error!("chmod error: {line}");
    }
    debug!("chmod exit code: {:?}", output.exit_code);

    if !output.success() {
        return Err(InstallerError::Permission(format!(
            "chmod exited with code {}",
            output
                .exit_code
                .map_or_else(|| "none".to_string(), |c| c.to_string())
        )));
    }

    if !is_executable(path) {
        return Err(InstallerError::Permission(format!(
            "{} is still not executable after chmod",
            path.display()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::os::unix::fs::PermissionsExt;

    struct ScriptedShell {
        reply: Result<ShellOutput, ()>,
        apply_chmod: bool,
    }

    impl PrivilegedShell for ScriptedShell {
        fn execute(
            &self,
            command: ShellCommand,
            _cancel: CancellationToken,
        ) -> AsyncTask<Result<ShellOutput, InstallerError>> {
            if let (true, ShellCommand::Chmod { mode, path }) = (self.apply_chmod, &command) {
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(*mode)).unwrap();
            }
            let reply = self
                .reply
                .clone()
                .map_err(|_| InstallerError::Process("spawn failed".into()));
            AsyncTask::ready(reply)
        }

        fn launch(&self, _command: ShellCommand) -> AsyncTask<Result<Child, InstallerError>> {
            AsyncTask::ready(Err(InstallerError::Process("unsupported".into())))
        }
    }

    fn output(code: i32, stdout: &str) -> ShellOutput {
        ShellOutput {
            exit_code: Some(code),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    #[test]
    fn commands_render_to_literal_shell_text() {
        assert_eq!(ShellCommand::Identity.render(), "id");
        assert_eq!(
            ShellCommand::chmod_executable("/data/data/app/files/frida/frida-server").render(),
            "chmod 755 /data/data/app/files/frida/frida-server"
        );
        assert_eq!(
            ShellCommand::Pkill {
                name: "frida-server".into()
            }
            .render(),
            "pkill frida-server"
        );
        assert_eq!(
            ShellCommand::Pgrep {
                name: "frida-server".into()
            }
            .render(),
            "pgrep frida-server"
        );
        assert_eq!(
            ShellCommand::Launch {
                working_dir: "/data/local/tmp".into(),
                binary: "/data/data/app/files/frida/frida-server".into(),
                listen: "0.0.0.0:27042".into(),
            }
            .render(),
            "cd /data/local/tmp && /data/data/app/files/frida/frida-server -l 0.0.0.0:27042"
        );
    }

    #[test]
    fn metacharacters_are_quoted() {
        assert_eq!(
            ShellCommand::chmod_executable("/tmp/my dir/frida-server").render(),
            "chmod 755 '/tmp/my dir/frida-server'"
        );
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote("a;rm -rf"), "'a;rm -rf'");
        assert_eq!(quote(""), "''");
    }

    #[tokio::test]
    async fn root_requires_zero_exit_and_uid_marker() {
        let cancel = CancellationToken::new();
        let rooted = ScriptedShell {
            reply: Ok(output(0, "uid=0(root) gid=0(root) groups=0(root)\n")),
            apply_chmod: false,
        };
        assert!(check_root(&rooted, &cancel).await);

        let wrong_user = ScriptedShell {
            reply: Ok(output(0, "uid=2000(shell) gid=2000(shell)\n")),
            apply_chmod: false,
        };
        assert!(!check_root(&wrong_user, &cancel).await);

        let denied = ScriptedShell {
            reply: Ok(output(1, "uid=0(root)\n")),
            apply_chmod: false,
        };
        assert!(!check_root(&denied, &cancel).await);

        let missing = ScriptedShell {
            reply: Err(()),
            apply_chmod: false,
        };
        assert!(!check_root(&missing, &cancel).await);
    }

    #[tokio::test]
    async fn permissions_are_verified_against_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frida-server");
        std::fs::write(&path, b"\x7fELF").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        let cancel = CancellationToken::new();

        // exit 0 but nothing changed on disk
        let liar = ScriptedShell {
            reply: Ok(output(0, "")),
            apply_chmod: false,
        };
        let err = set_executable_permissions(&liar, &path, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "permission");

        let failing = ScriptedShell {
            reply: Ok(output(1, "")),
            apply_chmod: false,
        };
        assert!(set_executable_permissions(&failing, &path, &cancel).await.is_err());

        let honest = ScriptedShell {
            reply: Ok(output(0, "")),
            apply_chmod: true,
        };
        set_executable_permissions(&honest, &path, &cancel)
            .await
            .unwrap();
        assert!(is_executable(&path));
    }

    #[tokio::test]
    async fn su_shell_runs_commands_through_the_program() {
        let shell = SuShell::new("sh", Duration::from_secs(10));
        let out = shell
            .execute(ShellCommand::Identity, CancellationToken::new())
            .await
            .unwrap();
        assert!(out.success());
        assert!(out.first_line().unwrap_or_default().contains("uid="));
    }

    #[tokio::test]
    async fn su_shell_round_trip_times_out() {
        let shell = SuShell::new("sh", Duration::from_millis(200)).with_args(["-c", "sleep 5"]);
        let err = shell
            .execute(ShellCommand::Identity, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, InstallerError::Timeout { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn su_shell_round_trip_honours_cancellation() {
        let shell = SuShell::new("sh", Duration::from_secs(30)).with_args(["-c", "sleep 5"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = shell
            .execute(ShellCommand::Identity, cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, InstallerError::Cancelled));
    }

    #[tokio::test]
    async fn missing_program_is_a_process_error() {
        let shell = SuShell::new("/nonexistent/su", Duration::from_secs(1));
        let err = shell
            .execute(ShellCommand::Identity, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "process");
    }
}
