mod common;

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use common::FakeShell;
use common::collect;
use common::elf_payload;
use common::test_config;
use frida_installer::InstallEvent;
use frida_installer::Installer;
use frida_installer::InstallerBuilder;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

fn installed(root: &std::path::Path, shell: Arc<FakeShell>) -> Installer {
    let installer = InstallerBuilder::from_config(test_config(root))
        .shell(shell)
        .build()
        .unwrap();
    let layout = installer.layout();
    std::fs::create_dir_all(layout.internal_dir()).unwrap();
    std::fs::write(layout.server_path(), elf_payload()).unwrap();
    std::fs::set_permissions(layout.server_path(), std::fs::Permissions::from_mode(0o755)).unwrap();
    std::fs::write(layout.info_path(), "16.1.2 (arm64)").unwrap();
    installer
}

#[tokio::test]
async fn stop_without_a_server_only_sweeps() {
    let root = tempfile::tempdir().unwrap();
    let shell = Arc::new(FakeShell::rooted());
    let installer = installed(root.path(), shell.clone());

    installer.supervisor().stop().await;

    assert_eq!(shell.commands(), vec!["pkill frida-server"]);
    assert!(!installer.supervisor().is_managing().await);
    assert!(!installer.supervisor().status().await);
}

#[tokio::test]
async fn start_streams_output_and_stop_releases_the_process() {
    let root = tempfile::tempdir().unwrap();
    let shell = Arc::new(FakeShell::rooted());
    let installer = installed(root.path(), shell.clone());
    let supervisor = installer.supervisor().clone();

    let (tx, mut rx) = mpsc::channel(64);
    let start = supervisor.start(tx);

    let mut seen = Vec::new();
    let wanted = |seen: &[InstallEvent]| {
        seen.iter().any(|e| matches!(e, InstallEvent::Success(_)))
            && seen.contains(&InstallEvent::progress("📤 [STDOUT] Frida server listening"))
            && seen.contains(&InstallEvent::progress("🔴 [STDERR] warning: test"))
    };
    tokio::time::timeout(Duration::from_secs(10), async {
        while !wanted(&seen) {
            match rx.recv().await {
                Some(event) => seen.push(event),
                None => break,
            }
        }
    })
    .await
    .expect("server output and start result");

    assert!(seen.contains(&InstallEvent::progress(
        "🚀 Starting Frida server: Downloaded: 16.1.2 (arm64)"
    )));
    assert!(seen.contains(&InstallEvent::progress(
        "📡 Server will listen on 0.0.0.0:27042"
    )));
    assert!(seen.contains(&InstallEvent::Success(
        "✅ Frida server started successfully! Output will continue to be displayed in real-time."
            .to_string()
    )));
    assert!(supervisor.is_managing().await);
    assert!(supervisor.status().await);
    start.await.unwrap();

    supervisor.stop().await;

    assert!(!supervisor.is_managing().await);
    assert!(!supervisor.status().await);
    let rest = tokio::time::timeout(Duration::from_secs(10), collect(rx))
        .await
        .expect("event stream closes once the readers are gone");
    assert!(rest.iter().all(|e| !e.is_terminal()), "{rest:?}");
    assert!(
        shell
            .commands()
            .iter()
            .any(|c| c.ends_with("-l 0.0.0.0:27042"))
    );
}

#[tokio::test]
async fn start_without_a_binary_reports_missing_server() {
    let root = tempfile::tempdir().unwrap();
    let shell = Arc::new(FakeShell::rooted());
    let installer = InstallerBuilder::from_config(test_config(root.path()))
        .shell(shell.clone())
        .build()
        .unwrap();

    let (tx, rx) = mpsc::channel(16);
    installer.supervisor().start(tx).await.unwrap();
    let events = collect(rx).await;

    assert_eq!(
        events,
        vec![InstallEvent::Error(
            "Frida server not found. Please install it first.".to_string()
        )]
    );
    assert!(shell.commands().is_empty());
}
