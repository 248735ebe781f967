use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use termcolor::ColorChoice;
use tokio::sync::mpsc;

use frida_installer::cli::{Args, Cmd};
use frida_installer::config::{default_config_path, load_or_create};
use frida_installer::install::runners::{
    EventPrinter, print_info, print_releases, print_until_terminal,
};
use frida_installer::{InstallEvent, Installer, InstallerBuilder};

/// Event channel depth; download samples beyond it are dropped
const EVENT_BUFFER: usize = 256;

fn main() {
    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("FATAL: Failed to create Tokio runtime: {e}");
            std::process::exit(1);
        }
    };
    match rt.block_on(real_main()) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{e:#}");
            std::process::exit(1);
        }
    }
}

/// `Ok(false)` maps to exit status 1 without an error message
async fn real_main() -> Result<bool> {
    let args = Args::parse();

    let (cfg_path, create_missing) = match args.config {
        Some(path) => (path, false),
        None => (
            default_config_path().context("Could not determine config directory")?,
            true,
        ),
    };
    let config = load_or_create(&cfg_path, create_missing)?;
    info!("Using config from: {}", cfg_path.display());

    let installer = InstallerBuilder::from_config(config)
        .build()
        .context("Failed to initialise installer")?;

    match args.sub {
        Cmd::Install { version, force } => handle_install(&installer, version, force).await,
        Cmd::InstallFile { path } => handle_install_file(&installer, &path).await,
        Cmd::Releases => handle_releases(&installer).await,
        Cmd::Start => handle_start(&installer).await,
        Cmd::Stop => {
            installer.supervisor().stop().await;
            println!("frida-server stopped");
            Ok(true)
        }
        Cmd::Status => handle_status(&installer).await,
        Cmd::Info => {
            print_info(
                installer.is_server_already_installed(),
                installer.installed_server_info().as_deref(),
                &installer.current_server_type(),
            );
            Ok(true)
        }
    }
}

async fn handle_install(installer: &Installer, version: Option<String>, force: bool) -> Result<bool> {
    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
    let run = match version {
        None => installer.install_latest(force, tx),
        Some(tag) => {
            let release = installer
                .release_by_tag(&tag)
                .await
                .with_context(|| format!("Failed to resolve release {tag}"))?;
            installer.install_release(release, force, tx)
        }
    };
    finish_run(run, &mut rx).await
}

async fn handle_install_file(installer: &Installer, path: &Path) -> Result<bool> {
    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
    let run = installer.install_from_file(path, tx);
    finish_run(run, &mut rx).await
}

async fn finish_run(
    run: tokio::task::JoinHandle<()>,
    rx: &mut mpsc::Receiver<InstallEvent>,
) -> Result<bool> {
    let mut printer = EventPrinter::new(ColorChoice::Auto);
    let terminal = print_until_terminal(rx, &mut printer).await;
    run.await.context("Install task failed")?;
    Ok(matches!(terminal, Some(InstallEvent::Success(_))))
}

async fn handle_releases(installer: &Installer) -> Result<bool> {
    let releases = installer
        .fetch_releases()
        .await
        .context("Failed to fetch releases")?;
    print_releases(&releases);
    Ok(true)
}

/// Start, stream output until Ctrl-C, then stop
async fn handle_start(installer: &Installer) -> Result<bool> {
    let supervisor = installer.supervisor();
    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
    let mut printer = EventPrinter::new(ColorChoice::Auto);

    let _start = supervisor.start(tx);
    match print_until_terminal(&mut rx, &mut printer).await {
        Some(InstallEvent::Success(_)) => {}
        _ => {
            supervisor.stop().await;
            return Ok(false);
        }
    }

    info!("Streaming server output, press Ctrl-C to stop");
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            event = rx.recv() => match event {
                Some(event) => printer.print(&event),
                None => break,
            },
        }
    }

    supervisor.stop().await;
    println!("frida-server stopped");
    Ok(true)
}

/// Exit 0 when running, 1 otherwise
async fn handle_status(installer: &Installer) -> Result<bool> {
    let running = installer.supervisor().status().await;
    if running {
        println!("frida-server is running");
    } else {
        println!("frida-server is stopped");
    }
    Ok(running)
}
