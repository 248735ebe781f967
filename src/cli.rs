use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "frida-server installer and supervisor")]
pub struct Args {
    /// Path to configuration file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub sub: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Install the latest release, or a specific one with --version
    Install {
        /// Release tag to install (e.g. 16.1.2)
        #[arg(long)]
        version: Option<String>,

        /// Reinstall even if a server is already present
        #[arg(long)]
        force: bool,
    },
    /// Install a server binary from a local file (.xz, .gz, .zip or raw ELF)
    InstallFile {
        path: PathBuf,
    },
    /// List releases that ship Android server builds
    Releases,
    /// Start the server and stream its output until Ctrl-C
    Start,
    /// Stop the server
    Stop,
    /// Check server status (Exit 0 = running, 1 = stopped)
    Status,
    /// Show the installed server
    Info,
}
