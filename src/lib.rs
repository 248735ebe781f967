//! Installs, validates and supervises a privileged `frida-server` binary on
//! a device with superuser shell access.
//!
//! The [`install`] module resolves, downloads, decompresses and installs the
//! server; [`control`] launches it and streams its output. Both report
//! through a stream of [`InstallEvent`]s.

pub mod cli;
pub mod config;
pub mod control;
pub mod error;
pub mod install;

pub use config::InstallerConfig;
pub use control::{ServerSupervisor, SupervisorSettings};
pub use error::{InstallerError, Result};
pub use install::core::InstallEvent;
pub use install::{Installer, InstallerBuilder};
