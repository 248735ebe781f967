//! Server installation library
//!
//! Pipelines that put an executable `frida-server` into the internal
//! directory, plus the pieces they are built from.

pub mod core;
pub mod detection;
pub mod download;
pub mod metadata;
pub mod orchestration;
pub mod privilege;
pub mod runners;
pub mod validation;

pub use detection::{InstallationState, check_installation_state, is_server_already_installed};
pub use orchestration::{Installer, InstallerBuilder};
pub use privilege::{PrivilegedShell, ShellCommand, ShellOutput, SuShell};
pub use validation::{ArtifactKind, ValidationVerdict, validate_server_binary};
