//! Installation state detection
//!
//! A server counts as installed only when the binary exists *and* the OS
//! reports it executable for the current user; a partially written or
//! unpermissioned binary is never reported as installed.

use std::path::Path;

use nix::unistd::{AccessFlags, access};

use super::core::InstallLayout;

/// Installation state enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallationState {
    /// No server binary
    NotInstalled,
    /// Binary present but not executable, or metadata record missing
    PartiallyInstalled,
    /// Executable binary with its metadata record
    FullyInstalled,
}

/// OS-level executable check (`access(2)` with `X_OK`)
pub fn is_executable(path: &Path) -> bool {
    path.is_file() && access(path, AccessFlags::X_OK).is_ok()
}

/// True iff the server binary exists and is executable
pub fn is_server_already_installed(layout: &InstallLayout) -> bool {
    is_executable(&layout.server_path())
}

/// Check current installation state
pub fn check_installation_state(layout: &InstallLayout) -> InstallationState {
    let server = layout.server_path();
    if !server.exists() {
        return InstallationState::NotInstalled;
    }

    match (is_executable(&server), layout.info_path().exists()) {
        (true, true) => InstallationState::FullyInstalled,
        _ => InstallationState::PartiallyInstalled,
    }
}
