//! CPU ABI detection and mapping to release-feed architecture names

use std::process::Command;

use log::{debug, warn};
use once_cell::sync::OnceCell;

/// Global cache for ABI detection (initialized once, used everywhere)
static DEVICE_ABI_CACHE: OnceCell<String> = OnceCell::new();

/// Map a raw CPU ABI to the artifact naming convention of the release feed.
///
/// Unrecognized values pass through unchanged.
pub fn resolve_arch(raw_abi: &str) -> String {
    match raw_abi {
        "arm64-v8a" => "arm64",
        "armeabi-v7a" => "arm",
        "x86" => "x86",
        "x86_64" => "x86_64",
        other => other,
    }
    .to_string()
}

/// Raw CPU ABI of this device (cached after first call)
pub fn detect_device_abi() -> String {
    DEVICE_ABI_CACHE
        .get_or_init(|| {
            let abi = getprop_abi().unwrap_or_else(|| abi_from_target_arch(std::env::consts::ARCH));
            debug!("Device ABI: {abi}");
            abi
        })
        .clone()
}

/// `getprop ro.product.cpu.abi`, present on Android only
fn getprop_abi() -> Option<String> {
    match Command::new("getprop").arg("ro.product.cpu.abi").output() {
        Ok(output) if output.status.success() => {
            let abi = String::from_utf8_lossy(&output.stdout).trim().to_string();
            (!abi.is_empty()).then_some(abi)
        }
        Ok(_) => None,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            // Expected: not running on Android
            None
        }
        Err(e) => {
            warn!("Failed to query getprop: {}", e);
            None
        }
    }
}

/// Android ABI name for a Rust target architecture
fn abi_from_target_arch(arch: &str) -> String {
    match arch {
        "aarch64" => "arm64-v8a",
        "arm" => "armeabi-v7a",
        "x86" => "x86",
        "x86_64" => "x86_64",
        other => other,
    }
    .to_string()
}

/// Architecture token embedded in an artifact file name, most specific first
pub fn arch_from_file_name(file_name: &str) -> Option<&'static str> {
    let name = file_name.to_ascii_lowercase();
    [
        ("x86_64", "x86_64"),
        ("arm64", "arm64"),
        ("aarch64", "arm64"),
        ("x86", "x86"),
        ("arm", "arm"),
    ]
    .into_iter()
    .find(|(token, _)| name.contains(token))
    .map(|(_, arch)| arch)
}
