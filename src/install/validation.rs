//! Heuristic checks for hand-picked server files
//!
//! Files chosen by the user are checked before any privileged operation runs.
//! Checks run in order and stop at the first failure, each with its own
//! reason so a wrong file can be told apart from a corrupt one:
//!
//! 1. size between 1 MiB and 50 MiB
//! 2. name contains "frida" and "server"
//! 3. known container extension, or a raw binary (no extension / `.bin`)
//! 4. names mentioning "android" also name an architecture
//! 5. magic bytes match the detected kind

use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::download::ArchiveFormat;

const MIN_SIZE: u64 = 1024 * 1024;
const MAX_SIZE: u64 = 50 * 1024 * 1024;

const XZ_MAGIC: &[u8] = &[0xFD, b'7', b'z', b'X', b'Z', 0x00];
const GZIP_MAGIC: &[u8] = &[0x1F, 0x8B];
const ZIP_MAGIC: &[u8] = &[b'P', b'K', 0x03, 0x04];
const ELF_MAGIC: &[u8] = &[0x7F, b'E', b'L', b'F'];

const ARCH_TOKENS: [&str; 5] = ["arm64", "arm", "x86", "aarch64", "x86_64"];

/// What a validated file turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Xz,
    Gzip,
    Zip,
    RawElf,
}

impl ArtifactKind {
    /// Container format to decompress, `None` for a raw binary
    pub fn archive_format(self) -> Option<ArchiveFormat> {
        match self {
            Self::Xz => Some(ArchiveFormat::Xz),
            Self::Gzip => Some(ArchiveFormat::Gzip),
            Self::Zip => Some(ArchiveFormat::Zip),
            Self::RawElf => None,
        }
    }

    fn magic(self) -> &'static [u8] {
        match self {
            Self::Xz => XZ_MAGIC,
            Self::Gzip => GZIP_MAGIC,
            Self::Zip => ZIP_MAGIC,
            Self::RawElf => ELF_MAGIC,
        }
    }

    fn magic_mismatch_reason(self) -> &'static str {
        match self {
            Self::Xz => "Invalid XZ file - corrupted or not a valid .xz compressed file",
            Self::Gzip => "Invalid GZIP file - corrupted or not a valid .gz compressed file",
            Self::Zip => "Invalid ZIP file - corrupted or not a valid .zip archive",
            Self::RawElf => "Not a valid ELF binary - Frida server should be an ELF executable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationVerdict {
    Accepted(ArtifactKind),
    Rejected(String),
}

/// Run all checks against `path`
pub fn validate_server_binary(path: &Path) -> ValidationVerdict {
    let size = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(_) => return reject("Cannot read file header - file may be corrupted or inaccessible"),
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if size < MIN_SIZE {
        return reject(format!(
            "File too small ({}) - likely not a Frida server binary",
            format_file_size(size)
        ));
    }
    if size > MAX_SIZE {
        return reject(format!(
            "File too large ({}) - likely not a Frida server binary",
            format_file_size(size)
        ));
    }

    if !(file_name.contains("frida") && file_name.contains("server")) {
        return reject(
            "Filename does not contain 'frida' and 'server' - expected pattern like 'frida-server-x.x.x-android-arch'",
        );
    }

    let Some(kind) = kind_from_name(&file_name) else {
        return reject("Unsupported file format - expected .xz, .gz, .zip, or raw binary");
    };

    if file_name.contains("android") && !ARCH_TOKENS.iter().any(|t| file_name.contains(t)) {
        return reject(
            "No valid Android architecture found in filename (expected: arm64, arm, x86, x86_64)",
        );
    }

    let magic = kind.magic();
    match read_header(path, magic.len()) {
        Some(header) if header == magic => ValidationVerdict::Accepted(kind),
        Some(_) => reject(kind.magic_mismatch_reason()),
        None => reject("Cannot read file header - file may be corrupted or inaccessible"),
    }
}

fn reject(reason: impl Into<String>) -> ValidationVerdict {
    ValidationVerdict::Rejected(reason.into())
}

/// Kind implied by a lowercase file name
fn kind_from_name(file_name: &str) -> Option<ArtifactKind> {
    if file_name.ends_with(".xz") {
        return Some(ArtifactKind::Xz);
    }
    if file_name.ends_with(".gz") {
        return Some(ArtifactKind::Gzip);
    }
    if file_name.ends_with(".zip") {
        return Some(ArtifactKind::Zip);
    }
    if file_name.ends_with(".bin") || !has_extension(file_name) {
        return Some(ArtifactKind::RawElf);
    }
    None
}

/// Whether the text after the last dot looks like a file extension.
///
/// Version numbers (`16.0.0-android-arm64`) do not count.
fn has_extension(file_name: &str) -> bool {
    match file_name.rsplit_once('.') {
        Some((_, ext)) => {
            (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
                && ext.chars().any(|c| c.is_ascii_alphabetic())
        }
        None => false,
    }
}

fn read_header(path: &Path, len: usize) -> Option<Vec<u8>> {
    let mut header = vec![0u8; len];
    let mut file = File::open(path).ok()?;
    file.read_exact(&mut header).ok()?;
    Some(header)
}

/// Size as `B`, `KB` or `MB` with one decimal
pub fn format_file_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes}B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
