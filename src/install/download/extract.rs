//! Decompression of server artifacts into the install location
//!
//! Handles `.xz` (release feed format), `.gz` and `.zip` artifacts. All
//! decoding runs on the blocking pool.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use log::{debug, warn};
use zip::ZipArchive;

use crate::error::InstallerError;
use crate::install::core::SERVER_BINARY_NAME;

/// Compressed container formats accepted for server artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Xz,
    Gzip,
    Zip,
}

impl ArchiveFormat {
    /// Format implied by the file extension, if any
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "xz" => Some(Self::Xz),
            "gz" => Some(Self::Gzip),
            "zip" => Some(Self::Zip),
            _ => None,
        }
    }
}

/// Decompress `source` into `target`.
///
/// Any existing `target` is deleted first. On failure the partially written
/// target is removed. The source file is never touched.
pub async fn extract_server_binary(
    source: &Path,
    target: &Path,
    format: ArchiveFormat,
) -> Result<PathBuf, InstallerError> {
    let source = source.to_path_buf();
    let target = target.to_path_buf();

    tokio::task::spawn_blocking(move || {
        remove_existing(&target)?;

        match decompress(&source, &target, format) {
            Ok(written) => {
                debug!(
                    "Extracted {} bytes from {} to {}",
                    written,
                    source.display(),
                    target.display()
                );
                Ok(target)
            }
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_file(&target)
                    && cleanup.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(
                        "Failed to remove partial extraction {}: {}",
                        target.display(),
                        cleanup
                    );
                }
                Err(e)
            }
        }
    })
    .await
    .map_err(|e| InstallerError::Extraction(format!("Extraction task failed: {e}")))?
}

fn remove_existing(target: &Path) -> Result<(), InstallerError> {
    match std::fs::remove_file(target) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(InstallerError::Extraction(format!(
            "Failed to remove existing {}: {}",
            target.display(),
            e
        ))),
    }
}

fn decompress(source: &Path, target: &Path, format: ArchiveFormat) -> Result<u64, InstallerError> {
    let input = File::open(source).map_err(|e| {
        InstallerError::Extraction(format!("Failed to open {}: {}", source.display(), e))
    })?;
    let output = File::create(target).map_err(|e| {
        InstallerError::Extraction(format!("Failed to create {}: {}", target.display(), e))
    })?;
    let mut output = CountingWriter::new(BufWriter::new(output));

    match format {
        ArchiveFormat::Xz => {
            let mut reader = BufReader::new(input);
            lzma_rs::xz_decompress(&mut reader, &mut output)
                .map_err(|e| InstallerError::Extraction(format!("XZ decompression failed: {e}")))?;
        }
        ArchiveFormat::Gzip => {
            let mut decoder = GzDecoder::new(BufReader::new(input));
            std::io::copy(&mut decoder, &mut output).map_err(|e| {
                InstallerError::Extraction(format!("GZIP decompression failed: {e}"))
            })?;
        }
        ArchiveFormat::Zip => extract_zip_entry(input, &mut output)?,
    }

    output
        .flush()
        .map_err(|e| InstallerError::Extraction(format!("Failed to write {}: {}", target.display(), e)))?;

    if output.written == 0 {
        return Err(InstallerError::Extraction(format!(
            "{} decompressed to an empty file",
            source.display()
        )));
    }

    Ok(output.written)
}

/// Copy the server entry out of a zip archive: the first regular entry whose
/// name contains the binary name, else the first regular entry.
fn extract_zip_entry(input: File, output: &mut impl Write) -> Result<(), InstallerError> {
    let mut archive = ZipArchive::new(input)
        .map_err(|e| InstallerError::Extraction(format!("Failed to read ZIP archive: {e}")))?;

    let mut first_file = None;
    let mut server_entry = None;
    for i in 0..archive.len() {
        let Ok(entry) = archive.by_index(i) else {
            continue;
        };
        if entry.is_dir() {
            continue;
        }
        if entry.name().contains(SERVER_BINARY_NAME) {
            server_entry = Some(i);
            break;
        }
        first_file.get_or_insert(i);
    }

    let index = server_entry
        .or(first_file)
        .ok_or_else(|| InstallerError::Extraction("ZIP archive contains no files".to_string()))?;

    let mut entry = archive
        .by_index(index)
        .map_err(|e| InstallerError::Extraction(format!("Failed to read ZIP entry: {e}")))?;
    debug!("Extracting ZIP entry {}", entry.name());

    std::io::copy(&mut entry, output)
        .map_err(|e| InstallerError::Extraction(format!("Failed to extract ZIP entry: {e}")))?;
    Ok(())
}

struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
