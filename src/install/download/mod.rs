//! Release discovery, artifact transfer and decompression
//!
//! - `platform` - device ABI detection and feed architecture names
//! - `github` - release feed access and asset lookup
//! - `core` - streaming download with progress samples
//! - `extract` - xz / gz / zip decompression into the install location

mod core;
mod extract;
mod github;
mod platform;

pub use self::core::{ArtifactDownloader, file_name_from_url};
pub use extract::{ArchiveFormat, extract_server_binary};
pub use github::{
    GitHubReleaseFeed, ReleaseAsset, ReleaseDescriptor, ReleaseFeed, expected_asset_name,
    find_asset, parse_release, parse_release_list,
};
pub use platform::{arch_from_file_name, detect_device_abi, resolve_arch};
