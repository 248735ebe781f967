use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_LATEST_RELEASE_URL: &str =
    "https://api.github.com/repos/frida/frida/releases/latest";
pub const DEFAULT_RELEASES_URL: &str = "https://api.github.com/repos/frida/frida/releases";
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:27042";
pub const DEFAULT_WORKING_DIR: &str = "/data/local/tmp";

/// On‑disk TOML configuration. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    /// Holds `frida-server` and `server-info.txt`
    pub internal_dir: Option<PathBuf>,
    /// Retained download cache
    pub download_dir: Option<PathBuf>,
    pub su_program: Option<String>,
    /// Overrides the detected CPU ABI (e.g. `arm64-v8a`)
    pub device_abi: Option<String>,
    pub latest_release_url: Option<String>,
    pub releases_url: Option<String>,
    pub releases_per_page: Option<u32>,
    /// Directory the server is started from
    pub working_dir: Option<String>,
    pub listen_address: Option<String>,
    pub shell_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub inactivity_timeout_secs: Option<u64>,
    pub start_settle_secs: Option<u64>,
    pub stop_grace_ms: Option<u64>,
    pub stop_settle_ms: Option<u64>,
}

impl InstallerConfig {
    /// Config with every default spelled out (written on first run)
    pub fn with_defaults() -> Self {
        Self {
            internal_dir: Some(default_internal_dir()),
            download_dir: Some(default_download_dir()),
            su_program: Some("su".into()),
            device_abi: None,
            latest_release_url: Some(DEFAULT_LATEST_RELEASE_URL.into()),
            releases_url: Some(DEFAULT_RELEASES_URL.into()),
            releases_per_page: Some(50),
            working_dir: Some(DEFAULT_WORKING_DIR.into()),
            listen_address: Some(DEFAULT_LISTEN_ADDRESS.into()),
            shell_timeout_secs: Some(30),
            connect_timeout_secs: Some(30),
            inactivity_timeout_secs: Some(300),
            start_settle_secs: Some(3),
            stop_grace_ms: Some(1000),
            stop_settle_ms: Some(1000),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn internal_dir(&self) -> PathBuf {
        self.internal_dir.clone().unwrap_or_else(default_internal_dir)
    }

    pub fn download_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(default_download_dir)
    }

    pub fn su_program(&self) -> &str {
        self.su_program.as_deref().unwrap_or("su")
    }

    pub fn latest_release_url(&self) -> &str {
        self.latest_release_url
            .as_deref()
            .unwrap_or(DEFAULT_LATEST_RELEASE_URL)
    }

    pub fn releases_url(&self) -> &str {
        self.releases_url.as_deref().unwrap_or(DEFAULT_RELEASES_URL)
    }

    pub fn releases_per_page(&self) -> u32 {
        self.releases_per_page.unwrap_or(50)
    }

    pub fn working_dir(&self) -> &str {
        self.working_dir.as_deref().unwrap_or(DEFAULT_WORKING_DIR)
    }

    pub fn listen_address(&self) -> &str {
        self.listen_address
            .as_deref()
            .unwrap_or(DEFAULT_LISTEN_ADDRESS)
    }

    pub fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.shell_timeout_secs.unwrap_or(30))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.unwrap_or(30))
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs.unwrap_or(300))
    }

    pub fn start_settle(&self) -> Duration {
        Duration::from_secs(self.start_settle_secs.unwrap_or(3))
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms.unwrap_or(1000))
    }

    pub fn stop_settle(&self) -> Duration {
        Duration::from_millis(self.stop_settle_ms.unwrap_or(1000))
    }
}

/// Default config file location: `<config_dir>/frida-installer/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("frida-installer").join("config.toml"))
}

fn default_internal_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        })
        .join("frida-installer")
        .join("frida")
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("Downloads")
        })
        .join("FridaServerInstaller")
}

/// Read a config file, or write the defaults when `create_missing` is set
/// and the file does not exist yet.
pub fn load_or_create(path: &Path, create_missing: bool) -> anyhow::Result<InstallerConfig> {
    use anyhow::Context;

    if !path.exists() {
        if !create_missing {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        log::info!(
            "Config not found at {}, creating default configuration",
            path.display()
        );
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let default_toml = toml::to_string_pretty(&InstallerConfig::with_defaults())
            .context("Failed to serialize default config")?;
        std::fs::write(path, default_toml).context("Failed to write config file")?;
    }

    let content = std::fs::read_to_string(path).context("Failed to read config file")?;
    InstallerConfig::from_toml(&content)
        .with_context(|| format!("Failed to parse config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = InstallerConfig::from_toml("").unwrap();
        assert_eq!(cfg.su_program(), "su");
        assert_eq!(cfg.listen_address(), "0.0.0.0:27042");
        assert_eq!(cfg.working_dir(), "/data/local/tmp");
        assert_eq!(cfg.releases_per_page(), 50);
        assert_eq!(cfg.start_settle(), Duration::from_secs(3));
        assert_eq!(cfg.stop_grace(), Duration::from_millis(1000));
        assert!(cfg.internal_dir().ends_with("frida-installer/frida"));
        assert!(cfg.download_dir().ends_with("FridaServerInstaller"));
    }

    #[test]
    fn partial_document_overrides_selected_keys() {
        let cfg = InstallerConfig::from_toml(
            r#"
            su_program = "sh"
            device_abi = "arm64-v8a"
            shell_timeout_secs = 5
            internal_dir = "/tmp/frida"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.su_program(), "sh");
        assert_eq!(cfg.device_abi.as_deref(), Some("arm64-v8a"));
        assert_eq!(cfg.shell_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.internal_dir(), PathBuf::from("/tmp/frida"));
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(InstallerConfig::from_toml("shell_timeout_secs = \"soon\"").is_err());
    }

    #[test]
    fn load_or_create_writes_defaults_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let created = load_or_create(&path, true).unwrap();
        assert!(path.exists());
        assert_eq!(created, InstallerConfig::with_defaults());

        std::fs::write(&path, "listen_address = \"127.0.0.1:1234\"\n").unwrap();
        let reloaded = load_or_create(&path, true).unwrap();
        assert_eq!(reloaded.listen_address(), "127.0.0.1:1234");
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_or_create(&dir.path().join("nope.toml"), false).is_err());
    }
}
