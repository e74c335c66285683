//! Settings file holding defaults for the command line.

use std::path::{Path, PathBuf};

use color_eyre::eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use siphon_core::ScannerConfig;

/// Contents of `config.toml`. Every field is optional; flags win.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Device to pull from.
    pub device: DeviceSettings,
    /// Network sweep defaults.
    pub scan: Option<ScannerConfig>,
}

/// Connection and directory defaults. Passwords are never read from here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub key_file: Option<PathBuf>,
    pub remote_dir: Option<String>,
    pub local_dir: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
}

impl Settings {
    /// Default location, `$CONFIG_DIR/siphon/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("siphon").join("config.toml"))
    }

    /// Load from an explicit path, or from the default path if it exists.
    ///
    /// An explicit path must exist. A malformed file is always an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.is_file() => path,
                _ => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Cannot read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_full() {
        let settings = Settings::parse(
            r#"
            [device]
            host = "192.168.1.40"
            username = "pi"
            remote_dir = "/home/pi/data"
            local_dir = "/mnt/evidence"

            [scan]
            network_range = "192.168.1.0/24"
            concurrency = 20
            "#,
        )
        .unwrap();

        assert_eq!(settings.device.host.as_deref(), Some("192.168.1.40"));
        assert_eq!(settings.device.port, None);
        let scan = settings.scan.unwrap();
        assert_eq!(scan.concurrency, 20);
        assert_eq!(scan.connect_timeout_ms, 500);
        assert_eq!(scan.target_hints, vec!["raspberry"]);
    }

    #[test]
    fn test_empty_file_is_default() {
        let settings = Settings::parse("").unwrap();
        assert_eq!(settings.device, DeviceSettings::default());
        assert!(settings.scan.is_none());
    }

    #[test]
    fn test_load_explicit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[device]\nport = 2222\n").unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.device.port, Some(2222));

        assert!(Settings::load(Some(&dir.path().join("missing.toml"))).is_err());
        std::fs::write(&path, "[device\n").unwrap();
        assert!(Settings::load(Some(&path)).is_err());
    }
}
