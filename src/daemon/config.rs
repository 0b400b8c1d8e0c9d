//! Daemon configuration.
//!
//! Every field has a serde default, so a config file only needs the values
//! that differ. Without `--config` the defaults are used as is.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Socket location relative to the home directory.
const SOCKET_DIR: &str = ".audiosession";
const SOCKET_FILE: &str = "audiosession.sock";

/// Accepted metadata updater interval (ms).
pub const METADATA_INTERVAL_RANGE_MS: std::ops::RangeInclusive<u64> = 100..=60_000;

/// Returns the default socket path (`~/.audiosession/audiosession.sock`).
///
/// Falls back to the temp directory when no home directory is known.
pub fn default_socket_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(SOCKET_DIR)
        .join(SOCKET_FILE)
}

fn default_asset_root() -> PathBuf {
    PathBuf::from("public")
}

fn default_metadata_update_interval_ms() -> u64 {
    1000
}

fn default_foreground_deadline_ms() -> u64 {
    5000
}

/// Settings of the session daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Unix socket the bridge listens on
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Directory bundled artwork references are resolved against
    #[serde(default = "default_asset_root")]
    pub asset_root: PathBuf,

    /// Metadata updater period in milliseconds (100-60000)
    #[serde(default = "default_metadata_update_interval_ms")]
    pub metadata_update_interval_ms: u64,

    /// Time allowed for the foreground promotion at startup
    #[serde(default = "default_foreground_deadline_ms")]
    pub foreground_deadline_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            asset_root: default_asset_root(),
            metadata_update_interval_ms: default_metadata_update_interval_ms(),
            foreground_deadline_ms: default_foreground_deadline_ms(),
        }
    }
}

impl DaemonConfig {
    /// Reads and validates a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("設定ファイルを読み込めません: {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("設定ファイルの形式が不正です: {}", path.display()))?;
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    /// Loads the given file, or returns the defaults when `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Validates the configuration.
    ///
    /// Returns an error message if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if !METADATA_INTERVAL_RANGE_MS.contains(&self.metadata_update_interval_ms) {
            return Err(
                "メタデータ更新間隔は100-60000ミリ秒の範囲で指定してください".to_string(),
            );
        }
        if self.foreground_deadline_ms == 0 {
            return Err("フォアグラウンド化の期限は1ミリ秒以上で指定してください".to_string());
        }
        if self.socket_path.as_os_str().is_empty() {
            return Err("ソケットパスを指定してください".to_string());
        }
        Ok(())
    }

    /// Sets the socket path.
    pub fn with_socket_path(mut self, socket_path: impl Into<PathBuf>) -> Self {
        self.socket_path = socket_path.into();
        self
    }

    /// Sets the asset root.
    pub fn with_asset_root(mut self, asset_root: impl Into<PathBuf>) -> Self {
        self.asset_root = asset_root.into();
        self
    }

    /// Sets the metadata updater period.
    pub fn with_metadata_update_interval_ms(mut self, interval_ms: u64) -> Self {
        self.metadata_update_interval_ms = interval_ms;
        self
    }

    #[must_use]
    pub fn metadata_interval(&self) -> Duration {
        Duration::from_millis(self.metadata_update_interval_ms)
    }

    #[must_use]
    pub fn foreground_deadline(&self) -> Duration {
        Duration::from_millis(self.foreground_deadline_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();

        assert!(config.socket_path.ends_with(".audiosession/audiosession.sock"));
        assert_eq!(config.asset_root, PathBuf::from("public"));
        assert_eq!(config.metadata_update_interval_ms, 1000);
        assert_eq!(config.foreground_deadline_ms, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DaemonConfig =
            serde_json::from_str(r#"{"metadata_update_interval_ms": 250}"#).unwrap();

        assert_eq!(config.metadata_update_interval_ms, 250);
        assert_eq!(config.foreground_deadline_ms, 5000);
        assert_eq!(config.asset_root, PathBuf::from("public"));
    }

    #[test]
    fn test_validate_interval_range() {
        let config = DaemonConfig::default().with_metadata_update_interval_ms(99);
        assert!(config.validate().is_err());

        let config = DaemonConfig::default().with_metadata_update_interval_ms(100);
        assert!(config.validate().is_ok());

        let config = DaemonConfig::default().with_metadata_update_interval_ms(60_001);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_deadline() {
        let config = DaemonConfig {
            foreground_deadline_ms: 0,
            ..DaemonConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"socket_path": "/tmp/test.sock", "asset_root": "/srv/assets"}}"#
        )
        .unwrap();

        let config = DaemonConfig::load(file.path()).unwrap();

        assert_eq!(config.socket_path, PathBuf::from("/tmp/test.sock"));
        assert_eq!(config.asset_root, PathBuf::from("/srv/assets"));
    }

    #[test]
    fn test_load_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"metadata_update_interval_ms": 5}}"#).unwrap();

        let err = DaemonConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("メタデータ更新間隔"));
    }

    #[test]
    fn test_load_missing_file() {
        let result = DaemonConfig::load(Path::new("/nonexistent/audiosession.json"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_or_default() {
        let config = DaemonConfig::load_or_default(None).unwrap();
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn test_durations() {
        let config = DaemonConfig::default();
        assert_eq!(config.metadata_interval(), Duration::from_millis(1000));
        assert_eq!(config.foreground_deadline(), Duration::from_secs(5));
    }
}
