//! Client configuration.
//!
//! Configuration lives in a JSON file; every field is optional and falls back
//! to its default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::ConfigError;
use crate::protocol::MESSAGE_VERSION;

const CONFIG_FILE_NAME: &str = "client.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// How long a request waits for the server's reply.
    pub request_timeout_ms: u64,
    /// How long establishing the transport may take.
    pub connect_timeout_ms: u64,
    /// Protocol version announced during the handshake.
    pub message_version: u32,
    /// Send keep-alive pings when the server asks for them.
    pub ping_enabled: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5000,
            connect_timeout_ms: 5000,
            message_version: MESSAGE_VERSION,
            ping_enabled: true,
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Read a configuration file.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Read a configuration file, or return defaults if it does not exist.
    pub async fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path).await
    }

    /// Write the configuration as pretty JSON, creating parent directories.
    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }
}

/// Get the default configuration file path.
///
/// Uses the `directories` crate to find the platform-specific config directory.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    directories::ProjectDirs::from("", "haptic-link", "haptic-link")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
        .ok_or(ConfigError::NoConfigDir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.message_version, 3);
        assert!(config.ping_enabled);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ClientConfig = serde_json::from_str(r#"{"requestTimeoutMs": 250}"#).unwrap();
        assert_eq!(config.request_timeout_ms, 250);
        assert_eq!(config.connect_timeout_ms, 5000);
        assert!(config.ping_enabled);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join(CONFIG_FILE_NAME);

        let config = ClientConfig {
            request_timeout_ms: 1200,
            ping_enabled: false,
            ..ClientConfig::default()
        };
        config.save(&path).await.unwrap();

        let loaded = ClientConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_load_or_default_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let loaded = ClientConfig::load_or_default(&tmp.path().join("absent.json"))
            .await
            .unwrap();
        assert_eq!(loaded, ClientConfig::default());
    }

    #[tokio::test]
    async fn test_load_invalid_json() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(&path, "{not json").await.unwrap();

        let err = ClientConfig::load(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
