//! Cronvault daemon configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CronvaultError, Result};

/// Root daemon configuration (`~/.cronvault/daemon.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default)]
    pub sync: bool,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub commands: Vec<CommandEntry>,
}

fn default_catalog_path() -> String { "~/.cronvault/config.json".into() }
fn default_encoding() -> String { "json".into() }

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            catalog_path: default_catalog_path(),
            encoding: default_encoding(),
            sync: false,
            engine: EngineConfig::default(),
            commands: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Load config from the default path, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CronvaultError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CronvaultError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Save config to a specific path, creating parent folders.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CronvaultError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("daemon.toml")
    }

    /// Get the Cronvault home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".cronvault")
    }
}

/// Dispatch engine timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_idle_interval")]
    pub idle_interval_secs: u64,
    #[serde(default = "default_collect_window")]
    pub collect_window_secs: u64,
    #[serde(default = "default_wait_poll")]
    pub wait_poll_secs: u64,
    /// `until_due` sleeps until the computed due time, `immediate` runs at once.
    #[serde(default = "default_delay_mode")]
    pub delay_mode: String,
}

fn default_idle_interval() -> u64 { 5 }
fn default_collect_window() -> u64 { 10 }
fn default_wait_poll() -> u64 { 15 }
fn default_delay_mode() -> String { "until_due".into() }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_interval_secs: default_idle_interval(),
            collect_window_secs: default_collect_window(),
            wait_poll_secs: default_wait_poll(),
            delay_mode: default_delay_mode(),
        }
    }
}

/// An initial command appended to the catalog at daemon startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEntry {
    /// Shell text (`"echo hi"`) or argv (`["ls", "-l"]`).
    pub command: serde_json::Value,
    #[serde(default)]
    pub on_demand: bool,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub repeat: Option<u32>,
    /// RFC 3339 anchor; defaults to the time the command is added.
    #[serde(default)]
    pub since: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.encoding, "json");
        assert_eq!(config.engine.idle_interval_secs, 5);
        assert_eq!(config.engine.collect_window_secs, 10);
        assert_eq!(config.engine.delay_mode, "until_due");
        assert!(config.commands.is_empty());
    }

    #[test]
    fn test_parse_commands() {
        let raw = r#"
            encoding = "yaml"
            sync = true

            [engine]
            idle_interval_secs = 1

            [[commands]]
            command = "echo hello"
            period = "24h"

            [[commands]]
            command = ["ls", "-l"]
            repeat = 3
        "#;
        let config: DaemonConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.encoding, "yaml");
        assert!(config.sync);
        assert_eq!(config.engine.idle_interval_secs, 1);
        assert_eq!(config.engine.wait_poll_secs, 15);
        assert_eq!(config.commands.len(), 2);
        assert_eq!(config.commands[0].command, serde_json::json!("echo hello"));
        assert_eq!(config.commands[1].command, serde_json::json!(["ls", "-l"]));
        assert_eq!(config.commands[1].repeat, Some(3));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("daemon.toml");
        let mut config = DaemonConfig::default();
        config.catalog_path = "/tmp/catalog.yaml".into();
        config.save_to(&path).unwrap();

        let loaded = DaemonConfig::load_from(&path).unwrap();
        assert_eq!(loaded.catalog_path, "/tmp/catalog.yaml");
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DaemonConfig::load_from(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, CronvaultError::Config(_)));
    }
}
