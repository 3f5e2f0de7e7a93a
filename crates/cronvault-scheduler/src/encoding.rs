//! Encoding gateway: text formats for the catalog file, bincode for
//! item records and execution snapshots.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use cronvault_core::{CronvaultError, DaemonConfig, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::tasks::Catalog;

/// Text format of the catalog file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Json,
    Yaml,
    Toml,
}

impl Encoding {
    /// Parse a user supplied selector ("json", "yaml"/"yml", "toml").
    pub fn from_value(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "json" => Ok(Encoding::Json),
            "yaml" | "yml" => Ok(Encoding::Yaml),
            "toml" => Ok(Encoding::Toml),
            _ => Err(CronvaultError::UnknownEncoding(value.to_string())),
        }
    }

    /// File extension of this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Encoding::Json => "json",
            Encoding::Yaml => "yaml",
            Encoding::Toml => "toml",
        }
    }

    pub fn encode<T: Serialize>(&self, value: &T) -> Result<String> {
        let encoded = match self {
            Encoding::Json => serde_json::to_string_pretty(value).map_err(|e| e.to_string()),
            Encoding::Yaml => serde_yaml::to_string(value).map_err(|e| e.to_string()),
            Encoding::Toml => toml::to_string_pretty(value).map_err(|e| e.to_string()),
        };
        encoded.map_err(|e| CronvaultError::Encode(format!("{self}: {e}")))
    }

    pub fn decode<T: DeserializeOwned>(&self, data: &str) -> Result<T> {
        let decoded = match self {
            Encoding::Json => serde_json::from_str(data).map_err(|e| e.to_string()),
            Encoding::Yaml => serde_yaml::from_str(data).map_err(|e| e.to_string()),
            Encoding::Toml => toml::from_str(data).map_err(|e| e.to_string()),
        };
        decoded.map_err(|e| CronvaultError::Decode(format!("{self}: {e}")))
    }

    /// Read a catalog file.
    pub async fn read(&self, path: &Path) -> Result<Catalog> {
        let data = read_file(path).await?;
        let text = String::from_utf8(data)
            .map_err(|e| CronvaultError::Decode(format!("{}: {e}", path.display())))?;
        self.decode(&text)
    }

    /// Write a catalog file.
    pub async fn write(&self, path: &Path, catalog: &Catalog) -> Result<()> {
        let text = self.encode(catalog)?;
        write_file(path, text.as_bytes()).await
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for Encoding {
    type Err = CronvaultError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_value(s)
    }
}

/// Default catalog location (`~/.cronvault/config.<ext>`).
pub fn default_catalog_path(encoding: Encoding) -> PathBuf {
    DaemonConfig::home_dir().join(format!("config.{}", encoding.extension()))
}

/// Encode a value in the binary-native format.
pub fn encode_native<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| CronvaultError::Encode(e.to_string()))
}

/// Decode a value from the binary-native format.
pub fn decode_native<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    bincode::deserialize(data).map_err(|e| CronvaultError::Decode(e.to_string()))
}

/// Read and decode a binary-native file.
pub async fn read_native<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = read_file(path).await?;
    decode_native(&data)
}

/// Encode and write a binary-native file.
pub async fn write_native<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = encode_native(value)?;
    write_file(path, &data).await
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => CronvaultError::NotFound(path.display().to_string()),
        _ => CronvaultError::Io(e),
    })
}

/// Write through a sibling temp file and rename, so readers never see a
/// half-written file.
async fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await?;
    tracing::debug!("💾 Wrote {} bytes to {}", data.len(), path.display());
    Ok(())
}
