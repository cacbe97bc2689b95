//! Device id → manual path mapping.
//!
//! The mapping is a JSON object read fresh on every ingest or build, so an
//! operator can add a device without restarting the server. Key order in the
//! file is the order devices are ingested in.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Errors tied to a single device's configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device id has no entry in the mapping file.
    NotMapped(String),
    /// The mapping points at a document that does not exist on disk.
    DocumentMissing { device_id: String, path: PathBuf },
    /// The id cannot be used as an index file name.
    InvalidId(String),
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceError::NotMapped(id) => write!(f, "device {} not in device mapping", id),
            DeviceError::DocumentMissing { device_id, path } => write!(
                f,
                "manual for device {} not found at {}",
                device_id,
                path.display()
            ),
            DeviceError::InvalidId(id) => write!(f, "invalid device id: {:?}", id),
        }
    }
}

impl std::error::Error for DeviceError {}

/// Ordered list of `(device_id, relative_path)` pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceMapping {
    entries: Vec<(String, String)>,
}

impl DeviceMapping {
    pub fn from_entries(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }

    /// Parse a mapping from JSON text, preserving key order.
    pub fn parse(json: &str) -> Result<Self> {
        let map: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(json).context("device mapping must be a JSON object")?;

        let mut entries = Vec::with_capacity(map.len());
        for (device_id, value) in map {
            let path = value.as_str().with_context(|| {
                format!("device mapping entry {} must be a string path", device_id)
            })?;
            entries.push((device_id, path.to_string()));
        }
        Ok(Self { entries })
    }

    /// Read and parse the mapping file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read device mapping: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse device mapping: {}", path.display()))
    }

    /// Load the mapping configured in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::load(&config.devices_path())
    }

    pub fn get(&self, device_id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(id, _)| id == device_id)
            .map(|(_, path)| path.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(id, p)| (id.as_str(), p.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a device's document to an absolute path that exists.
    pub fn resolve_existing(&self, config: &Config, device_id: &str) -> Result<PathBuf> {
        let relative = self
            .get(device_id)
            .ok_or_else(|| DeviceError::NotMapped(device_id.to_string()))?;
        let path = config.resolve_document(relative);
        if !path.is_file() {
            return Err(DeviceError::DocumentMissing {
                device_id: device_id.to_string(),
                path,
            }
            .into());
        }
        Ok(path)
    }
}
