//! Per-device index files.
//!
//! Each device's index is a JSON array of [`Chunk`] records at
//! `<index_dir>/<device_id>.json`, with an [`IndexStamp`] sidecar at
//! `<index_dir>/<device_id>.stamp.json` naming the embedder that built it.
//!
//! Writes go through a temporary file and a rename, so a reader never sees a
//! half-written index. There is no locking between writers: two concurrent
//! saves for the same device race, and callers avoid that by running one
//! ingest job at a time and checking [`IndexStore::exists`] before building.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::mapping::DeviceError;
use crate::models::{DeviceIndex, IndexStamp};

const INDEX_EXT: &str = "json";
const STAMP_SUFFIX: &str = ".stamp.json";

#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    /// Open (creating if needed) the index directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create index directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// Path of a device's index file. Rejects ids that would escape the directory.
    pub fn index_path(&self, device_id: &str) -> Result<PathBuf> {
        validate_device_id(device_id)?;
        Ok(self.dir.join(format!("{}.{}", device_id, INDEX_EXT)))
    }

    fn stamp_path(&self, device_id: &str) -> Result<PathBuf> {
        validate_device_id(device_id)?;
        Ok(self.dir.join(format!("{}{}", device_id, STAMP_SUFFIX)))
    }

    pub fn exists(&self, device_id: &str) -> Result<bool> {
        Ok(self.index_path(device_id)?.is_file())
    }

    /// Load a device's index, or `None` if it has never been built.
    pub fn load(&self, device_id: &str) -> Result<Option<DeviceIndex>> {
        let path = self.index_path(device_id)?;
        if !path.is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read index: {}", path.display()))?;
        let index: DeviceIndex = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse index: {}", path.display()))?;
        Ok(Some(index))
    }

    /// Load the stamp recorded when the index was built. Indices written
    /// before stamping existed have none.
    pub fn stamp(&self, device_id: &str) -> Result<Option<IndexStamp>> {
        let path = self.stamp_path(device_id)?;
        if !path.is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read index stamp: {}", path.display()))?;
        let stamp = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse index stamp: {}", path.display()))?;
        Ok(Some(stamp))
    }

    /// Persist a device's index and its stamp, replacing any previous version.
    pub fn save(&self, device_id: &str, index: &DeviceIndex, stamp: &IndexStamp) -> Result<()> {
        let index_path = self.index_path(device_id)?;
        let stamp_path = self.stamp_path(device_id)?;

        // Stamp first: an index file without a matching stamp would be
        // checked against the wrong embedder.
        write_atomic(&stamp_path, &serde_json::to_vec(stamp)?)?;
        write_atomic(&index_path, &serde_json::to_vec(index)?)?;

        tracing::debug!(
            device = device_id,
            chunks = index.len(),
            path = %index_path.display(),
            "index saved"
        );
        Ok(())
    }

    /// Device ids that currently have an index file, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list index directory: {}", self.dir.display()))?;
        for entry in entries {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.ends_with(STAMP_SUFFIX) {
                continue;
            }
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn validate_device_id(device_id: &str) -> Result<()> {
    let bad = device_id.is_empty()
        || device_id == "."
        || device_id.contains("..")
        || device_id.contains('/')
        || device_id.contains('\\')
        || device_id.contains('\0')
        || device_id.ends_with(".stamp");
    if bad {
        return Err(DeviceError::InvalidId(device_id.to_string()).into());
    }
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use chrono::Utc;
    use tempfile::TempDir;

    fn sample_index(device: &str) -> DeviceIndex {
        (0..3)
            .map(|i| Chunk {
                id: Chunk::chunk_id(device, i),
                device_id: device.to_string(),
                text: format!("section {}", i),
                embedding: vec![i as f32, 1.0],
            })
            .collect()
    }

    fn stamp(chunks: usize) -> IndexStamp {
        IndexStamp {
            embedder: "test:hash".to_string(),
            dims: 2,
            chunks,
            built_at: Utc::now(),
        }
    }

    #[test]
    fn load_missing_is_none() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::open(tmp.path().join("idx")).unwrap();
        assert!(store.load("pump").unwrap().is_none());
        assert!(store.stamp("pump").unwrap().is_none());
        assert!(!store.exists("pump").unwrap());
    }

    #[test]
    fn save_then_load_preserves_order() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::open(tmp.path()).unwrap();
        let index = sample_index("pump");
        store.save("pump", &index, &stamp(3)).unwrap();

        let loaded = store.load("pump").unwrap().unwrap();
        assert_eq!(loaded, index);
        assert_eq!(store.stamp("pump").unwrap().unwrap().chunks, 3);
        assert_eq!(store.list().unwrap(), vec!["pump".to_string()]);
    }

    #[test]
    fn index_file_is_a_bare_array() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::open(tmp.path()).unwrap();
        store.save("vent", &sample_index("vent"), &stamp(3)).unwrap();

        let raw = std::fs::read_to_string(tmp.path().join("vent.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let rows = value.as_array().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["deviceId"], "vent");
        assert_eq!(rows[2]["id"], "vent-2");
    }

    #[test]
    fn traversal_ids_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::open(tmp.path()).unwrap();
        for id in ["", "..", "../etc", "a/b", "a\\b", "pump.stamp"] {
            let err = store.load(id).unwrap_err();
            assert!(
                matches!(err.downcast_ref::<DeviceError>(), Some(DeviceError::InvalidId(_))),
                "id {:?} was accepted",
                id
            );
        }
    }
}
