//! Ingestion pipeline orchestration.
//!
//! Builds device indices: manual → text → chunks → embeddings → index file.
//! [`Ingestor::ingest_all`] walks the whole device mapping (used by the
//! background job and `POST /ingest`); [`Ingestor::ensure_index`] builds a
//! single device on demand when a question arrives for an unindexed device.
//!
//! Ingest is idempotent per device: a device that already has an index is
//! reported as cached and never rebuilt.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::path::Path;
use std::sync::Arc;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::extract::extract_file;
use crate::mapping::DeviceMapping;
use crate::models::{Chunk, DeviceIndex, IndexStamp};
use crate::progress::{IngestEvent, IngestProgressReporter, NoProgress};
use crate::store::IndexStore;

/// Outcome of ingesting one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// The mapped manual is not on disk.
    Missing,
    /// An index already existed.
    Cached,
    /// A new index was written.
    Built { chunks: usize },
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceStatus::Missing => write!(f, "missing"),
            DeviceStatus::Cached => write!(f, "ok (cached)"),
            DeviceStatus::Built { chunks } => write!(f, "ok ({} chunks)", chunks),
        }
    }
}

impl Serialize for DeviceStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Per-device statuses in mapping order. Serializes as a JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    entries: Vec<(String, DeviceStatus)>,
}

impl IngestReport {
    pub fn push(&mut self, device_id: &str, status: DeviceStatus) {
        self.entries.push((device_id.to_string(), status));
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceStatus> {
        self.entries
            .iter()
            .find(|(id, _)| id == device_id)
            .map(|(_, s)| *s)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, DeviceStatus)> {
        self.entries.iter().map(|(id, s)| (id.as_str(), *s))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for IngestReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (id, status) in &self.entries {
            map.serialize_entry(id, status)?;
        }
        map.end()
    }
}

/// Builds and loads device indices with one embedding provider.
///
/// Cheap to clone; clones share the provider (and its loaded model).
#[derive(Clone)]
pub struct Ingestor {
    config: Arc<Config>,
    provider: Arc<dyn EmbeddingProvider>,
    store: IndexStore,
}

impl Ingestor {
    pub fn new(config: Arc<Config>, provider: Arc<dyn EmbeddingProvider>, store: IndexStore) -> Self {
        Self {
            config,
            provider,
            store,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Ingest every device in the mapping.
    ///
    /// Missing manuals and existing indices are recorded per device. Any
    /// other failure (unreadable mapping, extraction, embedding, write)
    /// aborts the whole run.
    pub async fn ingest_all(&self, progress: &dyn IngestProgressReporter) -> Result<IngestReport> {
        let mapping = DeviceMapping::from_config(&self.config)?;

        progress.report(IngestEvent::WarmingUp);
        self.provider.warm_up().await?;
        progress.report(IngestEvent::WarmedUp);

        let mut report = IngestReport::default();
        for (device_id, relative) in mapping.iter() {
            progress.report(IngestEvent::Device {
                device_id: device_id.to_string(),
            });

            let path = self.config.resolve_document(relative);
            if !path.is_file() {
                tracing::warn!(device = device_id, path = %path.display(), "manual missing");
                progress.report(IngestEvent::Missing {
                    device_id: device_id.to_string(),
                    path,
                });
                report.push(device_id, DeviceStatus::Missing);
                continue;
            }

            if self.store.exists(device_id)? {
                progress.report(IngestEvent::Cached {
                    device_id: device_id.to_string(),
                });
                report.push(device_id, DeviceStatus::Cached);
                continue;
            }

            let index = self.build_from_path(device_id, &path, progress).await?;
            report.push(device_id, DeviceStatus::Built {
                chunks: index.len(),
            });
        }

        tracing::info!(devices = report.len(), "ingest complete");
        Ok(report)
    }

    /// Load a device's index, building it first if it does not exist.
    pub async fn ensure_index(&self, device_id: &str) -> Result<DeviceIndex> {
        if let Some(index) = self.store.load(device_id)? {
            return Ok(index);
        }
        tracing::info!(device = device_id, "no index yet, building on demand");
        self.build_device(device_id).await
    }

    /// Build one device's index from the current mapping.
    ///
    /// Fails with [`crate::mapping::DeviceError`] if the device is not mapped
    /// or its manual is missing; nothing is written in that case.
    pub async fn build_device(&self, device_id: &str) -> Result<DeviceIndex> {
        let mapping = DeviceMapping::from_config(&self.config)?;
        let path = mapping.resolve_existing(&self.config, device_id)?;
        self.build_from_path(device_id, &path, &NoProgress).await
    }

    async fn build_from_path(
        &self,
        device_id: &str,
        path: &Path,
        progress: &dyn IngestProgressReporter,
    ) -> Result<DeviceIndex> {
        // Reject bad ids before doing any expensive work.
        self.store.index_path(device_id)?;

        let text = extract_file(path)
            .await
            .with_context(|| format!("Failed to extract text for {}", device_id))?;
        let pieces = chunk_text(&text, self.config.chunking.size, self.config.chunking.overlap);

        progress.report(IngestEvent::Embedding {
            device_id: device_id.to_string(),
            chunks: pieces.len(),
        });

        let embeddings = self
            .provider
            .embed(&pieces)
            .await
            .with_context(|| format!("Failed to embed chunks for {}", device_id))?;
        if embeddings.len() != pieces.len() {
            anyhow::bail!(
                "embedding provider returned {} vectors for {} chunks",
                embeddings.len(),
                pieces.len()
            );
        }

        let index: DeviceIndex = pieces
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(ordinal, (text, embedding))| Chunk {
                id: Chunk::chunk_id(device_id, ordinal),
                device_id: device_id.to_string(),
                text,
                embedding,
            })
            .collect();

        let stamp = IndexStamp {
            embedder: self.provider.identity(),
            dims: index
                .first()
                .map(|c| c.embedding.len())
                .unwrap_or_else(|| self.provider.dims()),
            chunks: index.len(),
            built_at: Utc::now(),
        };
        self.store.save(device_id, &index, &stamp)?;

        tracing::info!(device = device_id, chunks = index.len(), "index built");
        progress.report(IngestEvent::Done {
            device_id: device_id.to_string(),
            chunks: index.len(),
        });
        Ok(index)
    }
}
