//! Shared fixtures for integration tests: a deterministic embedder, a
//! scripted chat model, and a temporary workspace with manuals on disk.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use manual_rag::config::Config;
use manual_rag::embedding::EmbeddingProvider;
use manual_rag::generation::TextGenerator;
use manual_rag::ingest::Ingestor;
use manual_rag::models::ChatMessage;
use manual_rag::store::IndexStore;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

// ─── Embedder ───────────────────────────────────────────────────────

/// Byte-histogram embeddings: texts sharing characters score higher.
pub struct FakeEmbedder {
    model: String,
    dims: usize,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl FakeEmbedder {
    pub fn new(model: &str, dims: usize) -> Self {
        Self {
            model: model.to_string(),
            dims,
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    /// `warm_up` blocks until `gate` is notified.
    pub fn gated(model: &str, dims: usize, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(model, dims)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn histogram(text: &str, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    for b in text.bytes() {
        v[b as usize % dims] += 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    fn provider_name(&self) -> &str {
        "fake"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn warm_up(&self) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(())
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| histogram(t, self.dims)).collect())
    }
}

// ─── Generator ──────────────────────────────────────────────────────

/// Returns a fixed answer, optionally after a delay, and records prompts.
pub struct ScriptedChat {
    reply: String,
    delay: Duration,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChat {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            delay: Duration::ZERO,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn slow(reply: &str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(reply)
        }
    }

    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedChat {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.seen.lock().unwrap().push(messages.to_vec());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.reply.clone())
    }
}

// ─── Workspace ──────────────────────────────────────────────────────

/// A temporary root holding `devices.config.json`, `manuals/`, and `rag_index/`.
pub struct Workspace {
    pub dir: TempDir,
    pub config: Arc<Config>,
}

impl Workspace {
    /// `devices` maps ids to paths relative to the root; `manuals` are
    /// written under the root with the given contents.
    pub fn new(devices: &[(&str, &str)], manuals: &[(&str, String)]) -> Self {
        let dir = TempDir::new().unwrap();

        let mut mapping = serde_json::Map::new();
        for (id, path) in devices {
            mapping.insert(id.to_string(), serde_json::Value::String(path.to_string()));
        }
        std::fs::write(
            dir.path().join("devices.config.json"),
            serde_json::to_string_pretty(&mapping).unwrap(),
        )
        .unwrap();

        for (path, content) in manuals {
            let full = dir.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, content).unwrap();
        }

        let mut config = Config::default();
        config.paths.root = dir.path().to_path_buf();
        Self {
            dir,
            config: Arc::new(config),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn index_file(&self, device_id: &str) -> PathBuf {
        self.config.index_dir().join(format!("{}.json", device_id))
    }

    pub fn store(&self) -> IndexStore {
        IndexStore::open(self.config.index_dir()).unwrap()
    }

    pub fn ingestor(&self, provider: Arc<dyn EmbeddingProvider>) -> Ingestor {
        Ingestor::new(self.config.clone(), provider, self.store())
    }
}

/// `n` characters of varied, sentence-like text.
pub fn manual_text(n: usize) -> String {
    let base = "Press the power button. Check the battery alarm. Prime the tubing before use. ";
    base.chars().cycle().take(n).collect()
}
