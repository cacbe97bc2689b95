//! Local embedding backend (fastembed, bundled ONNX Runtime).
//!
//! The model is loaded on first use and shared by every later call. Loading
//! is attempted once: if it fails, the failure is kept and reported again on
//! each call rather than retried in the middle of an ingest run.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

use super::{normalize, EmbeddingProvider};
use crate::config::EmbeddingConfig;

const DEFAULT_MODEL: &str = "all-minilm-l6-v2";

type SharedModel = Arc<Mutex<fastembed::TextEmbedding>>;

/// Embedding provider running a sentence-embedding model in-process.
///
/// Models are downloaded from Hugging Face on first use and cached; after
/// that no network access is needed.
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: OnceCell<std::result::Result<SharedModel, String>>,
}

impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        // Fail at construction for unknown names, not on first embed.
        config_to_fastembed_model(&model_name)?;
        let dims = config.dims.unwrap_or_else(|| default_dims(&model_name));

        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: OnceCell::new(),
        })
    }

    async fn model(&self) -> Result<SharedModel> {
        let slot = self
            .model
            .get_or_init(|| async {
                let name = self.model_name.clone();
                tracing::info!(model = %name, "loading local embedding model");
                let loaded = tokio::task::spawn_blocking(move || {
                    let kind = config_to_fastembed_model(&name).map_err(|e| e.to_string())?;
                    fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(kind).with_show_download_progress(true),
                    )
                    .map_err(|e| e.to_string())
                })
                .await;

                match loaded {
                    Ok(Ok(model)) => {
                        tracing::info!(model = %self.model_name, "local embedding model ready");
                        Ok(Arc::new(Mutex::new(model)))
                    }
                    Ok(Err(e)) => Err(e),
                    Err(join) => Err(join.to_string()),
                }
            })
            .await;

        match slot {
            Ok(model) => Ok(model.clone()),
            Err(e) => bail!("Failed to initialize local embedding model: {}", e),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn provider_name(&self) -> &str {
        "local"
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn warm_up(&self) -> Result<()> {
        self.model().await.map(|_| ())
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.model().await?;
        let texts = texts.to_vec();
        let batch_size = self.batch_size;

        let mut vectors = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow!("local embedding model lock poisoned"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow!("Local embedding failed: {}", e))
        })
        .await??;

        for v in &mut vectors {
            normalize(v);
        }
        Ok(vectors)
    }
}

fn default_dims(model: &str) -> usize {
    match model {
        "bge-base-en-v1.5" | "nomic-embed-text-v1.5" | "multilingual-e5-base" => 768,
        "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
        _ => 384,
    }
}

fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small, multilingual-e5-base, \
             multilingual-e5-large",
            other
        ),
    }
}
