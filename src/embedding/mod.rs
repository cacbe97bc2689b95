//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and its backends:
//! - **`LocalProvider`**: runs a sentence-embedding model in-process via
//!   fastembed (feature `local-embeddings-fastembed`, on by default).
//! - **[`OpenAIProvider`]**: calls an OpenAI-compatible embeddings API with
//!   batching, retry, and backoff.
//!
//! # Provider Selection
//!
//! [`create_provider`] picks the backend from `embedding.provider`. The same
//! provider instance must serve both ingest and query: vectors from different
//! models live in different spaces, and every index records the
//! [`EmbeddingProvider::identity`] that built it so mismatches are caught.
//!
//! # Retry Strategy
//!
//! The remote backend retries transient errors (see [`retry`]):
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - anything else → fail immediately
//! - Backoff: `sleep_ms × 2^attempt`, capped at `max_backoff_ms`, at most `max_retries` retries

#[cfg(feature = "local-embeddings-fastembed")]
mod local;
mod remote;
pub mod retry;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::EmbeddingConfig;

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalProvider;
pub use remote::OpenAIProvider;

/// Turns text into fixed-length vectors.
///
/// Implementations return one vector per input, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Backend name (`"local"`, `"openai"`).
    fn provider_name(&self) -> &str;

    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;

    /// Stable identity stamped onto every index this provider builds.
    fn identity(&self) -> String {
        format!("{}:{}", self.provider_name(), self.model_name())
    }

    /// Prepare the backend ahead of the first real call (load a model,
    /// open a connection). The default does nothing.
    async fn warm_up(&self) -> Result<()> {
        Ok(())
    }

    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let results = provider.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

/// Scale `v` to unit length in place. Zero vectors are left as they are.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Create the [`EmbeddingProvider`] named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"local"` | `LocalProvider` (needs feature `local-embeddings-fastembed`) |
/// | `"openai"` | [`OpenAIProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "Local embedding provider requires --features local-embeddings-fastembed"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
