//! OpenAI-compatible remote embedding backend.
//!
//! Calls `POST {api_base}/embeddings` in batches, retrying rate limits and
//! server errors with exponential backoff and pausing between batches.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use super::retry::{embed_in_batches, BackoffPolicy, EmbedCallError};
use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;

const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Embedding provider using the OpenAI embeddings API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
    batch_size: usize,
    pause: Duration,
    policy: BackoffPolicy,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `OPENAI_API_KEY` is not set or the HTTP client
    /// cannot be built.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ => bail!("OPENAI_API_KEY environment variable not set"),
        };
        Self::with_api_key(config, api_key)
    }

    /// Like [`OpenAIProvider::new`] with an explicit key.
    pub fn with_api_key(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let dims = config.dims.unwrap_or_else(|| default_dims(&model));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            client,
            batch_size: config.batch_size,
            pause: Duration::from_millis(config.sleep_ms),
            policy: BackoffPolicy::from_config(config),
        })
    }

    /// One request for one batch, without retries.
    async fn request(&self, batch: Vec<String>) -> Result<Vec<Vec<f32>>, EmbedCallError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": batch,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedCallError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedCallError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EmbedCallError::Malformed(e.to_string()))?;
        parse_openai_response(&json)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        embed_in_batches(texts, self.batch_size, &self.policy, self.pause, |batch| {
            self.request(batch)
        })
        .await
    }
}

fn default_dims(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        _ => 1536,
    }
}

/// Extract `data[].embedding`, ordered by each item's `index` field.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedCallError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbedCallError::Malformed("missing data array".to_string()))?;

    let mut rows = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EmbedCallError::Malformed("missing embedding".to_string()))?;

        let mut vec = Vec::with_capacity(embedding.len());
        for v in embedding {
            let f = v
                .as_f64()
                .ok_or_else(|| EmbedCallError::Malformed("non-numeric embedding".to_string()))?;
            vec.push(f as f32);
        }
        rows.push((index, vec));
    }

    rows.sort_by_key(|(index, _)| *index);
    Ok(rows.into_iter().map(|(_, v)| v).collect())
}
