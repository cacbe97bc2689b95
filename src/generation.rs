//! Text-generation collaborator.
//!
//! [`TextGenerator`] turns a chat transcript into an answer. The bundled
//! implementation talks to an OpenAI-compatible `/chat/completions`
//! endpoint; tests and alternative backends implement the trait directly.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::models::ChatMessage;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    /// Produce the assistant reply for `messages`.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Chat completions over the OpenAI HTTP API.
pub struct OpenAIChat {
    model: String,
    temperature: f32,
    api_base: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAIChat {
    /// The API key is read from `OPENAI_API_KEY`; without one the server
    /// still starts and `complete` reports the missing key.
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!("OPENAI_API_KEY not set; chat requests will fail");
        }

        // Outer bound only; the pipeline enforces the real budget.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.saturating_mul(2)))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let Some(api_key) = &self.api_key else {
            bail!("OPENAI_API_KEY environment variable not set");
        };

        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": messages,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .context("chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("chat completion error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_completion(&json)
    }
}

fn parse_completion(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|c| c.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid chat completion response: missing content"))
}

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn TextGenerator>> {
    Ok(Arc::new(OpenAIChat::new(config)?))
}
