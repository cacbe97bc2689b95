//! Backoff policy and batch driver for remote embedding calls.
//!
//! The network call is injected as a closure so the retry schedule can be
//! tested without a server. Only HTTP 429 and 5xx are retried; everything
//! else fails the whole embedding call on the first occurrence.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// Exponential backoff: `min(base × 2^attempt, max_delay)`, at most `max_retries` retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl BackoffPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            base: Duration::from_millis(config.sleep_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
            max_retries: config.max_retries,
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max_delay)
    }
}

/// Failure of a single remote embedding request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedCallError {
    /// The service answered with a non-success status.
    Status { status: u16, body: String },
    /// The request never produced a response.
    Transport(String),
    /// The response could not be understood.
    Malformed(String),
}

impl EmbedCallError {
    /// Rate limiting and server errors are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            EmbedCallError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}

impl std::fmt::Display for EmbedCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbedCallError::Status { status, body } => {
                write!(f, "embedding API error {}: {}", status, body)
            }
            EmbedCallError::Transport(e) => write!(f, "embedding request failed: {}", e),
            EmbedCallError::Malformed(e) => write!(f, "invalid embedding response: {}", e),
        }
    }
}

impl std::error::Error for EmbedCallError {}

/// Run `call` until it succeeds, retrying transient failures per `policy`.
pub async fn call_with_retry<T, F, Fut>(policy: &BackoffPolicy, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EmbedCallError>>,
{
    let mut attempt = 0u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                let wait = policy.delay(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "embed retry"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Embed `texts` in batches of `batch_size`, pausing `pause` after every
/// successful batch. Output order matches input order.
pub async fn embed_in_batches<F, Fut>(
    texts: &[String],
    batch_size: usize,
    policy: &BackoffPolicy,
    pause: Duration,
    mut call: F,
) -> Result<Vec<Vec<f32>>>
where
    F: FnMut(Vec<String>) -> Fut,
    Fut: Future<Output = Result<Vec<Vec<f32>>, EmbedCallError>>,
{
    let mut out = Vec::with_capacity(texts.len());

    for batch in texts.chunks(batch_size.max(1)) {
        let vectors = call_with_retry(policy, || call(batch.to_vec())).await?;
        if vectors.len() != batch.len() {
            return Err(EmbedCallError::Malformed(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                vectors.len()
            ))
            .into());
        }
        out.extend(vectors);
        tokio::time::sleep(pause).await;
    }

    Ok(out)
}
