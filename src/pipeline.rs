//! Question answering over a device manual.
//!
//! [`QueryPipeline::answer`] makes sure the device has an index (building it
//! if needed), embeds the question with the same provider that built the
//! index, ranks the chunks, and asks the generator to answer from the top
//! excerpts only. The generator call runs under a fixed time budget.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::embedding::embed_query;
use crate::generation::TextGenerator;
use crate::ingest::Ingestor;
use crate::models::{Answer, ChatMessage, DeviceIndex, RankedChunk, TopDoc};
use crate::retrieve::rank;

pub const SYSTEM_PROMPT: &str = "You are a clinical device assistant. Answer ONLY from the provided \
manual excerpts. If unsure or the answer is not present, say you do not have that information in \
the manual. Use clear, step-by-step instructions. Include specific warnings if present. When \
relevant, cite like [Doc N].";

/// Failures specific to answering a question.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The device's index holds no chunks, so there is nothing to answer from.
    EmptyIndex { device_id: String },
    /// The index was built by a different embedder than the active one.
    IndexMismatch {
        device_id: String,
        index_embedder: String,
        index_dims: usize,
        query_embedder: String,
        query_dims: usize,
    },
    /// The generator did not answer within the budget.
    GenerationTimeout { after: Duration },
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::EmptyIndex { device_id } => write!(f, "Index missing for {}", device_id),
            QueryError::IndexMismatch {
                device_id,
                index_embedder,
                index_dims,
                query_embedder,
                query_dims,
            } => write!(
                f,
                "index for {} was built with {} ({} dims) but queries use {} ({} dims); re-ingest the device",
                device_id, index_embedder, index_dims, query_embedder, query_dims
            ),
            QueryError::GenerationTimeout { after } => {
                write!(f, "text generation timed out after {}s", after.as_secs())
            }
        }
    }
}

impl std::error::Error for QueryError {}

pub struct QueryPipeline {
    ingestor: Ingestor,
    generator: Arc<dyn TextGenerator>,
    top_k: usize,
    timeout: Duration,
}

impl QueryPipeline {
    pub fn new(ingestor: Ingestor, generator: Arc<dyn TextGenerator>) -> Self {
        let top_k = ingestor.config().retrieval.top_k;
        let timeout = Duration::from_secs(ingestor.config().generation.timeout_secs);
        Self {
            ingestor,
            generator,
            top_k,
            timeout,
        }
    }

    /// Override the generation budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Answer `question` about `device_id`, optionally continuing `history`.
    pub async fn answer(
        &self,
        device_id: &str,
        question: &str,
        history: &[ChatMessage],
    ) -> Result<Answer> {
        let index = self.ingestor.ensure_index(device_id).await?;
        if index.is_empty() {
            return Err(QueryError::EmptyIndex {
                device_id: device_id.to_string(),
            }
            .into());
        }
        self.check_embedder(device_id)?;

        let query = embed_query(self.ingestor.provider().as_ref(), question).await?;
        check_dims(device_id, &index, &query, &self.ingestor.provider().identity())?;

        let ranked = rank(&index, &query, self.top_k);
        tracing::debug!(
            device = device_id,
            best = ranked.first().map(|r| r.score).unwrap_or(0.0),
            "retrieved excerpts"
        );

        let messages = build_messages(device_id, question, &ranked, history);
        let answer = match tokio::time::timeout(self.timeout, self.generator.complete(&messages)).await
        {
            Ok(result) => result?,
            // The elapsed timeout drops the request future, cancelling the call.
            Err(_) => {
                return Err(QueryError::GenerationTimeout {
                    after: self.timeout,
                }
                .into())
            }
        };

        Ok(Answer {
            answer,
            top_docs: ranked.iter().map(TopDoc::from).collect(),
        })
    }

    fn check_embedder(&self, device_id: &str) -> Result<()> {
        let Some(stamp) = self.ingestor.store().stamp(device_id)? else {
            return Ok(());
        };
        let provider = self.ingestor.provider();
        let identity = provider.identity();
        if stamp.embedder != identity {
            return Err(QueryError::IndexMismatch {
                device_id: device_id.to_string(),
                index_embedder: stamp.embedder,
                index_dims: stamp.dims,
                query_embedder: identity,
                query_dims: provider.dims(),
            }
            .into());
        }
        Ok(())
    }
}

/// The index's vectors must have the query's length. This is the only
/// check unstamped indices get.
fn check_dims(device_id: &str, index: &DeviceIndex, query: &[f32], identity: &str) -> Result<()> {
    let index_dims = index.first().map(|c| c.embedding.len()).unwrap_or(0);
    if index_dims != query.len() {
        return Err(QueryError::IndexMismatch {
            device_id: device_id.to_string(),
            index_embedder: "unknown".to_string(),
            index_dims,
            query_embedder: identity.to_string(),
            query_dims: query.len(),
        }
        .into());
    }
    Ok(())
}

/// Numbered, scored excerpts separated by blank lines.
pub fn format_context(ranked: &[RankedChunk]) -> String {
    ranked
        .iter()
        .enumerate()
        .map(|(i, r)| format!("# Doc {} (score {:.3})\n{}", i + 1, r.score, r.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// System prompt, prior turns, then the question with its excerpts.
pub fn build_messages(
    device_id: &str,
    question: &str,
    ranked: &[RankedChunk],
    history: &[ChatMessage],
) -> Vec<ChatMessage> {
    let user = format!(
        "Device: {}\nUser question: {}\n\nManual excerpts:\n{}",
        device_id,
        question,
        format_context(ranked)
    );

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(SYSTEM_PROMPT));
    messages.extend(history.iter().cloned());
    messages.push(ChatMessage::user(user));
    messages
}
