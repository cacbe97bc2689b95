//! Core data models shared by ingest, storage, retrieval, and the HTTP layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One indexed window of a device manual.
///
/// Serialized as `{ id, deviceId, text, embedding }`, the on-disk index format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// `"<deviceId>-<ordinal>"`; the ordinal is the chunk's position in the source text.
    pub id: String,
    pub device_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

impl Chunk {
    pub fn chunk_id(device_id: &str, ordinal: usize) -> String {
        format!("{}-{}", device_id, ordinal)
    }
}

/// A device's chunks in source order.
pub type DeviceIndex = Vec<Chunk>;

/// Records which embedder built an index, so queries from a different
/// provider or dimensionality can be refused instead of scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStamp {
    /// Provider identity, e.g. `"local:all-minilm-l6-v2"`.
    pub embedder: String,
    pub dims: usize,
    pub chunks: usize,
    pub built_at: DateTime<Utc>,
}

/// A chunk scored against a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedChunk {
    pub id: String,
    pub text: String,
    pub score: f32,
}

/// The id/score pair returned to callers alongside an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopDoc {
    pub id: String,
    pub score: f32,
}

impl From<&RankedChunk> for TopDoc {
    fn from(r: &RankedChunk) -> Self {
        Self {
            id: r.id.clone(),
            score: r.score,
        }
    }
}

/// One turn in a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Result of answering a question for a device.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub top_docs: Vec<TopDoc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_serializes_with_camel_case_device_id() {
        let chunk = Chunk {
            id: Chunk::chunk_id("pump-7", 3),
            device_id: "pump-7".to_string(),
            text: "Prime the line.".to_string(),
            embedding: vec![0.5, -0.25],
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["id"], "pump-7-3");
        assert_eq!(json["deviceId"], "pump-7");
        assert_eq!(json["embedding"][1], -0.25);
        assert!(json.get("device_id").is_none());
    }
}
