//! Similarity ranking over a device index.
//!
//! Brute-force cosine similarity against every chunk; manuals are small
//! enough that an approximate index would not pay for itself.

use crate::models::{Chunk, RankedChunk};

/// Number of excerpts handed to the generator by default.
pub const DEFAULT_TOP_K: usize = 6;

/// Added to the norm product so zero vectors score 0 instead of NaN.
const EPSILON: f32 = 1e-8;

/// Cosine similarity between two embedding vectors.
///
/// ```text
///             a · b
/// cos(θ) = ─────────────
///          ‖a‖ × ‖b‖ + ε
/// ```
///
/// Vectors of different lengths are compared over their common prefix;
/// callers reject dimension mismatches before ranking.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt() + EPSILON)
}

/// Score every chunk against `query` and return the best `k`, highest first.
///
/// The sort is stable, so equal scores keep index (document) order.
pub fn rank(index: &[Chunk], query: &[f32], k: usize) -> Vec<RankedChunk> {
    let mut ranked: Vec<RankedChunk> = index
        .iter()
        .map(|chunk| RankedChunk {
            id: chunk.id.clone(),
            text: chunk.text.clone(),
            score: cosine_similarity(query, &chunk.embedding),
        })
        .collect();

    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.truncate(k);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(ordinal: usize, embedding: Vec<f32>) -> Chunk {
        Chunk {
            id: Chunk::chunk_id("dev", ordinal),
            device_id: "dev".to_string(),
            text: format!("text {}", ordinal),
            embedding,
        }
    }

    #[test]
    fn identical_vectors_score_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_is_symmetric() {
        let a = vec![0.3, -1.2, 4.0];
        let b = vec![2.0, 0.5, -0.7];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_scores_zero_not_nan() {
        let sim = cosine_similarity(&[0.0, 0.0, 0.0], &[1.0, 2.0, 3.0]);
        assert_eq!(sim, 0.0);
        assert!(!sim.is_nan());
    }

    #[test]
    fn rank_sorts_descending_and_truncates() {
        let index = vec![
            chunk(0, vec![0.0, 1.0]),
            chunk(1, vec![1.0, 0.0]),
            chunk(2, vec![1.0, 1.0]),
            chunk(3, vec![-1.0, 0.0]),
        ];
        let ranked = rank(&index, &[1.0, 0.0], 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].id, "dev-1");
        assert_eq!(ranked[1].id, "dev-2");
        assert!(ranked[0].score >= ranked[1].score);
    }

    #[test]
    fn rank_returns_everything_for_small_index() {
        let index = vec![chunk(0, vec![1.0]), chunk(1, vec![0.5])];
        assert_eq!(rank(&index, &[1.0], DEFAULT_TOP_K).len(), 2);
        assert!(rank(&[], &[1.0], DEFAULT_TOP_K).is_empty());
    }

    #[test]
    fn ties_keep_index_order() {
        let index = vec![
            chunk(0, vec![0.0, 1.0]),
            chunk(1, vec![2.0, 0.0]),
            chunk(2, vec![0.0, 3.0]),
            chunk(3, vec![5.0, 0.0]),
        ];
        let ranked = rank(&index, &[1.0, 0.0], 4);
        let ids: Vec<&str> = ranked.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["dev-1", "dev-3", "dev-0", "dev-2"]);
    }
}
