//! Hybrid Search (lexical + vector)
//!
//! Combines BM25-style lexical scores (normalized by the best hit) and
//! vector similarities into one candidate list via a weighted sum. A missing
//! component contributes 0, so a lexical-only or vector-only result set
//! degrades gracefully.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::storage::LexicalHit;

/// Weights for the combined score; must sum to 1 within tolerance
#[derive(Debug, Clone, Copy)]
pub struct HybridWeights {
    pub vector: f64,
    pub text: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            vector: 0.7,
            text: 0.3,
        }
    }
}

impl HybridWeights {
    pub fn new(vector: f64, text: f64) -> Result<Self> {
        if vector < 0.0 || text < 0.0 || ((vector + text) - 1.0).abs() > 0.01 {
            return Err(Error::InvalidInput(format!(
                "hybrid weights must be non-negative and sum to 1: ({vector}, {text})"
            )));
        }
        Ok(Self { vector, text })
    }
}

/// One hybrid candidate with both component scores
#[derive(Debug, Clone)]
pub struct HybridHit {
    pub id: String,
    pub text_score: f64,
    pub vector_score: f64,
    pub combined: f64,
}

/// Merge lexical and vector results into a deduplicated, combined-score
/// ordered candidate list of at most `limit` hits.
///
/// Lexical scores are normalized into [0, 1] by the best lexical hit; vector
/// similarities are already in [0, 1].
pub fn combine(
    lexical: &[LexicalHit],
    vector: &[(String, f32)],
    weights: HybridWeights,
    limit: usize,
) -> Vec<HybridHit> {
    let mut by_id: HashMap<String, (f64, f64)> = HashMap::new();

    let max_lexical = lexical
        .iter()
        .map(|hit| hit.score)
        .fold(0.0_f64, f64::max)
        .max(f64::EPSILON);
    for hit in lexical {
        let entry = by_id.entry(hit.id.clone()).or_default();
        entry.0 = (hit.score / max_lexical).clamp(0.0, 1.0);
    }

    for (id, similarity) in vector {
        let entry = by_id.entry(id.clone()).or_default();
        entry.1 = (*similarity as f64).clamp(0.0, 1.0);
    }

    let mut hits: Vec<HybridHit> = by_id
        .into_iter()
        .map(|(id, (text_score, vector_score))| HybridHit {
            combined: weights.vector * vector_score + weights.text * text_score,
            id,
            text_score,
            vector_score,
        })
        .collect();

    hits.sort_by(|a, b| {
        b.combined
            .partial_cmp(&a.combined)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(limit);
    hits
}

// ============================================================================
// TESTS
// ============================================================================
