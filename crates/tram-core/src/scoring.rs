//! Composite scoring.
//!
//! `score = W_sim * similarity + W_rec * recency + W_freq * frequency`
//!
//! - recency decays exponentially with age by the memory type's half-life,
//!   halved again for COLD memories; pinned memories bypass decay entirely
//! - frequency is log-scaled use_count, saturating around heavy use

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::memory::{Memory, Tier};

/// use_count at which the frequency component saturates
pub const USE_COUNT_REF: f64 = 100.0;

/// Recency multiplier applied to COLD memories
const COLD_RECENCY_FACTOR: f64 = 0.5;

/// Component weights; non-negative, summing to 1
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub similarity: f64,
    pub recency: f64,
    pub frequency: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            similarity: 0.5,
            recency: 0.3,
            frequency: 0.2,
        }
    }
}

impl ScoreWeights {
    pub fn new(similarity: f64, recency: f64, frequency: f64) -> Result<Self> {
        let sum = similarity + recency + frequency;
        if similarity < 0.0 || recency < 0.0 || frequency < 0.0 || (sum - 1.0).abs() > 0.01 {
            return Err(Error::InvalidInput(format!(
                "score weights must be non-negative and sum to 1: ({similarity}, {recency}, {frequency})"
            )));
        }
        Ok(Self {
            similarity,
            recency,
            frequency,
        })
    }
}

/// Full scoring breakdown returned by `explain`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub score: f64,
    pub similarity_component: f64,
    pub recency_component: f64,
    pub frequency_component: f64,
    /// Age used for the recency component, in days
    pub age_days: f64,
    /// Half-life applied, in days
    pub half_life_days: f64,
    /// Whether the memory is eligible for injection
    pub eligible: bool,
    pub pinned: bool,
    pub tier: Tier,
}

/// Maps `(memory, similarity, now)` to a composite score in [0, 1]
#[derive(Debug, Clone, Copy, Default)]
pub struct Scorer {
    pub weights: ScoreWeights,
}

impl Scorer {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    /// Composite score in [0, 1]
    pub fn score(&self, memory: &Memory, similarity: f64, now: DateTime<Utc>) -> f64 {
        self.breakdown(memory, similarity, now).score
    }

    /// Score with every component exposed
    pub fn breakdown(&self, memory: &Memory, similarity: f64, now: DateTime<Utc>) -> ScoreBreakdown {
        let similarity = similarity.clamp(0.0, 1.0);
        let age_days = ((now - memory.last_accessed_at).num_seconds() as f64 / 86_400.0).max(0.0);
        let half_life_days = memory.memory_type.half_life_days();

        let recency = if memory.pinned {
            1.0
        } else {
            let decayed = (-age_days / half_life_days).exp();
            if memory.tier == Tier::Cold {
                decayed * COLD_RECENCY_FACTOR
            } else {
                decayed
            }
        };

        let frequency =
            ((1.0 + memory.use_count.max(0) as f64).ln() / (1.0 + USE_COUNT_REF).ln()).min(1.0);

        let score = (self.weights.similarity * similarity
            + self.weights.recency * recency
            + self.weights.frequency * frequency)
            .clamp(0.0, 1.0);

        ScoreBreakdown {
            score,
            similarity_component: similarity,
            recency_component: recency,
            frequency_component: frequency,
            age_days,
            half_life_days,
            eligible: memory.injectable(),
            pinned: memory.pinned,
            tier: memory.tier,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
