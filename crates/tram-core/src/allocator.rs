//! Injection allocation under tier budgets.
//!
//! Given scored candidates, selects the final ordered injection set: each
//! budget bucket gets `floor(max_items * pct / 100)` slots, the pinned
//! bucket draws from pinned memories across all tiers, the others from
//! non-pinned memories of the matching tier. Unfilled slots never spill.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::memory::{Memory, Tier};
use crate::profiles::TierBudgets;
use crate::scoring::Scorer;

/// A retrieval candidate with its query similarity
#[derive(Debug, Clone)]
pub struct Candidate {
    pub memory: Memory,
    pub similarity: f64,
}

/// A selected candidate with its composite score
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub memory: Memory,
    pub similarity: f64,
    pub score: f64,
}

/// How many memories each bucket contributed, plus exclusion accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationBreakdown {
    pub pinned: usize,
    pub hot: usize,
    pub warm: usize,
    pub cold: usize,
    pub archive: usize,
    pub total_considered: usize,
    pub excluded_count: usize,
}

impl AllocationBreakdown {
    pub fn selected_total(&self) -> usize {
        self.pinned + self.hot + self.warm + self.cold + self.archive
    }
}

/// Allocation result: the injection set ordered by composite score
#[derive(Debug, Clone)]
pub struct Allocation {
    pub selected: Vec<ScoredCandidate>,
    pub breakdown: AllocationBreakdown,
}

/// Budget-driven injection selector
#[derive(Debug, Clone, Copy, Default)]
pub struct Allocator {
    pub scorer: Scorer,
}

impl Allocator {
    pub fn new(scorer: Scorer) -> Self {
        Self { scorer }
    }

    /// Select at most `max_items` candidates under `budgets`.
    ///
    /// Exclusions before allocation: forgotten memories always; ARCHIVE
    /// memories unless the archive bucket has budget. Ties on score break by
    /// (created_at ascending, id ascending) so allocation is deterministic.
    pub fn allocate(
        &self,
        candidates: Vec<Candidate>,
        max_items: usize,
        budgets: &TierBudgets,
        now: DateTime<Utc>,
    ) -> Allocation {
        let total_considered = candidates.len();

        let mut eligible: Vec<ScoredCandidate> = Vec::with_capacity(candidates.len());
        let mut excluded_count = 0;
        for candidate in candidates {
            let excluded = candidate.memory.do_not_inject
                || (candidate.memory.tier == Tier::Archive && budgets.archive == 0);
            if excluded {
                excluded_count += 1;
                continue;
            }
            let score = self.scorer.score(&candidate.memory, candidate.similarity, now);
            eligible.push(ScoredCandidate {
                score,
                similarity: candidate.similarity,
                memory: candidate.memory,
            });
        }

        let slots = |pct: u32| (max_items * pct as usize) / 100;

        let mut selected: Vec<ScoredCandidate> = Vec::new();
        let mut take_bucket = |filter: &dyn Fn(&ScoredCandidate) -> bool, slot_count: usize| {
            let mut bucket: Vec<&ScoredCandidate> = eligible
                .iter()
                .filter(|c| filter(c) && !selected.iter().any(|s| s.memory.id == c.memory.id))
                .collect();
            bucket.sort_by(|a, b| compare_candidates(a, b));
            selected.extend(bucket.into_iter().take(slot_count).cloned());
        };

        take_bucket(&|c| c.memory.pinned, slots(budgets.pinned));
        take_bucket(
            &|c| !c.memory.pinned && c.memory.tier == Tier::Hot,
            slots(budgets.hot),
        );
        take_bucket(
            &|c| !c.memory.pinned && c.memory.tier == Tier::Warm,
            slots(budgets.warm),
        );
        take_bucket(
            &|c| !c.memory.pinned && c.memory.tier == Tier::Cold,
            slots(budgets.cold),
        );
        take_bucket(
            &|c| !c.memory.pinned && c.memory.tier == Tier::Archive,
            slots(budgets.archive),
        );

        // Final ordering is by overall composite score, not by bucket
        selected.sort_by(compare_candidates);
        selected.truncate(max_items);

        // Bucket accounting over what actually survived the cap, so the
        // counts always sum to the returned size
        let mut breakdown = AllocationBreakdown {
            total_considered,
            excluded_count,
            ..Default::default()
        };
        for candidate in &selected {
            if candidate.memory.pinned {
                breakdown.pinned += 1;
            } else {
                match candidate.memory.tier {
                    Tier::Hot => breakdown.hot += 1,
                    Tier::Warm => breakdown.warm += 1,
                    Tier::Cold => breakdown.cold += 1,
                    Tier::Archive => breakdown.archive += 1,
                }
            }
        }

        Allocation {
            selected,
            breakdown,
        }
    }
}

fn compare_candidates(a: &ScoredCandidate, b: &ScoredCandidate) -> std::cmp::Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.memory.created_at.cmp(&b.memory.created_at))
        .then_with(|| a.memory.id.cmp(&b.memory.id))
}

// ============================================================================
// TESTS
// ============================================================================
