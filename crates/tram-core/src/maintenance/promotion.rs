//! Promotion engine: lifts frequently-used memories back up the tiers.
//!
//! Under the active promotion profile `{uses, days}`:
//! - COLD -> WARM at `use_count >= uses` and `|use_days| >= days`
//! - WARM -> HOT under the stricter bar `use_count >= 2*uses` and
//!   `|use_days| >= days + 1`
//!
//! Runs after the decay engine within a cycle so demotions based on stale
//! state are not immediately reverted by promotions on fresh access stats.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::memory::{AuditAction, Memory, Tier};
use crate::profiles::{ProfileResolver, PromotionThresholds};
use crate::storage::Store;

/// Result of one promotion run
#[derive(Debug, Clone, Copy, Default)]
pub struct PromotionOutcome {
    pub examined: usize,
    pub promoted: usize,
}

/// Periodically promotes COLD -> WARM and WARM -> HOT
pub struct PromotionEngine {
    store: Arc<Store>,
    resolver: Arc<ProfileResolver>,
}

impl PromotionEngine {
    pub fn new(store: Arc<Store>, resolver: Arc<ProfileResolver>) -> Self {
        Self { store, resolver }
    }

    fn qualifies_cold_to_warm(memory: &Memory, thresholds: &PromotionThresholds) -> bool {
        memory.use_count >= thresholds.uses && memory.use_days.len() as i64 >= thresholds.days
    }

    fn qualifies_warm_to_hot(memory: &Memory, thresholds: &PromotionThresholds) -> bool {
        memory.use_count >= thresholds.uses * 2
            && memory.use_days.len() as i64 >= thresholds.days + 1
    }

    /// Run one promotion pass. Per-item failures are logged, not fatal.
    pub fn run(&self, _now: DateTime<Utc>) -> Result<PromotionOutcome> {
        let thresholds = self.resolver.resolve_promotion(None).value;
        let memories = self.store.all_memories()?;
        let mut outcome = PromotionOutcome {
            examined: memories.len(),
            ..Default::default()
        };

        for memory in memories {
            if memory.do_not_inject {
                continue;
            }
            let target = match memory.tier {
                Tier::Cold if Self::qualifies_cold_to_warm(&memory, &thresholds) => Tier::Warm,
                Tier::Warm if Self::qualifies_warm_to_hot(&memory, &thresholds) => Tier::Hot,
                _ => continue,
            };
            match self
                .store
                .change_tier(&memory.id, target, AuditAction::Promote)
            {
                Ok(()) => {
                    tracing::debug!("promoted {} {} -> {}", memory.id, memory.tier, target);
                    outcome.promoted += 1;
                }
                Err(e) => tracing::warn!("promotion failed for {}: {e}", memory.id),
            }
        }

        Ok(outcome)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use chrono::{Duration, NaiveDate};
    use tempfile::TempDir;

    fn engine() -> (TempDir, Arc<Store>, PromotionEngine) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(Some(dir.path().join("test.db"))).unwrap());
        let resolver = Arc::new(ProfileResolver::new(Config::default(), &store).unwrap());
        let engine = PromotionEngine::new(store.clone(), resolver);
        (dir, store, engine)
    }

    fn used_memory(tier: Tier, use_count: i64, distinct_days: u32) -> Memory {
        let mut m = Memory::new("used memory");
        m.tier = tier;
        m.use_count = use_count;
        m.created_at = Utc::now() - Duration::days(30);
        let base = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        m.use_days = (0..distinct_days)
            .map(|i| base + Duration::days(i as i64))
            .collect();
        m
    }

    #[test]
    fn test_cold_to_warm_at_selective_thresholds() {
        // Builtin promotion profile is selective {uses: 3, days: 2}
        let (_dir, store, engine) = engine();

        let qualifies = used_memory(Tier::Cold, 3, 2);
        let too_few_uses = used_memory(Tier::Cold, 2, 2);
        let too_few_days = used_memory(Tier::Cold, 5, 1);
        for m in [&qualifies, &too_few_uses, &too_few_days] {
            store.insert_memory(m).unwrap();
        }

        let outcome = engine.run(Utc::now()).unwrap();
        assert_eq!(outcome.promoted, 1);
        assert_eq!(store.get_memory(&qualifies.id).unwrap().unwrap().tier, Tier::Warm);
        assert_eq!(store.get_memory(&too_few_uses.id).unwrap().unwrap().tier, Tier::Cold);
        assert_eq!(store.get_memory(&too_few_days.id).unwrap().unwrap().tier, Tier::Cold);

        let audit = store.query_audit(&qualifies.id).unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, AuditAction::Promote);
    }

    #[test]
    fn test_warm_to_hot_is_stricter() {
        let (_dir, store, engine) = engine();

        // Meets the COLD->WARM bar but not the WARM->HOT one
        let modest = used_memory(Tier::Warm, 3, 2);
        // Meets the stricter bar: 2*3 uses, 2+1 days
        let heavy = used_memory(Tier::Warm, 6, 3);
        store.insert_memory(&modest).unwrap();
        store.insert_memory(&heavy).unwrap();

        engine.run(Utc::now()).unwrap();
        assert_eq!(store.get_memory(&modest.id).unwrap().unwrap().tier, Tier::Warm);
        assert_eq!(store.get_memory(&heavy.id).unwrap().unwrap().tier, Tier::Hot);
    }

    #[test]
    fn test_forgotten_not_promoted() {
        let (_dir, store, engine) = engine();
        let mut m = used_memory(Tier::Cold, 10, 5);
        m.do_not_inject = true;
        store.insert_memory(&m).unwrap();

        let outcome = engine.run(Utc::now()).unwrap();
        assert_eq!(outcome.promoted, 0);
        assert_eq!(store.get_memory(&m.id).unwrap().unwrap().tier, Tier::Cold);
    }

    #[test]
    fn test_hot_and_archive_untouched() {
        let (_dir, store, engine) = engine();
        let hot = used_memory(Tier::Hot, 50, 10);
        let archived = used_memory(Tier::Archive, 50, 10);
        store.insert_memory(&hot).unwrap();
        store.insert_memory(&archived).unwrap();

        let outcome = engine.run(Utc::now()).unwrap();
        assert_eq!(outcome.promoted, 0);
        assert_eq!(store.get_memory(&archived.id).unwrap().unwrap().tier, Tier::Archive);
    }
}
