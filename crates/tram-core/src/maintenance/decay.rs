//! Decay engine: demotes stale memories down the tier chain.
//!
//! TTLs resolve per memory type through the override chain: per-type config
//! override -> active decay profile (only when explicitly set) -> built-in
//! defaults (hot 72h, warm 60d, cold 180d). A TTL of null/never pins a
//! memory to its tier. Pinned memories are never demoted.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::{builtin_decay_ttls, Config};
use crate::duration::{ttl_ms, ImpliedUnit, TtlSpec};
use crate::error::Result;
use crate::memory::{AuditAction, MemoryType, Tier};
use crate::profiles::{DecayTtlSpecSet, ProfileResolver};
use crate::storage::Store;

/// Meta key recording the end of the last decay run
pub const LAST_DECAY_RUN_KEY: &str = "last_decay_run";

/// Resolved per-tier TTLs in milliseconds; None = never demote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierTtls {
    pub hot: Option<i64>,
    pub warm: Option<i64>,
    pub cold: Option<i64>,
}

impl TierTtls {
    fn for_tier(&self, tier: Tier) -> Option<i64> {
        match tier {
            Tier::Hot => self.hot,
            Tier::Warm => self.warm,
            Tier::Cold => self.cold,
            Tier::Archive => None,
        }
    }
}

/// Result of one decay run
#[derive(Debug, Clone, Copy, Default)]
pub struct DecayOutcome {
    pub examined: usize,
    /// Total demotion steps taken (a memory may step more than once)
    pub demoted: usize,
}

/// Periodically demotes HOT -> WARM -> COLD -> ARCHIVE
pub struct DecayEngine {
    store: Arc<Store>,
    resolver: Arc<ProfileResolver>,
    config: Arc<Config>,
}

impl DecayEngine {
    pub fn new(store: Arc<Store>, resolver: Arc<ProfileResolver>, config: Arc<Config>) -> Self {
        Self {
            store,
            resolver,
            config,
        }
    }

    /// Resolve the effective TTLs for one memory type
    pub fn resolve_ttls(&self, memory_type: MemoryType) -> Result<TierTtls> {
        let override_set = self.config.decay.overrides.get(memory_type.as_str());
        let profile = self.resolver.resolve_decay(None);
        let profile_set: Option<&DecayTtlSpecSet> =
            profile.explicitly_set().then_some(&profile.value);
        let builtin = builtin_decay_ttls();

        let pick = |field: fn(&DecayTtlSpecSet) -> &Option<TtlSpec>| -> Option<TtlSpec> {
            override_set
                .and_then(|s| field(s).clone())
                .or_else(|| profile_set.and_then(|s| field(s).clone()))
                .or_else(|| field(&builtin).clone())
        };

        Ok(TierTtls {
            hot: resolve_field(pick(|s| &s.hot), ImpliedUnit::Hours)?,
            warm: resolve_field(pick(|s| &s.warm), ImpliedUnit::Days)?,
            cold: resolve_field(pick(|s| &s.cold), ImpliedUnit::Days)?,
        })
    }

    /// Run one decay pass over every memory.
    ///
    /// A memory staler than several TTLs cascades through multiple tiers in
    /// one run (one audit entry per step), which makes the run idempotent:
    /// repeating it with no intervening access changes nothing. Per-item
    /// failures are logged and do not abort the pass.
    pub fn run(&self, now: DateTime<Utc>) -> Result<DecayOutcome> {
        let memories = self.store.all_memories()?;
        let mut outcome = DecayOutcome {
            examined: memories.len(),
            ..Default::default()
        };

        for memory in memories {
            if memory.pinned || memory.tier == Tier::Archive {
                continue;
            }

            let ttls = match self.resolve_ttls(memory.memory_type) {
                Ok(ttls) => ttls,
                Err(e) => {
                    tracing::warn!("ttl resolution failed for {}: {e}", memory.id);
                    continue;
                }
            };

            let age_ms = (now - memory.last_accessed_at).num_milliseconds();
            let mut tier = memory.tier;

            while let Some(ttl) = ttls.for_tier(tier) {
                if age_ms <= ttl {
                    break;
                }
                let Some(next) = tier.demoted() else {
                    break;
                };
                match self.store.change_tier(&memory.id, next, AuditAction::Demote) {
                    Ok(()) => {
                        tracing::debug!(
                            "demoted {} {} -> {} (idle {}ms > ttl {}ms)",
                            memory.id,
                            tier,
                            next,
                            age_ms,
                            ttl
                        );
                        outcome.demoted += 1;
                        tier = next;
                    }
                    Err(e) => {
                        tracing::warn!("demotion failed for {}: {e}", memory.id);
                        break;
                    }
                }
            }
        }

        self.store.meta_set(LAST_DECAY_RUN_KEY, &now.to_rfc3339())?;
        Ok(outcome)
    }
}

fn resolve_field(spec: Option<TtlSpec>, implied: ImpliedUnit) -> Result<Option<i64>> {
    match spec {
        Some(spec) => ttl_ms(&spec, implied),
        None => Ok(None),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Memory;
    use chrono::Duration;
    use tempfile::TempDir;

    fn engine_with(config: Config) -> (TempDir, Arc<Store>, DecayEngine) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(Some(dir.path().join("test.db"))).unwrap());
        let resolver = Arc::new(ProfileResolver::new(config.clone(), &store).unwrap());
        let engine = DecayEngine::new(store.clone(), resolver, Arc::new(config));
        (dir, store, engine)
    }

    fn stale_memory(tier: Tier, idle: Duration) -> Memory {
        let now = Utc::now();
        let mut m = Memory::new("aging memory");
        m.tier = tier;
        m.created_at = now - idle - Duration::hours(1);
        m.last_accessed_at = now - idle;
        m
    }

    #[test]
    fn test_builtin_ttls() {
        let (_dir, _store, engine) = engine_with(Config::default());
        let ttls = engine.resolve_ttls(MemoryType::Factual).unwrap();
        assert_eq!(ttls.hot, Some(72 * 3_600_000));
        assert_eq!(ttls.warm, Some(60 * 86_400_000));
        assert_eq!(ttls.cold, Some(180 * 86_400_000));
    }

    #[test]
    fn test_per_type_override_wins() {
        let mut config = Config::default();
        config.decay.overrides.insert(
            "episodic".to_string(),
            DecayTtlSpecSet {
                hot: Some(TtlSpec::Text("1h".into())),
                warm: None,
                cold: Some(TtlSpec::Text("never".into())),
            },
        );
        let (_dir, _store, engine) = engine_with(config);

        let ttls = engine.resolve_ttls(MemoryType::Episodic).unwrap();
        assert_eq!(ttls.hot, Some(3_600_000));
        // Unset field falls through to the builtin default
        assert_eq!(ttls.warm, Some(60 * 86_400_000));
        // "never" means no demotion from COLD
        assert_eq!(ttls.cold, None);

        // Other types are untouched
        let ttls = engine.resolve_ttls(MemoryType::Factual).unwrap();
        assert_eq!(ttls.hot, Some(72 * 3_600_000));
    }

    #[test]
    fn test_stale_hot_demotes_to_warm() {
        let (_dir, store, engine) = engine_with(Config::default());
        let memory = stale_memory(Tier::Hot, Duration::hours(73));
        store.insert_memory(&memory).unwrap();

        let outcome = engine.run(Utc::now()).unwrap();
        assert_eq!(outcome.demoted, 1);
        assert_eq!(store.get_memory(&memory.id).unwrap().unwrap().tier, Tier::Warm);

        let audit = store.query_audit(&memory.id).unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, AuditAction::Demote);
        assert_eq!(audit[0].old_value.as_ref().unwrap()["tier"], "HOT");
        assert_eq!(audit[0].new_value.as_ref().unwrap()["tier"], "WARM");

        assert!(store.meta_get(LAST_DECAY_RUN_KEY).unwrap().is_some());
    }

    #[test]
    fn test_fresh_hot_stays() {
        let (_dir, store, engine) = engine_with(Config::default());
        let memory = stale_memory(Tier::Hot, Duration::hours(1));
        store.insert_memory(&memory).unwrap();

        let outcome = engine.run(Utc::now()).unwrap();
        assert_eq!(outcome.demoted, 0);
        assert_eq!(store.get_memory(&memory.id).unwrap().unwrap().tier, Tier::Hot);
    }

    #[test]
    fn test_pinned_never_demoted() {
        let (_dir, store, engine) = engine_with(Config::default());
        let mut memory = stale_memory(Tier::Hot, Duration::days(400));
        memory.pinned = true;
        store.insert_memory(&memory).unwrap();

        engine.run(Utc::now()).unwrap();
        assert_eq!(store.get_memory(&memory.id).unwrap().unwrap().tier, Tier::Hot);
        assert!(store.query_audit(&memory.id).unwrap().is_empty());
    }

    #[test]
    fn test_cascade_and_idempotence() {
        let (_dir, store, engine) = engine_with(Config::default());
        // Idle for a year: older than hot (72h) and warm (60d) TTLs
        let memory = stale_memory(Tier::Hot, Duration::days(365));
        store.insert_memory(&memory).unwrap();

        let now = Utc::now();
        let outcome = engine.run(now).unwrap();
        assert_eq!(outcome.demoted, 3);
        assert_eq!(
            store.get_memory(&memory.id).unwrap().unwrap().tier,
            Tier::Archive
        );
        assert_eq!(store.query_audit(&memory.id).unwrap().len(), 3);

        // Second run with no intervening access changes nothing
        let outcome = engine.run(now).unwrap();
        assert_eq!(outcome.demoted, 0);
        assert_eq!(store.query_audit(&memory.id).unwrap().len(), 3);
        // last_decay_run still updates on each run
        assert!(store.meta_get(LAST_DECAY_RUN_KEY).unwrap().is_some());
    }

    #[test]
    fn test_explicit_profile_applies() {
        let config = Config::default();
        let (_dir, store, _engine) = engine_with(config.clone());
        let resolver = Arc::new(ProfileResolver::new(config.clone(), &store).unwrap());
        resolver
            .set_profile(
                crate::profiles::ProfileKind::Decay,
                "forgetful",
                crate::profiles::ProfileScope::Global,
                None,
                false,
                &store,
            )
            .unwrap();
        let engine = DecayEngine::new(store.clone(), resolver, Arc::new(config));

        // forgetful: hot TTL 5m
        let ttls = engine.resolve_ttls(MemoryType::Factual).unwrap();
        assert_eq!(ttls.hot, Some(5 * 60_000));

        let memory = stale_memory(Tier::Hot, Duration::minutes(10));
        store.insert_memory(&memory).unwrap();
        engine.run(Utc::now()).unwrap();
        assert_eq!(store.get_memory(&memory.id).unwrap().unwrap().tier, Tier::Warm);
    }
}
