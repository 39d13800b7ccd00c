//! Named parameter profiles and their resolution.
//!
//! Three independent profile kinds: retrieval budgets, decay TTLs, and
//! promotion thresholds. Each has built-in presets and optional custom
//! definitions; names resolve through the priority chain
//! session -> agent -> global -> builtin. Custom profiles shadow builtins
//! with the same name.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::duration::TtlSpec;
use crate::error::{Error, Result};
use crate::storage::Store;

// ============================================================================
// PROFILE VALUE TYPES
// ============================================================================

/// Injection budget percentages per bucket; must sum to 100 (±1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TierBudgets {
    pub pinned: u32,
    pub hot: u32,
    pub warm: u32,
    pub cold: u32,
    pub archive: u32,
}

impl Default for TierBudgets {
    fn default() -> Self {
        // The "focused" preset
        Self {
            pinned: 50,
            hot: 30,
            warm: 15,
            cold: 5,
            archive: 0,
        }
    }
}

impl TierBudgets {
    pub const fn new(pinned: u32, hot: u32, warm: u32, cold: u32, archive: u32) -> Self {
        Self {
            pinned,
            hot,
            warm,
            cold,
            archive,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let sum = self.pinned + self.hot + self.warm + self.cold + self.archive;
        if !(99..=101).contains(&sum) {
            return Err(Error::InvalidInput(format!(
                "budget percentages must sum to 100, got {sum}"
            )));
        }
        Ok(())
    }
}

/// Decay TTLs for the three demotion steps, as configured (unparsed)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecayTtlSpecSet {
    pub hot: Option<TtlSpec>,
    pub warm: Option<TtlSpec>,
    pub cold: Option<TtlSpec>,
}

impl DecayTtlSpecSet {
    fn preset(hot: &str, warm: &str, cold: &str) -> Self {
        Self {
            hot: Some(TtlSpec::Text(hot.to_string())),
            warm: Some(TtlSpec::Text(warm.to_string())),
            cold: Some(TtlSpec::Text(cold.to_string())),
        }
    }
}

/// Promotion thresholds: minimum use_count and distinct use-days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionThresholds {
    pub uses: i64,
    pub days: i64,
}

impl Default for PromotionThresholds {
    fn default() -> Self {
        // The "selective" preset
        Self { uses: 3, days: 2 }
    }
}

// ============================================================================
// PRESETS
// ============================================================================

/// Built-in retrieval presets (pinned/hot/warm/cold, archive 0)
pub fn retrieval_preset(name: &str) -> Option<TierBudgets> {
    match name {
        "narrow" => Some(TierBudgets::new(70, 20, 10, 0, 0)),
        "focused" => Some(TierBudgets::new(50, 30, 15, 5, 0)),
        "balanced" => Some(TierBudgets::new(30, 30, 30, 10, 0)),
        "broad" => Some(TierBudgets::new(5, 25, 25, 45, 0)),
        "expansive" => Some(TierBudgets::new(0, 5, 15, 80, 0)),
        _ => None,
    }
}

/// Built-in decay presets (hot/warm/cold TTLs)
pub fn decay_preset(name: &str) -> Option<DecayTtlSpecSet> {
    match name {
        "forgetful" => Some(DecayTtlSpecSet::preset("5m", "15m", "1h")),
        "casual" => Some(DecayTtlSpecSet::preset("15m", "1h", "4h")),
        "attentive" => Some(DecayTtlSpecSet::preset("1h", "4h", "24h")),
        "thorough" => Some(DecayTtlSpecSet::preset("1d", "7d", "30d")),
        "retentive" => Some(DecayTtlSpecSet::preset("7d", "60d", "180d")),
        _ => None,
    }
}

/// Built-in promotion presets
pub fn promotion_preset(name: &str) -> Option<PromotionThresholds> {
    match name {
        "forgiving" => Some(PromotionThresholds { uses: 1, days: 1 }),
        "fair" => Some(PromotionThresholds { uses: 2, days: 2 }),
        "selective" => Some(PromotionThresholds { uses: 3, days: 2 }),
        "demanding" => Some(PromotionThresholds { uses: 5, days: 3 }),
        "ruthless" => Some(PromotionThresholds { uses: 10, days: 5 }),
        _ => None,
    }
}

const BUILTIN_RETRIEVAL: &str = "focused";
const BUILTIN_DECAY: &str = "thorough";
const BUILTIN_PROMOTION: &str = "selective";

// ============================================================================
// RESOLUTION
// ============================================================================

/// Kind of profile being resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    Retrieval,
    Decay,
    Promotion,
}

impl ProfileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileKind::Retrieval => "retrieval",
            ProfileKind::Decay => "decay",
            ProfileKind::Promotion => "promotion",
        }
    }
}

/// Scope a profile selection is applied at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProfileScope {
    #[default]
    Session,
    Agent,
    Global,
}

impl ProfileScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileScope::Session => "session",
            ProfileScope::Agent => "agent",
            ProfileScope::Global => "global",
        }
    }
}

/// Where a resolved profile came from, for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileSource {
    Session,
    Agent,
    Global,
    Builtin,
}

/// A resolved profile: name, value, and the source that won
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    pub name: String,
    pub source: ProfileSource,
    pub value: T,
}

impl<T> Resolved<T> {
    /// Whether the profile was explicitly chosen rather than defaulted
    pub fn explicitly_set(&self) -> bool {
        !matches!(self.source, ProfileSource::Builtin)
    }
}

/// Resolves profile names through session -> agent -> global -> builtin.
///
/// Session selections live in memory only. Agent/global selections live in
/// memory and, when `persist` is requested, in the store's meta map under
/// `profile.<kind>.<scope>[.<agent>]`.
pub struct ProfileResolver {
    config: Config,
    session: Mutex<HashMap<ProfileKind, String>>,
    agent: Mutex<HashMap<(String, ProfileKind), String>>,
    global: Mutex<HashMap<ProfileKind, String>>,
}

impl ProfileResolver {
    pub fn new(config: Config, store: &Store) -> Result<Self> {
        let resolver = Self {
            config,
            session: Mutex::new(HashMap::new()),
            agent: Mutex::new(HashMap::new()),
            global: Mutex::new(HashMap::new()),
        };
        resolver.load_persisted(store)?;
        Ok(resolver)
    }

    /// Pull persisted global and per-agent selections back from meta
    fn load_persisted(&self, store: &Store) -> Result<()> {
        let mut global = self.global.lock().expect("profile lock");
        let mut agent = self.agent.lock().expect("profile lock");
        for kind in [ProfileKind::Retrieval, ProfileKind::Decay, ProfileKind::Promotion] {
            let key = format!("profile.{}.global", kind.as_str());
            if let Some(name) = store.meta_get(&key)? {
                global.insert(kind, name);
            }
            let agent_prefix = format!("profile.{}.agent.", kind.as_str());
            for (key, name) in store.meta_scan(&agent_prefix)? {
                let agent_id = key[agent_prefix.len()..].to_string();
                agent.insert((agent_id, kind), name);
            }
        }
        Ok(())
    }

    /// Apply a profile selection at a scope.
    ///
    /// Decay and promotion profiles cannot be set at session scope: they
    /// alter the state of every memory, not just this session's retrieval.
    pub fn set_profile(
        &self,
        kind: ProfileKind,
        name: &str,
        scope: ProfileScope,
        agent_id: Option<&str>,
        persist: bool,
        store: &Store,
    ) -> Result<()> {
        if scope == ProfileScope::Session && !matches!(kind, ProfileKind::Retrieval) {
            return Err(Error::InvalidInput(format!(
                "{} profiles cannot be set at session scope",
                kind.as_str()
            )));
        }
        self.require_known(kind, name)?;

        match scope {
            ProfileScope::Session => {
                self.session
                    .lock()
                    .expect("profile lock")
                    .insert(kind, name.to_string());
            }
            ProfileScope::Agent => {
                let agent_id = agent_id.ok_or_else(|| {
                    Error::InvalidInput("agent scope requires an agent id".to_string())
                })?;
                self.agent
                    .lock()
                    .expect("profile lock")
                    .insert((agent_id.to_string(), kind), name.to_string());
                if persist {
                    let key = format!("profile.{}.agent.{agent_id}", kind.as_str());
                    store.meta_set(&key, name)?;
                }
            }
            ProfileScope::Global => {
                self.global
                    .lock()
                    .expect("profile lock")
                    .insert(kind, name.to_string());
                if persist {
                    let key = format!("profile.{}.global", kind.as_str());
                    store.meta_set(&key, name)?;
                }
            }
        }
        Ok(())
    }

    fn require_known(&self, kind: ProfileKind, name: &str) -> Result<()> {
        let known = match kind {
            ProfileKind::Retrieval => {
                self.config.profiles.custom.retrieval.contains_key(name)
                    || retrieval_preset(name).is_some()
            }
            ProfileKind::Decay => {
                self.config.profiles.custom.decay.contains_key(name)
                    || decay_preset(name).is_some()
            }
            ProfileKind::Promotion => {
                self.config.profiles.custom.promotion.contains_key(name)
                    || promotion_preset(name).is_some()
            }
        };
        if known {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "unknown {} profile: {name:?}",
                kind.as_str()
            )))
        }
    }

    /// The winning (name, source) for a kind through the priority chain
    fn resolve_name(&self, kind: ProfileKind, agent_id: Option<&str>) -> (String, ProfileSource) {
        if let Some(name) = self.session.lock().expect("profile lock").get(&kind) {
            return (name.clone(), ProfileSource::Session);
        }
        if let Some(agent_id) = agent_id {
            if let Some(name) = self
                .agent
                .lock()
                .expect("profile lock")
                .get(&(agent_id.to_string(), kind))
            {
                return (name.clone(), ProfileSource::Agent);
            }
            if let Some(profiles) = self.config.agents.get(agent_id) {
                let configured = match kind {
                    ProfileKind::Retrieval => &profiles.retrieval,
                    ProfileKind::Decay => &profiles.decay,
                    ProfileKind::Promotion => &profiles.promotion,
                };
                if let Some(name) = configured {
                    return (name.clone(), ProfileSource::Agent);
                }
            }
        }
        if let Some(name) = self.global.lock().expect("profile lock").get(&kind) {
            return (name.clone(), ProfileSource::Global);
        }
        let configured = match kind {
            ProfileKind::Retrieval => &self.config.profiles.retrieval,
            ProfileKind::Decay => &self.config.profiles.decay,
            ProfileKind::Promotion => &self.config.profiles.promotion,
        };
        if let Some(name) = configured {
            return (name.clone(), ProfileSource::Global);
        }

        let builtin = match kind {
            ProfileKind::Retrieval => BUILTIN_RETRIEVAL,
            ProfileKind::Decay => BUILTIN_DECAY,
            ProfileKind::Promotion => BUILTIN_PROMOTION,
        };
        (builtin.to_string(), ProfileSource::Builtin)
    }

    pub fn resolve_retrieval(&self, agent_id: Option<&str>) -> Resolved<TierBudgets> {
        let (name, source) = self.resolve_name(ProfileKind::Retrieval, agent_id);
        let value = self
            .config
            .profiles
            .custom
            .retrieval
            .get(&name)
            .copied()
            .or_else(|| retrieval_preset(&name))
            .unwrap_or_else(|| {
                tracing::warn!("unknown retrieval profile {name:?}, using builtin default");
                retrieval_preset(BUILTIN_RETRIEVAL).expect("builtin preset")
            });
        Resolved { name, source, value }
    }

    pub fn resolve_decay(&self, agent_id: Option<&str>) -> Resolved<DecayTtlSpecSet> {
        let (name, source) = self.resolve_name(ProfileKind::Decay, agent_id);
        let value = self
            .config
            .profiles
            .custom
            .decay
            .get(&name)
            .cloned()
            .or_else(|| decay_preset(&name))
            .unwrap_or_else(|| {
                tracing::warn!("unknown decay profile {name:?}, using builtin default");
                decay_preset(BUILTIN_DECAY).expect("builtin preset")
            });
        Resolved { name, source, value }
    }

    pub fn resolve_promotion(&self, agent_id: Option<&str>) -> Resolved<PromotionThresholds> {
        let (name, source) = self.resolve_name(ProfileKind::Promotion, agent_id);
        let value = self
            .config
            .profiles
            .custom
            .promotion
            .get(&name)
            .copied()
            .or_else(|| promotion_preset(&name))
            .unwrap_or_else(|| {
                tracing::warn!("unknown promotion profile {name:?}, using builtin default");
                promotion_preset(BUILTIN_PROMOTION).expect("builtin preset")
            });
        Resolved { name, source, value }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_resolver(config: Config) -> (TempDir, Store, ProfileResolver) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(Some(dir.path().join("test.db"))).unwrap();
        let resolver = ProfileResolver::new(config, &store).unwrap();
        (dir, store, resolver)
    }

    #[test]
    fn test_presets_sum_to_100() {
        for name in ["narrow", "focused", "balanced", "broad", "expansive"] {
            retrieval_preset(name).unwrap().validate().unwrap();
        }
    }

    #[test]
    fn test_builtin_defaults() {
        let (_dir, _store, resolver) = test_resolver(Config::default());

        let retrieval = resolver.resolve_retrieval(None);
        assert_eq!(retrieval.name, "focused");
        assert!(matches!(retrieval.source, ProfileSource::Builtin));
        assert!(!retrieval.explicitly_set());

        assert_eq!(resolver.resolve_decay(None).name, "thorough");
        assert_eq!(resolver.resolve_promotion(None).value.uses, 3);
    }

    #[test]
    fn test_priority_chain() {
        let mut config = Config::default();
        config.profiles.retrieval = Some("balanced".to_string());
        config.agents.insert(
            "coder".to_string(),
            crate::config::AgentProfiles {
                retrieval: Some("narrow".to_string()),
                ..Default::default()
            },
        );
        let (_dir, store, resolver) = test_resolver(config);

        // Global config applies without an agent
        assert_eq!(resolver.resolve_retrieval(None).name, "balanced");

        // Agent config beats global
        let resolved = resolver.resolve_retrieval(Some("coder"));
        assert_eq!(resolved.name, "narrow");
        assert!(matches!(resolved.source, ProfileSource::Agent));

        // Session override beats both
        resolver
            .set_profile(
                ProfileKind::Retrieval,
                "expansive",
                ProfileScope::Session,
                None,
                false,
                &store,
            )
            .unwrap();
        let resolved = resolver.resolve_retrieval(Some("coder"));
        assert_eq!(resolved.name, "expansive");
        assert!(matches!(resolved.source, ProfileSource::Session));
    }

    #[test]
    fn test_session_scope_restriction() {
        let (_dir, store, resolver) = test_resolver(Config::default());

        for kind in [ProfileKind::Decay, ProfileKind::Promotion] {
            let result = resolver.set_profile(
                kind,
                "forgiving",
                ProfileScope::Session,
                None,
                false,
                &store,
            );
            assert!(matches!(result, Err(Error::InvalidInput(_))));
        }

        // Retrieval IS allowed at session scope
        resolver
            .set_profile(
                ProfileKind::Retrieval,
                "broad",
                ProfileScope::Session,
                None,
                false,
                &store,
            )
            .unwrap();
    }

    #[test]
    fn test_unknown_profile_rejected() {
        let (_dir, store, resolver) = test_resolver(Config::default());
        let result = resolver.set_profile(
            ProfileKind::Retrieval,
            "photographic",
            ProfileScope::Global,
            None,
            false,
            &store,
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_custom_shadows_builtin() {
        let mut config = Config::default();
        config.profiles.custom.retrieval.insert(
            "focused".to_string(),
            TierBudgets::new(0, 100, 0, 0, 0),
        );
        let (_dir, _store, resolver) = test_resolver(config);

        let resolved = resolver.resolve_retrieval(None);
        assert_eq!(resolved.value.hot, 100);
    }

    #[test]
    fn test_persisted_global_survives_reload() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(Some(dir.path().join("test.db"))).unwrap();

        {
            let resolver = ProfileResolver::new(Config::default(), &store).unwrap();
            resolver
                .set_profile(
                    ProfileKind::Decay,
                    "retentive",
                    ProfileScope::Global,
                    None,
                    true,
                    &store,
                )
                .unwrap();
        }

        let resolver = ProfileResolver::new(Config::default(), &store).unwrap();
        let resolved = resolver.resolve_decay(None);
        assert_eq!(resolved.name, "retentive");
        assert!(matches!(resolved.source, ProfileSource::Global));
        assert!(resolved.explicitly_set());
    }

    #[test]
    fn test_persisted_agent_selection_survives_reload() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(Some(dir.path().join("test.db"))).unwrap();

        {
            let resolver = ProfileResolver::new(Config::default(), &store).unwrap();
            resolver
                .set_profile(
                    ProfileKind::Retrieval,
                    "expansive",
                    ProfileScope::Agent,
                    Some("researcher"),
                    true,
                    &store,
                )
                .unwrap();
        }

        let resolver = ProfileResolver::new(Config::default(), &store).unwrap();
        let resolved = resolver.resolve_retrieval(Some("researcher"));
        assert_eq!(resolved.name, "expansive");
        assert!(matches!(resolved.source, ProfileSource::Agent));
        // Other agents are unaffected
        assert_eq!(resolver.resolve_retrieval(Some("coder")).name, "focused");
    }
}
