//! Engine configuration.
//!
//! Loaded from a TOML file (or built in code); every section has defaults so
//! an empty file is a valid configuration. Budget maps are validated to sum
//! to 100 within a ±1% tolerance.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::duration::TtlSpec;
use crate::error::{Error, Result};
use crate::memory::Tier;
use crate::profiles::{DecayTtlSpecSet, PromotionThresholds, TierBudgets};

// ============================================================================
// TOP LEVEL
// ============================================================================

/// Full engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Database file path; platform data dir when unset
    pub db_path: Option<PathBuf>,
    pub injection: InjectionConfig,
    pub tuning: TuningConfig,
    pub reporting: ReportingConfig,
    pub maintenance: MaintenanceConfig,
    pub decay: DecayConfig,
    /// Per session-type behavior (keys: main, cron, spawned)
    pub sessions: HashMap<String, SessionRules>,
    /// Per-agent profile selections
    pub agents: HashMap<String, AgentProfiles>,
    pub profiles: ProfilesConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| Error::InvalidInput(format!("bad config {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if let Some(budgets) = &self.injection.budgets {
            budgets.validate()?;
        }
        for (name, budgets) in &self.profiles.custom.retrieval {
            budgets
                .validate()
                .map_err(|e| Error::InvalidInput(format!("custom retrieval profile {name:?}: {e}")))?;
        }
        if self.tuning.min_bound >= self.tuning.max_bound {
            return Err(Error::InvalidInput(format!(
                "tuning bounds inverted: min {} >= max {}",
                self.tuning.min_bound, self.tuning.max_bound
            )));
        }
        if self.tuning.hot_target.min > self.tuning.hot_target.max {
            return Err(Error::InvalidInput(format!(
                "hot target band inverted: min {} > max {}",
                self.tuning.hot_target.min, self.tuning.hot_target.max
            )));
        }
        Ok(())
    }

    /// Effective rules for a session type, falling back to built-in defaults
    pub fn session_rules(&self, session_type: &str) -> SessionRules {
        self.sessions
            .get(session_type)
            .cloned()
            .unwrap_or_else(|| SessionRules::builtin(session_type))
    }
}

// ============================================================================
// INJECTION
// ============================================================================

/// Auto-injection behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InjectionConfig {
    /// Hard cap on memories injected per recall
    pub max_items: usize,
    /// Default value for the tunable importance threshold
    pub min_score: f64,
    /// Explicit budget override; when unset the resolved retrieval profile applies
    pub budgets: Option<TierBudgets>,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            max_items: 5,
            min_score: 0.30,
            budgets: None,
        }
    }
}

// ============================================================================
// TUNING
// ============================================================================

/// Tuning mode gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TuningMode {
    #[default]
    Auto,
    Hybrid,
    Manual,
    Disabled,
}

impl TuningMode {
    /// Whether the TuningEngine may act in this mode
    pub fn allows_auto(&self) -> bool {
        matches!(self, TuningMode::Auto | TuningMode::Hybrid)
    }
}

/// Target band for a tier size
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SizeBand {
    pub min: usize,
    pub max: usize,
}

/// Auto-tuning control loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TuningConfig {
    pub enabled: bool,
    pub mode: TuningMode,
    /// Step applied per adjustment
    pub step: f64,
    pub min_bound: f64,
    pub max_bound: f64,
    /// Band the HOT tier size is steered into
    pub hot_target: SizeBand,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: TuningMode::Auto,
            step: 0.05,
            min_bound: 0.1,
            max_bound: 0.9,
            hot_target: SizeBand { min: 10, max: 50 },
        }
    }
}

// ============================================================================
// REPORTING
// ============================================================================

/// Notification channel selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    #[default]
    Log,
    None,
    Telegram,
    Discord,
    Slack,
}

/// How often adjustments are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReportFrequency {
    #[default]
    OnChange,
    DailySummary,
    WeeklySummary,
}

/// Reporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportingConfig {
    pub enabled: bool,
    pub channel: ChannelKind,
    pub frequency: ReportFrequency,
    /// Append a tier stats block to each message
    pub include_metrics: bool,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: ChannelKind::Log,
            frequency: ReportFrequency::OnChange,
            include_metrics: true,
        }
    }
}

// ============================================================================
// MAINTENANCE
// ============================================================================

/// Background cycle scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MaintenanceConfig {
    /// Hours between decay/promotion/tuning cycles
    pub interval_hours: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self { interval_hours: 6 }
    }
}

// ============================================================================
// DECAY
// ============================================================================

/// Per-memory-type TTL overrides; highest priority in the TTL chain
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecayConfig {
    /// Keyed by memory type name (procedural/factual/project/episodic)
    pub overrides: HashMap<String, DecayTtlSpecSet>,
}

/// Built-in TTL defaults used when no override or explicit profile applies
pub fn builtin_decay_ttls() -> DecayTtlSpecSet {
    DecayTtlSpecSet {
        hot: Some(TtlSpec::Text("72h".into())),
        warm: Some(TtlSpec::Text("60d".into())),
        cold: Some(TtlSpec::Text("180d".into())),
    }
}

// ============================================================================
// SESSIONS
// ============================================================================

/// Behavior of the hooks for one session type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionRules {
    pub auto_inject: bool,
    pub auto_capture: bool,
    /// Tier assigned to captured memories when none is supplied
    pub default_tier: Tier,
}

impl Default for SessionRules {
    fn default() -> Self {
        Self {
            auto_inject: true,
            auto_capture: false,
            default_tier: Tier::Warm,
        }
    }
}

impl SessionRules {
    /// Built-in per-type defaults: capture only in main sessions, no
    /// injection in cron sessions
    pub fn builtin(session_type: &str) -> Self {
        match session_type {
            "main" => Self {
                auto_inject: true,
                auto_capture: true,
                default_tier: Tier::Hot,
            },
            "cron" => Self {
                auto_inject: false,
                auto_capture: false,
                default_tier: Tier::Cold,
            },
            "spawned" => Self {
                auto_inject: true,
                auto_capture: false,
                default_tier: Tier::Warm,
            },
            _ => Self::default(),
        }
    }
}

// ============================================================================
// PROFILES
// ============================================================================

/// Profile selections for one agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentProfiles {
    pub retrieval: Option<String>,
    pub decay: Option<String>,
    pub promotion: Option<String>,
}

/// Global profile selections plus custom profile definitions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfilesConfig {
    pub retrieval: Option<String>,
    pub decay: Option<String>,
    pub promotion: Option<String>,
    pub custom: CustomProfiles,
}

/// User-defined profiles; take precedence over builtins with the same name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomProfiles {
    pub retrieval: HashMap<String, TierBudgets>,
    pub decay: HashMap<String, DecayTtlSpecSet>,
    pub promotion: HashMap<String, PromotionThresholds>,
}

// ============================================================================
// TESTS
// ============================================================================
