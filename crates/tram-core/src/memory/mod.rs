//! Memory - the fundamental unit of stored knowledge
//!
//! Each memory carries:
//! - Text content and provenance
//! - An activity tier (HOT/WARM/COLD/ARCHIVE) driven by decay and promotion
//! - Access statistics (use count, last access, distinct use days)
//! - Flags controlling injection (pinned, do_not_inject)

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// TIERS
// ============================================================================

/// Activity tier of a memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    /// Recently active, injected first
    Hot,
    /// Default resting tier
    #[default]
    Warm,
    /// Stale but still injectable
    Cold,
    /// Out of normal retrieval; kept for the record
    Archive,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Hot => "HOT",
            Tier::Warm => "WARM",
            Tier::Cold => "COLD",
            Tier::Archive => "ARCHIVE",
        }
    }

    /// Parse from string name; unknown names are invalid input
    pub fn parse_name(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "HOT" => Ok(Tier::Hot),
            "WARM" => Ok(Tier::Warm),
            "COLD" => Ok(Tier::Cold),
            "ARCHIVE" => Ok(Tier::Archive),
            other => Err(Error::InvalidInput(format!("unknown tier: {other:?}"))),
        }
    }

    /// Next tier down the demotion chain, if any
    pub fn demoted(&self) -> Option<Tier> {
        match self {
            Tier::Hot => Some(Tier::Warm),
            Tier::Warm => Some(Tier::Cold),
            Tier::Cold => Some(Tier::Archive),
            Tier::Archive => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// MEMORY TYPES
// ============================================================================

/// Kind of knowledge a memory holds; drives the recency half-life
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// How-to knowledge; the slowest to fade
    Procedural,
    /// Discrete facts
    #[default]
    Factual,
    /// Project-specific state
    Project,
    /// Events and experiences; fades fastest
    Episodic,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Procedural => "procedural",
            MemoryType::Factual => "factual",
            MemoryType::Project => "project",
            MemoryType::Episodic => "episodic",
        }
    }

    pub fn parse_name(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "procedural" => Ok(MemoryType::Procedural),
            "factual" => Ok(MemoryType::Factual),
            "project" => Ok(MemoryType::Project),
            "episodic" => Ok(MemoryType::Episodic),
            other => Err(Error::InvalidInput(format!("unknown memory type: {other:?}"))),
        }
    }

    /// Recency half-life in days for composite scoring
    pub fn half_life_days(&self) -> f64 {
        match self {
            MemoryType::Procedural => 180.0,
            MemoryType::Factual => 90.0,
            MemoryType::Project => 45.0,
            MemoryType::Episodic => 10.0,
        }
    }

    pub const ALL: [MemoryType; 4] = [
        MemoryType::Procedural,
        MemoryType::Factual,
        MemoryType::Project,
        MemoryType::Episodic,
    ];
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// MEMORY
// ============================================================================

/// A stored memory the agent may recall
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// The memory text
    pub text: String,
    /// Importance in [0, 1]; gates initial HOT placement
    pub importance: f64,
    /// Optional free-form category
    pub category: Option<String>,
    /// When the memory was created
    pub created_at: DateTime<Utc>,
    /// Activity tier
    pub tier: Tier,
    /// Kind of knowledge
    pub memory_type: MemoryType,
    /// Soft-delete flag; a forgotten memory is hidden from default queries
    pub do_not_inject: bool,
    /// Pinned memories bypass recency decay and are never demoted
    pub pinned: bool,
    /// Total recalls
    pub use_count: i64,
    /// When the memory was last accessed
    pub last_accessed_at: DateTime<Utc>,
    /// Distinct days (YYYY-MM-DD) on which the memory was used, ordered, no duplicates
    pub use_days: Vec<NaiveDate>,
    /// Provenance (file path, conversation, URL)
    pub source: Option<String>,
    /// Parent memory, for derived/split memories
    pub parent_id: Option<String>,
}

impl Memory {
    /// Create a fresh memory with the given text, timestamped now
    pub fn new(text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            importance: 0.5,
            category: None,
            created_at: now,
            tier: Tier::Warm,
            memory_type: MemoryType::Factual,
            do_not_inject: false,
            pinned: false,
            use_count: 0,
            last_accessed_at: now,
            use_days: vec![],
            source: None,
            parent_id: None,
        }
    }

    /// Whether this memory may be injected (pinned forces eligibility)
    pub fn injectable(&self) -> bool {
        self.pinned || (!self.do_not_inject && self.tier != Tier::Archive)
    }

    /// Register one access: bump use_count, refresh last_accessed_at, and
    /// add today to use_days if absent
    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.use_count += 1;
        self.last_accessed_at = now;
        let today = now.date_naive();
        if !self.use_days.contains(&today) {
            self.use_days.push(today);
        }
    }
}

// ============================================================================
// INPUT / OPTION TYPES
// ============================================================================

/// Input for storing a new memory
///
/// Uses `deny_unknown_fields` so loose option maps are a validation error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StoreInput {
    /// The text to remember
    pub text: String,
    /// Explicit tier; defaults from importance vs the tuned threshold
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    /// Kind of knowledge
    #[serde(default)]
    pub memory_type: MemoryType,
    /// Importance in [0, 1]
    #[serde(default = "default_importance")]
    pub importance: f64,
    #[serde(default)]
    pub pinned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

fn default_importance() -> f64 {
    0.5
}

impl StoreInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tier: None,
            memory_type: MemoryType::default(),
            importance: default_importance(),
            pinned: false,
            category: None,
            source: None,
            parent_id: None,
        }
    }
}

/// Outcome of a store call: a fresh memory, or an existing near-duplicate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "outcome")]
pub enum StoreOutcome {
    Created {
        id: String,
        tier: Tier,
        memory_type: MemoryType,
    },
    Existing {
        id: String,
        similarity: f32,
    },
}

impl StoreOutcome {
    pub fn id(&self) -> &str {
        match self {
            StoreOutcome::Created { id, .. } | StoreOutcome::Existing { id, .. } => id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreOutcome::Existing { .. })
    }
}

/// Options for recall queries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RecallOptions {
    /// Maximum results
    #[serde(default = "default_recall_limit")]
    pub limit: usize,
    /// Restrict to one tier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    /// Include ARCHIVE memories
    #[serde(default)]
    pub include_archive: bool,
    /// Include forgotten (do_not_inject) memories
    #[serde(default)]
    pub include_forgotten: bool,
}

fn default_recall_limit() -> usize {
    5
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            limit: default_recall_limit(),
            tier: None,
            include_archive: false,
            include_forgotten: false,
        }
    }
}

/// One recall result with its composite score
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalledMemory {
    pub id: String,
    pub text: String,
    pub tier: Tier,
    pub memory_type: MemoryType,
    pub score: f64,
    pub pinned: bool,
    pub forgotten: bool,
}

/// Partial update applied through `Store::update_memory`
#[derive(Debug, Clone, Default)]
pub struct MemoryPatch {
    pub text: Option<String>,
    pub importance: Option<f64>,
    pub category: Option<Option<String>>,
    pub tier: Option<Tier>,
    pub memory_type: Option<MemoryType>,
    pub pinned: Option<bool>,
    pub do_not_inject: Option<bool>,
}

// ============================================================================
// AUDIT LOG
// ============================================================================

/// Memory state change recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Forget,
    Restore,
    Pin,
    Unpin,
    Demote,
    Promote,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Forget => "forget",
            AuditAction::Restore => "restore",
            AuditAction::Pin => "pin",
            AuditAction::Unpin => "unpin",
            AuditAction::Demote => "demote",
            AuditAction::Promote => "promote",
        }
    }

    pub fn parse_name(s: &str) -> Result<Self> {
        match s {
            "forget" => Ok(AuditAction::Forget),
            "restore" => Ok(AuditAction::Restore),
            "pin" => Ok(AuditAction::Pin),
            "unpin" => Ok(AuditAction::Unpin),
            "demote" => Ok(AuditAction::Demote),
            "promote" => Ok(AuditAction::Promote),
            other => Err(Error::InvalidInput(format!("unknown audit action: {other:?}"))),
        }
    }
}

/// Append-only record of one memory state change
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: i64,
    pub memory_id: String,
    pub action: AuditAction,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// CURRENT CONTEXT
// ============================================================================

/// Ephemeral "active task" note with a TTL
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentContext {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: i64,
}

impl CurrentContext {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.created_at + chrono::Duration::seconds(self.ttl_seconds)
    }
}

// ============================================================================
// INJECTION FEEDBACK
// ============================================================================

/// Record of one injected memory in one session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectionFeedback {
    pub id: String,
    pub memory_id: String,
    pub session_key: String,
    pub injected_at: DateTime<Utc>,
    /// Incremented once per subsequent recall of the memory
    pub access_frequency: i64,
    pub session_outcome: Option<String>,
    /// injected_count / total_candidates for the injecting recall
    pub injection_density: f64,
    pub decay_resistance: Option<f64>,
    pub proxy_score: Option<f64>,
    pub agent_score: Option<f64>,
    pub agent_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl InjectionFeedback {
    pub fn new(memory_id: impl Into<String>, session_key: impl Into<String>, density: f64) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            memory_id: memory_id.into(),
            session_key: session_key.into(),
            injected_at: now,
            access_frequency: 0,
            session_outcome: None,
            injection_density: density,
            decay_resistance: None,
            proxy_score: None,
            agent_score: None,
            agent_notes: None,
            created_at: now,
        }
    }
}

// ============================================================================
// TUNING LOG
// ============================================================================

/// Who changed a tunable parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TuningSource {
    Auto,
    Agent,
    User,
}

impl TuningSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TuningSource::Auto => "auto",
            TuningSource::Agent => "agent",
            TuningSource::User => "user",
        }
    }

    pub fn parse_name(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(TuningSource::Auto),
            "agent" => Ok(TuningSource::Agent),
            "user" => Ok(TuningSource::User),
            other => Err(Error::InvalidInput(format!("unknown tuning source: {other:?}"))),
        }
    }
}

/// Append-only record of a parameter change or user override
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TuningLogEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub parameter: String,
    pub old_value: serde_json::Value,
    pub new_value: serde_json::Value,
    pub reason: String,
    pub source: TuningSource,
    /// While set and in the future, auto-tuning of this parameter is locked
    pub user_override_until: Option<DateTime<Utc>>,
    pub reverted: bool,
}

// ============================================================================
// TESTS
// ============================================================================
