//! # TRAM Core
//!
//! Local, embedded associative memory engine for AI agents:
//!
//! - **Tiered data model**: memories classified HOT/WARM/COLD/ARCHIVE,
//!   demoted by idle time and promoted back on real use
//! - **Hybrid retrieval**: FTS5 lexical search fused with vector similarity
//! - **Composite scoring**: similarity + type-half-life recency + log-scaled
//!   frequency, in [0, 1]
//! - **Budgeted injection**: tier budgets select what gets prepended to an
//!   agent's prompt, with per-injection feedback records
//! - **Self-tuning**: a background cycle decays, promotes, and nudges the
//!   importance threshold to keep the HOT tier inside its target band
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tram_core::{Config, Engine, LocalEmbedder, RecallOptions, StoreInput};
//!
//! let engine = Engine::new(Config::default(), Arc::new(LocalEmbedder::new()))?;
//!
//! let outcome = engine.store_memory(StoreInput::new(
//!     "The staging cluster redeploys at 03:00 UTC",
//! ))?;
//!
//! let hits = engine.recall("staging redeploy", &RecallOptions::default())?;
//! ```
//!
//! ## Feature Flags
//!
//! - `embeddings` (default): local fastembed embedder
//! - `vector-search` (default): native HNSW index; without it searches run
//!   the exhaustive cosine fallback
//! - `full`: both of the above

// ============================================================================
// MODULES
// ============================================================================

pub mod allocator;
pub mod config;
pub mod duration;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod maintenance;
pub mod memory;
pub mod profiles;
pub mod report;
pub mod scoring;
pub mod search;
pub mod storage;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use error::{Error, Result};

pub use memory::{
    AuditAction, AuditEntry, CurrentContext, InjectionFeedback, Memory, MemoryPatch, MemoryType,
    RecallOptions, RecalledMemory, StoreInput, StoreOutcome, Tier, TuningLogEntry, TuningSource,
};

pub use config::{
    builtin_decay_ttls, ChannelKind, Config, InjectionConfig, MaintenanceConfig, ReportFrequency,
    ReportingConfig, SessionRules, SizeBand, TuningConfig, TuningMode,
};

pub use storage::{
    LexicalHit, ListFilter, NewTuningEntry, SortKey, Store, TierCounts,
};

pub use embeddings::{cosine_similarity, normalized_similarity, Embedder};

#[cfg(feature = "embeddings")]
pub use embeddings::{LocalEmbedder, LOCAL_EMBEDDING_DIMENSIONS, LOCAL_EMBEDDING_MODEL};

pub use search::{combine, HybridHit, HybridWeights, VectorIndex};

pub use scoring::{ScoreBreakdown, ScoreWeights, Scorer, USE_COUNT_REF};

pub use allocator::{Allocation, AllocationBreakdown, Allocator, Candidate, ScoredCandidate};

pub use profiles::{
    decay_preset, promotion_preset, retrieval_preset, DecayTtlSpecSet, ProfileKind,
    ProfileResolver, ProfileScope, ProfileSource, PromotionThresholds, Resolved, TierBudgets,
};

pub use maintenance::{
    current_threshold, CycleReport, DecayEngine, DecayOutcome, MaintenanceEngine, ParameterState,
    PromotionEngine, PromotionOutcome, TierTtls, TuningAdjustment, TuningEngine,
    LAST_DECAY_RUN_KEY, PARAM_IMPORTANCE_THRESHOLD,
};

pub use report::{
    build_channel, format_adjustment, format_summary, Channel, LogChannel, NoneChannel,
    ReportMessage, Reporter,
};

pub use hooks::{
    extract_key_terms, AgentEndInput, AgentEvent, FeedbackRecorder, InjectionResult,
    RequestContext, SessionType, UNKNOWN_SESSION_KEY,
};

pub use engine::{
    AppliedProfile, Engine, EngineStats, Explanation, ForgetTarget, TuneRequest,
    ACTIVE_CONTEXT_ID,
};

pub use duration::{parse_duration_ms, ttl_ms, ImpliedUnit, TtlSpec};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Config, Embedder, Engine, Error, ForgetTarget, Memory, MemoryType, RecallOptions,
        RequestContext, Result, StoreInput, StoreOutcome, Store, Tier, TuneRequest,
    };

    #[cfg(feature = "embeddings")]
    pub use crate::LocalEmbedder;
}
