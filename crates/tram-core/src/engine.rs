//! Engine facade.
//!
//! Composes the store, embedder, vector index, scorer, allocator, and
//! profile resolver into the tool surface (`store`, `recall`, `forget`,
//! `pin`, `explain`, ...) and the two host hooks (`before_agent_start`,
//! `agent_end`).

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::Serialize;
use uuid::Uuid;

use crate::allocator::{Allocator, Candidate};
use crate::config::Config;
use crate::embeddings::{normalized_similarity, Embedder};
use crate::error::{Error, Result};
use crate::hooks::{
    AgentEndInput, FeedbackRecorder, InjectionResult, RequestContext, extract_key_terms,
};
use crate::maintenance::{
    current_threshold, DecayEngine, MaintenanceEngine, TuningEngine,
};
use crate::memory::{
    CurrentContext, InjectionFeedback, Memory, MemoryType, RecallOptions, RecalledMemory,
    StoreInput, StoreOutcome, Tier,
};
use crate::profiles::{ProfileKind, ProfileResolver, ProfileScope, TierBudgets};
use crate::report::Reporter;
use crate::scoring::{ScoreBreakdown, Scorer};
use crate::search::{combine, HybridHit, HybridWeights, VectorIndex};
use crate::storage::{ListFilter, Store, TierCounts};

/// Context id used by the active-task note
pub const ACTIVE_CONTEXT_ID: &str = "active";

/// Vector similarity at which a new text is considered a duplicate
const DUPLICATE_SIMILARITY: f32 = 0.95;

/// Token overlap backing up the similarity check for duplicates
const DUPLICATE_TOKEN_OVERLAP: f64 = 0.8;

/// Query embeddings cached per engine
const QUERY_CACHE_SIZE: usize = 100;

// ============================================================================
// SUPPORT TYPES
// ============================================================================

/// Target of a forget call: a concrete id or a search query
#[derive(Debug, Clone)]
pub enum ForgetTarget {
    Id(String),
    Query(String),
}

/// Scoring breakdown plus identity, as returned by `explain`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Explanation {
    pub memory_id: String,
    pub text: String,
    pub breakdown: ScoreBreakdown,
    /// Similarity to the query, when one was given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_similarity: Option<f64>,
}

/// Profile updates applied by `tune`
#[derive(Debug, Clone, Default)]
pub struct TuneRequest {
    pub retrieval: Option<String>,
    pub decay: Option<String>,
    pub promotion: Option<String>,
    pub scope: ProfileScope,
    pub persist: bool,
}

/// One applied profile change
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedProfile {
    pub kind: ProfileKind,
    pub name: String,
    pub scope: ProfileScope,
}

/// Engine-level statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub total_memories: usize,
    pub tier_counts: TierCounts,
    pub pinned: usize,
    pub forgotten: usize,
    pub vectors: usize,
    pub feedback_rows: usize,
    pub importance_threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_decay_run: Option<DateTime<Utc>>,
}

// ============================================================================
// ENGINE
// ============================================================================

/// The memory engine: one store, one embedder, one vector index
pub struct Engine {
    config: Arc<Config>,
    store: Arc<Store>,
    embedder: Arc<dyn Embedder>,
    index: Arc<VectorIndex>,
    resolver: Arc<ProfileResolver>,
    allocator: Allocator,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
    feedback: OnceLock<FeedbackRecorder>,
}

impl Engine {
    /// Open the engine over the configured database path
    pub fn new(config: Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(Store::open(config.db_path.clone())?);
        let index = Arc::new(VectorIndex::new(
            store.clone(),
            embedder.dimensions(),
            embedder.model_id(),
        ));
        let loaded = index.load()?;
        tracing::debug!("loaded {loaded} vectors into the index");

        let resolver = Arc::new(ProfileResolver::new(config.clone(), &store)?);

        Ok(Self {
            config: Arc::new(config),
            store,
            embedder,
            index,
            resolver,
            allocator: Allocator::new(Scorer::default()),
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_SIZE).expect("cache size is non-zero"),
            )),
            feedback: OnceLock::new(),
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<ProfileResolver> {
        &self.resolver
    }

    /// Background cycle engine sharing this engine's store and resolver
    pub fn maintenance(&self) -> MaintenanceEngine {
        let reporter = Arc::new(Reporter::from_config(&self.config.reporting));
        self.maintenance_with_reporter(reporter)
    }

    pub fn maintenance_with_reporter(&self, reporter: Arc<Reporter>) -> MaintenanceEngine {
        MaintenanceEngine::new(
            self.store.clone(),
            self.resolver.clone(),
            self.config.clone(),
            reporter,
        )
    }

    pub fn decay_engine(&self) -> DecayEngine {
        DecayEngine::new(self.store.clone(), self.resolver.clone(), self.config.clone())
    }

    pub fn tuning_engine(&self) -> TuningEngine {
        TuningEngine::new(self.store.clone(), self.config.clone())
    }

    fn query_embedding(&self, text: &str) -> Result<Vec<f32>> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(cached) = cache.get(text) {
                return Ok(cached.clone());
            }
        }
        let vector = self.embedder.embed(text)?;
        if let Ok(mut cache) = self.query_cache.lock() {
            cache.put(text.to_string(), vector.clone());
        }
        Ok(vector)
    }

    fn feedback_recorder(&self) -> &FeedbackRecorder {
        self.feedback
            .get_or_init(|| FeedbackRecorder::spawn(self.store.clone()))
    }

    // ========================================================================
    // TOOL SURFACE
    // ========================================================================

    /// Store new memory text, deduplicating against near-identical content.
    ///
    /// When the closest existing vector reaches 0.95 similarity AND the text
    /// is identical or heavily overlapping, the existing memory is returned
    /// instead of creating a twin.
    pub fn store_memory(&self, input: StoreInput) -> Result<StoreOutcome> {
        let text = input.text.trim();
        if text.is_empty() {
            return Err(Error::InvalidInput("memory text is empty".to_string()));
        }
        if !(0.0..=1.0).contains(&input.importance) {
            return Err(Error::InvalidInput(format!(
                "importance out of range: {}",
                input.importance
            )));
        }

        let vector = self.embedder.embed(text)?;

        if let Some((existing_id, similarity)) = self.index.search(&vector, 1)?.into_iter().next() {
            if similarity >= DUPLICATE_SIMILARITY {
                if let Some(existing) = self.store.get_memory(&existing_id)? {
                    let overlap = token_overlap(&existing.text, text);
                    if existing.text == text || overlap >= DUPLICATE_TOKEN_OVERLAP {
                        tracing::debug!(
                            "duplicate store suppressed: {existing_id} at {similarity:.3} similarity"
                        );
                        return Ok(StoreOutcome::Existing {
                            id: existing_id,
                            similarity,
                        });
                    }
                }
            }
        }

        let tier = match input.tier {
            Some(tier) => tier,
            None => {
                let threshold = current_threshold(&self.store, &self.config)?;
                if input.importance >= threshold {
                    Tier::Hot
                } else {
                    Tier::Warm
                }
            }
        };

        let now = Utc::now();
        let memory = Memory {
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            importance: input.importance,
            category: input.category,
            created_at: now,
            tier,
            memory_type: input.memory_type,
            do_not_inject: false,
            pinned: input.pinned,
            use_count: 0,
            last_accessed_at: now,
            use_days: vec![],
            source: input.source,
            parent_id: input.parent_id,
        };

        self.store.insert_memory(&memory)?;
        self.index.put(&memory.id, &vector)?;

        Ok(StoreOutcome::Created {
            id: memory.id,
            tier: memory.tier,
            memory_type: memory.memory_type,
        })
    }

    /// Hybrid search over lexical and vector signals
    fn hybrid_search(&self, query: &str, k: usize) -> Result<Vec<HybridHit>> {
        let vector = self.query_embedding(query)?;
        let lexical = self.store.search_lexical(query, k)?;
        let vector_hits = self.index.search(&vector, k)?;
        Ok(combine(&lexical, &vector_hits, HybridWeights::default(), k))
    }

    /// Rank stored memories against a query.
    ///
    /// Forgotten and ARCHIVE memories are hidden unless the corresponding
    /// options ask for them. Each returned memory bumps `access_frequency`
    /// on its most recent feedback row.
    pub fn recall(&self, query: &str, options: &RecallOptions) -> Result<Vec<RecalledMemory>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidInput("recall query is empty".to_string()));
        }

        let fetch = (options.limit.max(1) * 3).max(30);
        let hits = self.hybrid_search(query, fetch)?;
        let now = Utc::now();
        let scorer = self.allocator.scorer;

        let mut results: Vec<(RecalledMemory, DateTime<Utc>)> = Vec::new();
        for hit in hits {
            let Some(memory) = self.store.get_memory(&hit.id)? else {
                continue;
            };
            if let Some(tier) = options.tier {
                if memory.tier != tier {
                    continue;
                }
            }
            if memory.do_not_inject && !options.include_forgotten {
                continue;
            }
            if memory.tier == Tier::Archive && !options.include_archive {
                continue;
            }
            let score = scorer.score(&memory, hit.vector_score, now);
            results.push((
                RecalledMemory {
                    id: memory.id.clone(),
                    text: memory.text.clone(),
                    tier: memory.tier,
                    memory_type: memory.memory_type,
                    score,
                    pinned: memory.pinned,
                    forgotten: memory.do_not_inject,
                },
                memory.created_at,
            ));
        }

        results.sort_by(|a, b| {
            b.0.score
                .partial_cmp(&a.0.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        results.truncate(options.limit);

        let recalled: Vec<RecalledMemory> = results.into_iter().map(|(r, _)| r).collect();
        for memory in &recalled {
            if let Err(e) = self.store.increment_feedback_access(&memory.id) {
                tracing::warn!("feedback access bump failed for {}: {e}", memory.id);
            }
        }
        Ok(recalled)
    }

    /// Forget a memory by id or by best query match.
    /// Soft forget hides it; `hard` deletes the row and its satellites.
    pub fn forget(&self, target: ForgetTarget, hard: bool) -> Result<String> {
        let id = match target {
            ForgetTarget::Id(id) => {
                self.store.require_memory(&id)?;
                id
            }
            ForgetTarget::Query(query) => {
                let matches = self.recall(&query, &RecallOptions { limit: 1, ..Default::default() })?;
                matches
                    .into_iter()
                    .next()
                    .map(|m| m.id)
                    .ok_or_else(|| Error::NotFound(format!("no memory matched {query:?}")))?
            }
        };

        if hard {
            self.index.delete(&id)?;
            if !self.store.hard_delete(&id)? {
                return Err(Error::NotFound(format!("memory {id}")));
            }
        } else {
            self.store.soft_delete(&id)?;
        }
        Ok(id)
    }

    /// Undo a soft forget
    pub fn restore(&self, id: &str) -> Result<()> {
        self.store.restore(id)
    }

    /// Pin a memory (COLD/ARCHIVE pins promote to WARM)
    pub fn pin(&self, id: &str) -> Result<Memory> {
        self.store.set_pinned(id, true)
    }

    pub fn unpin(&self, id: &str) -> Result<Memory> {
        self.store.set_pinned(id, false)
    }

    /// Scoring breakdown and injection eligibility for one memory
    pub fn explain(&self, id: &str, query: Option<&str>) -> Result<Explanation> {
        let memory = self.store.require_memory(id)?;
        let query_similarity = match query {
            Some(query) if !query.trim().is_empty() => {
                let query_vector = self.query_embedding(query.trim())?;
                let similarity = self
                    .index
                    .get(id)?
                    .map(|vector| normalized_similarity(&query_vector, &vector) as f64);
                Some(similarity.unwrap_or(0.0))
            }
            _ => None,
        };

        let breakdown = self.allocator.scorer.breakdown(
            &memory,
            query_similarity.unwrap_or(0.0),
            Utc::now(),
        );
        Ok(Explanation {
            memory_id: memory.id,
            text: memory.text,
            breakdown,
            query_similarity,
        })
    }

    /// Upsert the active-task note
    pub fn set_context(&self, text: &str, ttl_hours: u64) -> Result<()> {
        self.store
            .set_context(ACTIVE_CONTEXT_ID, text, (ttl_hours * 3600) as i64)
    }

    pub fn clear_context(&self) -> Result<bool> {
        self.store.clear_context(ACTIVE_CONTEXT_ID)
    }

    pub fn get_context(&self) -> Result<Option<CurrentContext>> {
        self.store.get_context(ACTIVE_CONTEXT_ID)
    }

    /// Apply profile selections at a scope
    pub fn tune(&self, request: &TuneRequest, ctx: &RequestContext) -> Result<Vec<AppliedProfile>> {
        let mut applied = Vec::new();
        let updates = [
            (ProfileKind::Retrieval, &request.retrieval),
            (ProfileKind::Decay, &request.decay),
            (ProfileKind::Promotion, &request.promotion),
        ];
        for (kind, name) in updates {
            if let Some(name) = name {
                self.resolver.set_profile(
                    kind,
                    name,
                    request.scope,
                    ctx.agent_id.as_deref(),
                    request.persist,
                    &self.store,
                )?;
                applied.push(AppliedProfile {
                    kind,
                    name: name.clone(),
                    scope: request.scope,
                });
            }
        }
        if applied.is_empty() {
            return Err(Error::InvalidInput(
                "tune requires at least one profile".to_string(),
            ));
        }
        Ok(applied)
    }

    /// List memories with the store's filters
    pub fn list(&self, filter: &ListFilter) -> Result<Vec<Memory>> {
        self.store.list_memories(filter)
    }

    /// Engine statistics for the stats surface
    pub fn stats(&self) -> Result<EngineStats> {
        let last_decay_run = self
            .store
            .meta_get(crate::maintenance::LAST_DECAY_RUN_KEY)?
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(EngineStats {
            total_memories: self.store.count_memories()?,
            tier_counts: self.store.tier_counts(false)?,
            pinned: self.store.count_where("pinned = 1")?,
            forgotten: self.store.count_where("do_not_inject = 1")?,
            vectors: self.store.count_vectors()?,
            feedback_rows: self.store.count_feedback()?,
            importance_threshold: current_threshold(&self.store, &self.config)?,
            last_decay_run,
        })
    }

    /// Rebuild the lexical index; returns the indexed count
    pub fn rebuild_lexical_index(&self) -> Result<usize> {
        self.store.rebuild_lexical_index()
    }

    /// Re-read stored vector blobs into the search index; returns the count
    /// loaded. Used after vectors are written outside this engine instance.
    pub fn reload_vectors(&self) -> Result<usize> {
        self.index.load()
    }

    // ========================================================================
    // HOOKS
    // ========================================================================

    /// `before_agent_start`: search, allocate, update stats, record feedback,
    /// and return the context block to prepend.
    ///
    /// Feedback rows are queued to a detached writer after the result is
    /// assembled, so the host sees the injection without waiting on those
    /// writes. Cancellation before the store writes returns an empty result
    /// with no mutations.
    pub async fn before_agent_start(
        &self,
        prompt: &str,
        ctx: &RequestContext,
    ) -> Result<InjectionResult> {
        let rules = self.config.session_rules(ctx.session_type.as_str());
        if !rules.auto_inject {
            return Ok(InjectionResult::default());
        }
        if ctx.cancellation.is_cancelled() {
            return Ok(InjectionResult::default());
        }

        let terms = extract_key_terms(prompt);
        let search_string = if terms.is_empty() {
            prompt.trim().to_string()
        } else {
            terms.join(" ")
        };
        if search_string.is_empty() {
            return Ok(InjectionResult::default());
        }

        let max_items = self.config.injection.max_items;
        let fetch = (max_items * 3).max(30);
        let hits = self.hybrid_search(&search_string, fetch)?;

        let mut candidates = Vec::with_capacity(hits.len());
        for hit in &hits {
            if let Some(memory) = self.store.get_memory(&hit.id)? {
                candidates.push(Candidate {
                    memory,
                    similarity: hit.vector_score,
                });
            }
        }

        let budgets: TierBudgets = self
            .config
            .injection
            .budgets
            .unwrap_or_else(|| self.resolver.resolve_retrieval(ctx.agent_id.as_deref()).value);

        let now = Utc::now();
        let allocation = self
            .allocator
            .allocate(candidates, max_items, &budgets, now);

        if ctx.cancellation.is_cancelled() {
            return Ok(InjectionResult::default());
        }

        let selected_ids: Vec<String> = allocation
            .selected
            .iter()
            .map(|c| c.memory.id.clone())
            .collect();
        self.store.record_access(&selected_ids, now)?;

        let context = self.store.get_context(ACTIVE_CONTEXT_ID)?;
        let result = assemble_injection(&allocation.selected, context.as_ref());

        let total_considered = allocation.breakdown.total_considered;
        let density = if total_considered > 0 {
            selected_ids.len() as f64 / total_considered as f64
        } else {
            0.0
        };
        let session_key = ctx.session_key_or_unknown().to_string();
        let feedback: Vec<InjectionFeedback> = selected_ids
            .iter()
            .map(|memory_id| {
                let mut row = InjectionFeedback::new(memory_id, session_key.clone(), density);
                row.injected_at = now;
                row
            })
            .collect();
        self.feedback_recorder().enqueue(feedback);

        Ok(result)
    }

    /// `agent_end`: capture candidate text when the session type allows it.
    /// The session's default tier applies.
    pub async fn agent_end(
        &self,
        input: &AgentEndInput,
        ctx: &RequestContext,
    ) -> Result<Option<StoreOutcome>> {
        let rules = self.config.session_rules(ctx.session_type.as_str());
        if !rules.auto_capture || ctx.cancellation.is_cancelled() {
            return Ok(None);
        }
        let Some(text) = input.candidate_text() else {
            return Ok(None);
        };

        let outcome = self.store_memory(StoreInput {
            tier: Some(rules.default_tier),
            memory_type: MemoryType::Episodic,
            source: Some("auto-capture".to_string()),
            ..StoreInput::new(text)
        })?;
        Ok(Some(outcome))
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Jaccard overlap between the token sets of two texts
fn token_overlap(a: &str, b: &str) -> f64 {
    let tokens = |text: &str| -> std::collections::HashSet<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    };
    let set_a = tokens(a);
    let set_b = tokens(b);
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

/// Build the context block prepended to the agent prompt
fn assemble_injection(
    selected: &[crate::allocator::ScoredCandidate],
    context: Option<&CurrentContext>,
) -> InjectionResult {
    let mut block = String::new();
    if !selected.is_empty() {
        block.push_str("## Relevant memories\n");
        for candidate in selected {
            block.push_str(&format!(
                "- [{}/{}] {}\n",
                candidate.memory.tier,
                candidate.memory.memory_type,
                candidate.memory.text
            ));
        }
    }
    let context_included = match context {
        Some(context) => {
            if !block.is_empty() {
                block.push('\n');
            }
            block.push_str(&format!("## Current context\n{}\n", context.text));
            true
        }
        None => false,
    };

    InjectionResult {
        prepend_context: (!block.is_empty()).then_some(block),
        memories_injected: selected.len(),
        context_included,
    }
}

// ============================================================================
// TESTS
// ============================================================================
