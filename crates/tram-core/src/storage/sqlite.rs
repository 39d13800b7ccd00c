//! SQLite Storage Implementation
//!
//! Single-file store for every persistent entity: memories, vectors, audit
//! log, current context, injection feedback, tuning log, and the meta map.
//! Lexical search runs over an FTS5 index kept in sync by triggers.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::error::{Error, Result};
use crate::memory::{
    AuditAction, AuditEntry, CurrentContext, InjectionFeedback, Memory, MemoryPatch, MemoryType,
    Tier, TuningLogEntry, TuningSource,
};

/// Bounded retry attempts for transient write contention
const MAX_WRITE_ATTEMPTS: u32 = 5;

/// Base backoff between write attempts
const WRITE_BACKOFF_MS: u64 = 20;

// ============================================================================
// SUPPORT TYPES
// ============================================================================

/// One lexical search hit
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub id: String,
    /// Positive, higher is better (negated FTS5 rank)
    pub score: f64,
    pub text: String,
}

/// Per-tier memory counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierCounts {
    pub hot: usize,
    pub warm: usize,
    pub cold: usize,
    pub archive: usize,
}

impl TierCounts {
    pub fn total(&self) -> usize {
        self.hot + self.warm + self.cold + self.archive
    }
}

/// Sort order for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    CreatedAt,
    LastAccessed,
    UseCount,
    Importance,
}

impl SortKey {
    fn order_clause(&self) -> &'static str {
        match self {
            SortKey::CreatedAt => "created_at DESC",
            SortKey::LastAccessed => "last_accessed_at DESC",
            SortKey::UseCount => "use_count DESC",
            SortKey::Importance => "importance DESC",
        }
    }

    pub fn parse_name(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(SortKey::CreatedAt),
            "accessed" => Ok(SortKey::LastAccessed),
            "use-count" | "use_count" => Ok(SortKey::UseCount),
            "importance" => Ok(SortKey::Importance),
            other => Err(Error::InvalidInput(format!("unknown sort key: {other:?}"))),
        }
    }
}

/// Filters for memory listings
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub tier: Option<Tier>,
    pub pinned: Option<bool>,
    pub forgotten: Option<bool>,
    pub sort: SortKey,
    pub limit: Option<usize>,
}

/// Input for a new tuning-log row
#[derive(Debug, Clone)]
pub struct NewTuningEntry {
    pub parameter: String,
    pub old_value: serde_json::Value,
    pub new_value: serde_json::Value,
    pub reason: String,
    pub source: TuningSource,
    pub user_override_until: Option<DateTime<Utc>>,
}

// ============================================================================
// STORE
// ============================================================================

/// Transactional local store over a single SQLite file.
///
/// Uses separate reader/writer connections for interior mutability. All
/// methods take `&self`, making the store `Send + Sync` so engines and hooks
/// can share an `Arc<Store>`.
pub struct Store {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl Store {
    /// Apply PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (or create) the store at `db_path`, defaulting to the platform
    /// data directory
    pub fn open(db_path: Option<PathBuf>) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let proj_dirs = ProjectDirs::from("com", "tram", "tram").ok_or_else(|| {
                    Error::ResourceUnavailable("could not determine data directory".to_string())
                })?;
                let data_dir = proj_dirs.data_dir();
                std::fs::create_dir_all(data_dir)?;
                data_dir.join("tram.db")
            }
        };

        let writer_conn = Connection::open(&path)?;
        Self::configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
        })
    }

    /// Re-apply any pending migrations (used by `tram migrate`)
    pub fn migrate(&self) -> Result<u32> {
        let writer = self.lock_writer()?;
        Ok(super::migrations::apply_migrations(&writer)?)
    }

    fn lock_writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| Error::ResourceUnavailable("writer lock poisoned".to_string()))
    }

    fn lock_reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| Error::ResourceUnavailable("reader lock poisoned".to_string()))
    }

    /// Run `op` inside a write transaction, retrying on transient contention.
    ///
    /// All multi-row changes go through this helper so concurrent readers
    /// never observe a partially applied state change.
    pub fn with_retry<T>(
        &self,
        mut op: impl FnMut(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.lock_writer()?;

        for attempt in 0..MAX_WRITE_ATTEMPTS {
            let tx = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
                Ok(tx) => tx,
                Err(e) if is_busy(&e) => {
                    backoff(attempt);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match op(&tx) {
                Ok(value) => match tx.commit() {
                    Ok(()) => return Ok(value),
                    Err(e) if is_busy(&e) => {
                        backoff(attempt);
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                },
                Err(Error::Database(e)) if is_busy(&e) => {
                    drop(tx);
                    backoff(attempt);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Contention {
            attempts: MAX_WRITE_ATTEMPTS,
        })
    }

    // ========================================================================
    // MEMORIES
    // ========================================================================

    /// Insert a new memory. Fails with InvalidInput on an empty text, an
    /// out-of-range importance, or a reused id.
    pub fn insert_memory(&self, memory: &Memory) -> Result<()> {
        if memory.text.trim().is_empty() {
            return Err(Error::InvalidInput("memory text is empty".to_string()));
        }
        if !(0.0..=1.0).contains(&memory.importance) {
            return Err(Error::InvalidInput(format!(
                "importance out of range: {}",
                memory.importance
            )));
        }
        if memory.created_at > memory.last_accessed_at {
            return Err(Error::InvalidInput(
                "created_at is after last_accessed_at".to_string(),
            ));
        }

        self.with_retry(|tx| {
            let exists: bool = tx
                .query_row(
                    "SELECT 1 FROM memories WHERE id = ?1",
                    params![memory.id],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);
            if exists {
                return Err(Error::InvalidInput(format!(
                    "memory id already exists: {}",
                    memory.id
                )));
            }

            tx.execute(
                "INSERT INTO memories (
                    id, text, importance, category, created_at, tier, memory_type,
                    do_not_inject, pinned, use_count, last_accessed_at, use_days,
                    source, parent_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    memory.id,
                    memory.text,
                    memory.importance,
                    memory.category,
                    memory.created_at.to_rfc3339(),
                    memory.tier.as_str(),
                    memory.memory_type.as_str(),
                    memory.do_not_inject as i64,
                    memory.pinned as i64,
                    memory.use_count,
                    memory.last_accessed_at.to_rfc3339(),
                    encode_use_days(&memory.use_days),
                    memory.source,
                    memory.parent_id,
                ],
            )?;
            Ok(())
        })
    }

    /// Fetch one memory by id
    pub fn get_memory(&self, id: &str) -> Result<Option<Memory>> {
        let reader = self.lock_reader()?;
        let memory = reader
            .query_row(
                &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
                params![id],
                row_to_memory,
            )
            .optional()?;
        Ok(memory)
    }

    /// Fetch one memory, NotFound when absent
    pub fn require_memory(&self, id: &str) -> Result<Memory> {
        self.get_memory(id)?
            .ok_or_else(|| Error::NotFound(format!("memory {id}")))
    }

    /// Apply a partial update and return the new row
    pub fn update_memory(&self, id: &str, patch: &MemoryPatch) -> Result<Memory> {
        self.with_retry(|tx| {
            let mut memory = tx
                .query_row(
                    &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
                    params![id],
                    row_to_memory,
                )
                .optional()?
                .ok_or_else(|| Error::NotFound(format!("memory {id}")))?;

            if let Some(text) = &patch.text {
                if text.trim().is_empty() {
                    return Err(Error::InvalidInput("memory text is empty".to_string()));
                }
                memory.text = text.clone();
            }
            if let Some(importance) = patch.importance {
                if !(0.0..=1.0).contains(&importance) {
                    return Err(Error::InvalidInput(format!(
                        "importance out of range: {importance}"
                    )));
                }
                memory.importance = importance;
            }
            if let Some(category) = &patch.category {
                memory.category = category.clone();
            }
            if let Some(tier) = patch.tier {
                memory.tier = tier;
            }
            if let Some(memory_type) = patch.memory_type {
                memory.memory_type = memory_type;
            }
            if let Some(pinned) = patch.pinned {
                memory.pinned = pinned;
            }
            if let Some(do_not_inject) = patch.do_not_inject {
                memory.do_not_inject = do_not_inject;
            }

            write_memory(tx, &memory)?;
            Ok(memory)
        })
    }

    /// Soft-delete: hide from default queries and audit the change.
    /// Returns false (and writes nothing) when already forgotten.
    pub fn soft_delete(&self, id: &str) -> Result<bool> {
        self.with_retry(|tx| {
            let memory = tx
                .query_row(
                    &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
                    params![id],
                    row_to_memory,
                )
                .optional()?
                .ok_or_else(|| Error::NotFound(format!("memory {id}")))?;

            if memory.do_not_inject {
                return Ok(false);
            }

            tx.execute(
                "UPDATE memories SET do_not_inject = 1 WHERE id = ?1",
                params![id],
            )?;
            append_audit_tx(
                tx,
                id,
                AuditAction::Forget,
                Some(serde_json::json!({ "doNotInject": false })),
                Some(serde_json::json!({ "doNotInject": true })),
            )?;
            Ok(true)
        })
    }

    /// Undo a soft delete. IllegalState when the memory is not forgotten.
    pub fn restore(&self, id: &str) -> Result<()> {
        self.with_retry(|tx| {
            let memory = tx
                .query_row(
                    &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
                    params![id],
                    row_to_memory,
                )
                .optional()?
                .ok_or_else(|| Error::NotFound(format!("memory {id}")))?;

            if !memory.do_not_inject {
                return Err(Error::IllegalState(format!("memory {id} is not forgotten")));
            }

            tx.execute(
                "UPDATE memories SET do_not_inject = 0 WHERE id = ?1",
                params![id],
            )?;
            append_audit_tx(
                tx,
                id,
                AuditAction::Restore,
                Some(serde_json::json!({ "doNotInject": true })),
                Some(serde_json::json!({ "doNotInject": false })),
            )?;
            Ok(())
        })
    }

    /// Hard-delete a memory; vectors, audit entries, and feedback cascade.
    pub fn hard_delete(&self, id: &str) -> Result<bool> {
        self.with_retry(|tx| {
            let rows = tx.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
            Ok(rows > 0)
        })
    }

    /// Pin or unpin. Pinning a COLD/ARCHIVE memory promotes it to WARM.
    /// Redundant pin/unpin is IllegalState.
    pub fn set_pinned(&self, id: &str, pinned: bool) -> Result<Memory> {
        self.with_retry(|tx| {
            let mut memory = tx
                .query_row(
                    &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
                    params![id],
                    row_to_memory,
                )
                .optional()?
                .ok_or_else(|| Error::NotFound(format!("memory {id}")))?;

            if memory.pinned == pinned {
                let state = if pinned { "already pinned" } else { "not pinned" };
                return Err(Error::IllegalState(format!("memory {id} is {state}")));
            }

            let old_tier = memory.tier;
            memory.pinned = pinned;
            if pinned && matches!(memory.tier, Tier::Cold | Tier::Archive) {
                memory.tier = Tier::Warm;
            }
            write_memory(tx, &memory)?;

            let action = if pinned { AuditAction::Pin } else { AuditAction::Unpin };
            append_audit_tx(
                tx,
                id,
                action,
                Some(serde_json::json!({ "pinned": !pinned, "tier": old_tier.as_str() })),
                Some(serde_json::json!({ "pinned": pinned, "tier": memory.tier.as_str() })),
            )?;
            Ok(memory)
        })
    }

    /// Move a memory to a new tier with an audit entry (demote/promote)
    pub fn change_tier(&self, id: &str, new_tier: Tier, action: AuditAction) -> Result<()> {
        self.with_retry(|tx| {
            let memory = tx
                .query_row(
                    &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
                    params![id],
                    row_to_memory,
                )
                .optional()?
                .ok_or_else(|| Error::NotFound(format!("memory {id}")))?;

            tx.execute(
                "UPDATE memories SET tier = ?1 WHERE id = ?2",
                params![new_tier.as_str(), id],
            )?;
            append_audit_tx(
                tx,
                id,
                action,
                Some(serde_json::json!({
                    "tier": memory.tier.as_str(),
                    "memoryType": memory.memory_type.as_str(),
                })),
                Some(serde_json::json!({
                    "tier": new_tier.as_str(),
                    "memoryType": memory.memory_type.as_str(),
                })),
            )?;
            Ok(())
        })
    }

    /// Register accesses on a batch of memories in one transaction:
    /// use_count + 1, last_accessed_at = now, today added to use_days.
    pub fn record_access(&self, ids: &[String], now: DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let today = now.date_naive();
        self.with_retry(|tx| {
            for id in ids {
                let row = tx
                    .query_row(
                        "SELECT use_count, use_days FROM memories WHERE id = ?1",
                        params![id],
                        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
                    )
                    .optional()?;
                let Some((use_count, use_days_raw)) = row else {
                    continue;
                };
                let mut use_days = decode_use_days(&use_days_raw);
                if !use_days.contains(&today) {
                    use_days.push(today);
                }
                tx.execute(
                    "UPDATE memories SET use_count = ?1, last_accessed_at = ?2, use_days = ?3
                     WHERE id = ?4",
                    params![
                        use_count + 1,
                        now.to_rfc3339(),
                        encode_use_days(&use_days),
                        id
                    ],
                )?;
            }
            Ok(())
        })
    }

    /// List memories matching a filter
    pub fn list_memories(&self, filter: &ListFilter) -> Result<Vec<Memory>> {
        let mut sql = format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(tier) = filter.tier {
            sql.push_str(" AND tier = ?");
            args.push(Box::new(tier.as_str().to_string()));
        }
        if let Some(pinned) = filter.pinned {
            sql.push_str(" AND pinned = ?");
            args.push(Box::new(pinned as i64));
        }
        if let Some(forgotten) = filter.forgotten {
            sql.push_str(" AND do_not_inject = ?");
            args.push(Box::new(forgotten as i64));
        }
        sql.push_str(&format!(" ORDER BY {}", filter.sort.order_clause()));
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            args.push(Box::new(limit as i64));
        }

        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            row_to_memory,
        )?;

        let mut memories = Vec::new();
        for row in rows {
            memories.push(row?);
        }
        Ok(memories)
    }

    /// All memories in one tier, most recently accessed first
    pub fn list_by_tier(&self, tier: Tier, limit: Option<usize>) -> Result<Vec<Memory>> {
        self.list_memories(&ListFilter {
            tier: Some(tier),
            sort: SortKey::LastAccessed,
            limit,
            ..Default::default()
        })
    }

    /// Every memory in the store; engines re-derive their state from this
    pub fn all_memories(&self) -> Result<Vec<Memory>> {
        self.list_memories(&ListFilter::default())
    }

    /// Fetch a batch of memories by id, preserving input order
    pub fn get_memories(&self, ids: &[String]) -> Result<Vec<Memory>> {
        let mut memories = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(memory) = self.get_memory(id)? {
                memories.push(memory);
            }
        }
        Ok(memories)
    }

    /// Per-tier counts, optionally including forgotten memories
    pub fn tier_counts(&self, include_forgotten: bool) -> Result<TierCounts> {
        let reader = self.lock_reader()?;
        let sql = if include_forgotten {
            "SELECT tier, COUNT(*) FROM memories GROUP BY tier"
        } else {
            "SELECT tier, COUNT(*) FROM memories WHERE do_not_inject = 0 GROUP BY tier"
        };
        let mut stmt = reader.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = TierCounts::default();
        for row in rows {
            let (tier, count) = row?;
            let count = count as usize;
            match tier.as_str() {
                "HOT" => counts.hot = count,
                "WARM" => counts.warm = count,
                "COLD" => counts.cold = count,
                "ARCHIVE" => counts.archive = count,
                _ => {}
            }
        }
        Ok(counts)
    }

    pub fn count_memories(&self) -> Result<usize> {
        let reader = self.lock_reader()?;
        let count: i64 = reader.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn count_where(&self, predicate: &str) -> Result<usize> {
        let reader = self.lock_reader()?;
        let count: i64 = reader.query_row(
            &format!("SELECT COUNT(*) FROM memories WHERE {predicate}"),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ========================================================================
    // LEXICAL SEARCH
    // ========================================================================

    /// BM25-style full-text search, best first.
    ///
    /// Empty/whitespace queries return no hits. Queries the sanitizer cannot
    /// make valid fall back to a phrase match; if that also fails the result
    /// is empty rather than an error.
    pub fn search_lexical(&self, query: &str, limit: usize) -> Result<Vec<LexicalHit>> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Ok(vec![]);
        }

        let Some(sanitized) = sanitize_fts_query(trimmed) else {
            return Ok(vec![]);
        };

        match self.run_fts(&sanitized, limit) {
            Ok(hits) => Ok(hits),
            Err(Error::Database(_)) => {
                let phrase = format!("\"{}\"", trimmed.replace('"', " "));
                Ok(self.run_fts(&phrase, limit).unwrap_or_default())
            }
            Err(e) => Err(e),
        }
    }

    fn run_fts(&self, match_expr: &str, limit: usize) -> Result<Vec<LexicalHit>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(
            "SELECT m.id, rank, m.text FROM memories m
             JOIN memory_fts fts ON m.id = fts.id
             WHERE memory_fts MATCH ?1
             ORDER BY rank
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![match_expr, limit as i64], |row| {
            Ok(LexicalHit {
                id: row.get(0)?,
                score: -row.get::<_, f64>(1)?,
                text: row.get(2)?,
            })
        })?;

        let mut hits = Vec::new();
        for row in rows {
            let mut hit = row?;
            if hit.score < 0.0 {
                hit.score = 0.0;
            }
            hits.push(hit);
        }
        Ok(hits)
    }

    /// Rebuild the FTS index from the memories table. Idempotent; returns
    /// the indexed row count, which equals the memory count on completion.
    pub fn rebuild_lexical_index(&self) -> Result<usize> {
        let writer = self.lock_writer()?;
        writer.execute("INSERT INTO memory_fts(memory_fts) VALUES('rebuild')", [])?;
        let count: i64 = writer.query_row("SELECT COUNT(*) FROM memory_fts", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ========================================================================
    // CURRENT CONTEXT
    // ========================================================================

    /// Upsert an active-task note
    pub fn set_context(&self, id: &str, text: &str, ttl_seconds: i64) -> Result<()> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("context text is empty".to_string()));
        }
        if ttl_seconds <= 0 {
            return Err(Error::InvalidInput(format!(
                "context ttl must be positive: {ttl_seconds}"
            )));
        }
        self.with_retry(|tx| {
            tx.execute(
                "INSERT INTO current_context (id, text, created_at, ttl_seconds)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                     text = excluded.text,
                     created_at = excluded.created_at,
                     ttl_seconds = excluded.ttl_seconds",
                params![id, text, Utc::now().to_rfc3339(), ttl_seconds],
            )?;
            Ok(())
        })
    }

    /// Current context if present and unexpired; expired rows are lazily
    /// cleaned up.
    pub fn get_context(&self, id: &str) -> Result<Option<CurrentContext>> {
        let context = {
            let reader = self.lock_reader()?;
            reader
                .query_row(
                    "SELECT id, text, created_at, ttl_seconds FROM current_context WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok(CurrentContext {
                            id: row.get(0)?,
                            text: row.get(1)?,
                            created_at: row.get(2)?,
                            ttl_seconds: row.get(3)?,
                        })
                    },
                )
                .optional()?
        };

        match context {
            Some(ctx) if ctx.is_expired(Utc::now()) => {
                self.clear_context(id)?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    pub fn clear_context(&self, id: &str) -> Result<bool> {
        self.with_retry(|tx| {
            let rows = tx.execute("DELETE FROM current_context WHERE id = ?1", params![id])?;
            Ok(rows > 0)
        })
    }

    // ========================================================================
    // AUDIT LOG
    // ========================================================================

    /// Append a standalone audit entry
    pub fn append_audit(
        &self,
        memory_id: &str,
        action: AuditAction,
        old_value: Option<serde_json::Value>,
        new_value: Option<serde_json::Value>,
    ) -> Result<()> {
        self.with_retry(|tx| append_audit_tx(tx, memory_id, action, old_value.clone(), new_value.clone()))
    }

    /// All audit entries for one memory, oldest first
    pub fn query_audit(&self, memory_id: &str) -> Result<Vec<AuditEntry>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, memory_id, action, old_value, new_value, created_at
             FROM audit_log WHERE memory_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![memory_id], row_to_audit)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    // ========================================================================
    // INJECTION FEEDBACK
    // ========================================================================

    pub fn append_feedback(&self, feedback: &InjectionFeedback) -> Result<()> {
        self.with_retry(|tx| {
            tx.execute(
                "INSERT INTO injection_feedback (
                    id, memory_id, session_key, injected_at, access_frequency,
                    session_outcome, injection_density, decay_resistance,
                    proxy_score, agent_score, agent_notes, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    feedback.id,
                    feedback.memory_id,
                    feedback.session_key,
                    feedback.injected_at.to_rfc3339(),
                    feedback.access_frequency,
                    feedback.session_outcome,
                    feedback.injection_density,
                    feedback.decay_resistance,
                    feedback.proxy_score,
                    feedback.agent_score,
                    feedback.agent_notes,
                    feedback.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// Bump access_frequency on the most recent feedback row for a memory.
    /// No-op (returns false) when the memory has no feedback.
    pub fn increment_feedback_access(&self, memory_id: &str) -> Result<bool> {
        self.with_retry(|tx| {
            let latest: Option<String> = tx
                .query_row(
                    "SELECT id FROM injection_feedback WHERE memory_id = ?1
                     ORDER BY injected_at DESC, created_at DESC LIMIT 1",
                    params![memory_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(feedback_id) = latest else {
                return Ok(false);
            };
            tx.execute(
                "UPDATE injection_feedback SET access_frequency = access_frequency + 1
                 WHERE id = ?1",
                params![feedback_id],
            )?;
            Ok(true)
        })
    }

    /// Most recent feedback row for a memory
    pub fn latest_feedback(&self, memory_id: &str) -> Result<Option<InjectionFeedback>> {
        let reader = self.lock_reader()?;
        let feedback = reader
            .query_row(
                "SELECT id, memory_id, session_key, injected_at, access_frequency,
                        session_outcome, injection_density, decay_resistance,
                        proxy_score, agent_score, agent_notes, created_at
                 FROM injection_feedback WHERE memory_id = ?1
                 ORDER BY injected_at DESC, created_at DESC LIMIT 1",
                params![memory_id],
                row_to_feedback,
            )
            .optional()?;
        Ok(feedback)
    }

    /// All feedback rows recorded for one session
    pub fn feedback_for_session(&self, session_key: &str) -> Result<Vec<InjectionFeedback>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, memory_id, session_key, injected_at, access_frequency,
                    session_outcome, injection_density, decay_resistance,
                    proxy_score, agent_score, agent_notes, created_at
             FROM injection_feedback WHERE session_key = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![session_key], row_to_feedback)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn count_feedback(&self) -> Result<usize> {
        let reader = self.lock_reader()?;
        let count: i64 =
            reader.query_row("SELECT COUNT(*) FROM injection_feedback", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ========================================================================
    // TUNING LOG
    // ========================================================================

    /// Append a tuning-log row and return it
    pub fn tuning_append(&self, entry: &NewTuningEntry) -> Result<TuningLogEntry> {
        let timestamp = Utc::now();
        let id = self.with_retry(|tx| {
            tx.execute(
                "INSERT INTO tuning_log (
                    timestamp, parameter, old_value, new_value, reason, source,
                    user_override_until, reverted
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
                params![
                    timestamp.to_rfc3339(),
                    entry.parameter,
                    entry.old_value.to_string(),
                    entry.new_value.to_string(),
                    entry.reason,
                    entry.source.as_str(),
                    entry.user_override_until.map(|t| t.to_rfc3339()),
                ],
            )?;
            Ok(tx.last_insert_rowid())
        })?;

        Ok(TuningLogEntry {
            id,
            timestamp,
            parameter: entry.parameter.clone(),
            old_value: entry.old_value.clone(),
            new_value: entry.new_value.clone(),
            reason: entry.reason.clone(),
            source: entry.source,
            user_override_until: entry.user_override_until,
            reverted: false,
        })
    }

    /// The most recent non-reverted entry for a parameter (insertion order
    /// breaks timestamp ties)
    pub fn tuning_latest(&self, parameter: &str) -> Result<Option<TuningLogEntry>> {
        let reader = self.lock_reader()?;
        let entry = reader
            .query_row(
                "SELECT id, timestamp, parameter, old_value, new_value, reason, source,
                        user_override_until, reverted
                 FROM tuning_log WHERE parameter = ?1 AND reverted = 0
                 ORDER BY id DESC LIMIT 1",
                params![parameter],
                row_to_tuning,
            )
            .optional()?;
        Ok(entry)
    }

    /// Recent history for a parameter, newest first
    pub fn tuning_history(&self, parameter: &str, limit: usize) -> Result<Vec<TuningLogEntry>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, timestamp, parameter, old_value, new_value, reason, source,
                    user_override_until, reverted
             FROM tuning_log WHERE parameter = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![parameter, limit as i64], row_to_tuning)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    // ========================================================================
    // META
    // ========================================================================

    pub fn meta_get(&self, key: &str) -> Result<Option<String>> {
        let reader = self.lock_reader()?;
        let value = reader
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn meta_set(&self, key: &str, value: &str) -> Result<()> {
        self.with_retry(|tx| {
            tx.execute(
                "INSERT INTO meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
    }

    /// All meta entries whose key starts with `prefix`
    pub fn meta_scan(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let reader = self.lock_reader()?;
        let mut stmt =
            reader.prepare("SELECT key, value FROM meta WHERE key LIKE ?1 || '%' ORDER BY key")?;
        let rows = stmt.query_map(params![prefix], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn meta_delete(&self, key: &str) -> Result<bool> {
        self.with_retry(|tx| {
            let rows = tx.execute("DELETE FROM meta WHERE key = ?1", params![key])?;
            Ok(rows > 0)
        })
    }

    // ========================================================================
    // VECTORS
    // ========================================================================

    /// Write (or replace) a memory's embedding as a binary f32-LE blob
    pub fn put_vector(&self, memory_id: &str, vector: &[f32], model: &str) -> Result<()> {
        let blob = encode_vector(vector);
        self.with_retry(|tx| {
            tx.execute(
                "INSERT INTO memory_vectors (memory_id, vector, dimensions, model, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(memory_id) DO UPDATE SET
                     vector = excluded.vector,
                     dimensions = excluded.dimensions,
                     model = excluded.model,
                     created_at = excluded.created_at",
                params![
                    memory_id,
                    blob,
                    vector.len() as i64,
                    model,
                    Utc::now().to_rfc3339()
                ],
            )?;
            Ok(())
        })
    }

    /// Read a memory's vector; tolerant of both the binary and the legacy
    /// JSON text encoding
    pub fn get_vector(&self, memory_id: &str) -> Result<Option<Vec<f32>>> {
        let reader = self.lock_reader()?;
        let blob: Option<Vec<u8>> = reader
            .query_row(
                "SELECT vector FROM memory_vectors WHERE memory_id = ?1",
                params![memory_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob.and_then(|b| decode_vector(&b)))
    }

    pub fn delete_vector(&self, memory_id: &str) -> Result<bool> {
        self.with_retry(|tx| {
            let rows = tx.execute(
                "DELETE FROM memory_vectors WHERE memory_id = ?1",
                params![memory_id],
            )?;
            Ok(rows > 0)
        })
    }

    /// Every stored vector, for index loading at startup
    pub fn all_vectors(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare("SELECT memory_id, vector FROM memory_vectors")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut vectors = Vec::new();
        for row in rows {
            let (id, blob) = row?;
            if let Some(vector) = decode_vector(&blob) {
                vectors.push((id, vector));
            } else {
                tracing::warn!("undecodable vector blob for memory {id}");
            }
        }
        Ok(vectors)
    }

    pub fn count_vectors(&self) -> Result<usize> {
        let reader = self.lock_reader()?;
        let count: i64 =
            reader.query_row("SELECT COUNT(*) FROM memory_vectors", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

// ============================================================================
// ROW MAPPING / HELPERS
// ============================================================================

const MEMORY_COLUMNS: &str = "id, text, importance, category, created_at, tier, memory_type, \
     do_not_inject, pinned, use_count, last_accessed_at, use_days, source, parent_id";

fn conversion_error(e: Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    let tier_raw: String = row.get(5)?;
    let type_raw: String = row.get(6)?;
    let use_days_raw: String = row.get(11)?;

    Ok(Memory {
        id: row.get(0)?,
        text: row.get(1)?,
        importance: row.get(2)?,
        category: row.get(3)?,
        created_at: row.get(4)?,
        tier: Tier::parse_name(&tier_raw).map_err(conversion_error)?,
        memory_type: MemoryType::parse_name(&type_raw).map_err(conversion_error)?,
        do_not_inject: row.get::<_, i64>(7)? != 0,
        pinned: row.get::<_, i64>(8)? != 0,
        use_count: row.get(9)?,
        last_accessed_at: row.get(10)?,
        use_days: decode_use_days(&use_days_raw),
        source: row.get(12)?,
        parent_id: row.get(13)?,
    })
}

fn row_to_audit(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    let action_raw: String = row.get(2)?;
    let old_raw: Option<String> = row.get(3)?;
    let new_raw: Option<String> = row.get(4)?;

    Ok(AuditEntry {
        id: row.get(0)?,
        memory_id: row.get(1)?,
        action: AuditAction::parse_name(&action_raw).map_err(conversion_error)?,
        old_value: old_raw.and_then(|s| serde_json::from_str(&s).ok()),
        new_value: new_raw.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: row.get(5)?,
    })
}

fn row_to_feedback(row: &rusqlite::Row<'_>) -> rusqlite::Result<InjectionFeedback> {
    Ok(InjectionFeedback {
        id: row.get(0)?,
        memory_id: row.get(1)?,
        session_key: row.get(2)?,
        injected_at: row.get(3)?,
        access_frequency: row.get(4)?,
        session_outcome: row.get(5)?,
        injection_density: row.get(6)?,
        decay_resistance: row.get(7)?,
        proxy_score: row.get(8)?,
        agent_score: row.get(9)?,
        agent_notes: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn row_to_tuning(row: &rusqlite::Row<'_>) -> rusqlite::Result<TuningLogEntry> {
    let old_raw: String = row.get(3)?;
    let new_raw: String = row.get(4)?;
    let source_raw: String = row.get(6)?;

    Ok(TuningLogEntry {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        parameter: row.get(2)?,
        old_value: serde_json::from_str(&old_raw).unwrap_or(serde_json::Value::Null),
        new_value: serde_json::from_str(&new_raw).unwrap_or(serde_json::Value::Null),
        reason: row.get(5)?,
        source: TuningSource::parse_name(&source_raw).map_err(conversion_error)?,
        user_override_until: row.get(7)?,
        reverted: row.get::<_, i64>(8)? != 0,
    })
}

/// Rewrite every mutable column of a memory row
fn write_memory(tx: &rusqlite::Transaction<'_>, memory: &Memory) -> Result<()> {
    tx.execute(
        "UPDATE memories SET
            text = ?1, importance = ?2, category = ?3, tier = ?4, memory_type = ?5,
            do_not_inject = ?6, pinned = ?7, use_count = ?8, last_accessed_at = ?9,
            use_days = ?10, source = ?11, parent_id = ?12
         WHERE id = ?13",
        params![
            memory.text,
            memory.importance,
            memory.category,
            memory.tier.as_str(),
            memory.memory_type.as_str(),
            memory.do_not_inject as i64,
            memory.pinned as i64,
            memory.use_count,
            memory.last_accessed_at.to_rfc3339(),
            encode_use_days(&memory.use_days),
            memory.source,
            memory.parent_id,
            memory.id,
        ],
    )?;
    Ok(())
}

fn append_audit_tx(
    tx: &rusqlite::Transaction<'_>,
    memory_id: &str,
    action: AuditAction,
    old_value: Option<serde_json::Value>,
    new_value: Option<serde_json::Value>,
) -> Result<()> {
    tx.execute(
        "INSERT INTO audit_log (memory_id, action, old_value, new_value, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            memory_id,
            action.as_str(),
            old_value.map(|v| v.to_string()),
            new_value.map(|v| v.to_string()),
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn encode_use_days(days: &[chrono::NaiveDate]) -> String {
    serde_json::to_string(days).unwrap_or_else(|_| "[]".to_string())
}

fn decode_use_days(raw: &str) -> Vec<chrono::NaiveDate> {
    serde_json::from_str(raw).unwrap_or_default()
}

/// Encode a vector as f32 little-endian bytes (the preferred on-disk format)
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Decode a vector blob: binary f32-LE, or the legacy JSON array encoding
pub fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    let trimmed = bytes.iter().position(|b| !b.is_ascii_whitespace());
    if let Some(start) = trimmed {
        if bytes[start] == b'[' {
            let text = std::str::from_utf8(bytes).ok()?;
            return serde_json::from_str(text).ok();
        }
    }
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

/// Quote query terms for FTS5, stripping operator syntax. Returns None when
/// no searchable terms remain.
fn sanitize_fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::DatabaseBusy
                || err.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

fn backoff(attempt: u32) {
    std::thread::sleep(StdDuration::from_millis(
        WRITE_BACKOFF_MS * (attempt as u64 + 1),
    ));
}

// ============================================================================
// TESTS
// ============================================================================
