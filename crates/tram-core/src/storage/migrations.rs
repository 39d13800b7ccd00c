//! Database Migrations
//!
//! Schema migration definitions for the storage layer. The current schema
//! version lives in the `meta` table under `schema_version`.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "Initial schema: memories, vectors, FTS5, audit, context, feedback, tuning log",
    up: MIGRATION_V1_UP,
}];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial schema
const MIGRATION_V1_UP: &str = r#"
-- Key/value engine state (schema version, last decay run, profile selections)
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    text TEXT NOT NULL,
    importance REAL NOT NULL DEFAULT 0.5,
    category TEXT,
    created_at TEXT NOT NULL,
    tier TEXT NOT NULL DEFAULT 'WARM'
        CHECK (tier IN ('HOT', 'WARM', 'COLD', 'ARCHIVE')),
    memory_type TEXT NOT NULL DEFAULT 'factual'
        CHECK (memory_type IN ('procedural', 'factual', 'project', 'episodic')),
    do_not_inject INTEGER NOT NULL DEFAULT 0,
    pinned INTEGER NOT NULL DEFAULT 0,
    use_count INTEGER NOT NULL DEFAULT 0,
    last_accessed_at TEXT NOT NULL,
    use_days TEXT NOT NULL DEFAULT '[]',
    source TEXT,
    parent_id TEXT
);

CREATE INDEX IF NOT EXISTS idx_memories_tier ON memories(tier);
CREATE INDEX IF NOT EXISTS idx_memories_last_accessed ON memories(last_accessed_at);
CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at);
CREATE INDEX IF NOT EXISTS idx_memories_do_not_inject ON memories(do_not_inject);

-- Embedding vectors (binary f32 little-endian blobs; the reader also
-- accepts a JSON text encoding for migrated rows)
CREATE TABLE IF NOT EXISTS memory_vectors (
    memory_id TEXT PRIMARY KEY REFERENCES memories(id) ON DELETE CASCADE,
    vector BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    model TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- FTS5 virtual table for lexical search
CREATE VIRTUAL TABLE IF NOT EXISTS memory_fts USING fts5(
    id,
    text,
    category,
    content='memories',
    content_rowid='rowid',
    tokenize='porter unicode61'
);

-- Triggers to keep FTS in sync
CREATE TRIGGER IF NOT EXISTS memories_ai AFTER INSERT ON memories BEGIN
    INSERT INTO memory_fts(rowid, id, text, category)
    VALUES (NEW.rowid, NEW.id, NEW.text, NEW.category);
END;

CREATE TRIGGER IF NOT EXISTS memories_ad AFTER DELETE ON memories BEGIN
    INSERT INTO memory_fts(memory_fts, rowid, id, text, category)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.text, OLD.category);
END;

CREATE TRIGGER IF NOT EXISTS memories_au AFTER UPDATE ON memories BEGIN
    INSERT INTO memory_fts(memory_fts, rowid, id, text, category)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.text, OLD.category);
    INSERT INTO memory_fts(rowid, id, text, category)
    VALUES (NEW.rowid, NEW.id, NEW.text, NEW.category);
END;

-- Append-only log of memory state changes
CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    action TEXT NOT NULL,
    old_value TEXT,
    new_value TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_memory ON audit_log(memory_id);

-- Ephemeral active-task notes
CREATE TABLE IF NOT EXISTS current_context (
    id TEXT PRIMARY KEY,
    text TEXT NOT NULL,
    created_at TEXT NOT NULL,
    ttl_seconds INTEGER NOT NULL CHECK (ttl_seconds > 0)
);

-- One row per injected memory per recall
CREATE TABLE IF NOT EXISTS injection_feedback (
    id TEXT PRIMARY KEY,
    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    session_key TEXT NOT NULL,
    injected_at TEXT NOT NULL,
    access_frequency INTEGER NOT NULL DEFAULT 0,
    session_outcome TEXT,
    injection_density REAL NOT NULL,
    decay_resistance REAL,
    proxy_score REAL,
    agent_score REAL,
    agent_notes TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_feedback_memory ON injection_feedback(memory_id, injected_at);

-- Append-only record of parameter changes and user overrides
CREATE TABLE IF NOT EXISTS tuning_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    parameter TEXT NOT NULL,
    old_value TEXT NOT NULL,
    new_value TEXT NOT NULL,
    reason TEXT NOT NULL,
    source TEXT NOT NULL CHECK (source IN ('auto', 'agent', 'user')),
    user_override_until TEXT,
    reverted INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_tuning_parameter ON tuning_log(parameter, id);

INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', '1');
"#;

/// Read the current schema version from `meta`, creating the table if needed
fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;
    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;
    Ok(version.and_then(|v| v.parse().ok()).unwrap_or(0))
}

/// Apply all pending migrations; returns the number applied
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );

            // execute_batch handles multi-statement SQL including triggers
            conn.execute_batch(migration.up)?;
            conn.execute(
                "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [migration.version.to_string()],
            )?;

            applied += 1;
        }
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_apply_once() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        assert_eq!(apply_migrations(&conn).unwrap(), 1);
        assert_eq!(apply_migrations(&conn).unwrap(), 0);
        assert_eq!(get_current_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_schema_has_expected_tables() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();

        for table in [
            "memories",
            "memory_vectors",
            "audit_log",
            "current_context",
            "injection_feedback",
            "tuning_log",
            "meta",
        ] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }
}
