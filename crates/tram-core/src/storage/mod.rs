//! Storage Module
//!
//! SQLite-based storage layer with:
//! - FTS5 full-text search with query sanitization and phrase fallback
//! - Embedded vector blob storage
//! - Audit log, injection feedback, tuning log, and meta map
//! - Bounded retry on transient write contention

mod migrations;
mod sqlite;

pub use migrations::{apply_migrations, MIGRATIONS};
pub use sqlite::{
    decode_vector, encode_vector, LexicalHit, ListFilter, NewTuningEntry, SortKey, Store,
    TierCounts,
};
