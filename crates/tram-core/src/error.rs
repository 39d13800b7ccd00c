//! Engine error taxonomy.
//!
//! Every fallible core operation returns [`Result`]. Transient SQLite write
//! contention is retried inside the store; what escapes the retry loop
//! surfaces as [`Error::Contention`].

/// Engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing/empty required fields, malformed ids, unknown enum values,
    /// invalid durations or budgets, disallowed scope combinations
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Operation on a missing memory, parameter, or feedback row
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation that contradicts current state (pin a pinned memory,
    /// restore a non-forgotten one, unlock an unlocked parameter)
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Embedder, index, or disk unavailable
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Write conflict that persisted past the bounded retry loop
    #[error("write contention persisted after {attempts} attempts")]
    Contention { attempts: u32 },

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Engine result type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Process exit code for CLI front-ends:
    /// 0 success, 1 invalid input, 2 internal error, 3 resource unavailable.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidInput(_) | Error::NotFound(_) | Error::IllegalState(_) => 1,
            Error::ResourceUnavailable(_) => 3,
            Error::Contention { .. } | Error::Database(_) | Error::Io(_) => 2,
        }
    }
}
