//! Structured error taxonomy for the Pyrite storage core.
//!
//! The public write path (§6 of the spec) returns a typed success/error
//! contract rather than an opaque `anyhow::Error`, so callers embedding the
//! core behind a REST or MCP transport can surface a stable `code` field
//! without string-matching messages. Every fallible function in this crate,
//! including the aggregation helpers that fan out across many steps (bulk
//! create, reconciliation sweeps), returns [`Result`] directly rather than
//! an intermediate `anyhow::Result` — there is no boundary where an opaque
//! error would need converting into this taxonomy.

use thiserror::Error;

/// Crate-local result alias, analogous to `conary::error::Result`.
pub type Result<T> = std::result::Result<T, PyriteError>;

/// The complete set of error conditions the storage core can surface.
///
/// Each non-wrapper variant corresponds to one of the error codes listed in
/// spec.md §6 (`KB_NOT_FOUND`, `KB_READONLY`, `ENTRY_NOT_FOUND`,
/// `VALIDATION_FAILED`, `INVALID_TRANSITION`, `INDEX_EMPTY`).
#[derive(Error, Debug)]
pub enum PyriteError {
    #[error("KB '{0}' not found")]
    KbNotFound(String),

    #[error("KB '{0}' is read-only")]
    KbReadonly(String),

    #[error("entry '{id}' not found in KB '{kb_name}'")]
    EntryNotFound { id: String, kb_name: String },

    #[error("validation failed: {0:?}")]
    ValidationFailed(Vec<crate::schema::ValidationIssue>),

    #[error("invalid transition {from} -> {to} for task '{task_id}'")]
    InvalidTransition { task_id: String, from: String, to: String },

    #[error("index is empty; run a full reindex first")]
    IndexEmpty,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl PyriteError {
    /// Returns the stable string code from spec.md §6, for transports that
    /// need to surface `{error: {code, message, hint?}}` to a client.
    pub fn code(&self) -> &'static str {
        match self {
            PyriteError::KbNotFound(_) => "KB_NOT_FOUND",
            PyriteError::KbReadonly(_) => "KB_READONLY",
            PyriteError::EntryNotFound { .. } => "ENTRY_NOT_FOUND",
            PyriteError::ValidationFailed(_) => "VALIDATION_FAILED",
            PyriteError::InvalidTransition { .. } => "INVALID_TRANSITION",
            PyriteError::IndexEmpty => "INDEX_EMPTY",
            PyriteError::Database(_) => "DATABASE_ERROR",
            PyriteError::Io(_) => "IO_ERROR",
            PyriteError::Yaml(_) | PyriteError::Json(_) => "PARSE_ERROR",
            PyriteError::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Classifies database errors as retryable (`operational`, e.g. a busy
    /// or locked connection) versus non-retryable (`integrity`, e.g. a
    /// constraint violation), per spec.md §7's DB error taxonomy.
    pub fn is_retryable(&self) -> bool {
        match self {
            PyriteError::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}
