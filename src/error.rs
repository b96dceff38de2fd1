use thiserror::Error;

#[derive(Error, Debug)]
pub enum PortalError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Student #{student_id} has already applied to posting #{posting_id}")]
    AlreadyApplied { posting_id: i64, student_id: i64 },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid status: '{0}'")]
    InvalidStatus(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Database not initialized. Run 'placement init' first.")]
    NotInitialized,

    /// Only ever logged; the primary ledger write has already succeeded.
    #[error("Mirror write failed: {0}")]
    MirrorWriteFailed(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PortalError>;

/// True when `err` is SQLite rejecting a write on a UNIQUE index.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
