//! Error types for the ledger store.

use thiserror::Error;

/// Ledger operation result type.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Ledger errors.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// SQLx error (connection, query, etc.)
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// IO error (file system operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Constraint violation
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Stored data that cannot be interpreted
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Store cannot currently serve requests
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// Ledger URL with an unknown scheme
    #[error("Unsupported ledger URL: {0}")]
    UnsupportedUrl(String),
}

impl LedgerError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}
