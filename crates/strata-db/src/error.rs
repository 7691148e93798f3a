//! Error types for schema extraction, SQL generation and execution.

use thiserror::Error;

/// Errors raised by the database layer.
///
/// Every fallible operation in this crate returns one of these; callers
/// decide whether to surface it as a process exit or to propagate it.
#[derive(Debug, Error)]
pub enum DbError {
    /// A required parameter was empty or absent.
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),

    /// A constrained parameter holds a value outside its allowed set.
    #[error("invalid {param} `{value}`: {reason}")]
    InvalidValue {
        /// Name of the offending parameter.
        param: &'static str,
        /// The rejected value.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A foreign key points at itself, at a missing model, or cannot be resolved.
    #[error("referential integrity: {0}")]
    Integrity(String),

    /// A destructive operation was attempted without explicit confirmation.
    #[error("{0} requires a filter or explicit confirmation")]
    Unconfirmed(String),

    /// A NOT NULL column without a default would be applied to a populated table.
    #[error("column `{column}` on `{table}` is NOT NULL without DEFAULT but the table holds rows")]
    NotNullWithoutDefault {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// The engine cannot perform the requested operation.
    #[error("{engine} does not support {operation}")]
    Unsupported {
        /// Engine name.
        engine: &'static str,
        /// Description of the operation.
        operation: String,
    },

    /// A schema object already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A schema object does not exist.
    #[error("does not exist: {0}")]
    DoesNotExist(String),

    /// Error reported by the database driver.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error while reading configuration.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// Shorthand for [`DbError::InvalidValue`].
    pub fn invalid(param: &'static str, value: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            param,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for database operations.
pub type Result<T> = std::result::Result<T, DbError>;
