//! Error types for the migration system.

use strata_db::DbError;

/// Errors that can occur during migration operations.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// Error from the database layer.
    #[error(transparent)]
    Db(#[from] DbError),

    /// IO error (reading/writing snapshots or declaration files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid rewrite pattern.
    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    /// The plan was rejected before anything was executed.
    #[error("Migration rejected:\n{}", .0.iter().map(|r| format!("  - {r}")).collect::<Vec<_>>().join("\n"))]
    Rejected(Vec<String>),

    /// The `_migrations` table does not exist yet.
    #[error("Migrations are not initialized; run `init` first")]
    NotInitialized,

    /// Invalid migration state.
    #[error("Invalid migration state: {0}")]
    InvalidState(String),

    /// The requested column rename cannot be repaired.
    #[error("Cannot repair `{model}.{column}`: {reason}")]
    RepairNotAllowed {
        /// Model name.
        model: String,
        /// Column name.
        column: String,
        /// Why the rename is refused.
        reason: String,
    },

    /// Multiple errors occurred.
    #[error("Multiple errors occurred:\n{}", .0.iter().map(|e| format!("  - {e}")).collect::<Vec<_>>().join("\n"))]
    Multiple(Vec<MigrateError>),
}

impl MigrateError {
    /// Collapses a list of errors, or returns `None` when it is empty.
    #[must_use]
    pub fn from_many(mut errors: Vec<Self>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple(errors)),
        }
    }
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_lists_every_reason() {
        let err = MigrateError::Rejected(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Migration rejected:\n  - a\n  - b");
    }

    #[test]
    fn test_from_many() {
        assert!(MigrateError::from_many(Vec::new()).is_none());
        let one = MigrateError::from_many(vec![MigrateError::NotInitialized]).unwrap();
        assert!(matches!(one, MigrateError::NotInitialized));
        let many = MigrateError::from_many(vec![
            MigrateError::NotInitialized,
            MigrateError::InvalidState("x".into()),
        ])
        .unwrap();
        assert!(matches!(many, MigrateError::Multiple(ref v) if v.len() == 2));
    }
}
