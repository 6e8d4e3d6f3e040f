//! # Database Error Types
//!
//! Error types for the reconciled store.

use thiserror::Error;

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Database operation failures.
///
/// ## Design Principles
/// - Each variant includes enough context for debugging
/// - Constraint violations that the caller treats as control flow
///   (insert-if-absent) never reach this type; repositories translate them
/// - All errors are `Send + Sync` for async compatibility
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to open or configure the connection pool.
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration run failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A query failed at runtime.
    #[error("Database error: {0}")]
    Query(#[from] sqlx::Error),

    /// An entity that the caller required does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A JSON payload column failed to serialize/deserialize.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = DbError::NotFound {
            entity: "Tenant",
            id: "abc-123".to_string(),
        };
        assert_eq!(err.to_string(), "Tenant not found: abc-123");
    }
}
