//! Database Error Types
//!
//! This module defines error types for database operations, providing
//! clear error handling for connection, initialization, and query failures.

use std::path::PathBuf;
use thiserror::Error;

/// Database operation errors
///
/// Covers all error cases for database connection, initialization,
/// and basic operations. Business-rule violations (depth, cycles,
/// capacity) are handled by the service-layer error type.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish database connection
    #[error("Failed to connect to database at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Failed to initialize database schema
    #[error("Failed to initialize database schema: {0}")]
    InitializationFailed(String),

    /// Failed to create parent directory
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    LibsqlError(#[from] libsql::Error),

    /// SQL execution error with context
    #[error("SQL execution failed: {context}")]
    SqlExecutionError { context: String },

    /// Row decoding error (corrupt or unexpected column value)
    #[error("Failed to decode row: {context}")]
    RowDecodeError { context: String },
}

impl DatabaseError {
    /// Create a connection failed error
    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    /// Create an initialization failed error
    pub fn initialization_failed(msg: impl Into<String>) -> Self {
        Self::InitializationFailed(msg.into())
    }

    /// Create a SQL execution error with context
    pub fn sql_execution(context: impl Into<String>) -> Self {
        Self::SqlExecutionError {
            context: context.into(),
        }
    }

    /// Create a row decoding error with context
    pub fn row_decode(context: impl Into<String>) -> Self {
        Self::RowDecodeError {
            context: context.into(),
        }
    }

    /// Whether this error is a uniqueness-constraint violation.
    ///
    /// Drives the optimistic-concurrency retry path: two writers racing the
    /// same `(parent, sort_weight)` slot surface here, and the loser retries
    /// with a freshly computed weight.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::LibsqlError(e) => e.to_string().contains("UNIQUE constraint failed"),
            Self::SqlExecutionError { context } => context.contains("UNIQUE constraint failed"),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_violation_probe() {
        let err = DatabaseError::sql_execution(
            "Failed to update weight: UNIQUE constraint failed: nodes.sort_weight",
        );
        assert!(err.is_unique_violation());

        let err = DatabaseError::sql_execution("Failed to prepare query: syntax error");
        assert!(!err.is_unique_violation());

        let err = DatabaseError::initialization_failed("boom");
        assert!(!err.is_unique_violation());
    }
}
