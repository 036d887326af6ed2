//! Error types for progress store operations.

use thiserror::Error;

use crate::db::DbError;

/// Errors raised by the progress store.
#[derive(Debug, Clone, Error)]
pub enum ProgressError {
    /// Opening the per-query database failed.
    #[error("cannot open progress database: {message}")]
    Open {
        /// Human-readable open/migration error text.
        message: String,
    },

    /// A read or write against the progress table failed.
    #[error("progress database error: {message}")]
    Database {
        /// Human-readable database error text.
        message: String,
    },

    /// Only terminal statuses are persisted.
    #[error(
        "cannot record status '{status}' for {item_id}\n  Suggestion: only downloaded and failed are persisted"
    )]
    NonTerminalStatus {
        /// Item the caller tried to mark.
        item_id: String,
        /// The rejected status value.
        status: String,
    },

    /// A stored row carried a status this build does not know.
    #[error("unrecognized stored status '{0}'")]
    InvalidStatus(String),
}

impl From<sqlx::Error> for ProgressError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            message: err.to_string(),
        }
    }
}

impl From<DbError> for ProgressError {
    fn from(err: DbError) -> Self {
        Self::Open {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_error_non_terminal_message() {
        let err = ProgressError::NonTerminalStatus {
            item_id: "A".to_string(),
            status: "parsed".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("parsed"));
        assert!(msg.contains("A"));
        assert!(msg.contains("Suggestion"));
    }

    #[test]
    fn test_progress_error_from_row_not_found() {
        let err = ProgressError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, ProgressError::Database { .. }));
    }
}
