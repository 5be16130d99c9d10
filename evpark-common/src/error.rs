//! Common error types for evpark

use thiserror::Error;

/// Common result type for evpark operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across evpark services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input (plate text, filename, request parameter)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Write contention that is expected to clear on retry
    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors a whole-batch retry can be expected to clear
    ///
    /// SQLite reports contention as SQLITE_BUSY (5) or SQLITE_LOCKED (6);
    /// older drivers only surface the "database is locked" message.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::StorageConflict(_) => true,
            Error::Database(sqlx::Error::Database(db_err)) => {
                matches!(db_err.code().as_deref(), Some("5") | Some("6") | Some("517"))
                    || db_err.message().contains("database is locked")
            }
            Error::Database(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_conflict_is_transient() {
        assert!(Error::StorageConflict("busy".to_string()).is_transient());
    }

    #[test]
    fn test_other_errors_are_not_transient() {
        assert!(!Error::Internal("database is locked".to_string()).is_transient());
        assert!(!Error::Config("bad".to_string()).is_transient());
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_transient());
    }
}
