//! Error types for Burrow.
//!
//! One taxonomy shared by the registry, the execution engine and the HTTP
//! gateway. Client-caused failures (bad SQL, constraint violations, stale
//! pairing codes) are distinct variants so the gateway can map them to
//! precise status codes; storage faults collapse into `Database`/`Io`.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for Burrow operations.
#[derive(Debug, Error)]
pub enum BurrowError {
    #[error("invalid or rotated pairing code")]
    Unauthorized,

    #[error("database not found: {database}")]
    NotFound { database: String },

    #[error("database already exists: '{name}' for client app '{client_app}'")]
    AlreadyExists { name: String, client_app: String },

    #[error("SQL syntax error: {message}")]
    Syntax {
        message: String,
        /// Byte offset into the statement where the engine reported the
        /// error, when available.
        offset: Option<usize>,
    },

    #[error("constraint violation: {message}")]
    Constraint { message: String },

    #[error("database busy: {database}")]
    Busy { database: String },

    #[error("query exceeded execution budget of {0:?}")]
    Timeout(Duration),

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("storage error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("invalid database name: {0}")]
    InvalidName(String),

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("discovery error: {0}")]
    Discovery(String),
}

/// Result type alias for Burrow operations.
pub type Result<T> = std::result::Result<T, BurrowError>;

impl From<std::io::Error> for BurrowError {
    fn from(err: std::io::Error) -> Self {
        BurrowError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for BurrowError {
    fn from(err: rusqlite::Error) -> Self {
        BurrowError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl BurrowError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        BurrowError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Whether the caller may retry the same request and expect it to
    /// succeed. True only for contention and budget failures; retrying bad
    /// SQL or a stale pairing code cannot help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BurrowError::Busy { .. } | BurrowError::Timeout(_))
    }

    /// Whether this failure indicates a fault in the backing store rather
    /// than a client mistake. Used by the registry to flip a database's
    /// status to `Error`.
    pub fn is_storage_fault(&self) -> bool {
        matches!(self, BurrowError::Database { .. } | BurrowError::Io { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BurrowError::NotFound {
            database: "inventory".into(),
        };
        assert_eq!(err.to_string(), "database not found: inventory");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(BurrowError::Busy {
            database: "x".into()
        }
        .is_retryable());
        assert!(BurrowError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(!BurrowError::Unauthorized.is_retryable());
        assert!(!BurrowError::Syntax {
            message: "near \"SELEKT\"".into(),
            offset: Some(0)
        }
        .is_retryable());
    }

    #[test]
    fn test_storage_faults() {
        assert!(BurrowError::from(std::io::Error::other("disk")).is_storage_fault());
        assert!(!BurrowError::Constraint {
            message: "UNIQUE".into()
        }
        .is_storage_fault());
    }
}
