//! Unified error type for the settings backends
//!
//! Wraps failures from SQLite, PostgreSQL and the file store while keeping
//! track of which backend produced them.

use thiserror::Error;

/// Failure of a settings backend load, save or connect
#[derive(Error, Debug)]
pub enum DataError {
    /// SQLite query or pool failure
    #[error("SQLite error: {0}")]
    Sqlite(sqlx::Error),

    /// PostgreSQL query or pool failure
    #[error("PostgreSQL error: {0}")]
    Postgres(sqlx::Error),

    /// A versioned schema step did not apply
    #[error("Migration {version} ({name}) failed on {backend}: {error}")]
    MigrationFailed {
        backend: &'static str,
        version: i32,
        name: String,
        error: String,
    },

    /// Backend selected without the options it needs (e.g. no URL)
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error (file backend, database directory)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend call exceeded its deadline
    #[error("{backend} did not answer within {timeout_secs}s")]
    Timeout {
        backend: &'static str,
        timeout_secs: u64,
    },

    /// Connect or ping failed during selection
    #[error("Backend {backend} is not available: {reason}")]
    BackendUnavailable {
        backend: &'static str,
        reason: String,
    },
}

impl DataError {
    pub fn from_sqlite(e: sqlx::Error) -> Self {
        Self::Sqlite(e)
    }

    pub fn from_postgres(e: sqlx::Error) -> Self {
        Self::Postgres(e)
    }

    pub fn migration_failed(backend: &'static str, version: i32, name: &str, error: &str) -> Self {
        Self::MigrationFailed {
            backend,
            version,
            name: name.to_string(),
            error: error.to_string(),
        }
    }

    pub fn timeout(backend: &'static str, timeout_secs: u64) -> Self {
        Self::Timeout {
            backend,
            timeout_secs,
        }
    }

    pub fn backend_unavailable(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }

    /// Backend label used in logs and storage status
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            Self::Postgres(_) => "postgres",
            Self::Io(_) => "file",
            Self::MigrationFailed { backend, .. }
            | Self::Timeout { backend, .. }
            | Self::BackendUnavailable { backend, .. } => backend,
            Self::Config(_) => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_failed_error_display() {
        let err = DataError::migration_failed("postgres", 2, "add_history", "syntax error");
        assert_eq!(
            err.to_string(),
            "Migration 2 (add_history) failed on postgres: syntax error"
        );
    }

    #[test]
    fn test_timeout_error_display() {
        let err = DataError::timeout("sqlite", 5);
        assert_eq!(err.to_string(), "sqlite did not answer within 5s");
    }

    #[test]
    fn test_backend_unavailable_error_display() {
        let err = DataError::backend_unavailable("postgres", "connection refused");
        assert_eq!(
            err.to_string(),
            "Backend postgres is not available: connection refused"
        );
    }

    #[test]
    fn test_backend_method() {
        assert_eq!(DataError::timeout("file", 5).backend(), "file");
        assert_eq!(
            DataError::from_postgres(sqlx::Error::PoolTimedOut).backend(),
            "postgres"
        );
        assert_eq!(
            DataError::migration_failed("sqlite", 1, "test", "error").backend(),
            "sqlite"
        );
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(DataError::from(io).backend(), "file");
    }
}
