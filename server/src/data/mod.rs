//! Data storage layer
//!
//! - `sqlite` - Embedded relational backend (default)
//! - `postgres` - Relational backend for shared deployments
//! - `file` - Single-document file backend, also the fallback
//! - `ratelimit` - Token-bucket stores (in-memory and Redis)
//! - `error` - Unified error type for the settings backends

pub mod error;
pub mod file;
pub mod postgres;
pub mod ratelimit;
pub mod sqlite;

pub use error::DataError;
pub use file::FileStore;
pub use postgres::PostgresService;
pub use sqlite::SqliteService;

use std::path::PathBuf;

use crate::core::config::{PostgresConfig, RelationalBackend};
use crate::core::constants::SQLITE_DB_FILENAME;
use crate::core::storage::{AppStorage, DataSubdir};

/// Backend holding the persisted settings document
///
/// Chosen once at construction; the settings store swaps the whole value on
/// an explicit reinitialize, never per request.
pub enum SettingsBackend {
    /// SQLite (default, embedded)
    Sqlite(SqliteService),
    /// PostgreSQL (shared deployments)
    Postgres(PostgresService),
    /// Plain file, used directly or as the fallback
    File(FileStore),
}

impl SettingsBackend {
    /// Initialize the relational backend of the given kind
    pub async fn init_relational(
        kind: RelationalBackend,
        storage: &AppStorage,
        postgres_config: Option<&PostgresConfig>,
    ) -> Result<Self, DataError> {
        match kind {
            RelationalBackend::Sqlite => {
                let path = storage.subdir_path(DataSubdir::Sqlite, SQLITE_DB_FILENAME);
                Ok(Self::Sqlite(SqliteService::init(&path).await?))
            }
            RelationalBackend::Postgres => {
                let config = postgres_config.ok_or_else(|| {
                    DataError::Config("PostgreSQL URL is not configured".to_string())
                })?;
                Ok(Self::Postgres(PostgresService::init(config).await?))
            }
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(FileStore::new(path))
    }

    /// Read the stored payload; `None` when nothing was saved yet
    pub async fn load(&self) -> Result<Option<Vec<u8>>, DataError> {
        match self {
            Self::Sqlite(s) => s.load().await,
            Self::Postgres(p) => p.load().await,
            Self::File(f) => f.load().await,
        }
    }

    /// Replace the stored payload
    pub async fn save(&self, payload: &[u8]) -> Result<(), DataError> {
        match self {
            Self::Sqlite(s) => s.save(payload).await,
            Self::Postgres(p) => p.save(payload).await,
            Self::File(f) => f.save(payload).await,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            Self::Postgres(_) => "postgres",
            Self::File(_) => "file",
        }
    }

    /// Close pools gracefully (no-op for the file backend)
    pub async fn close(&self) {
        match self {
            Self::Sqlite(s) => s.close().await,
            Self::Postgres(p) => p.close().await,
            Self::File(_) => {}
        }
    }
}
