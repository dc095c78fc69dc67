//! SQLite settings backend
//!
//! Embedded default for single-host deployments. The settings document is a
//! single row in `settings_store`, replaced wholesale on every save.
//! - WAL mode so the health endpoint can read while a save commits
//! - Busy timeout instead of immediate `SQLITE_BUSY` errors

mod migrations;
pub mod schema;

pub use sqlx::SqlitePool;

use std::path::Path;
use std::time::Duration;

use sqlx::ConnectOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::log::LevelFilter;

use super::error::DataError;
use crate::core::constants::{SQLITE_BUSY_TIMEOUT_SECS, SQLITE_MAX_CONNECTIONS};

/// SQLite database service
pub struct SqliteService {
    pool: SqlitePool,
}

impl SqliteService {
    /// Open (or create) the database file and run pending migrations
    pub async fn init(db_path: &Path) -> Result<Self, DataError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(SQLITE_BUSY_TIMEOUT_SECS))
            .log_statements(LevelFilter::Trace);

        let pool = SqlitePoolOptions::new()
            .max_connections(SQLITE_MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(DataError::from_sqlite)?;

        migrations::run_migrations(&pool).await?;

        tracing::debug!(path = %db_path.display(), "SqliteService initialized");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Fetch the stored settings payload, if any
    pub async fn load(&self) -> Result<Option<Vec<u8>>, DataError> {
        sqlx::query_scalar::<_, Vec<u8>>("SELECT payload FROM settings_store WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::from_sqlite)
    }

    /// Replace the stored settings payload
    pub async fn save(&self, payload: &[u8]) -> Result<(), DataError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO settings_store (id, payload, updated_at) VALUES (1, ?, ?)
             ON CONFLICT(id) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
        )
        .bind(payload)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DataError::from_sqlite)?;
        Ok(())
    }

    /// Close the connection pool gracefully
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("SQLite pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open(dir: &tempfile::TempDir) -> SqliteService {
        SqliteService::init(&dir.path().join("sqlite").join("test.db"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_fresh_database_has_no_payload() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir).await;
        assert!(db.load().await.unwrap().is_none());

        let version: i32 = sqlx::query_scalar("SELECT version FROM schema_version WHERE id = 1")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_save_replaces_single_row() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir).await;

        db.save(b"first").await.unwrap();
        db.save(b"second").await.unwrap();

        assert_eq!(db.load().await.unwrap().as_deref(), Some(&b"second"[..]));
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM settings_store")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = open(&dir).await;
            db.save(b"kept").await.unwrap();
            db.close().await;
        }
        let db = open(&dir).await;
        assert_eq!(db.load().await.unwrap().as_deref(), Some(&b"kept"[..]));

        let migrations: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(migrations, 1);
    }
}
