//! Schema versioning for the SQLite backend

use sqlx::SqlitePool;

use super::schema::{MIGRATIONS, SCHEMA, SCHEMA_VERSION};
use crate::data::error::DataError;
use crate::utils::crypto::sha256_hex;

const BACKEND: &str = "sqlite";

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DataError> {
    let table_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
    )
    .fetch_one(pool)
    .await
    .map_err(DataError::from_sqlite)?;

    if !table_exists {
        tracing::debug!(
            "Initializing database with schema version {}",
            SCHEMA_VERSION
        );
        return apply_initial_schema(pool).await;
    }

    let current_version: i32 =
        sqlx::query_scalar("SELECT version FROM schema_version WHERE id = 1")
            .fetch_optional(pool)
            .await
            .map_err(DataError::from_sqlite)?
            .unwrap_or(0);

    if current_version == 0 {
        return apply_initial_schema(pool).await;
    }

    if current_version > SCHEMA_VERSION {
        tracing::warn!(
            current_version,
            supported = SCHEMA_VERSION,
            "SQLite schema is newer than this build"
        );
        return Ok(());
    }

    for (version, name, sql) in MIGRATIONS.iter().filter(|(v, _, _)| *v > current_version) {
        tracing::debug!("Applying migration to version {}", version);
        apply_versioned_migration(pool, *version, name, sql).await?;
    }

    tracing::debug!("Database schema is up to date (version {})", SCHEMA_VERSION);
    Ok(())
}

async fn apply_initial_schema(pool: &SqlitePool) -> Result<(), DataError> {
    let start = std::time::Instant::now();
    let mut tx = pool.begin().await.map_err(DataError::from_sqlite)?;

    sqlx::query(SCHEMA)
        .execute(&mut *tx)
        .await
        .map_err(|e| DataError::migration_failed(BACKEND, SCHEMA_VERSION, "initial_schema", &e.to_string()))?;

    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        "INSERT OR REPLACE INTO schema_version (id, version, applied_at, description) VALUES (1, ?, ?, 'Initial schema')",
    )
    .bind(SCHEMA_VERSION)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(DataError::from_sqlite)?;

    let elapsed_ms = start.elapsed().as_millis() as i64;
    sqlx::query(
        "INSERT OR REPLACE INTO schema_migrations (version, name, applied_at, checksum, execution_time_ms, success) VALUES (?, ?, ?, ?, ?, 1)",
    )
    .bind(SCHEMA_VERSION)
    .bind("initial_schema")
    .bind(now)
    .bind(sha256_hex(SCHEMA))
    .bind(elapsed_ms)
    .execute(&mut *tx)
    .await
    .map_err(DataError::from_sqlite)?;

    tx.commit().await.map_err(DataError::from_sqlite)?;

    tracing::debug!("Applied initial schema in {}ms", elapsed_ms);
    Ok(())
}

async fn apply_versioned_migration(
    pool: &SqlitePool,
    version: i32,
    name: &str,
    sql: &str,
) -> Result<(), DataError> {
    let start = std::time::Instant::now();
    let mut tx = pool.begin().await.map_err(DataError::from_sqlite)?;

    sqlx::query(sql)
        .execute(&mut *tx)
        .await
        .map_err(|e| DataError::migration_failed(BACKEND, version, name, &e.to_string()))?;

    let now = chrono::Utc::now().timestamp();
    sqlx::query("UPDATE schema_version SET version = ?, applied_at = ?, description = ? WHERE id = 1")
        .bind(version)
        .bind(now)
        .bind(name)
        .execute(&mut *tx)
        .await
        .map_err(DataError::from_sqlite)?;

    let elapsed_ms = start.elapsed().as_millis() as i64;
    sqlx::query(
        "INSERT INTO schema_migrations (version, name, applied_at, checksum, execution_time_ms, success) VALUES (?, ?, ?, ?, ?, 1)",
    )
    .bind(version)
    .bind(name)
    .bind(now)
    .bind(sha256_hex(sql))
    .bind(elapsed_ms)
    .execute(&mut *tx)
    .await
    .map_err(DataError::from_sqlite)?;

    tx.commit().await.map_err(DataError::from_sqlite)?;

    tracing::debug!(
        "Applied migration v{} ({}) in {}ms",
        version,
        name,
        elapsed_ms
    );
    Ok(())
}
