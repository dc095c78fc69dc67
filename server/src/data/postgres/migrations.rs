//! PostgreSQL migration management

use sqlx::{PgConnection, PgPool};

use super::schema::{MIGRATIONS, SCHEMA, SCHEMA_VERSION};
use crate::data::error::DataError;
use crate::utils::crypto::sha256_hex;

const BACKEND: &str = "postgres";

/// Run all pending migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), DataError> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT FROM information_schema.tables
            WHERE table_schema = current_schema()
            AND table_name = 'schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .map_err(DataError::from_postgres)?;

    let current_version: Option<i32> = if table_exists {
        sqlx::query_scalar("SELECT version FROM schema_version WHERE id = 1")
            .fetch_optional(pool)
            .await
            .map_err(DataError::from_postgres)?
    } else {
        None
    };

    match current_version {
        None => {
            tracing::debug!("Applying initial PostgreSQL schema v{}", SCHEMA_VERSION);
            apply_initial_schema(pool).await?;
        }
        Some(v) if v > SCHEMA_VERSION => {
            tracing::warn!(
                "PostgreSQL schema version {} is newer than application version {}",
                v,
                SCHEMA_VERSION
            );
        }
        Some(v) => {
            for (version, name, sql) in MIGRATIONS.iter().filter(|(m, _, _)| *m > v) {
                apply_versioned_migration(pool, *version, name, sql).await?;
            }
            tracing::debug!("PostgreSQL schema is up to date (v{})", SCHEMA_VERSION);
        }
    }

    Ok(())
}

async fn apply_initial_schema(pool: &PgPool) -> Result<(), DataError> {
    let start = std::time::Instant::now();
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await.map_err(DataError::from_postgres)?;

    execute_statements(&mut tx, SCHEMA)
        .await
        .map_err(|e| {
            DataError::migration_failed(BACKEND, SCHEMA_VERSION, "initial_schema", &e.to_string())
        })?;

    sqlx::query(
        "INSERT INTO schema_version (id, version, applied_at, description)
         VALUES (1, $1, $2, 'Initial schema')
         ON CONFLICT (id) DO UPDATE SET version = $1, applied_at = $2",
    )
    .bind(SCHEMA_VERSION)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(DataError::from_postgres)?;

    sqlx::query(
        "INSERT INTO schema_migrations (version, name, applied_at, checksum, execution_time_ms, success)
         VALUES ($1, 'initial_schema', $2, $3, $4, TRUE)
         ON CONFLICT (version) DO NOTHING",
    )
    .bind(SCHEMA_VERSION)
    .bind(now)
    .bind(sha256_hex(SCHEMA))
    .bind(start.elapsed().as_millis() as i64)
    .execute(&mut *tx)
    .await
    .map_err(DataError::from_postgres)?;

    tx.commit().await.map_err(DataError::from_postgres)?;

    tracing::debug!("PostgreSQL schema v{} applied successfully", SCHEMA_VERSION);
    Ok(())
}

async fn apply_versioned_migration(
    pool: &PgPool,
    version: i32,
    name: &str,
    sql: &str,
) -> Result<(), DataError> {
    let start = std::time::Instant::now();
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await.map_err(DataError::from_postgres)?;

    execute_statements(&mut tx, sql)
        .await
        .map_err(|e| DataError::migration_failed(BACKEND, version, name, &e.to_string()))?;

    sqlx::query(
        "INSERT INTO schema_migrations (version, name, applied_at, checksum, execution_time_ms, success)
         VALUES ($1, $2, $3, $4, $5, TRUE)",
    )
    .bind(version)
    .bind(name)
    .bind(now)
    .bind(sha256_hex(sql))
    .bind(start.elapsed().as_millis() as i64)
    .execute(&mut *tx)
    .await
    .map_err(DataError::from_postgres)?;

    sqlx::query("UPDATE schema_version SET version = $1, applied_at = $2 WHERE id = 1")
        .bind(version)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(DataError::from_postgres)?;

    tx.commit().await.map_err(DataError::from_postgres)?;

    tracing::debug!(version, name, "Applied PostgreSQL migration");
    Ok(())
}

/// Run a multi-statement script one statement at a time; prepared statements
/// cannot carry more than one command.
async fn execute_statements(conn: &mut PgConnection, sql: &str) -> Result<(), sqlx::Error> {
    for statement in split_statements(sql) {
        sqlx::query(statement).execute(&mut *conn).await?;
    }
    Ok(())
}

fn split_statements(sql: &str) -> impl Iterator<Item = &str> {
    sql.split(';').map(str::trim).filter(|s| !s.is_empty())
}
