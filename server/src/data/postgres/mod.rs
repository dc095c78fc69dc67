//! PostgreSQL settings backend
//!
//! Used when several bot instances share one settings document. Pool bounds,
//! connection lifetime and a per-statement timeout come from
//! [`PostgresConfig`].

mod migrations;
pub mod schema;

pub use sqlx::PgPool;

use std::time::Duration;

use sqlx::ConnectOptions;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tracing::log::LevelFilter;

use super::error::DataError;
use crate::core::config::PostgresConfig;

/// PostgreSQL database service
pub struct PostgresService {
    pool: PgPool,
}

impl PostgresService {
    /// Connect, size the pool from configuration and run pending migrations
    pub async fn init(config: &PostgresConfig) -> Result<Self, DataError> {
        let url = config.url.as_str();
        if url.is_empty() {
            return Err(DataError::Config("PostgreSQL URL is required".into()));
        }

        // The parse error can echo the URL, so only its kind is reported
        let mut options: PgConnectOptions = url
            .parse()
            .map_err(|_| DataError::Config("Invalid PostgreSQL URL".to_string()))?;

        options = options.log_statements(LevelFilter::Trace);

        if config.statement_timeout_secs > 0 {
            options = options.options([(
                "statement_timeout",
                format!("{}s", config.statement_timeout_secs),
            )]);
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .connect_with(options)
            .await
            .map_err(DataError::from_postgres)?;

        migrations::run_migrations(&pool).await?;

        tracing::debug!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            acquire_timeout_secs = config.acquire_timeout_secs,
            statement_timeout_secs = config.statement_timeout_secs,
            "PostgresService initialized"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Fetch the stored settings payload, if any
    pub async fn load(&self) -> Result<Option<Vec<u8>>, DataError> {
        sqlx::query_scalar::<_, Vec<u8>>("SELECT payload FROM settings_store WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::from_postgres)
    }

    /// Replace the stored settings payload
    pub async fn save(&self, payload: &[u8]) -> Result<(), DataError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO settings_store (id, payload, updated_at) VALUES (1, $1, $2)
             ON CONFLICT (id) DO UPDATE SET payload = EXCLUDED.payload, updated_at = EXCLUDED.updated_at",
        )
        .bind(payload)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DataError::from_postgres)?;
        Ok(())
    }

    /// Close the connection pool gracefully
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("PostgreSQL pool closed");
    }
}
