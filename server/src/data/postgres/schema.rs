//! PostgreSQL schema definitions
//!
//! Mirrors the SQLite layout; payload is BYTEA instead of BLOB.

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Complete schema SQL for PostgreSQL
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    applied_at BIGINT NOT NULL,
    description TEXT
);

CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at BIGINT NOT NULL,
    checksum TEXT NOT NULL,
    execution_time_ms BIGINT,
    success BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE TABLE IF NOT EXISTS settings_store (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    payload BYTEA NOT NULL,
    updated_at BIGINT NOT NULL
);
"#;

/// Incremental migrations applied on top of the initial schema: (version, name, sql)
pub const MIGRATIONS: &[(i32, &str, &str)] = &[];
