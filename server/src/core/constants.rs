// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display and platform directories)
pub const APP_NAME: &str = "CfgVault";

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "cfgvault";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".cfgvault";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "cfgvault.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "CFGVAULT_CONFIG";

// =============================================================================
// Environment Variables - Debug / Logging
// =============================================================================

/// Environment variable for debug mode
pub const ENV_DEBUG: &str = "CFGVAULT_DEBUG";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "CFGVAULT_LOG";

/// Environment variable selecting the log format (`compact` or `json`)
pub const ENV_LOG_FORMAT: &str = "CFGVAULT_LOG_FORMAT";

/// Tracing target for admin access records
pub const ACCESS_LOG_TARGET: &str = "cfgvault::access";

// =============================================================================
// Environment Variables - Server
// =============================================================================

/// Environment variable for server host
pub const ENV_HOST: &str = "CFGVAULT_HOST";

/// Environment variable for server port
pub const ENV_PORT: &str = "CFGVAULT_PORT";

/// Environment variable for trusting `X-Forwarded-For` from a reverse proxy
pub const ENV_TRUST_PROXY: &str = "CFGVAULT_TRUST_PROXY";

// =============================================================================
// Server Defaults
// =============================================================================

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port
pub const DEFAULT_PORT: u16 = 5390;

/// Graceful shutdown timeout in seconds
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Request body limit for the settings API
pub const DEFAULT_BODY_LIMIT: usize = 64 * 1024;

// =============================================================================
// Environment Variables - Storage
// =============================================================================

/// Environment variable to override data directory
pub const ENV_DATA_DIR: &str = "CFGVAULT_DATA_DIR";

/// Preferred settings backend (`relational` or `file`)
pub const ENV_STORAGE_BACKEND: &str = "CFGVAULT_STORAGE_BACKEND";

/// Relational engine (`sqlite` or `postgres`)
pub const ENV_RELATIONAL_BACKEND: &str = "CFGVAULT_RELATIONAL_BACKEND";

/// PostgreSQL connection URL
pub const ENV_POSTGRES_URL: &str = "CFGVAULT_POSTGRES_URL";

/// Settings file path for the file backend
pub const ENV_SETTINGS_FILE: &str = "CFGVAULT_SETTINGS_FILE";

/// Per-call backend timeout in seconds
pub const ENV_STORAGE_TIMEOUT_SECS: &str = "CFGVAULT_STORAGE_TIMEOUT_SECS";

/// Default backend timeout in seconds
pub const DEFAULT_STORAGE_TIMEOUT_SECS: u64 = 5;

/// Settings file name used by the file backend
pub const SETTINGS_FILE_NAME: &str = "settings.json";

// =============================================================================
// SQLite Database
// =============================================================================

/// SQLite database filename
pub const SQLITE_DB_FILENAME: &str = "cfgvault.db";

/// SQLite connection pool max connections
pub const SQLITE_MAX_CONNECTIONS: u32 = 2;

/// SQLite busy timeout in seconds
pub const SQLITE_BUSY_TIMEOUT_SECS: u64 = 5;

// =============================================================================
// PostgreSQL Database
// =============================================================================

/// Default maximum connections in the pool
pub const POSTGRES_DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default minimum connections to keep warm
pub const POSTGRES_DEFAULT_MIN_CONNECTIONS: u32 = 0;

/// Default connection acquire timeout in seconds
pub const POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 5;

/// Default idle connection timeout in seconds
pub const POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default max connection lifetime in seconds
pub const POSTGRES_DEFAULT_MAX_LIFETIME_SECS: u64 = 1800;

/// Default statement timeout in seconds (0 = disabled)
pub const POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// Secrets
// =============================================================================

/// Key used to encrypt the persisted settings payload
pub const ENV_ENCRYPTION_KEY: &str = "CFGVAULT_ENCRYPTION_KEY";

/// Bearer token required for mutating operations
pub const ENV_ADMIN_TOKEN: &str = "CFGVAULT_ADMIN_TOKEN";

/// Value shown in place of a stored secret
pub const MASK_SENTINEL: &str = "********";

/// Value written to the audit log in place of a secret
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Header carrying the admin token (alternative to `Authorization: Bearer`)
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

// =============================================================================
// Audit Log
// =============================================================================

pub const ENV_AUDIT_PATH: &str = "CFGVAULT_AUDIT_PATH";
pub const ENV_AUDIT_MAX_BYTES: &str = "CFGVAULT_AUDIT_MAX_BYTES";

/// Audit log file name
pub const AUDIT_FILE_NAME: &str = "settings_audit.log";

/// Rotate once the active log grows past this many bytes (5 MiB)
pub const DEFAULT_AUDIT_MAX_BYTES: u64 = 5 * 1024 * 1024;

/// Largest page a single audit read may return
pub const DEFAULT_AUDIT_MAX_PAGE_SIZE: usize = 200;

/// Page size used when the caller does not pass one
pub const DEFAULT_AUDIT_PAGE_SIZE: usize = 50;

// =============================================================================
// Rate Limiting
// =============================================================================

pub const ENV_RATE_LIMIT_ENABLED: &str = "CFGVAULT_RATE_LIMIT_ENABLED";
pub const ENV_RATE_LIMIT_BACKEND: &str = "CFGVAULT_RATE_LIMIT_BACKEND";
pub const ENV_RATE_LIMIT_SETTINGS: &str = "CFGVAULT_RATE_LIMIT_SETTINGS";
pub const ENV_RATE_LIMIT_AUDIT: &str = "CFGVAULT_RATE_LIMIT_AUDIT";
pub const ENV_RATE_LIMIT_HEALTH: &str = "CFGVAULT_RATE_LIMIT_HEALTH";
pub const ENV_RATE_LIMIT_TIMEOUT_MS: &str = "CFGVAULT_RATE_LIMIT_TIMEOUT_MS";
pub const ENV_REDIS_URL: &str = "CFGVAULT_REDIS_URL";

pub const DEFAULT_RATE_LIMIT_SETTINGS: &str = "30/minute";
pub const DEFAULT_RATE_LIMIT_AUDIT: &str = "30/minute";
pub const DEFAULT_RATE_LIMIT_HEALTH: &str = "120/minute";

/// Per-call timeout for the bucket store in milliseconds
pub const DEFAULT_RATE_LIMIT_TIMEOUT_MS: u64 = 250;

/// Version prefix for rate-limit keys in the shared store
pub const RATE_LIMIT_KEY_VERSION: &str = "v1";

/// Sweep idle in-memory buckets every N checks
pub const RATE_LIMIT_CLEANUP_INTERVAL: u64 = 256;
