use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::ratelimit::Rate;
use crate::utils::file::expand_path;

use super::cli::CliConfig;
use super::constants::{
    APP_DOT_FOLDER, CONFIG_FILE_NAME, DEFAULT_AUDIT_MAX_BYTES, DEFAULT_AUDIT_MAX_PAGE_SIZE,
    DEFAULT_HOST, DEFAULT_PORT, DEFAULT_RATE_LIMIT_AUDIT, DEFAULT_RATE_LIMIT_HEALTH,
    DEFAULT_RATE_LIMIT_SETTINGS, DEFAULT_RATE_LIMIT_TIMEOUT_MS, DEFAULT_STORAGE_TIMEOUT_SECS,
    ENV_AUDIT_MAX_BYTES, ENV_AUDIT_PATH, POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS,
    POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS, POSTGRES_DEFAULT_MAX_CONNECTIONS,
    POSTGRES_DEFAULT_MAX_LIFETIME_SECS, POSTGRES_DEFAULT_MIN_CONNECTIONS,
    POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS,
};

// =============================================================================
// Backend Enums
// =============================================================================

/// Preferred persistence backend for the settings document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Relational,
    File,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Relational => write!(f, "relational"),
            StorageBackend::File => write!(f, "file"),
        }
    }
}

/// Relational engine used when the relational backend is preferred
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationalBackend {
    #[default]
    Sqlite,
    Postgres,
}

impl fmt::Display for RelationalBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationalBackend::Sqlite => write!(f, "sqlite"),
            RelationalBackend::Postgres => write!(f, "postgres"),
        }
    }
}

/// Bucket store used by the rate limiter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitBackend {
    #[default]
    Memory,
    Redis,
}

impl fmt::Display for RateLimitBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitBackend::Memory => write!(f, "memory"),
            RateLimitBackend::Redis => write!(f, "redis"),
        }
    }
}

// =============================================================================
// File Config (JSON)
// =============================================================================

/// Server configuration section (from JSON config file)
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub trust_proxy: Option<bool>,
}

/// PostgreSQL configuration section (from JSON config file)
#[derive(Default, Clone, Deserialize)]
pub struct PostgresFileConfig {
    /// PostgreSQL connection URL (or use CFGVAULT_POSTGRES_URL env var)
    pub url: Option<String>,
    /// Maximum number of connections in the pool (default: 5)
    pub max_connections: Option<u32>,
    /// Minimum number of connections to keep warm (default: 0)
    pub min_connections: Option<u32>,
    /// Connection acquire timeout in seconds (default: 5)
    pub acquire_timeout_secs: Option<u64>,
    /// Idle connection timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Max connection lifetime in seconds (default: 1800)
    pub max_lifetime_secs: Option<u64>,
    /// Statement timeout in seconds, 0 to disable (default: 10)
    pub statement_timeout_secs: Option<u64>,
}

impl fmt::Debug for PostgresFileConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresFileConfig")
            .field("url", &self.url.as_ref().map(|_| "***"))
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .field("max_lifetime_secs", &self.max_lifetime_secs)
            .field("statement_timeout_secs", &self.statement_timeout_secs)
            .finish()
    }
}

/// Storage configuration section (from JSON config file)
#[derive(Debug, Default, Clone, Deserialize)]
pub struct StorageFileConfig {
    /// Preferred backend: relational (default) or file
    pub backend: Option<StorageBackend>,
    /// Relational engine: sqlite (default) or postgres
    pub relational: Option<RelationalBackend>,
    /// PostgreSQL-specific configuration
    pub postgres: Option<PostgresFileConfig>,
    /// Settings file path for the file backend
    pub file: Option<PathBuf>,
    /// Timeout for a single backend call in seconds
    pub timeout_secs: Option<u64>,
}

/// Rate limit configuration section (from JSON config file)
#[derive(Default, Clone, Deserialize)]
pub struct RateLimitFileConfig {
    pub enabled: Option<bool>,
    pub backend: Option<RateLimitBackend>,
    pub redis_url: Option<String>,
    pub settings: Option<String>,
    pub audit: Option<String>,
    pub health: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl fmt::Debug for RateLimitFileConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitFileConfig")
            .field("enabled", &self.enabled)
            .field("backend", &self.backend)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "***"))
            .field("settings", &self.settings)
            .field("audit", &self.audit)
            .field("health", &self.health)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// Admin configuration section (from JSON config file)
#[derive(Default, Clone, Deserialize)]
pub struct AdminFileConfig {
    pub token: Option<String>,
}

impl fmt::Debug for AdminFileConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminFileConfig")
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Secrets configuration section (from JSON config file)
#[derive(Default, Clone, Deserialize)]
pub struct SecretsFileConfig {
    pub encryption_key: Option<String>,
}

impl fmt::Debug for SecretsFileConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretsFileConfig")
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Audit log configuration section (from JSON config file)
#[derive(Debug, Default, Clone, Deserialize)]
pub struct AuditFileConfig {
    pub path: Option<PathBuf>,
    pub max_bytes: Option<u64>,
    pub max_page_size: Option<usize>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub server: Option<ServerFileConfig>,
    pub storage: Option<StorageFileConfig>,
    pub rate_limit: Option<RateLimitFileConfig>,
    pub admin: Option<AdminFileConfig>,
    pub secrets: Option<SecretsFileConfig>,
    pub audit: Option<AuditFileConfig>,
    pub debug: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::trace!(config = ?config, "Parsed config file");
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }

    /// Merge another FileConfig into this one (other takes precedence)
    fn merge(&mut self, other: FileConfig) {
        if let Some(server) = other.server {
            let current = self.server.get_or_insert_with(ServerFileConfig::default);
            if server.host.is_some() {
                tracing::trace!(host = ?server.host, "Merging server.host");
                current.host = server.host;
            }
            if server.port.is_some() {
                tracing::trace!(port = ?server.port, "Merging server.port");
                current.port = server.port;
            }
            if server.trust_proxy.is_some() {
                current.trust_proxy = server.trust_proxy;
            }
        }

        if let Some(storage) = other.storage {
            let current = self.storage.get_or_insert_with(StorageFileConfig::default);
            if storage.backend.is_some() {
                tracing::trace!(backend = ?storage.backend, "Merging storage.backend");
                current.backend = storage.backend;
            }
            if storage.relational.is_some() {
                tracing::trace!(relational = ?storage.relational, "Merging storage.relational");
                current.relational = storage.relational;
            }
            if storage.file.is_some() {
                tracing::trace!(file = ?storage.file, "Merging storage.file");
                current.file = storage.file;
            }
            if storage.timeout_secs.is_some() {
                tracing::trace!(timeout_secs = ?storage.timeout_secs, "Merging storage.timeout_secs");
                current.timeout_secs = storage.timeout_secs;
            }
            if let Some(pg) = storage.postgres {
                let current_pg = current
                    .postgres
                    .get_or_insert_with(PostgresFileConfig::default);
                if pg.url.is_some() {
                    tracing::trace!(url = "***", "Merging storage.postgres.url");
                    current_pg.url = pg.url;
                }
                if pg.max_connections.is_some() {
                    current_pg.max_connections = pg.max_connections;
                }
                if pg.min_connections.is_some() {
                    current_pg.min_connections = pg.min_connections;
                }
                if pg.acquire_timeout_secs.is_some() {
                    current_pg.acquire_timeout_secs = pg.acquire_timeout_secs;
                }
                if pg.idle_timeout_secs.is_some() {
                    current_pg.idle_timeout_secs = pg.idle_timeout_secs;
                }
                if pg.max_lifetime_secs.is_some() {
                    current_pg.max_lifetime_secs = pg.max_lifetime_secs;
                }
                if pg.statement_timeout_secs.is_some() {
                    current_pg.statement_timeout_secs = pg.statement_timeout_secs;
                }
            }
        }

        if let Some(rate_limit) = other.rate_limit {
            let current = self
                .rate_limit
                .get_or_insert_with(RateLimitFileConfig::default);
            if rate_limit.enabled.is_some() {
                tracing::trace!(enabled = ?rate_limit.enabled, "Merging rate_limit.enabled");
                current.enabled = rate_limit.enabled;
            }
            if rate_limit.backend.is_some() {
                tracing::trace!(backend = ?rate_limit.backend, "Merging rate_limit.backend");
                current.backend = rate_limit.backend;
            }
            if rate_limit.redis_url.is_some() {
                tracing::trace!(redis_url = "***", "Merging rate_limit.redis_url");
                current.redis_url = rate_limit.redis_url;
            }
            if rate_limit.settings.is_some() {
                tracing::trace!(settings = ?rate_limit.settings, "Merging rate_limit.settings");
                current.settings = rate_limit.settings;
            }
            if rate_limit.audit.is_some() {
                tracing::trace!(audit = ?rate_limit.audit, "Merging rate_limit.audit");
                current.audit = rate_limit.audit;
            }
            if rate_limit.health.is_some() {
                tracing::trace!(health = ?rate_limit.health, "Merging rate_limit.health");
                current.health = rate_limit.health;
            }
            if rate_limit.timeout_ms.is_some() {
                current.timeout_ms = rate_limit.timeout_ms;
            }
        }

        if let Some(admin) = other.admin {
            let current = self.admin.get_or_insert_with(AdminFileConfig::default);
            if admin.token.is_some() {
                tracing::trace!(token = "***", "Merging admin.token");
                current.token = admin.token;
            }
        }

        if let Some(secrets) = other.secrets {
            let current = self.secrets.get_or_insert_with(SecretsFileConfig::default);
            if secrets.encryption_key.is_some() {
                tracing::trace!(encryption_key = "***", "Merging secrets.encryption_key");
                current.encryption_key = secrets.encryption_key;
            }
        }

        if let Some(audit) = other.audit {
            let current = self.audit.get_or_insert_with(AuditFileConfig::default);
            if audit.path.is_some() {
                tracing::trace!(path = ?audit.path, "Merging audit.path");
                current.path = audit.path;
            }
            if audit.max_bytes.is_some() {
                tracing::trace!(max_bytes = ?audit.max_bytes, "Merging audit.max_bytes");
                current.max_bytes = audit.max_bytes;
            }
            if audit.max_page_size.is_some() {
                current.max_page_size = audit.max_page_size;
            }
        }

        if other.debug.is_some() {
            tracing::trace!(debug = ?other.debug, "Merging debug");
            self.debug = other.debug;
        }
    }
}

// =============================================================================
// Runtime Config
// =============================================================================

/// Server configuration (final/runtime)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Use the first `X-Forwarded-For` entry as the caller address.
    /// Off unless a reverse proxy overwrites the header.
    pub trust_proxy: bool,
}

/// PostgreSQL configuration (final/runtime)
#[derive(Clone)]
pub struct PostgresConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections to keep warm
    pub min_connections: u32,
    /// Connection acquire timeout in seconds
    pub acquire_timeout_secs: u64,
    /// Idle connection timeout in seconds
    pub idle_timeout_secs: u64,
    /// Max connection lifetime in seconds
    pub max_lifetime_secs: u64,
    /// Statement timeout in seconds (0 = disabled)
    pub statement_timeout_secs: u64,
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("url", &"***")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .field("max_lifetime_secs", &self.max_lifetime_secs)
            .field("statement_timeout_secs", &self.statement_timeout_secs)
            .finish()
    }
}

/// Settings storage configuration (final/runtime)
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub relational: RelationalBackend,
    /// Only present when a PostgreSQL URL was supplied
    pub postgres: Option<PostgresConfig>,
    /// Explicit settings file path; defaults to the data directory
    pub file: Option<PathBuf>,
    pub timeout_secs: u64,
}

/// Rate limit configuration (final/runtime)
#[derive(Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub backend: RateLimitBackend,
    pub redis_url: Option<String>,
    pub settings: Rate,
    pub audit: Rate,
    pub health: Rate,
    pub timeout_ms: u64,
}

impl fmt::Debug for RateLimitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitConfig")
            .field("enabled", &self.enabled)
            .field("backend", &self.backend)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "***"))
            .field("settings", &self.settings)
            .field("audit", &self.audit)
            .field("health", &self.health)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// Admin guard configuration (final/runtime)
#[derive(Clone, Default)]
pub struct AdminConfig {
    /// None leaves admin operations open
    pub token: Option<String>,
}

impl fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminConfig")
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Secrets configuration (final/runtime)
#[derive(Clone, Default)]
pub struct SecretsConfig {
    /// None stores the settings payload unencrypted
    pub encryption_key: Option<String>,
}

impl fmt::Debug for SecretsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretsConfig")
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Audit log configuration (final/runtime)
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Explicit log path; defaults to the data directory
    pub path: Option<PathBuf>,
    pub max_bytes: u64,
    pub max_page_size: usize,
}

/// Final merged application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub rate_limit: RateLimitConfig,
    pub admin: AdminConfig,
    pub secrets: SecretsConfig,
    pub audit: AuditConfig,
    pub debug: bool,
}

impl AppConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Profile directory config (~/.cfgvault/cfgvault.json)
    /// 3. Local directory config OR CLI-specified config path
    /// 4. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading application configuration");

        let mut file_config = FileConfig::default();
        let mut found_configs: Vec<String> = Vec::new();

        if let Some(profile_path) = get_profile_config_path()
            && profile_path.exists()
        {
            let profile_config = FileConfig::load_from_file(&profile_path)?;
            profile_config.warn_unknown_fields();
            file_config.merge(profile_config);
            found_configs.push(profile_path.display().to_string());
        }

        let overlay_path = if let Some(ref path) = cli.config {
            let expanded = expand_path(&path.to_string_lossy());
            if !expanded.exists() {
                anyhow::bail!("Config file not found: {}", expanded.display());
            }
            Some(expanded)
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        if let Some(path) = overlay_path {
            let overlay_config = FileConfig::load_from_file(&path)?;
            overlay_config.warn_unknown_fields();
            file_config.merge(overlay_config);
            found_configs.push(path.display().to_string());
        }

        tracing::debug!(configs = ?found_configs, "Config files loaded");

        let config = Self::resolve(file_config, cli)?;
        config.validate()?;

        tracing::debug!(
            host = %config.server.host,
            port = config.server.port,
            trust_proxy = config.server.trust_proxy,
            debug = config.debug,
            storage_backend = %config.storage.backend,
            relational_backend = %config.storage.relational,
            storage_timeout_secs = config.storage.timeout_secs,
            rate_limit_enabled = config.rate_limit.enabled,
            rate_limit_backend = %config.rate_limit.backend,
            admin_guard = config.admin.token.is_some(),
            encrypted = config.secrets.encryption_key.is_some(),
            audit_max_bytes = config.audit.max_bytes,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Layer a merged file config under CLI/env overrides and apply defaults
    fn resolve(file_config: FileConfig, cli: &CliConfig) -> Result<Self> {
        let file_server = file_config.server.unwrap_or_default();
        let file_storage = file_config.storage.unwrap_or_default();
        let file_rate_limit = file_config.rate_limit.unwrap_or_default();
        let file_admin = file_config.admin.unwrap_or_default();
        let file_secrets = file_config.secrets.unwrap_or_default();
        let file_audit = file_config.audit.unwrap_or_default();

        let host = cli
            .host
            .clone()
            .or(file_server.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = cli.port.or(file_server.port).unwrap_or(DEFAULT_PORT);
        let trust_proxy = cli
            .trust_proxy
            .or(file_server.trust_proxy)
            .unwrap_or(false);

        let debug = cli.debug || file_config.debug.unwrap_or(false);

        // Storage: CLI/env overrides file config
        let file_pg = file_storage.postgres.unwrap_or_default();
        let postgres = cli
            .postgres_url
            .clone()
            .or(file_pg.url)
            .filter(|url| !url.is_empty())
            .map(|url| PostgresConfig {
                url,
                max_connections: file_pg
                    .max_connections
                    .unwrap_or(POSTGRES_DEFAULT_MAX_CONNECTIONS),
                min_connections: file_pg
                    .min_connections
                    .unwrap_or(POSTGRES_DEFAULT_MIN_CONNECTIONS),
                acquire_timeout_secs: file_pg
                    .acquire_timeout_secs
                    .unwrap_or(POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS),
                idle_timeout_secs: file_pg
                    .idle_timeout_secs
                    .unwrap_or(POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS),
                max_lifetime_secs: file_pg
                    .max_lifetime_secs
                    .unwrap_or(POSTGRES_DEFAULT_MAX_LIFETIME_SECS),
                statement_timeout_secs: file_pg
                    .statement_timeout_secs
                    .unwrap_or(POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS),
            });

        let storage = StorageConfig {
            backend: cli
                .storage_backend
                .or(file_storage.backend)
                .unwrap_or_default(),
            relational: cli
                .relational_backend
                .or(file_storage.relational)
                .unwrap_or_default(),
            postgres,
            file: cli
                .settings_file
                .clone()
                .or(file_storage.file)
                .map(|p| expand_path(&p.to_string_lossy())),
            timeout_secs: cli
                .storage_timeout_secs
                .or(file_storage.timeout_secs)
                .unwrap_or(DEFAULT_STORAGE_TIMEOUT_SECS),
        };

        // Rate limiting: rates are parsed here so a typo fails startup
        let rate_limit = RateLimitConfig {
            enabled: cli
                .rate_limit_enabled
                .or(file_rate_limit.enabled)
                .unwrap_or(true),
            backend: cli
                .rate_limit_backend
                .or(file_rate_limit.backend)
                .unwrap_or_default(),
            redis_url: cli
                .redis_url
                .clone()
                .or(file_rate_limit.redis_url)
                .filter(|url| !url.is_empty()),
            settings: resolve_rate(
                "settings",
                cli.rate_limit_settings.as_ref(),
                file_rate_limit.settings,
                DEFAULT_RATE_LIMIT_SETTINGS,
            )?,
            audit: resolve_rate(
                "audit",
                cli.rate_limit_audit.as_ref(),
                file_rate_limit.audit,
                DEFAULT_RATE_LIMIT_AUDIT,
            )?,
            health: resolve_rate(
                "health",
                cli.rate_limit_health.as_ref(),
                file_rate_limit.health,
                DEFAULT_RATE_LIMIT_HEALTH,
            )?,
            timeout_ms: cli
                .rate_limit_timeout_ms
                .or(file_rate_limit.timeout_ms)
                .unwrap_or(DEFAULT_RATE_LIMIT_TIMEOUT_MS),
        };

        let admin = AdminConfig {
            token: cli
                .admin_token
                .clone()
                .or(file_admin.token)
                .filter(|t| !t.is_empty()),
        };

        let secrets = SecretsConfig {
            encryption_key: cli
                .encryption_key
                .clone()
                .or(file_secrets.encryption_key)
                .filter(|k| !k.is_empty()),
        };

        // Audit: env > file > defaults (no dedicated CLI flags)
        let audit = AuditConfig {
            path: std::env::var(ENV_AUDIT_PATH)
                .ok()
                .map(PathBuf::from)
                .or(file_audit.path)
                .map(|p| expand_path(&p.to_string_lossy())),
            max_bytes: std::env::var(ENV_AUDIT_MAX_BYTES)
                .ok()
                .and_then(|v| v.parse().ok())
                .or(file_audit.max_bytes)
                .unwrap_or(DEFAULT_AUDIT_MAX_BYTES),
            max_page_size: file_audit
                .max_page_size
                .unwrap_or(DEFAULT_AUDIT_MAX_PAGE_SIZE),
        };

        Ok(Self {
            server: ServerConfig {
                host,
                port,
                trust_proxy,
            },
            storage,
            rate_limit,
            admin,
            secrets,
            audit,
            debug,
        })
    }

    /// Validate the configuration for consistency and correctness
    fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            anyhow::bail!("Configuration error: server.host must not be empty");
        }

        if self.server.port == 0 {
            anyhow::bail!("Configuration error: server.port must be greater than 0");
        }

        if self.storage.timeout_secs == 0 {
            anyhow::bail!("Configuration error: storage.timeout_secs must be greater than 0");
        }

        // Redis URL required when using the shared bucket store
        if self.rate_limit.enabled
            && self.rate_limit.backend == RateLimitBackend::Redis
            && self.rate_limit.redis_url.is_none()
        {
            anyhow::bail!(
                "Configuration error: rate_limit.redis_url is required when rate_limit.backend is 'redis'"
            );
        }

        if self.rate_limit.timeout_ms == 0 {
            anyhow::bail!("Configuration error: rate_limit.timeout_ms must be greater than 0");
        }

        if self.audit.max_page_size == 0 {
            anyhow::bail!("Configuration error: audit.max_page_size must be greater than 0");
        }

        if self.audit.max_bytes == 0 {
            tracing::warn!("audit.max_bytes is 0, the audit log will rotate on every write");
        }

        // Missing Postgres URL is not fatal: backend selection falls back to the file store
        if self.storage.backend == StorageBackend::Relational
            && self.storage.relational == RelationalBackend::Postgres
            && self.storage.postgres.is_none()
        {
            tracing::warn!(
                "storage.relational is 'postgres' but no storage.postgres.url is set; \
                 settings will be served from the file backend"
            );
        }

        if self.secrets.encryption_key.is_none() {
            tracing::warn!(
                "No encryption key configured, settings (including secrets) are stored unencrypted"
            );
        }

        if self.admin.token.is_none() && is_all_interfaces(&self.server.host) {
            tracing::warn!(
                host = %self.server.host,
                "No admin token configured while binding to all network interfaces. \
                 Anyone on your network can change settings."
            );
        }

        Ok(())
    }
}

/// Pick a rate string (CLI > file > default) and parse it
fn resolve_rate(
    name: &str,
    cli: Option<&String>,
    file: Option<String>,
    default: &str,
) -> Result<Rate> {
    let raw = cli.cloned().or(file).unwrap_or_else(|| default.to_string());
    Rate::parse(&raw)
        .with_context(|| format!("Configuration error: rate_limit.{} '{}' is invalid", name, raw))
}

/// Get the profile config path (~/.cfgvault/cfgvault.json)
fn get_profile_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(APP_DOT_FOLDER).join(CONFIG_FILE_NAME))
}

/// Check if host binds to all network interfaces
pub fn is_all_interfaces(host: &str) -> bool {
    matches!(host, "0.0.0.0" | "::" | "[::]")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn resolve_json(json: &str, cli: &CliConfig) -> Result<AppConfig> {
        let file_config: FileConfig = serde_json::from_str(json).unwrap();
        AppConfig::resolve(file_config, cli)
    }

    #[test]
    fn test_storage_backend_serde() {
        let backend: StorageBackend = serde_json::from_str(r#""relational""#).unwrap();
        assert_eq!(backend, StorageBackend::Relational);

        let backend: StorageBackend = serde_json::from_str(r#""file""#).unwrap();
        assert_eq!(backend, StorageBackend::File);
    }

    #[test]
    fn test_backend_display() {
        assert_eq!(StorageBackend::Relational.to_string(), "relational");
        assert_eq!(RelationalBackend::Postgres.to_string(), "postgres");
        assert_eq!(RateLimitBackend::Redis.to_string(), "redis");
    }

    #[test]
    fn test_file_config_parse_full() {
        let json = r#"{
            "server": { "host": "0.0.0.0", "port": 8080 },
            "storage": { "backend": "file", "file": "/tmp/settings.json", "timeout_secs": 2 },
            "rate_limit": { "settings": "3/minute", "backend": "memory" },
            "admin": { "token": "tok123" }
        }"#;
        let config: FileConfig = serde_json::from_str(json).unwrap();

        assert_eq!(
            config.server.as_ref().unwrap().host,
            Some("0.0.0.0".to_string())
        );
        let storage = config.storage.as_ref().unwrap();
        assert_eq!(storage.backend, Some(StorageBackend::File));
        assert_eq!(storage.timeout_secs, Some(2));
        assert_eq!(
            config.rate_limit.as_ref().unwrap().settings.as_deref(),
            Some("3/minute")
        );
        assert_eq!(
            config.admin.as_ref().unwrap().token.as_deref(),
            Some("tok123")
        );
    }

    #[test]
    fn test_file_config_parse_extra_fields() {
        let json = r#"{ "server": { "port": 1 }, "unknown_section": true }"#;
        let config: FileConfig = serde_json::from_str(json).unwrap();
        let extra = config.extra.as_object().unwrap();
        assert!(extra.contains_key("unknown_section"));
    }

    #[test]
    fn test_file_config_merge() {
        let mut base: FileConfig = serde_json::from_str(
            r#"{
                "server": { "host": "base.host", "port": 1000 },
                "storage": { "postgres": { "url": "postgres://a", "max_connections": 3 } },
                "debug": false
            }"#,
        )
        .unwrap();
        let overlay: FileConfig = serde_json::from_str(
            r#"{
                "server": { "port": 2000 },
                "storage": { "postgres": { "url": "postgres://b" } },
                "debug": true
            }"#,
        )
        .unwrap();
        base.merge(overlay);

        let server = base.server.as_ref().unwrap();
        assert_eq!(server.host.as_deref(), Some("base.host"));
        assert_eq!(server.port, Some(2000));
        let pg = base.storage.as_ref().unwrap().postgres.as_ref().unwrap();
        assert_eq!(pg.url.as_deref(), Some("postgres://b"));
        assert_eq!(pg.max_connections, Some(3));
        assert_eq!(base.debug, Some(true));
    }

    #[test]
    fn test_app_config_defaults() {
        let config = resolve_json("{}", &CliConfig::default()).unwrap();

        assert_eq!(config.server.host, DEFAULT_HOST);
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert!(!config.server.trust_proxy);
        assert_eq!(config.storage.backend, StorageBackend::Relational);
        assert_eq!(config.storage.relational, RelationalBackend::Sqlite);
        assert!(config.storage.postgres.is_none());
        assert!(config.rate_limit.enabled);
        assert_eq!(config.rate_limit.backend, RateLimitBackend::Memory);
        assert_eq!(config.rate_limit.settings.capacity, 30);
        assert_eq!(config.rate_limit.health.capacity, 120);
        assert!(config.admin.token.is_none());
        assert!(config.secrets.encryption_key.is_none());
        assert_eq!(config.audit.max_page_size, DEFAULT_AUDIT_MAX_PAGE_SIZE);
        assert!(!config.debug);
        config.validate().unwrap();
    }

    #[test]
    fn test_app_config_cli_override() {
        let cli = CliConfig {
            host: Some("cli.host".to_string()),
            port: Some(3000),
            storage_backend: Some(StorageBackend::File),
            rate_limit_settings: Some("3/minute".to_string()),
            admin_token: Some("cli-token".to_string()),
            debug: true,
            ..Default::default()
        };
        let json = r#"{
            "server": { "host": "file.host", "port": 1 },
            "storage": { "backend": "relational" },
            "rate_limit": { "settings": "10/second" },
            "admin": { "token": "file-token" }
        }"#;
        let config = resolve_json(json, &cli).unwrap();

        assert_eq!(config.server.host, "cli.host");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert_eq!(config.rate_limit.settings.capacity, 3);
        assert_eq!(config.rate_limit.settings.period, Duration::from_secs(60));
        assert_eq!(config.admin.token.as_deref(), Some("cli-token"));
        assert!(config.debug);
    }

    #[test]
    fn test_trust_proxy_layering() {
        let json = r#"{ "server": { "trust_proxy": true } }"#;
        let config = resolve_json(json, &CliConfig::default()).unwrap();
        assert!(config.server.trust_proxy);

        let cli = CliConfig {
            trust_proxy: Some(false),
            ..Default::default()
        };
        let config = resolve_json(json, &cli).unwrap();
        assert!(!config.server.trust_proxy);
    }

    #[test]
    fn test_empty_secrets_are_treated_as_unset() {
        let cli = CliConfig {
            admin_token: Some(String::new()),
            encryption_key: Some(String::new()),
            ..Default::default()
        };
        let config = resolve_json("{}", &cli).unwrap();
        assert!(config.admin.token.is_none());
        assert!(config.secrets.encryption_key.is_none());
    }

    #[test]
    fn test_invalid_rate_fails() {
        let err = resolve_json(r#"{ "rate_limit": { "audit": "ten per minute" } }"#, &CliConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("rate_limit.audit"));
    }

    #[test]
    fn test_redis_backend_requires_url() {
        let config = resolve_json(
            r#"{ "rate_limit": { "backend": "redis" } }"#,
            &CliConfig::default(),
        )
        .unwrap();
        assert!(config.validate().is_err());

        let config = resolve_json(
            r#"{ "rate_limit": { "backend": "redis", "redis_url": "redis://localhost:6379" } }"#,
            &CliConfig::default(),
        )
        .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_postgres_config_built_only_with_url() {
        let config = resolve_json(
            r#"{ "storage": { "relational": "postgres", "postgres": { "max_connections": 9 } } }"#,
            &CliConfig::default(),
        )
        .unwrap();
        assert!(config.storage.postgres.is_none());
        // Missing URL degrades to the file backend instead of failing
        assert!(config.validate().is_ok());

        let cli = CliConfig {
            postgres_url: Some("postgres://user:pw@db/cfg".to_string()),
            ..Default::default()
        };
        let config = resolve_json(
            r#"{ "storage": { "postgres": { "max_connections": 9 } } }"#,
            &cli,
        )
        .unwrap();
        let pg = config.storage.postgres.unwrap();
        assert_eq!(pg.max_connections, 9);
        assert_eq!(pg.min_connections, POSTGRES_DEFAULT_MIN_CONNECTIONS);
    }

    #[test]
    fn test_debug_output_hides_secrets() {
        let cli = CliConfig {
            admin_token: Some("tok123".to_string()),
            encryption_key: Some("hunter2".to_string()),
            postgres_url: Some("postgres://user:pw@db/cfg".to_string()),
            ..Default::default()
        };
        let config = resolve_json("{}", &cli).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("tok123"));
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("user:pw"));
    }

    #[test]
    fn test_is_all_interfaces() {
        assert!(is_all_interfaces("0.0.0.0"));
        assert!(is_all_interfaces("::"));
        assert!(!is_all_interfaces("127.0.0.1"));
    }
}
