use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::config::{RateLimitBackend, RelationalBackend, StorageBackend};
use super::constants::{
    ENV_ADMIN_TOKEN, ENV_CONFIG, ENV_DEBUG, ENV_ENCRYPTION_KEY, ENV_HOST, ENV_PORT,
    ENV_POSTGRES_URL, ENV_RATE_LIMIT_AUDIT, ENV_RATE_LIMIT_BACKEND, ENV_RATE_LIMIT_ENABLED,
    ENV_RATE_LIMIT_HEALTH, ENV_RATE_LIMIT_SETTINGS, ENV_RATE_LIMIT_TIMEOUT_MS, ENV_REDIS_URL,
    ENV_RELATIONAL_BACKEND, ENV_SETTINGS_FILE, ENV_STORAGE_BACKEND, ENV_STORAGE_TIMEOUT_SECS,
    ENV_TRUST_PROXY,
};

#[derive(Parser)]
#[command(name = "cfgvault")]
#[command(version, about = "Secure runtime settings service for trading bots", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server host address
    #[arg(long, short = 'H', global = true, env = ENV_HOST)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short = 'p', global = true, env = ENV_PORT)]
    pub port: Option<u16>,

    /// Take the caller address from `X-Forwarded-For` (only behind a proxy that overwrites it)
    #[arg(long, global = true, env = ENV_TRUST_PROXY)]
    pub trust_proxy: Option<bool>,

    /// Enable debug mode
    #[arg(long, global = true, env = ENV_DEBUG)]
    pub debug: bool,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    // Storage options
    /// Preferred settings backend (relational or file)
    #[arg(long, global = true, env = ENV_STORAGE_BACKEND, value_parser = parse_storage_backend)]
    pub storage_backend: Option<StorageBackend>,

    /// Relational engine (sqlite or postgres)
    #[arg(long, global = true, env = ENV_RELATIONAL_BACKEND, value_parser = parse_relational_backend)]
    pub relational_backend: Option<RelationalBackend>,

    /// PostgreSQL connection URL (when using the postgres engine)
    #[arg(long, global = true, env = ENV_POSTGRES_URL)]
    pub postgres_url: Option<String>,

    /// Settings file used by the file backend
    #[arg(long, global = true, env = ENV_SETTINGS_FILE)]
    pub settings_file: Option<PathBuf>,

    /// Backend call timeout in seconds
    #[arg(long, global = true, env = ENV_STORAGE_TIMEOUT_SECS)]
    pub storage_timeout_secs: Option<u64>,

    // Rate limit options
    /// Enable or disable rate limiting
    #[arg(long, global = true, env = ENV_RATE_LIMIT_ENABLED)]
    pub rate_limit_enabled: Option<bool>,

    /// Rate-limit bucket store (memory or redis)
    #[arg(long, global = true, env = ENV_RATE_LIMIT_BACKEND, value_parser = parse_rate_limit_backend)]
    pub rate_limit_backend: Option<RateLimitBackend>,

    /// Rate for settings operations, e.g. "30/minute"
    #[arg(long, global = true, env = ENV_RATE_LIMIT_SETTINGS)]
    pub rate_limit_settings: Option<String>,

    /// Rate for audit reads, e.g. "30/minute"
    #[arg(long, global = true, env = ENV_RATE_LIMIT_AUDIT)]
    pub rate_limit_audit: Option<String>,

    /// Rate for health checks, e.g. "120/minute"
    #[arg(long, global = true, env = ENV_RATE_LIMIT_HEALTH)]
    pub rate_limit_health: Option<String>,

    /// Bucket store call timeout in milliseconds
    #[arg(long, global = true, env = ENV_RATE_LIMIT_TIMEOUT_MS)]
    pub rate_limit_timeout_ms: Option<u64>,

    /// Redis-compatible URL for the shared rate-limit store
    #[arg(long, global = true, env = ENV_REDIS_URL)]
    pub redis_url: Option<String>,

    // Secrets
    /// Admin bearer token (unset = admin endpoints open)
    #[arg(long, global = true, env = ENV_ADMIN_TOKEN, hide_env_values = true)]
    pub admin_token: Option<String>,

    /// Key for encrypting the stored settings payload
    #[arg(long, global = true, env = ENV_ENCRYPTION_KEY, hide_env_values = true)]
    pub encryption_key: Option<String>,
}

/// Parse settings backend from CLI/env string
fn parse_storage_backend(s: &str) -> Result<StorageBackend, String> {
    match s.to_lowercase().as_str() {
        "relational" | "database" | "db" => Ok(StorageBackend::Relational),
        "file" => Ok(StorageBackend::File),
        _ => Err(format!(
            "Invalid storage backend '{}'. Valid options: relational, file",
            s
        )),
    }
}

/// Parse relational engine from CLI/env string
fn parse_relational_backend(s: &str) -> Result<RelationalBackend, String> {
    match s.to_lowercase().as_str() {
        "sqlite" => Ok(RelationalBackend::Sqlite),
        "postgres" | "postgresql" => Ok(RelationalBackend::Postgres),
        _ => Err(format!(
            "Invalid relational backend '{}'. Valid options: sqlite, postgres",
            s
        )),
    }
}

/// Parse rate-limit store from CLI/env string
fn parse_rate_limit_backend(s: &str) -> Result<RateLimitBackend, String> {
    match s.to_lowercase().as_str() {
        "memory" => Ok(RateLimitBackend::Memory),
        "redis" => Ok(RateLimitBackend::Redis),
        _ => Err(format!(
            "Invalid rate limit backend '{}'. Valid options: memory, redis",
            s
        )),
    }
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Start the server (default command)
    Start,
    /// Inspect stored settings without starting the server
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum SettingsCommands {
    /// Print the stored settings with secrets masked
    Show,
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub trust_proxy: Option<bool>,
    pub debug: bool,
    pub config: Option<PathBuf>,
    pub storage_backend: Option<StorageBackend>,
    pub relational_backend: Option<RelationalBackend>,
    pub postgres_url: Option<String>,
    pub settings_file: Option<PathBuf>,
    pub storage_timeout_secs: Option<u64>,
    pub rate_limit_enabled: Option<bool>,
    pub rate_limit_backend: Option<RateLimitBackend>,
    pub rate_limit_settings: Option<String>,
    pub rate_limit_audit: Option<String>,
    pub rate_limit_health: Option<String>,
    pub rate_limit_timeout_ms: Option<u64>,
    pub redis_url: Option<String>,
    pub admin_token: Option<String>,
    pub encryption_key: Option<String>,
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        host: cli.host,
        port: cli.port,
        trust_proxy: cli.trust_proxy,
        debug: cli.debug,
        config: cli.config,
        storage_backend: cli.storage_backend,
        relational_backend: cli.relational_backend,
        postgres_url: cli.postgres_url,
        settings_file: cli.settings_file,
        storage_timeout_secs: cli.storage_timeout_secs,
        rate_limit_enabled: cli.rate_limit_enabled,
        rate_limit_backend: cli.rate_limit_backend,
        rate_limit_settings: cli.rate_limit_settings,
        rate_limit_audit: cli.rate_limit_audit,
        rate_limit_health: cli.rate_limit_health,
        rate_limit_timeout_ms: cli.rate_limit_timeout_ms,
        redis_url: cli.redis_url,
        admin_token: cli.admin_token,
        encryption_key: cli.encryption_key,
    };
    (config, cli.command)
}
