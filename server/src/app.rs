//! Core application

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::api::{AdminGuard, ApiServer};
use crate::core::banner::{self, BannerInfo};
use crate::core::cli::{self, CliConfig, Commands, SettingsCommands};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG, ENV_LOG_FORMAT};
use crate::core::shutdown::ShutdownService;
use crate::core::storage::AppStorage;
use crate::data::ratelimit::RateLimiter;
use crate::domain::audit::AuditLog;
use crate::domain::settings::{
    BackendSelection, Schema, SecretCodec, SettingsStore, build_codec,
};

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub storage: AppStorage,
    pub settings: SettingsStore,
    /// `None` when rate limiting is disabled
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub admin: AdminGuard,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        tracing::trace!(command = ?command, "Parsed command");

        match command {
            Some(Commands::Settings {
                command: SettingsCommands::Show,
            }) => return Self::show_settings(&cli_config).await,
            Some(Commands::Start) | None => {}
        }

        let app = Self::init(&cli_config).await?;
        Self::start_server(app).await
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        if config.debug {
            tracing::info!(config = ?config, "Resolved configuration");
        }

        let storage = AppStorage::init(&config).await?;
        let settings = Self::open_settings(&config, &storage).await?;

        let rate_limiter = if config.rate_limit.enabled {
            let limiter = RateLimiter::from_config(&config.rate_limit)
                .await
                .context("Failed to initialize rate limiter")?;
            tracing::debug!(backend = limiter.backend_name(), "Rate limiter initialized");
            Some(Arc::new(limiter))
        } else {
            tracing::warn!("Rate limiting is disabled");
            None
        };

        let admin = AdminGuard::new(config.admin.token.as_deref());
        let shutdown = ShutdownService::new(settings.clone());

        Ok(Self {
            shutdown,
            config,
            storage,
            settings,
            rate_limiter,
            admin,
        })
    }

    /// Build the payload codec and audit log, then select a backend and load.
    ///
    /// A stored payload that fails decryption aborts startup instead of
    /// falling back to defaults.
    async fn open_settings(config: &AppConfig, storage: &AppStorage) -> Result<SettingsStore> {
        let schema = Arc::new(Schema::trading());
        let payload = build_codec(config.secrets.encryption_key.as_deref());
        let audit = Arc::new(AuditLog::from_config(
            storage.audit_file(),
            &config.audit,
            SecretCodec::new(schema.clone()),
        ));
        let selection = BackendSelection::from_config(&config.storage, storage);

        let settings = SettingsStore::open(
            schema,
            payload,
            audit,
            selection,
            Duration::from_secs(config.storage.timeout_secs),
        )
        .await
        .context("Failed to open settings store")?;

        let status = settings.status();
        tracing::debug!(backend = status.backend, mode = ?status.mode, "Settings store ready");
        Ok(settings)
    }

    /// Print the stored settings with secrets masked, without starting the server
    async fn show_settings(cli: &CliConfig) -> Result<()> {
        let config = AppConfig::load(cli)?;
        let storage = AppStorage::init(&config).await?;
        let settings = Self::open_settings(&config, &storage).await?;

        let output = serde_json::json!({
            "storage": settings.status(),
            "settings": settings.masked(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);

        settings.close().await;
        Ok(())
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        let json = std::env::var(ENV_LOG_FORMAT)
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if json {
            tracing_subscriber::fmt()
                .json()
                .with_current_span(false)
                .with_env_filter(filter)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_target(false)
                .with_thread_ids(false)
                .with_level(true)
                .with_ansi(true)
                .compact()
                .with_env_filter(filter)
                .init();
        }
    }

    async fn start_server(app: Self) -> Result<()> {
        // Install signal handlers FIRST (before any blocking calls)
        app.shutdown.install_signal_handlers();

        banner::print_banner(&BannerInfo {
            host: &app.config.server.host,
            port: app.config.server.port,
            storage: app.settings.status(),
            admin_guard: app.admin.is_enabled(),
            rate_limit_backend: app.rate_limiter.as_ref().map(|l| l.backend_name()),
            encrypted: app.config.secrets.encryption_key.is_some(),
            data_dir: &app.storage.data_dir().display().to_string(),
        });

        let server = ApiServer::new(app);
        let app = server.start().await?;
        app.shutdown.shutdown().await;

        Ok(())
    }
}
