use anyhow::{Context, Result};
use clap::Parser;
use std::env;
use std::time::Duration;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Idle window after which a chunk session is eligible for cleanup.
    pub session_retention: Duration,
    pub cold_storage: ColdStorageConfig,
}

/// Connection settings for the external cold-storage API.
#[derive(Debug, Clone)]
pub struct ColdStorageConfig {
    /// Base URL of the cold-storage REST API.
    pub base_url: String,
    /// Static bearer token, if provisioned directly.
    pub access_token: Option<String>,
    /// Token-exchange endpoint used when no static token is available.
    pub token_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    /// Retry ceiling for transient remote failures.
    pub max_attempts: u32,
    /// First backoff delay; doubles per attempt up to `max_backoff`.
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Timeout for init/verify calls.
    pub request_timeout: Duration,
    /// Timeout ceiling for a single ranged PUT (large slices take minutes).
    pub put_timeout: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Media intake & upload relay API")]
pub struct Args {
    /// Host to bind to (overrides MEDIA_INTAKE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MEDIA_INTAKE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where chunk payloads are buffered (overrides MEDIA_INTAKE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides MEDIA_INTAKE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Session retention window in hours (overrides MEDIA_INTAKE_SESSION_RETENTION_HOURS)
    #[arg(long)]
    pub session_retention_hours: Option<u64>,

    /// Cold-storage API base URL (overrides MEDIA_INTAKE_COLD_STORAGE_URL)
    #[arg(long)]
    pub cold_storage_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let cfg = Self::from_env(&args)?;
        Ok((cfg, args.migrate))
    }

    fn from_env(args: &Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("MEDIA_INTAKE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("MEDIA_INTAKE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing MEDIA_INTAKE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading MEDIA_INTAKE_PORT"),
        };
        let env_storage =
            env::var("MEDIA_INTAKE_STORAGE_DIR").unwrap_or_else(|_| "./data/chunks".into());
        let env_db = env::var("MEDIA_INTAKE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/media_intake.db".into());
        let env_retention = match env::var("MEDIA_INTAKE_SESSION_RETENTION_HOURS") {
            Ok(value) => Some(value.parse::<u64>().with_context(|| {
                format!("parsing MEDIA_INTAKE_SESSION_RETENTION_HOURS value `{}`", value)
            })?),
            Err(env::VarError::NotPresent) => None,
            Err(err) => return Err(err).context("reading MEDIA_INTAKE_SESSION_RETENTION_HOURS"),
        };

        let retention_hours = args
            .session_retention_hours
            .or(env_retention)
            .unwrap_or(6);

        // --- Merge ---
        Ok(Self {
            host: args.host.clone().unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.clone().unwrap_or(env_storage),
            database_url: args.database_url.clone().unwrap_or(env_db),
            session_retention: Duration::from_secs(retention_hours * 3600),
            cold_storage: ColdStorageConfig::from_env(args.cold_storage_url.clone())?,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl ColdStorageConfig {
    fn from_env(base_url_override: Option<String>) -> Result<Self> {
        let base_url = base_url_override
            .or_else(|| env::var("MEDIA_INTAKE_COLD_STORAGE_URL").ok())
            .unwrap_or_else(|| "https://storage.invalid/api/v3".into());

        let max_attempts = match env::var("MEDIA_INTAKE_COLD_STORAGE_MAX_ATTEMPTS") {
            Ok(value) => value.parse::<u32>().with_context(|| {
                format!("parsing MEDIA_INTAKE_COLD_STORAGE_MAX_ATTEMPTS value `{}`", value)
            })?,
            Err(_) => 5,
        };

        Ok(Self {
            base_url,
            access_token: env::var("MEDIA_INTAKE_COLD_STORAGE_TOKEN").ok(),
            token_url: env::var("MEDIA_INTAKE_COLD_STORAGE_TOKEN_URL").ok(),
            client_id: env::var("MEDIA_INTAKE_COLD_STORAGE_CLIENT_ID").ok(),
            client_secret: env::var("MEDIA_INTAKE_COLD_STORAGE_CLIENT_SECRET").ok(),
            refresh_token: env::var("MEDIA_INTAKE_COLD_STORAGE_REFRESH_TOKEN").ok(),
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            put_timeout: Duration::from_secs(300),
        })
    }
}
