use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CHECKOUT_API_BASE: &str = "https://api.stripe.com";
const DEFAULT_CHECKOUT_CURRENCY: &str = "eur";
const DEFAULT_CHECKOUT_CALLBACK_URL: &str = "http://localhost:8080/api/v1/checkout/callback";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    /// Base URL of the hosted checkout provider API
    #[serde(default = "default_checkout_api_base")]
    #[validate(url)]
    pub checkout_api_base: String,

    /// Secret API key used against the checkout provider
    #[serde(default)]
    pub checkout_secret_key: Option<String>,

    /// ISO currency code sent with checkout sessions
    #[serde(default = "default_checkout_currency")]
    #[validate(length(equal = 3, message = "Currency must be a 3-letter ISO code"))]
    pub checkout_currency: String,

    /// Absolute URL of the checkout callback endpoint
    #[serde(default = "default_checkout_callback_url")]
    #[validate(custom = "validate_absolute_url")]
    pub checkout_callback_url: String,

    #[serde(default = "default_checkout_timeout_secs")]
    pub checkout_timeout_secs: u64,

    /// Incoming-webhook URL of the channel receiving status notifications
    #[serde(default)]
    pub notification_webhook_url: Option<String>,

    #[serde(default = "default_notification_timeout_secs")]
    pub notification_timeout_secs: u64,

    /// Redeliveries attempted by the notification worker before dropping a message
    #[serde(default = "default_notification_max_retries")]
    pub notification_max_retries: u32,

    #[serde(default = "default_notification_poll_interval_ms")]
    pub notification_poll_interval_ms: u64,

    /// In-memory message queue capacity per topic
    #[serde(default = "default_message_queue_capacity")]
    #[validate(range(min = 1, message = "Queue capacity must be at least 1"))]
    pub message_queue_capacity: usize,

    /// Accept caller identity from `x-user-id` / `x-user-admin` headers set by the gateway
    #[serde(default)]
    pub trust_identity_headers: bool,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            checkout_api_base: default_checkout_api_base(),
            checkout_secret_key: None,
            checkout_currency: default_checkout_currency(),
            checkout_callback_url: default_checkout_callback_url(),
            checkout_timeout_secs: default_checkout_timeout_secs(),
            notification_webhook_url: None,
            notification_timeout_secs: default_notification_timeout_secs(),
            notification_max_retries: default_notification_max_retries(),
            notification_poll_interval_ms: default_notification_poll_interval_ms(),
            message_queue_capacity: default_message_queue_capacity(),
            trust_identity_headers: false,
        }
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn checkout_timeout(&self) -> Duration {
        Duration::from_secs(self.checkout_timeout_secs)
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_secs(self.notification_timeout_secs)
    }

    pub fn notification_poll_interval(&self) -> Duration {
        Duration::from_millis(self.notification_poll_interval_ms)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.is_development() && self.trust_identity_headers && self.cors_allowed_origins.is_none()
        {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Trusting identity headers outside development requires APP__CORS_ALLOWED_ORIGINS"
                    .into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    20
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    10
}
fn default_db_acquire_timeout_secs() -> u64 {
    10
}
fn default_db_idle_timeout_secs() -> u64 {
    300
}

fn default_checkout_api_base() -> String {
    DEFAULT_CHECKOUT_API_BASE.to_string()
}

fn default_checkout_currency() -> String {
    DEFAULT_CHECKOUT_CURRENCY.to_string()
}

fn default_checkout_callback_url() -> String {
    DEFAULT_CHECKOUT_CALLBACK_URL.to_string()
}

fn default_checkout_timeout_secs() -> u64 {
    15
}

fn default_notification_timeout_secs() -> u64 {
    10
}

fn default_notification_max_retries() -> u32 {
    3
}

fn default_notification_poll_interval_ms() -> u64 {
    250
}

fn default_message_queue_capacity() -> usize {
    1024
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_absolute_url(value: &str) -> Result<(), ValidationError> {
    match url::Url::parse(value) {
        Ok(parsed) if parsed.has_host() => Ok(()),
        _ => {
            let mut err = ValidationError::new("absolute_url");
            err.message = Some("Must be an absolute http(s) URL".into());
            Err(err)
        }
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("petshop_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    load_config_from(Path::new(CONFIG_DIR), &run_env)
}

/// Loads configuration rooted at an explicit config directory
pub fn load_config_from(config_dir: &Path, run_env: &str) -> Result<AppConfig, AppConfigError> {
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://petshop.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(
            File::with_name(&config_dir.join("default").to_string_lossy()).required(false),
        )
        .add_source(File::with_name(&config_dir.join(run_env).to_string_lossy()).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            8080,
            "production".into(),
        )
    }

    fn write_profile(dir: &TempDir, name: &str, content: &str) {
        fs::write(dir.path().join(format!("{}.toml", name)), content).unwrap();
    }

    #[test]
    fn defaults_pass_validation() {
        let cfg = base_config();
        assert!(cfg.validate().is_ok());
        assert!(cfg.validate_additional_constraints().is_ok());
        assert_eq!(cfg.checkout_currency, "eur");
    }

    #[test]
    fn trusted_headers_outside_development_need_origins() {
        let mut cfg = base_config();
        cfg.trust_identity_headers = true;
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.cors_allowed_origins = Some("https://shop.example.com".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn rejects_unknown_log_level_and_relative_callback() {
        let mut cfg = base_config();
        cfg.log_level = "loud".into();
        cfg.checkout_callback_url = "/checkout/callback".into();

        let errors = cfg.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("log_level"));
        assert!(fields.contains_key("checkout_callback_url"));
    }

    #[test]
    fn profile_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        write_profile(
            &dir,
            "default",
            r#"
                database_url = "sqlite::memory:"
                port = 9090
                checkout_currency = "usd"
            "#,
        );
        write_profile(&dir, "staging", r#"environment = "staging""#);

        let cfg = load_config_from(dir.path(), "staging").unwrap();
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.checkout_currency, "usd");
        assert_eq!(cfg.environment, "staging");
        assert_eq!(cfg.checkout_api_base, DEFAULT_CHECKOUT_API_BASE);
    }

    #[test]
    fn invalid_profile_fails_validation() {
        let dir = TempDir::new().unwrap();
        write_profile(&dir, "default", r#"checkout_currency = "euro""#);

        let result = load_config_from(dir.path(), "development");
        assert!(matches!(result, Err(AppConfigError::Validation(_))));
    }
}
