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
const DEFAULT_PORT: u16 = 5000;
const CONFIG_DIR: &str = "config";
const DEFAULT_SESSION_TTL_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
const DEFAULT_CASHFREE_API_VERSION: &str = "2025-01-01";
const DEV_DEFAULT_SESSION_SECRET: &str =
    "development_only_session_secret_replace_before_deploying_0123456789";

/// Which Cashfree environment payment sessions are created in.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CashfreeEnvironment {
    #[default]
    Sandbox,
    Production,
}

impl CashfreeEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            CashfreeEnvironment::Sandbox => "https://sandbox.cashfree.com/pg",
            CashfreeEnvironment::Production => "https://api.cashfree.com/pg",
        }
    }
}

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

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Secret used to sign session tokens
    #[validate(custom = "validate_session_secret")]
    pub session_secret: String,

    /// Session lifetime in seconds
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Mark the session cookie `Secure`
    #[serde(default = "default_true_bool")]
    pub session_cookie_secure: bool,

    /// Public URL of the storefront SPA (redirect target)
    #[validate(url)]
    pub frontend_url: String,

    /// Public URL of this service, used for gateway notify URLs
    #[validate(url)]
    pub backend_url: String,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback outside development
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// Google OAuth2 Client ID
    #[serde(default)]
    pub google_client_id: Option<String>,

    /// Google OAuth2 Client Secret
    #[serde(default)]
    pub google_client_secret: Option<String>,

    /// Google OAuth2 Redirect URL (defaults to `{backend_url}/api/auth/google/callback`)
    #[serde(default)]
    pub google_redirect_url: Option<String>,

    /// Cashfree application id (`x-client-id`)
    #[serde(default)]
    pub cashfree_app_id: String,

    /// Cashfree secret key (`x-client-secret`)
    #[serde(default)]
    pub cashfree_secret_key: String,

    #[serde(default)]
    pub cashfree_environment: CashfreeEnvironment,

    #[serde(default = "default_cashfree_api_version")]
    pub cashfree_api_version: String,

    /// Overrides the environment base URL, e.g. for a local gateway mock
    #[serde(default)]
    pub cashfree_base_url: Option<String>,

    /// Webhook signing secret; Cashfree signs with the secret key when unset
    #[serde(default)]
    pub payment_webhook_secret: Option<String>,

    /// Webhook timestamp tolerance (seconds)
    #[serde(default = "default_webhook_tolerance_secs")]
    pub payment_webhook_tolerance_secs: u64,

    /// Currency for gateway orders
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub payment_currency: String,

    /// Timeout for outbound gateway calls (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,

    /// Timeout for inbound requests (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Include internal error messages in 5xx bodies (defaults to development only)
    #[serde(default)]
    pub expose_error_details: Option<bool>,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials
    pub fn new(
        database_url: String,
        session_secret: String,
        frontend_url: String,
        backend_url: String,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            host: "0.0.0.0".to_string(),
            port: default_port(),
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            session_secret,
            session_ttl_secs: default_session_ttl_secs(),
            session_cookie_secure: true,
            frontend_url,
            backend_url,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            google_client_id: None,
            google_client_secret: None,
            google_redirect_url: None,
            cashfree_app_id: String::new(),
            cashfree_secret_key: String::new(),
            cashfree_environment: CashfreeEnvironment::default(),
            cashfree_api_version: default_cashfree_api_version(),
            cashfree_base_url: None,
            payment_webhook_secret: None,
            payment_webhook_tolerance_secs: default_webhook_tolerance_secs(),
            payment_currency: default_currency(),
            gateway_timeout_secs: default_gateway_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            expose_error_details: None,
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Configured CORS origins, trimmed, empty entries dropped
    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    pub fn expose_error_details(&self) -> bool {
        self.expose_error_details.unwrap_or_else(|| self.is_development())
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cashfree_base_url(&self) -> String {
        self.cashfree_base_url
            .clone()
            .unwrap_or_else(|| self.cashfree_environment.base_url().to_string())
            .trim_end_matches('/')
            .to_string()
    }

    /// Secret the gateway signs webhooks with
    pub fn webhook_secret(&self) -> &str {
        self.payment_webhook_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .unwrap_or(&self.cashfree_secret_key)
    }

    pub fn google_redirect_url(&self) -> String {
        self.google_redirect_url.clone().unwrap_or_else(|| {
            format!(
                "{}/api/auth/google/callback",
                self.backend_url.trim_end_matches('/')
            )
        })
    }

    /// Frontend URL without a trailing slash
    pub fn frontend_base(&self) -> &str {
        self.frontend_url.trim_end_matches('/')
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && self.cors_origins().is_empty() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() && self.session_secret.trim() == DEV_DEFAULT_SESSION_SECRET {
            let mut err = ValidationError::new("session_secret_default_dev");
            err.message = Some(
                "The bundled development session secret must not be used outside development. Set APP__SESSION_SECRET to a unique, secure value."
                    .into(),
            );
            errors.add("session_secret", err);
        }

        if self.is_production()
            && (self.cashfree_app_id.trim().is_empty() || self.cashfree_secret_key.trim().is_empty())
        {
            let mut err = ValidationError::new("cashfree_credentials_required");
            err.message = Some(
                "Set APP__CASHFREE_APP_ID and APP__CASHFREE_SECRET_KEY in production".into(),
            );
            errors.add("cashfree_app_id", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_session_ttl_secs() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}

fn default_true_bool() -> bool {
    true
}

fn default_cashfree_api_version() -> String {
    DEFAULT_CASHFREE_API_VERSION.to_string()
}

fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

fn default_currency() -> String {
    "INR".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    15
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_event_channel_capacity() -> usize {
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

fn validate_session_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    if trimmed.len() < 32 {
        let mut err = ValidationError::new("session_secret");
        err.message = Some("Session secret must be at least 32 characters".into());
        return Err(err);
    }

    const DISALLOWED: [&str; 3] = ["your-secret-key", "default-secret-key", "changeme"];
    let lower = trimmed.to_ascii_lowercase();
    if DISALLOWED.iter().any(|bad| lower.contains(bad)) {
        let mut err = ValidationError::new("session_secret");
        err.message = Some("Session secret must be overridden with a secure random value".into());
        return Err(err);
    }

    let unique_chars: std::collections::HashSet<char> = trimmed.chars().collect();
    if unique_chars.len() < 10 {
        let mut err = ValidationError::new("session_secret");
        err.message =
            Some("Session secret must have at least 10 unique characters".into());
        return Err(err);
    }

    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=info", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
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
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("frontend_url", "http://localhost:5173")?
        .set_default("backend_url", "http://localhost:5000")?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    if config.get_string("session_secret").is_err() {
        error!("Session secret is not configured. Set APP__SESSION_SECRET to a random string of at least 32 characters.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "session_secret is required but not configured. Set APP__SESSION_SECRET.".into(),
        )));
    }

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

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "a-long-and-varied-session-secret-for-tests-0123456789".into(),
            "https://shop.example.com".into(),
            "https://api.shop.example.com".into(),
            "production".into(),
        )
    }

    #[test]
    fn non_dev_requires_cors_origins() {
        let mut cfg = base_config();
        cfg.cashfree_app_id = "app".into();
        cfg.cashfree_secret_key = "secret".into();
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.cors_allowed_origins = Some("https://shop.example.com, ".into());
        assert!(cfg.validate_additional_constraints().is_ok());
        assert_eq!(cfg.cors_origins(), vec!["https://shop.example.com".to_string()]);
    }

    #[test]
    fn production_requires_gateway_credentials() {
        let mut cfg = base_config();
        cfg.cors_allow_any_origin = true;
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.field_errors().contains_key("cashfree_app_id"));
    }

    #[test]
    fn development_rejects_nothing_by_default() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        cfg.session_secret = DEV_DEFAULT_SESSION_SECRET.into();
        assert!(cfg.validate_additional_constraints().is_ok());
        assert!(cfg.expose_error_details());
    }

    #[test]
    fn dev_secret_rejected_outside_development() {
        let mut cfg = base_config();
        cfg.environment = "staging".into();
        cfg.cors_allow_any_origin = true;
        cfg.session_secret = DEV_DEFAULT_SESSION_SECRET.into();
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.field_errors().contains_key("session_secret"));
        assert!(!cfg.expose_error_details());
    }

    #[test]
    fn short_session_secret_fails_validation() {
        let mut cfg = base_config();
        cfg.session_secret = "short".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn derived_urls() {
        let mut cfg = base_config();
        cfg.frontend_url = "https://shop.example.com/".into();
        assert_eq!(cfg.frontend_base(), "https://shop.example.com");
        assert_eq!(
            cfg.google_redirect_url(),
            "https://api.shop.example.com/api/auth/google/callback"
        );
        assert_eq!(cfg.cashfree_base_url(), "https://sandbox.cashfree.com/pg");
        cfg.cashfree_environment = CashfreeEnvironment::Production;
        assert_eq!(cfg.cashfree_base_url(), "https://api.cashfree.com/pg");
    }

    #[test]
    fn webhook_secret_falls_back_to_secret_key() {
        let mut cfg = base_config();
        cfg.cashfree_secret_key = "cf-secret".into();
        assert_eq!(cfg.webhook_secret(), "cf-secret");
        cfg.payment_webhook_secret = Some("hook-secret".into());
        assert_eq!(cfg.webhook_secret(), "hook-secret");
    }
}
