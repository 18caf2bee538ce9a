//! VidTube Configuration Management
//!
//! Handles configuration from environment variables and config files
//! with sensible defaults for development.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEV_ACCESS_SECRET: &str = "vidtube-dev-access-secret-change-me";
const DEV_REFRESH_SECRET: &str = "vidtube-dev-refresh-secret-change-me";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database connection
    pub database: DatabaseConfig,

    /// Token, cookie and session settings
    pub auth: AuthConfig,

    /// Password hashing cost and worker pool
    pub hashing: HashingConfig,

    /// Outbound mail for password resets
    pub mail: MailConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env()?;
        Ok(self)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.auth.validate()?;
        self.hashing.validate()
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Server
        if let Some(host) = env_string("API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_parse("API_PORT")? {
            self.server.port = port;
        }
        // CORS origins from environment variable (comma-separated)
        if let Some(origins) = env_string("CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // PostgreSQL
        if let Some(url) = env_string("DATABASE_URL") {
            self.database.postgres_url = Some(url);
        }
        if let Some(size) = env_parse("DATABASE_POOL_SIZE")? {
            self.database.pool_size = size;
        }

        // Tokens and sessions
        if let Some(secret) = env_string("ACCESS_TOKEN_SECRET") {
            self.auth.access_token_secret = secret;
        }
        if let Some(secs) = env_parse("ACCESS_TOKEN_EXPIRY_SECS")? {
            self.auth.access_token_expiry_secs = secs;
        }
        if let Some(secret) = env_string("REFRESH_TOKEN_SECRET") {
            self.auth.refresh_token_secret = secret;
        }
        if let Some(secs) = env_parse("REFRESH_TOKEN_EXPIRY_SECS")? {
            self.auth.refresh_token_expiry_secs = secs;
        }
        if let Some(secs) = env_parse("RESET_TOKEN_TTL_SECS")? {
            self.auth.reset_token_ttl_secs = secs;
        }
        if let Some(secs) = env_parse("RESET_SWEEP_INTERVAL_SECS")? {
            self.auth.reset_sweep_interval_secs = secs;
        }
        if let Some(ms) = env_parse("AUTH_OPERATION_TIMEOUT_MS")? {
            self.auth.operation_timeout_ms = ms;
        }
        if let Some(secure) = env_parse("AUTH_SECURE_COOKIES")? {
            self.auth.secure_cookies = secure;
        }
        if let Some(revoke) = env_parse("AUTH_REVOKE_ON_PASSWORD_CHANGE")? {
            self.auth.revoke_sessions_on_password_change = revoke;
        }
        if let Some(conceal) = env_parse("AUTH_CONCEAL_UNKNOWN_PRINCIPAL")? {
            self.auth.conceal_unknown_principal = conceal;
        }

        // Hashing
        if let Some(memory) = env_parse("ARGON2_MEMORY_KIB")? {
            self.hashing.memory_cost = memory;
        }
        if let Some(iterations) = env_parse("ARGON2_ITERATIONS")? {
            self.hashing.time_cost = iterations;
        }
        if let Some(parallelism) = env_parse("ARGON2_PARALLELISM")? {
            self.hashing.parallelism = parallelism;
        }
        if let Some(workers) = env_parse("HASH_WORKERS")? {
            self.hashing.max_concurrent = workers;
        }

        // Mail
        if let Some(url) = env_string("MAIL_RELAY_URL") {
            self.mail.relay_url = Some(url);
        }
        if let Some(name) = env_string("MAIL_FROM_NAME") {
            self.mail.from_name = name;
        }
        if let Some(email) = env_string("MAIL_FROM_EMAIL") {
            self.mail.from_email = email;
        }
        if let Some(url) = env_string("FRONTEND_URL") {
            self.mail.frontend_url = url;
        }

        // Logging
        if let Some(level) = env_string("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = env_string("LOG_FORMAT") {
            self.logging.json_format = format.eq_ignore_ascii_case("json");
        }

        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env_string(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        None => Ok(None),
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Allowed origins for credentialed CORS requests
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            // Empty by default - set via CORS_ORIGINS env var
            cors_origins: vec![],
        }
    }
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; the in-memory store is used when unset
    pub postgres_url: Option<String>,

    /// PostgreSQL connection pool size
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: None,
            pool_size: 10,
        }
    }
}

/// Token and session configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub access_token_secret: String,
    pub access_token_expiry_secs: u64,
    pub refresh_token_secret: String,
    pub refresh_token_expiry_secs: u64,

    /// Lifetime of an emailed password reset token
    pub reset_token_ttl_secs: u64,

    /// How often expired reset tokens are swept from the store
    pub reset_sweep_interval_secs: u64,

    /// Deadline for each store, hashing or delivery call
    pub operation_timeout_ms: u64,

    /// Mark session cookies `Secure`; disable only for plain-HTTP local development
    pub secure_cookies: bool,

    /// Clear the refresh slot after a successful password change
    pub revoke_sessions_on_password_change: bool,

    /// Report an unknown login identifier as bad credentials instead of not-found
    pub conceal_unknown_principal: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_token_secret: DEV_ACCESS_SECRET.to_string(),
            access_token_expiry_secs: 15 * 60,
            refresh_token_secret: DEV_REFRESH_SECRET.to_string(),
            refresh_token_expiry_secs: 10 * 24 * 60 * 60,
            reset_token_ttl_secs: 10 * 60,
            reset_sweep_interval_secs: 5 * 60,
            operation_timeout_ms: 5_000,
            secure_cookies: true,
            revoke_sessions_on_password_change: false,
            conceal_unknown_principal: false,
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("access_token_secret", &"<redacted>")
            .field("access_token_expiry_secs", &self.access_token_expiry_secs)
            .field("refresh_token_secret", &"<redacted>")
            .field("refresh_token_expiry_secs", &self.refresh_token_expiry_secs)
            .field("reset_token_ttl_secs", &self.reset_token_ttl_secs)
            .field("reset_sweep_interval_secs", &self.reset_sweep_interval_secs)
            .field("operation_timeout_ms", &self.operation_timeout_ms)
            .field("secure_cookies", &self.secure_cookies)
            .field(
                "revoke_sessions_on_password_change",
                &self.revoke_sessions_on_password_change,
            )
            .field("conceal_unknown_principal", &self.conceal_unknown_principal)
            .finish()
    }
}

impl AuthConfig {
    pub fn access_token_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_expiry_secs)
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_token_expiry_secs)
    }

    pub fn reset_token_ttl(&self) -> Duration {
        Duration::from_secs(self.reset_token_ttl_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Whether either secret is still a built-in development value
    pub fn uses_dev_secrets(&self) -> bool {
        self.access_token_secret == DEV_ACCESS_SECRET
            || self.refresh_token_secret == DEV_REFRESH_SECRET
    }

    /// Reject empty or shared secrets and zero lifetimes
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_token_secret.is_empty() {
            return Err(ConfigError::MissingRequired("ACCESS_TOKEN_SECRET".to_string()));
        }
        if self.refresh_token_secret.is_empty() {
            return Err(ConfigError::MissingRequired("REFRESH_TOKEN_SECRET".to_string()));
        }
        if self.access_token_secret == self.refresh_token_secret {
            return Err(ConfigError::InvalidValue {
                key: "REFRESH_TOKEN_SECRET".to_string(),
                value: "<same as ACCESS_TOKEN_SECRET>".to_string(),
            });
        }
        for (key, value) in [
            ("ACCESS_TOKEN_EXPIRY_SECS", self.access_token_expiry_secs),
            ("REFRESH_TOKEN_EXPIRY_SECS", self.refresh_token_expiry_secs),
            ("RESET_TOKEN_TTL_SECS", self.reset_token_ttl_secs),
            ("AUTH_OPERATION_TIMEOUT_MS", self.operation_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Argon2id cost parameters and hashing pool size
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HashingConfig {
    /// Memory cost in KiB
    pub memory_cost: u32,

    /// Number of iterations
    pub time_cost: u32,

    /// Degree of parallelism
    pub parallelism: u32,

    /// Maximum hash/verify jobs running at once
    pub max_concurrent: usize,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            memory_cost: 19_456,
            time_cost: 2,
            parallelism: 1,
            max_concurrent: 4,
        }
    }
}

impl HashingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HASH_WORKERS".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

/// Password reset mail configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// HTTP mail relay endpoint; reset links are only logged when unset
    pub relay_url: Option<String>,

    pub from_name: String,

    pub from_email: String,

    /// Base URL of the web client hosting the reset form
    pub frontend_url: String,

    /// Relay request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            from_name: "VidTube".to_string(),
            from_email: "no-reply@vidtube.local".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            timeout_secs: 10,
        }
    }
}

impl MailConfig {
    /// `From` header value
    pub fn sender(&self) -> String {
        format!("{} <{}>", self.from_name, self.from_email)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
