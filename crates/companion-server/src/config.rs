//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Auth settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// External provider settings.
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "companion_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Token issuance and password policy.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for JWT signing. Must be overridden outside development.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    /// Token lifetime in minutes.
    #[serde(default = "default_token_ttl_minutes")]
    pub token_ttl_minutes: i64,
}

/// Settings for the outbound provider clients.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub transcription: TranscriptionConfig,

    #[serde(default)]
    pub generation: GenerationSection,

    #[serde(default)]
    pub synthesis: SynthesisConfig,

    #[serde(default)]
    pub mail: MailSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationSection {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_primary_model")]
    pub primary_model: String,
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SynthesisConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub voice_id: String,
    #[serde(default = "default_synthesis_model")]
    pub model_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailSection {
    /// When false, codes are logged instead of sent.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub from_address: String,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "companion.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_jwt_secret() -> String {
    "dev-secret-change-me".to_string()
}

fn default_token_ttl_minutes() -> i64 {
    24 * 60
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_max_poll_attempts() -> u32 {
    40
}

fn default_primary_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_fallback_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_synthesis_model() -> String {
    "eleven_multilingual_v2".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_ttl_minutes: default_token_ttl_minutes(),
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
        }
    }
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            primary_model: default_primary_model(),
            fallback_model: default_fallback_model(),
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            voice_id: String::new(),
            model_id: default_synthesis_model(),
        }
    }
}

impl Default for MailSection {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            api_key: String::new(),
            from_address: String::new(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `COMPANION_HOST` overrides `server.host`
/// - `COMPANION_PORT` overrides `server.port`
/// - `COMPANION_DB_PATH` overrides `database.path`
/// - `COMPANION_LOG_LEVEL` overrides `logging.level`
/// - `COMPANION_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `COMPANION_JWT_SECRET` overrides `auth.jwt_secret`
/// - `COMPANION_TRANSCRIPTION_KEY` overrides `providers.transcription.api_key`
/// - `COMPANION_GENERATION_KEY` overrides `providers.generation.api_key`
/// - `COMPANION_SYNTHESIS_KEY` overrides `providers.synthesis.api_key`
/// - `COMPANION_MAIL_KEY` overrides `providers.mail.api_key`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(host) = std::env::var("COMPANION_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("COMPANION_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(db_path) = std::env::var("COMPANION_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(level) = std::env::var("COMPANION_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("COMPANION_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(secret) = std::env::var("COMPANION_JWT_SECRET") {
        config.auth.jwt_secret = secret;
    }
    if let Ok(key) = std::env::var("COMPANION_TRANSCRIPTION_KEY") {
        config.providers.transcription.api_key = key;
    }
    if let Ok(key) = std::env::var("COMPANION_GENERATION_KEY") {
        config.providers.generation.api_key = key;
    }
    if let Ok(key) = std::env::var("COMPANION_SYNTHESIS_KEY") {
        config.providers.synthesis.api_key = key;
    }
    if let Ok(key) = std::env::var("COMPANION_MAIL_KEY") {
        config.providers.mail.api_key = key;
    }

    Ok(config)
}
