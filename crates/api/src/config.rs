use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

use crate::services::EngineSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub migration: MigrationConfig,
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl From<&DatabaseConfig> for persistence::db::DatabaseConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            url: config.url.clone(),
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            connect_timeout_secs: config.connect_timeout_secs,
            idle_timeout_secs: config.idle_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Engine settings shared by every run.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    /// Public base URL of the target instance, used when rewriting links.
    pub base_url: String,

    /// Remote quota below which a run waits for the window to reset.
    #[serde(default = "default_low_water_mark")]
    pub low_water_mark: u32,

    /// Batch size used when a request does not set one.
    #[serde(default = "default_batch_size")]
    pub default_batch_size: u32,

    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,

    #[serde(default = "default_gitlab_api_url")]
    pub gitlab_api_url: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Pool size for a job-scoped connection to a legacy database.
    #[serde(default = "default_legacy_max_connections")]
    pub legacy_max_connections: u32,
}

impl MigrationConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// The deployment-wide part of every run's settings.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            base_url: self.base_url.clone(),
            low_water_mark: self.low_water_mark,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// How long finished job descriptors stay queryable.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    #[serde(default = "default_eviction_interval")]
    pub eviction_interval_secs: u64,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    5
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_low_water_mark() -> u32 {
    10
}
fn default_batch_size() -> u32 {
    domain::models::settings::DEFAULT_BATCH_SIZE
}
fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_gitlab_api_url() -> String {
    "https://gitlab.com".to_string()
}
fn default_user_agent() -> String {
    format!("snippet-migrator/{}", env!("CARGO_PKG_VERSION"))
}
fn default_http_timeout() -> u64 {
    30
}
fn default_legacy_max_connections() -> u32 {
    4
}
fn default_retention_secs() -> u64 {
    86_400
}
fn default_eviction_interval() -> u64 {
    300
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with MIG__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("MIG").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for testing with custom overrides.
    ///
    /// Built entirely from embedded defaults so tests never touch config files.
    /// Validation is skipped to allow partial configs.
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
            [server]
            host = "127.0.0.1"
            port = 8080
            request_timeout_secs = 30

            [database]
            url = ""
            max_connections = 20
            min_connections = 5
            connect_timeout_secs = 10
            idle_timeout_secs = 600

            [logging]
            level = "info"
            format = "json"

            [migration]
            base_url = "https://example.com"
            low_water_mark = 10
            default_batch_size = 100
            github_api_url = "https://api.github.com"
            gitlab_api_url = "https://gitlab.com"
            user_agent = "snippet-migrator-test"
            http_timeout_secs = 5
            legacy_max_connections = 2

            [jobs]
            retention_secs = 3600
            eviction_interval_secs = 60
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "MIG__DATABASE__URL environment variable must be set".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        if self.migration.base_url.trim().is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "migration.base_url must be set".to_string(),
            ));
        }

        if shared::validation::validate_http_url(&self.migration.base_url).is_err() {
            return Err(ConfigValidationError::InvalidValue(
                "migration.base_url must be an http(s) URL".to_string(),
            ));
        }

        if self.migration.default_batch_size == 0
            || self.migration.default_batch_size > domain::models::settings::MAX_BATCH_SIZE
        {
            return Err(ConfigValidationError::InvalidValue(
                "migration.default_batch_size must be between 1 and 1000".to_string(),
            ));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}
