//! Configuration loading for queue consumers
//!
//! Configuration is read from a TOML file discovered via the `WINDLASS_CONFIG`
//! environment variable or `./windlass.toml`, with the database URL
//! overridable through `DATABASE_URL`. Every field has a default so a URL plus
//! defaults is a complete configuration.

use std::env;
use std::path::Path;

use anyhow::Context as _;
use serde::Deserialize;

/// Environment variable naming an explicit configuration file.
const CONFIG_ENV: &str = "WINDLASS_CONFIG";

/// Default configuration file looked up relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "windlass.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    pub url: String,
    /// Alternate URL used by the integration test harness.
    pub test_database_url: Option<String>,
    pub pool_min_size: u32,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            test_database_url: None,
            pool_min_size: 0,
            pool_max_size: 10,
            pool_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level for the crate's own targets (`trace` .. `error`).
    pub level: String,
    /// Emit JSON log lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Sleep between retries when the notification listener hits a transient
    /// error, to bound log spam against a flapping database.
    pub listener_retry_millis: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            listener_retry_millis: 500,
        }
    }
}

impl Config {
    /// Load configuration from the discovered TOML file plus environment
    /// overrides. A missing file is not an error; defaults apply.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).is_file() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            Err(_) => Self::default(),
        };

        if let Ok(url) = env::var("DATABASE_URL") {
            config.database.url = url;
        }

        Ok(config)
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Validate settings that cannot be checked at deserialization time.
    pub fn validate(&self) -> crate::Result<()> {
        if self.database.url.is_empty() {
            return Err(crate::Error::Config(
                "database.url must be set (or DATABASE_URL exported)".to_string(),
            ));
        }
        if self.database.pool_max_size == 0 {
            return Err(crate::Error::Config(
                "database.pool_max_size must be at least 1".to_string(),
            ));
        }
        if self.database.pool_min_size > self.database.pool_max_size {
            return Err(crate::Error::Config(
                "database.pool_min_size cannot exceed pool_max_size".to_string(),
            ));
        }
        Ok(())
    }
}
