//! Configuration Module
//!
//! Provides TOML-based configuration for the persistence layer with support for:
//! - Store backend selection (memory, fjall)
//! - Pipeline batching parameters
//! - Key enumeration page size and fetch concurrency
//! - Owning broker identity
//! - Environment variable overrides (VIBEMQ_KV__* prefix)

use std::path::Path;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use store::{BackendType, PipelineConfig, ScanConfig, StoreConfig};

mod store;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .to_string())
}


/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Store backend
    pub store: StoreConfig,
    /// Batching pipeline
    pub pipeline: PipelineConfig,
    /// Key enumeration
    pub scan: ScanConfig,
    /// Owning broker
    pub broker: BrokerConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Identity of the broker this process serves
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker id stamped on stored wills
    pub id: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            id: "vibemq".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `VIBEMQ_KV__` prefix with double underscores for nesting:
    ///    - `VIBEMQ_KV__STORE__BACKEND=memory` overrides `store.backend`
    ///    - `VIBEMQ_KV__SCAN__COUNT=500` overrides `scan.count`
    ///    - `VIBEMQ_KV__BROKER__ID=node-2` overrides `broker.id`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            // Start with defaults
            .set_default("log.level", "info")?
            .set_default("store.backend", "fjall")?
            .set_default("store.path", "./data")?
            .set_default("store.sync_writes", false)?
            .set_default("pipeline.max_batch_size", 1000)?
            .set_default("pipeline.linger", "0s")?
            .set_default("scan.count", 100)?
            .set_default("scan.concurrency", 16)?
            .set_default("broker.id", "vibemq")?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content)?;
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("VIBEMQ_KV")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.max_batch_size == 0 {
            return Err(ConfigError::Validation(
                "pipeline.max_batch_size must be at least 1".to_string(),
            ));
        }

        if self.scan.count == 0 {
            return Err(ConfigError::Validation(
                "scan.count must be at least 1".to_string(),
            ));
        }

        if self.scan.concurrency == 0 {
            return Err(ConfigError::Validation(
                "scan.concurrency must be at least 1".to_string(),
            ));
        }

        if self.broker.id.is_empty() {
            return Err(ConfigError::Validation(
                "broker.id must not be empty".to_string(),
            ));
        }

        if self.store.backend == BackendType::Fjall && self.store.path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "store.path is required for the fjall backend".to_string(),
            ));
        }

        Ok(())
    }
}
