use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capability::CapabilityMode;
use crate::store::StoreOptions;

const DEFAULTS_TOML: &str = include_str!("defaults.toml");

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Toml(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Toml(err) => write!(f, "invalid config TOML: {}", err),
            ConfigError::Invalid(message) => write!(f, "invalid config: {}", message),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Toml(err) => Some(err),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        ConfigError::Toml(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub root: PathBuf,
    pub busy_timeout_ms: u64,
    pub reader_pool_size: usize,
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityConfig {
    pub mode: CapabilityMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineConfig {
    pub notification_grouping: bool,
    pub search_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub capabilities: CapabilityConfig,
    pub logging: LoggingConfig,
    pub timeline: TimelineConfig,
}

impl Config {
    pub fn defaults() -> Result<Self, ConfigError> {
        Self::from_toml("")
    }

    /// Parses `raw` as an overlay on the embedded defaults: keys it sets win,
    /// everything else keeps its default.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let mut merged: toml::Table = toml::from_str(DEFAULTS_TOML)?;
        let overlay: toml::Table = toml::from_str(raw)?;
        overlay_table(&mut merged, overlay);
        let config: Config = toml::Value::Table(merged).try_into()?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Self::defaults();
        };
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.store.reader_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "store.reader_pool_size must be at least 1".to_string(),
            ));
        }
        if self.timeline.search_limit == 0 {
            return Err(ConfigError::Invalid(
                "timeline.search_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout: Duration::from_millis(self.store.busy_timeout_ms),
            reader_pool_size: self.store.reader_pool_size,
            lock_timeout: Duration::from_millis(self.store.lock_timeout_ms),
        }
    }
}

fn overlay_table(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) => {
                overlay_table(existing, nested);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
