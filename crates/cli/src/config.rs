//! Configuration loading from freqcap.toml.

use capping::{RetryPolicy, UpdateStrategy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Where counters are stored.
    #[serde(default)]
    pub store: StoreConfig,

    /// How increments are applied.
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Storage configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Database file. Defaults to the user data directory.
    pub path: Option<PathBuf>,

    /// Table holding session records.
    #[serde(default = "default_table")]
    pub table: String,

    /// How long to wait for another process holding the write lock.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            table: default_table(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyName {
    Atomic,
    Optimistic,
    #[default]
    Auto,
}

/// Counter engine configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub strategy: StrategyName,

    /// Attempts before an optimistic increment gives up with a conflict.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyName::default(),
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_table() -> String {
    "freq_cap".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_max_attempts() -> u32 {
    16
}

fn default_initial_delay_ms() -> u64 {
    5
}

fn default_max_delay_ms() -> u64 {
    250
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.store.busy_timeout_ms)
    }

    /// Build the engine's update strategy.
    pub fn update_strategy(&self) -> Result<UpdateStrategy, ConfigError> {
        let engine = &self.engine;
        if engine.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "engine.max_attempts must be at least 1".into(),
            ));
        }
        if engine.initial_delay_ms > engine.max_delay_ms {
            return Err(ConfigError::Invalid(
                "engine.initial_delay_ms must not exceed engine.max_delay_ms".into(),
            ));
        }

        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(engine.initial_delay_ms),
            max_delay: Duration::from_millis(engine.max_delay_ms),
            max_attempts: engine.max_attempts,
            ..RetryPolicy::default()
        };
        Ok(match engine.strategy {
            StrategyName::Atomic => UpdateStrategy::Atomic,
            StrategyName::Optimistic => UpdateStrategy::Optimistic(policy),
            StrategyName::Auto => UpdateStrategy::Auto(policy),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}
