//! Client configuration
//!
//! Priority (highest to lowest):
//! 1. Environment variables prefixed `MBCLIENT_` (nested keys split on `__`)
//! 2. YAML file
//! 3. Default values

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{DEFAULT_INTERVAL_MS, DEFAULT_PORT, DEFAULT_QUEUE_LIMIT, DEFAULT_TIMEOUT_MS};
use crate::error::ConfigError;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "MBCLIENT_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Request queue capacity
    pub queue_limit: usize,
    /// Response timeout used when a target leaves it at 0
    pub default_timeout_ms: u32,
    /// Request interval used when a target leaves it at 0
    pub default_interval_ms: u32,
    /// Initial target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            queue_limit: DEFAULT_QUEUE_LIMIT,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            default_interval_ms: DEFAULT_INTERVAL_MS,
            target: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub host: String,
    pub port: u16,
    /// 0 = client default
    pub timeout_ms: u32,
    /// 0 = client default
    pub interval_ms: u32,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            timeout_ms: 0,
            interval_ms: 0,
        }
    }
}

impl ClientConfig {
    /// Defaults merged with the environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::extract(Self::figment())
    }

    /// Defaults, then `path`, then the environment
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Loading client config: {}", path.display());
        Self::extract(Self::figment().merge(Yaml::file(path)).merge(Self::env()))
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(ClientConfig::default())).merge(Self::env())
    }

    fn env() -> Env {
        Env::prefixed(ENV_PREFIX).split("__")
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: ClientConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_limit == 0 {
            return Err(ConfigError::invalid("queue_limit", "must be greater than 0"));
        }
        if let Some(target) = &self.target {
            if target.host.trim().is_empty() {
                return Err(ConfigError::invalid("target.host", "must not be empty"));
            }
            if target.port == 0 {
                return Err(ConfigError::invalid("target.port", "must not be 0"));
            }
        }
        Ok(())
    }
}
