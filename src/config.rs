use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tracing::trace;

use crate::NodeIdentity;

/// Missing or invalid configuration. Fatal to the affected module only,
/// never to the whole process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingKey(String),
    InvalidValue { key: String, reason: String },
    UnknownModule(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingKey(key) => write!(f, "missing configuration key: {}", key),
            ConfigError::InvalidValue { key, reason } => {
                write!(f, "invalid value for {}: {}", key, reason)
            }
            ConfigError::UnknownModule(name) => {
                write!(f, "no such module registered in the factory map: {}", name)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Message-signature fields stamped into every outbound alert envelope.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SignatureConfig {
    pub username: String,
    pub token: String,
    /// Envelope validity in seconds.
    #[serde(default = "default_expires_secs")]
    pub expires: u64,
}

fn default_expires_secs() -> u64 {
    3600
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            username: "sentineld".to_string(),
            token: String::new(),
            expires: default_expires_secs(),
        }
    }
}

/// Settings shared by all modules unless a per-module override exists.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CommonConfig {
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,

    #[serde(default = "default_recovery_count")]
    pub sensor_recovery_count: u32,

    #[serde(default = "default_recovery_interval")]
    pub sensor_recovery_interval: u64,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            polling_interval: default_polling_interval(),
            sensor_recovery_count: default_recovery_count(),
            sensor_recovery_interval: default_recovery_interval(),
        }
    }
}

fn default_polling_interval() -> u64 {
    30
}

fn default_recovery_count() -> u32 {
    5
}

fn default_recovery_interval() -> u64 {
    30
}

/// Per-module overrides. Every field is optional; unset fields fall back
/// to [`CommonConfig`].
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ModuleConfig {
    pub polling_interval: Option<u64>,
    pub sensor_recovery_count: Option<u32>,
    pub sensor_recovery_interval: Option<u64>,
    /// Start-order tie-break within one dependency layer; lower starts first.
    #[serde(default)]
    pub priority: u32,
}

/// A module config with all fallbacks applied.
#[derive(Debug, Clone)]
pub struct ResolvedModuleConfig {
    pub polling_interval: Duration,
    pub recovery_count: u32,
    pub recovery_interval: Duration,
    pub priority: u32,
}

impl ResolvedModuleConfig {
    pub fn resolve(common: &CommonConfig, module: Option<&ModuleConfig>) -> Self {
        let module = module.cloned().unwrap_or_default();
        Self {
            polling_interval: Duration::from_secs(
                module.polling_interval.unwrap_or(common.polling_interval),
            ),
            recovery_count: module
                .sensor_recovery_count
                .unwrap_or(common.sensor_recovery_count),
            recovery_interval: Duration::from_secs(
                module
                    .sensor_recovery_interval
                    .unwrap_or(common.sensor_recovery_interval),
            ),
            priority: module.priority,
        }
    }
}

/// A service endpoint watched by the built-in service watchdog.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct WatchedServiceConfig {
    pub name: String,
    pub url: String,
    /// Consecutive failed checks before a fault is raised.
    #[serde(default = "default_service_grace")]
    pub grace: u32,
}

fn default_service_grace() -> u32 {
    1
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Message-bus endpoint receiving outbound alert envelopes.
    pub bus_endpoint: String,

    #[serde(default)]
    pub node: NodeIdentity,

    #[serde(default)]
    pub signature: SignatureConfig,

    #[serde(default)]
    pub common: CommonConfig,

    /// Module name -> overrides. Names must exist in the factory map.
    #[serde(default)]
    pub modules: HashMap<String, ModuleConfig>,

    #[serde(default)]
    pub services: Vec<WatchedServiceConfig>,
}

impl Config {
    /// Resolve the effective config for one module.
    pub fn module(&self, name: &str) -> ResolvedModuleConfig {
        ResolvedModuleConfig::resolve(&self.common, self.modules.get(name))
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
