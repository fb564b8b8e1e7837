//! Monitoring modules.
//!
//! Every module implements [`crate::runtime::Module`] and is constructed
//! through [`build_module`], the factory map the daemon resolves configured
//! module names against at startup. Unknown names are a configuration
//! error, caught before anything starts.

pub mod service_watchdog;

pub use service_watchdog::ServiceWatchdog;

use crate::config::{Config, ConfigError};
use crate::runtime::Module;

/// Construct a module by its configured name.
pub fn build_module(name: &str, config: &Config) -> Result<Box<dyn Module>, ConfigError> {
    match name {
        service_watchdog::MODULE_NAME => {
            Ok(Box::new(ServiceWatchdog::new(config.services.clone())))
        }
        other => Err(ConfigError::UnknownModule(other.to_string())),
    }
}
