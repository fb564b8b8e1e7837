//! The module seam.
//!
//! A monitoring module is composition, not inheritance: the runtime owns
//! the loop and the mailbox, the module brings the two callbacks. One call
//! to [`Module::tick`] is one bounded unit of work; the runtime decides
//! when the next one happens.

use std::fmt;

use async_trait::async_trait;

use crate::config::{ConfigError, ResolvedModuleConfig};
use crate::dedup::AlertGate;
use crate::envelope::Envelope;
use crate::mailbox::MailboxRegistry;

/// Lifecycle state of one registered module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Created,
    Running,
    Suspended,
    Halted,
    Shutdown,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleState::Created => "Created",
            ModuleState::Running => "Running",
            ModuleState::Suspended => "Suspended",
            ModuleState::Halted => "Halted",
            ModuleState::Shutdown => "Shutdown",
        };
        f.write_str(s)
    }
}

/// Failure of one unit of work, reported to the recovery supervisor.
/// These values cross the module boundary; panics never do.
#[derive(Debug)]
pub enum ModuleError {
    /// Missing/invalid configuration; fatal to this module only.
    Config(ConfigError),

    /// Probe or bus I/O failed after bounded retries.
    TransientIo(String),

    /// Anything else the module considers a failed unit of work.
    Failed(String),
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleError::Config(e) => write!(f, "configuration error: {}", e),
            ModuleError::TransientIo(msg) => write!(f, "transient I/O error: {}", msg),
            ModuleError::Failed(msg) => write!(f, "module failure: {}", msg),
        }
    }
}

impl std::error::Error for ModuleError {}

impl From<ConfigError> for ModuleError {
    fn from(e: ConfigError) -> Self {
        ModuleError::Config(e)
    }
}

/// Everything a module may touch outside its own state. Handed to the
/// module on every call; modules hold no global references.
#[derive(Clone)]
pub struct ModuleCtx {
    /// Alert emission (dedup ledger + egress pipeline).
    pub gate: AlertGate,

    /// Addressing other modules by name.
    pub mailboxes: MailboxRegistry,

    /// This module's resolved configuration.
    pub config: ResolvedModuleConfig,
}

/// A monitoring/control module hosted by the runtime.
#[async_trait]
pub trait Module: Send {
    /// Unique module name; also its mailbox address.
    fn name(&self) -> &str;

    /// One bounded unit of work (one polling pass).
    async fn tick(&mut self, ctx: &ModuleCtx) -> Result<(), ModuleError>;

    /// An envelope addressed to this module arrived. The default ignores
    /// it; modules that answer requests override this.
    async fn handle_envelope(
        &mut self,
        _envelope: Envelope,
        _ctx: &ModuleCtx,
    ) -> Result<(), ModuleError> {
        Ok(())
    }
}
