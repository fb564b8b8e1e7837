//! Module runtime
//!
//! Owns module registration, dependency ordering and the cooperative
//! scheduling loop. Each module runs as an independent tokio task: one
//! bounded unit of work per wake-up, woken either by its polling ticker or
//! immediately when mail arrives. Modules share nothing except the
//! explicitly shared dedup/backlog stores; everything else is message
//! passing through mailboxes.
//!
//! ## Lifecycle
//!
//! ```text
//! Created ──start_all──▶ Running ⇄ Suspended
//!                           │
//!                           ▼ (recovery supervisor)
//!                        Halted ──restart──▶ Running
//!
//! any state ──shutdown──▶ Shutdown (terminal)
//! ```

pub mod controller;
pub mod module;

pub use controller::RuntimeController;
pub use module::{Module, ModuleCtx, ModuleError, ModuleState};

use std::collections::{BinaryHeap, HashMap};
use std::cmp::Reverse;
use std::fmt;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, instrument, trace, warn};

use crate::actors::messages::FailureVerdict;
use crate::actors::recovery::RecoveryHandle;
use crate::config::ResolvedModuleConfig;
use crate::dedup::AlertGate;
use crate::envelope::Envelope;
use crate::mailbox::{MailboxError, MailboxReceiver, MailboxRegistry};

/// Bound on waiting for run loops to observe shutdown before they are
/// force-terminated.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum RuntimeError {
    /// A declared dependency is not registered yet.
    Dependency { module: String, missing: String },

    /// The dependency graph contains a cycle.
    Cycle(Vec<String>),

    /// A module with this name is already registered.
    Duplicate(String),

    /// No module registered under this name.
    Unknown(String),

    Mailbox(MailboxError),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Dependency { module, missing } => {
                write!(f, "module {} depends on unregistered module {}", module, missing)
            }
            RuntimeError::Cycle(members) => {
                write!(f, "dependency cycle involving: {}", members.join(", "))
            }
            RuntimeError::Duplicate(name) => write!(f, "module {} already registered", name),
            RuntimeError::Unknown(name) => write!(f, "no module registered as {}", name),
            RuntimeError::Mailbox(e) => write!(f, "mailbox error: {}", e),
        }
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RuntimeError::Mailbox(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MailboxError> for RuntimeError {
    fn from(e: MailboxError) -> Self {
        RuntimeError::Mailbox(e)
    }
}

struct ModuleEntry {
    name: String,
    module: Box<dyn Module>,
    deps: Vec<String>,
    config: ResolvedModuleConfig,
    mailbox: MailboxReceiver,
    state_rx: watch::Receiver<ModuleState>,
}

pub struct ModuleRuntime {
    mailboxes: MailboxRegistry,
    gate: AlertGate,
    controller: RuntimeController,
    entries: Vec<ModuleEntry>,
    handles: Vec<(String, JoinHandle<()>)>,
    shutdown_timeout: Duration,
}

impl ModuleRuntime {
    pub fn new(mailboxes: MailboxRegistry, gate: AlertGate) -> Self {
        Self {
            mailboxes,
            gate,
            controller: RuntimeController::new(),
            entries: Vec::new(),
            handles: Vec::new(),
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        }
    }

    /// Shrink the shutdown grace period (tests).
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Shared lifecycle flags; the recovery supervisor holds a clone.
    pub fn controller(&self) -> RuntimeController {
        self.controller.clone()
    }

    pub fn mailboxes(&self) -> MailboxRegistry {
        self.mailboxes.clone()
    }

    /// Register a module with its dependencies and resolved config.
    /// Dependencies must already be registered.
    pub fn register(
        &mut self,
        module: Box<dyn Module>,
        deps: Vec<String>,
        config: ResolvedModuleConfig,
    ) -> Result<(), RuntimeError> {
        let name = module.name().to_string();

        if self.entries.iter().any(|e| e.name == name) {
            return Err(RuntimeError::Duplicate(name));
        }

        for dep in &deps {
            if !self.entries.iter().any(|e| &e.name == dep) {
                return Err(RuntimeError::Dependency {
                    module: name,
                    missing: dep.clone(),
                });
            }
        }

        let mailbox = self.mailboxes.register(&name)?;
        let state_rx = self.controller.insert(&name);

        debug!("registered module {name} (deps: {deps:?})");
        self.entries.push(ModuleEntry {
            name,
            module,
            deps,
            config,
            mailbox,
            state_rx,
        });
        Ok(())
    }

    /// Start every registered module in dependency order, lowest priority
    /// first among modules whose dependencies are all started.
    pub async fn start_all(&mut self, recovery: RecoveryHandle) -> Result<(), RuntimeError> {
        let order = self.start_order()?;
        let mut entries: HashMap<String, ModuleEntry> = self
            .entries
            .drain(..)
            .map(|e| (e.name.clone(), e))
            .collect();

        for name in order {
            let entry = entries.remove(&name).expect("ordered name must exist");
            recovery
                .register_module(
                    &entry.name,
                    entry.config.recovery_count,
                    entry.config.recovery_interval,
                )
                .await;

            self.controller.set_state(&entry.name, ModuleState::Running);

            let ctx = ModuleCtx {
                gate: self.gate.clone(),
                mailboxes: self.mailboxes.clone(),
                config: entry.config.clone(),
            };

            debug!("starting module {}", entry.name);
            let handle = tokio::spawn(run_module(
                entry.module,
                ctx,
                entry.mailbox,
                entry.state_rx,
                recovery.clone(),
            ));
            self.handles.push((name, handle));
        }

        Ok(())
    }

    /// Kahn's algorithm over the dependency graph; ready modules are
    /// drained lowest priority first (then by name, for determinism).
    fn start_order(&self) -> Result<Vec<String>, RuntimeError> {
        let mut pending: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        let priority: HashMap<&str, u32> = self
            .entries
            .iter()
            .map(|e| (e.name.as_str(), e.config.priority))
            .collect();

        for entry in &self.entries {
            pending.insert(&entry.name, entry.deps.len());
            for dep in &entry.deps {
                dependents.entry(dep).or_default().push(&entry.name);
            }
        }

        let mut ready: BinaryHeap<Reverse<(u32, &str)>> = pending
            .iter()
            .filter(|(_, deps)| **deps == 0)
            .map(|(name, _)| Reverse((priority[name], *name)))
            .collect();

        let mut order = Vec::with_capacity(self.entries.len());
        while let Some(Reverse((_, name))) = ready.pop() {
            order.push(name.to_string());
            for dependent in dependents.get(name).into_iter().flatten() {
                let remaining = pending
                    .get_mut(dependent)
                    .expect("dependent must be pending");
                *remaining -= 1;
                if *remaining == 0 {
                    ready.push(Reverse((priority[dependent], dependent)));
                }
            }
            pending.remove(name);
        }

        if order.len() != self.entries.len() {
            let stuck: Vec<String> = pending.keys().map(|n| n.to_string()).collect();
            return Err(RuntimeError::Cycle(stuck));
        }
        Ok(order)
    }

    pub fn state(&self, name: &str) -> Option<ModuleState> {
        self.controller.state(name)
    }

    /// Non-blocking: the module observes the flag at its next tick and
    /// performs no work until resumed; its mailbox keeps accumulating.
    pub fn suspend(&self, name: &str) -> Result<(), RuntimeError> {
        if self.controller.set_state(name, ModuleState::Suspended) {
            Ok(())
        } else {
            Err(RuntimeError::Unknown(name.to_string()))
        }
    }

    pub fn resume(&self, name: &str) -> Result<(), RuntimeError> {
        if self.controller.set_state(name, ModuleState::Running) {
            Ok(())
        } else {
            Err(RuntimeError::Unknown(name.to_string()))
        }
    }

    /// Broadcast shutdown to every mailbox, flip every flag to Shutdown,
    /// then wait (bounded) for the run loops to exit. Non-responsive
    /// modules are force-terminated.
    #[instrument(skip(self))]
    pub async fn shutdown(&mut self) {
        debug!("shutting down {} modules", self.handles.len());

        for name in self.mailboxes.names() {
            if let Err(e) = self.mailboxes.send(&name, Envelope::shutdown(&name)) {
                trace!("shutdown envelope for {name} not delivered: {e}");
            }
        }
        for name in self.controller.names() {
            self.controller.set_state(&name, ModuleState::Shutdown);
        }

        for (name, handle) in self.handles.drain(..) {
            let abort = handle.abort_handle();
            match time::timeout(self.shutdown_timeout, handle).await {
                Ok(Ok(())) => trace!("module {name} exited cleanly"),
                Ok(Err(e)) => error!("module {name} task failed during shutdown: {e}"),
                Err(_) => {
                    warn!("module {name} did not observe shutdown in time, aborting");
                    abort.abort();
                }
            }
        }

        debug!("runtime shutdown complete");
    }
}

/// The cooperative per-module scheduling loop.
///
/// One iteration is: observe the lifecycle flag, then do exactly one of
/// - handle one inbound envelope (immediate wake on non-empty mailbox),
/// - run one polling tick,
/// - notice a flag change.
///
/// Work outcomes are reported to the recovery supervisor, whose verdict
/// decides between a recovery backoff and parking in Halted.
#[instrument(skip_all, fields(module = %module.name()))]
async fn run_module(
    mut module: Box<dyn Module>,
    ctx: ModuleCtx,
    mut mailbox: MailboxReceiver,
    mut state_rx: watch::Receiver<ModuleState>,
    recovery: RecoveryHandle,
) {
    let name = module.name().to_string();
    debug!("module loop started");

    let mut ticker = time::interval(ctx.config.polling_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // Copy the flag out before matching; awaiting `changed` needs the
        // receiver mutably.
        let state = *state_rx.borrow();
        match state {
            ModuleState::Shutdown => break,
            ModuleState::Suspended | ModuleState::Halted => {
                // No work while parked; mail accumulates. Wake only on a
                // flag change.
                if state_rx.changed().await.is_err() {
                    break;
                }
                continue;
            }
            ModuleState::Created | ModuleState::Running => {}
        }

        tokio::select! {
            maybe = mailbox.recv() => {
                match maybe {
                    Some(envelope) if envelope.is_shutdown() => {
                        debug!("observed shutdown envelope");
                        break;
                    }
                    Some(envelope) => {
                        trace!("handling envelope {}", envelope.message_id);
                        let result = module.handle_envelope(envelope, &ctx).await;
                        report(&name, result, &recovery, &mut state_rx).await;
                    }
                    None => {
                        warn!("mailbox closed, exiting");
                        break;
                    }
                }
            }

            _ = ticker.tick() => {
                let result = module.tick(&ctx).await;
                report(&name, result, &recovery, &mut state_rx).await;
            }

            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                // Re-check the flag at the top of the loop.
            }
        }
    }

    debug!("module loop stopped");
}

/// Report one unit of work's outcome and apply the verdict.
async fn report(
    name: &str,
    result: Result<(), ModuleError>,
    recovery: &RecoveryHandle,
    state_rx: &mut watch::Receiver<ModuleState>,
) {
    match result {
        Ok(()) => recovery.report_success(name).await,
        Err(e) => {
            warn!("unit of work failed: {e}");
            match recovery.report_failure(name, e.to_string()).await {
                Ok(FailureVerdict::Halt) => {
                    // Flag already flipped to Halted; the loop parks.
                }
                Ok(FailureVerdict::RetryAfter(backoff)) => {
                    // Back off, but stay responsive to lifecycle changes.
                    tokio::select! {
                        _ = time::sleep(backoff) => {}
                        _ = state_rx.changed() => {}
                    }
                }
                Err(report_err) => {
                    // Supervisor gone (shutdown in progress); brief pause
                    // keeps a failing module from spinning.
                    warn!("failure report not delivered: {report_err}");
                    time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}
