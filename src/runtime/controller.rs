//! Shared lifecycle flags.
//!
//! Each module's state lives in a watch channel: the run loop holds the
//! receiver and checks it at the top of every scheduling tick; the runtime
//! and the recovery supervisor flip it through this controller. No module
//! ever mutates another module's flag.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::watch;
use tracing::trace;

use super::module::ModuleState;

#[derive(Clone)]
pub struct RuntimeController {
    states: Arc<RwLock<HashMap<String, watch::Sender<ModuleState>>>>,
}

impl RuntimeController {
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create the flag for a new module; returns the run loop's receiver.
    pub(crate) fn insert(&self, name: &str) -> watch::Receiver<ModuleState> {
        let (tx, rx) = watch::channel(ModuleState::Created);
        self.states
            .write()
            .expect("state table poisoned")
            .insert(name.to_string(), tx);
        rx
    }

    pub fn state(&self, name: &str) -> Option<ModuleState> {
        self.states
            .read()
            .expect("state table poisoned")
            .get(name)
            .map(|tx| *tx.borrow())
    }

    /// Flip a module's flag; the run loop observes it at its next
    /// scheduling point. Returns false for unknown modules.
    pub fn set_state(&self, name: &str, state: ModuleState) -> bool {
        let table = self.states.read().expect("state table poisoned");
        match table.get(name) {
            Some(tx) => {
                trace!("module {name} -> {state}");
                // send only fails if the run loop is gone; the flag value
                // still matters for status queries, so keep it current.
                tx.send_replace(state);
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.states
            .read()
            .expect("state table poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

impl Default for RuntimeController {
    fn default() -> Self {
        Self::new()
    }
}
