//! Per-module mailboxes.
//!
//! Each registered module owns exactly one FIFO inbound queue. The registry
//! maps module names to senders so any component can address a module by
//! name without holding a reference to it. Delivery is FIFO per mailbox;
//! there is no ordering guarantee across different modules' mailboxes.
//!
//! Mailboxes are unbounded by default (payloads are small telemetry
//! messages). A bounded mailbox can be requested at registration; sends to
//! a full bounded mailbox fail fast with [`MailboxError::QueueFull`]
//! instead of blocking the producer.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::trace;

use crate::envelope::Envelope;

#[derive(Debug)]
pub enum MailboxError {
    /// Destination module name is not registered.
    UnknownModule(String),
    /// A mailbox already exists under this name.
    AlreadyRegistered(String),
    /// Bounded mailbox is full; the message was not enqueued.
    QueueFull(String),
    /// The receiving module has dropped its receiver.
    Closed(String),
}

impl fmt::Display for MailboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailboxError::UnknownModule(name) => write!(f, "no mailbox registered for {}", name),
            MailboxError::AlreadyRegistered(name) => {
                write!(f, "mailbox already registered for {}", name)
            }
            MailboxError::QueueFull(name) => write!(f, "mailbox for {} is full", name),
            MailboxError::Closed(name) => write!(f, "mailbox for {} is closed", name),
        }
    }
}

impl std::error::Error for MailboxError {}

enum MailboxSender {
    Unbounded(mpsc::UnboundedSender<Envelope>),
    Bounded(mpsc::Sender<Envelope>),
}

impl MailboxSender {
    fn send(&self, name: &str, envelope: Envelope) -> Result<(), MailboxError> {
        match self {
            MailboxSender::Unbounded(tx) => tx
                .send(envelope)
                .map_err(|_| MailboxError::Closed(name.to_string())),
            MailboxSender::Bounded(tx) => tx.try_send(envelope).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => MailboxError::QueueFull(name.to_string()),
                mpsc::error::TrySendError::Closed(_) => MailboxError::Closed(name.to_string()),
            }),
        }
    }
}

/// Receiving half of one module's mailbox.
#[derive(Debug)]
pub enum MailboxReceiver {
    Unbounded(mpsc::UnboundedReceiver<Envelope>),
    Bounded(mpsc::Receiver<Envelope>),
}

impl MailboxReceiver {
    /// Wait for the next envelope. Returns `None` once the registry entry
    /// was removed and the queue drained.
    pub async fn recv(&mut self) -> Option<Envelope> {
        match self {
            MailboxReceiver::Unbounded(rx) => rx.recv().await,
            MailboxReceiver::Bounded(rx) => rx.recv().await,
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        match self {
            MailboxReceiver::Unbounded(rx) => rx.try_recv().ok(),
            MailboxReceiver::Bounded(rx) => rx.try_recv().ok(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MailboxReceiver::Unbounded(rx) => rx.is_empty(),
            MailboxReceiver::Bounded(rx) => rx.is_empty(),
        }
    }
}

/// Routing table from module name to mailbox. Cloneable; all clones share
/// the same table.
#[derive(Clone)]
pub struct MailboxRegistry {
    inner: Arc<RwLock<HashMap<String, MailboxSender>>>,
}

impl MailboxRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register an unbounded mailbox and hand back its receiving half.
    pub fn register(&self, name: &str) -> Result<MailboxReceiver, MailboxError> {
        let mut table = self.inner.write().expect("mailbox table poisoned");
        if table.contains_key(name) {
            return Err(MailboxError::AlreadyRegistered(name.to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        table.insert(name.to_string(), MailboxSender::Unbounded(tx));
        trace!("registered mailbox for {name}");
        Ok(MailboxReceiver::Unbounded(rx))
    }

    /// Register a bounded mailbox; sends beyond `capacity` fail fast.
    pub fn register_bounded(
        &self,
        name: &str,
        capacity: usize,
    ) -> Result<MailboxReceiver, MailboxError> {
        let mut table = self.inner.write().expect("mailbox table poisoned");
        if table.contains_key(name) {
            return Err(MailboxError::AlreadyRegistered(name.to_string()));
        }

        let (tx, rx) = mpsc::channel(capacity);
        table.insert(name.to_string(), MailboxSender::Bounded(tx));
        trace!("registered bounded mailbox for {name} (capacity {capacity})");
        Ok(MailboxReceiver::Bounded(rx))
    }

    /// Enqueue an envelope for `dest`; never blocks.
    pub fn send(&self, dest: &str, envelope: Envelope) -> Result<(), MailboxError> {
        let table = self.inner.read().expect("mailbox table poisoned");
        let sender = table
            .get(dest)
            .ok_or_else(|| MailboxError::UnknownModule(dest.to_string()))?;
        sender.send(dest, envelope)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner
            .read()
            .expect("mailbox table poisoned")
            .contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.inner
            .read()
            .expect("mailbox table poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Drop a module's sender; its receiver drains and then sees `None`.
    pub fn remove(&self, name: &str) {
        self.inner
            .write()
            .expect("mailbox table poisoned")
            .remove(name);
    }
}

impl Default for MailboxRegistry {
    fn default() -> Self {
        Self::new()
    }
}
