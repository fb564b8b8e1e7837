//! Ingress routing.
//!
//! Inbound request envelopes carry a type tag; the router owns the table
//! from type tag to owning module and forwards matching envelopes through
//! the module's mailbox. Anything unroutable gets an explicit error reply
//! through the egress pipeline, carrying the inbound message id as a
//! correlation id so the requester can match it.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, instrument, trace, warn};

use crate::actors::egress::EgressHandle;
use crate::envelope::{Envelope, EnvelopeBody};
use crate::mailbox::{MailboxError, MailboxRegistry};

#[derive(Debug)]
pub enum RouterError {
    /// No module owns this type tag.
    UnknownTag(String),

    /// The tag is already owned by another module.
    DuplicateTag { tag: String, owner: String },

    /// The owning module's mailbox is not registered.
    UnknownModule(String),

    /// The owning module exists but delivery failed.
    Delivery { module: String, source: MailboxError },
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::UnknownTag(tag) => write!(f, "no module owns type tag {}", tag),
            RouterError::DuplicateTag { tag, owner } => {
                write!(f, "type tag {} already owned by {}", tag, owner)
            }
            RouterError::UnknownModule(name) => {
                write!(f, "no mailbox registered for module {}", name)
            }
            RouterError::Delivery { module, source } => {
                write!(f, "delivery to {} failed: {}", module, source)
            }
        }
    }
}

impl std::error::Error for RouterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RouterError::Delivery { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Maps inbound type tags to module mailboxes.
///
/// The table is built once at startup; dispatch itself takes `&self` and
/// can be shared across the accept path.
pub struct IngressRouter {
    routes: HashMap<String, String>,
    mailboxes: MailboxRegistry,
    egress: EgressHandle,
}

impl IngressRouter {
    pub fn new(mailboxes: MailboxRegistry, egress: EgressHandle) -> Self {
        Self {
            routes: HashMap::new(),
            mailboxes,
            egress,
        }
    }

    /// Claim a type tag for a module. The module's mailbox must already be
    /// registered.
    pub fn add_route(
        &mut self,
        type_tag: impl Into<String>,
        module: impl Into<String>,
    ) -> Result<(), RouterError> {
        let tag = type_tag.into();
        let module = module.into();

        if let Some(owner) = self.routes.get(&tag) {
            return Err(RouterError::DuplicateTag {
                tag,
                owner: owner.clone(),
            });
        }
        if !self.mailboxes.contains(&module) {
            return Err(RouterError::UnknownModule(module));
        }

        trace!("route {tag} -> {module}");
        self.routes.insert(tag, module);
        Ok(())
    }

    pub fn routes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.routes.iter().map(|(t, m)| (t.as_str(), m.as_str()))
    }

    /// Forward an inbound envelope to the owning module.
    ///
    /// Failures are never silent: an unroutable or undeliverable envelope
    /// produces a correlated error reply through egress, and the error is
    /// also returned to the caller.
    #[instrument(skip(self, envelope), fields(type_tag = %envelope.type_tag, message_id = %envelope.message_id))]
    pub async fn dispatch(&self, envelope: Envelope) -> Result<(), RouterError> {
        let module = match self.routes.get(&envelope.type_tag) {
            Some(module) => module,
            None => {
                warn!("unknown type tag");
                let error = RouterError::UnknownTag(envelope.type_tag.clone());
                self.reject(&envelope, &error).await;
                return Err(error);
            }
        };

        match self.mailboxes.send(module, envelope.clone()) {
            Ok(()) => {
                debug!("dispatched to {module}");
                Ok(())
            }
            Err(source) => {
                warn!("delivery to {module} failed: {source}");
                let error = RouterError::Delivery {
                    module: module.clone(),
                    source,
                };
                self.reject(&envelope, &error).await;
                Err(error)
            }
        }
    }

    async fn reject(&self, inbound: &Envelope, error: &RouterError) {
        let reply = Envelope::reply_to(
            inbound,
            &inbound.type_tag,
            EnvelopeBody::Error {
                reason: error.to_string(),
            },
        );
        if let Err(e) = self.egress.send_reply(reply).await {
            warn!("error reply not sent: {e}");
        }
    }
}
