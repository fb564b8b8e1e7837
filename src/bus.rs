//! Message-bus seam.
//!
//! The cluster control plane consumes alert envelopes over a message bus
//! whose transport is not this daemon's concern. [`MessageBus`] is the
//! seam; [`HttpBus`] posts envelopes to an HTTP ingest endpoint with an
//! explicit client timeout so a stalled bus can never block a caller
//! indefinitely.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

/// Default bound on one connect + send to the bus.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug)]
pub enum BusError {
    /// Bus endpoint could not be reached.
    Unreachable(String),

    /// The bus answered but refused the envelope.
    Rejected { status: u16 },

    /// Connect/send exceeded the publish timeout.
    Timeout,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::Unreachable(msg) => write!(f, "message bus unreachable: {}", msg),
            BusError::Rejected { status } => {
                write!(f, "message bus rejected envelope (HTTP {})", status)
            }
            BusError::Timeout => write!(f, "message bus send timed out"),
        }
    }
}

impl std::error::Error for BusError {}

/// Transport over which outbound alert envelopes leave the node.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn send(&self, envelope: serde_json::Value) -> Result<(), BusError>;
}

/// HTTP bus client. The reqwest client is built once and reused; its
/// timeout bounds the whole connect + send, matching [`PUBLISH_TIMEOUT`].
pub struct HttpBus {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpBus {
    pub fn new(endpoint: impl Into<String>) -> anyhow::Result<Self> {
        Self::with_timeout(endpoint, PUBLISH_TIMEOUT)
    }

    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl MessageBus for HttpBus {
    async fn send(&self, envelope: serde_json::Value) -> Result<(), BusError> {
        trace!("posting envelope to {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BusError::Timeout
                } else {
                    BusError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BusError::Rejected {
                status: status.as_u16(),
            });
        }

        trace!("envelope accepted by bus");
        Ok(())
    }
}
