//! Internal message envelopes and the outbound alert envelope.
//!
//! Every message that crosses a module boundary travels as an [`Envelope`]:
//! a globally unique id, a type tag used for routing, an optional
//! correlation id echoing the request this message replies to, and a typed
//! body. Envelopes are immutable once enqueued.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{AlertRecord, NodeIdentity, config::SignatureConfig};

pub const SCHEMA_VERSION: &str = "1.0";
pub const MSG_VERSION: &str = "1.0";

/// Type tag owned by the recovery supervisor.
pub const THREAD_CONTROLLER_TAG: &str = "thread_controller";

/// Type tag of the broadcast shutdown envelope.
pub const SHUTDOWN_TAG: &str = "shutdown";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: Uuid,
    /// Routing key; the ingress router maps this to the owning module.
    pub type_tag: String,
    pub destination: String,
    pub created_at: DateTime<Utc>,
    /// Echoes the `message_id` of the request this envelope answers.
    pub correlation_id: Option<Uuid>,
    pub body: EnvelopeBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeBody {
    SensorRequest { payload: Value },
    SensorResponse { payload: Value },
    ThreadControllerRequest(ThreadControllerRequest),
    ThreadControllerResponse(ThreadControllerResponse),
    /// Structured rejection for malformed or unroutable requests.
    Error { reason: String },
    /// Broadcast by the runtime during shutdown; observed at the next tick.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadAction {
    Status,
    Restart,
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadControllerRequest {
    pub module_name: String,
    pub thread_request: ThreadAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadControllerResponse {
    pub module_name: String,
    pub thread_response: String,
}

impl Envelope {
    /// Build a fresh request envelope with a new message id.
    pub fn request(type_tag: impl Into<String>, destination: impl Into<String>, body: EnvelopeBody) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            type_tag: type_tag.into(),
            destination: destination.into(),
            created_at: Utc::now(),
            correlation_id: None,
            body,
        }
    }

    /// Build a reply to `inbound`, copying its message id into the
    /// correlation id so the requester can match the response.
    pub fn reply_to(inbound: &Envelope, type_tag: impl Into<String>, body: EnvelopeBody) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            type_tag: type_tag.into(),
            destination: String::new(),
            created_at: Utc::now(),
            correlation_id: Some(inbound.message_id),
            body,
        }
    }

    /// The broadcast shutdown envelope for one module's mailbox.
    pub fn shutdown(destination: impl Into<String>) -> Self {
        Self::request(SHUTDOWN_TAG, destination, EnvelopeBody::Shutdown)
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self.body, EnvelopeBody::Shutdown)
    }

    /// The wire header carried by serialized envelopes.
    pub fn header(&self) -> Value {
        json!({
            "schema_version": SCHEMA_VERSION,
            "msg_version": MSG_VERSION,
            "uuid": self.message_id,
        })
    }
}

/// Compose the outbound alert envelope delivered to the message bus.
///
/// The `specific_info` blob is passed through untouched; its layout belongs
/// to the module that produced the alert.
pub fn build_alert_envelope(
    alert: &AlertRecord,
    node: &NodeIdentity,
    signature: &SignatureConfig,
) -> Value {
    json!({
        "title": format!("{}: {}", alert.resource_type, alert.resource_id),
        "description": alert.description,
        "username": signature.username,
        "signature": signature.token,
        "time": Utc::now().to_rfc3339(),
        "expires": signature.expires,
        "message": {
            "header": {
                "schema_version": SCHEMA_VERSION,
                "msg_version": MSG_VERSION,
                "uuid": alert.alert_id,
            },
            "sensor_response_type": {
                "alert_type": alert.alert_type,
                "severity": alert.severity,
                "alert_id": alert.alert_id,
                "host_id": node.node_id,
                "info": {
                    "site_id": node.site_id,
                    "rack_id": node.rack_id,
                    "node_id": node.node_id,
                    "cluster_id": node.cluster_id,
                    "resource_type": alert.resource_type,
                    "resource_id": alert.resource_id,
                    "event_time": alert.event_time.to_rfc3339(),
                    "description": alert.description,
                },
                "specific_info": alert.specific_info,
            }
        }
    })
}
