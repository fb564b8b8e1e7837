pub mod actors;
pub mod bus;
pub mod config;
pub mod dedup;
pub mod envelope;
pub mod mailbox;
pub mod modules;
pub mod router;
pub mod runtime;
pub mod store;
pub mod util;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of an outbound alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Fault,
    FaultResolved,
    Info,
    Insertion,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Informational,
    Warning,
    Critical,
}

/// A single health alert produced by a monitoring module.
///
/// The `specific_info` payload is opaque to the delivery pipeline; only the
/// originating module and the downstream consumer interpret it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub alert_id: String,
    pub resource_type: String,
    pub resource_id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub event_time: DateTime<Utc>,
    pub description: String,
    pub specific_info: serde_json::Value,
}

impl AlertRecord {
    /// Build an alert with a fresh id, stamped with the current time.
    pub fn new(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        alert_type: AlertType,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            alert_id: uuid::Uuid::new_v4().to_string(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            alert_type,
            severity,
            event_time: Utc::now(),
            description: description.into(),
            specific_info: serde_json::Value::Null,
        }
    }

    pub fn with_specific_info(mut self, info: serde_json::Value) -> Self {
        self.specific_info = info;
        self
    }
}

/// Identity of the node this daemon runs on, stamped into every outbound
/// alert envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub site_id: String,
    pub rack_id: String,
    pub node_id: String,
    pub cluster_id: String,
}
