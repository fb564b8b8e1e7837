//! Dedup ledger for fault alerts.
//!
//! A fault condition that stays unresolved must not re-alert on every
//! polling cycle, and a fault-resolved alert makes no sense without a
//! prior fault. The ledger keeps one durable "open fault" marker per
//! (resource_id, code) pair:
//!
//! - a fault is emitted only when no marker exists (and opens one);
//! - a fault-resolved is emitted only when a marker exists (and clears it).
//!
//! Markers live in the shared key/value store so suppression survives a
//! daemon restart.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, trace};

use crate::AlertRecord;
use crate::AlertType;
use crate::actors::egress::{EgressHandle, PublishOutcome};
use crate::store::{KeyValueStore, StoreResult};

const DEDUP_PREFIX: &str = "dedup/";

#[derive(Clone)]
pub struct DedupStore {
    store: Arc<dyn KeyValueStore>,
}

impl DedupStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn key(resource_id: &str, code: &str) -> String {
        format!("{DEDUP_PREFIX}{resource_id}/{code}")
    }

    /// Persist an open-fault marker unconditionally.
    pub async fn record_fault(&self, resource_id: &str, code: &str) -> StoreResult<()> {
        let marker = serde_json::json!({ "opened_at": Utc::now().to_rfc3339() });
        self.store
            .put(&Self::key(resource_id, code), &marker.to_string())
            .await
    }

    pub async fn has_open_fault(&self, resource_id: &str, code: &str) -> StoreResult<bool> {
        Ok(self.store.get(&Self::key(resource_id, code)).await?.is_some())
    }

    /// True exactly once per open fault: records the marker on first sight,
    /// suppresses repeats until the fault is resolved.
    pub async fn should_emit_fault(&self, resource_id: &str, code: &str) -> StoreResult<bool> {
        if self.has_open_fault(resource_id, code).await? {
            trace!("suppressing duplicate fault for {resource_id}/{code}");
            return Ok(false);
        }
        self.record_fault(resource_id, code).await?;
        debug!("opened fault marker for {resource_id}/{code}");
        Ok(true)
    }

    /// True only if a matching open fault exists; clears the marker so a
    /// later recurrence of the fault alerts again.
    pub async fn should_emit_fault_resolved(
        &self,
        resource_id: &str,
        code: &str,
    ) -> StoreResult<bool> {
        if !self.has_open_fault(resource_id, code).await? {
            trace!("suppressing ungrounded fault_resolved for {resource_id}/{code}");
            return Ok(false);
        }
        self.store.delete(&Self::key(resource_id, code)).await?;
        debug!("cleared fault marker for {resource_id}/{code}");
        Ok(true)
    }

    /// Drop a marker without emitting anything (operator restart path).
    pub async fn clear(&self, resource_id: &str, code: &str) -> StoreResult<()> {
        self.store.delete(&Self::key(resource_id, code)).await
    }
}

/// Front door modules use to emit alerts: fault and fault_resolved records
/// pass through the ledger first; everything else goes straight to egress.
#[derive(Clone)]
pub struct AlertGate {
    dedup: DedupStore,
    egress: EgressHandle,
}

impl AlertGate {
    pub fn new(dedup: DedupStore, egress: EgressHandle) -> Self {
        Self { dedup, egress }
    }

    pub fn dedup(&self) -> &DedupStore {
        &self.dedup
    }

    pub fn egress(&self) -> &EgressHandle {
        &self.egress
    }

    /// Publish `alert` unless the ledger suppresses it. Returns `None`
    /// when suppressed, otherwise the egress outcome.
    pub async fn emit(
        &self,
        alert: AlertRecord,
        code: &str,
    ) -> anyhow::Result<Option<PublishOutcome>> {
        let emit = match alert.alert_type {
            AlertType::Fault => {
                self.dedup
                    .should_emit_fault(&alert.resource_id, code)
                    .await?
            }
            AlertType::FaultResolved => {
                self.dedup
                    .should_emit_fault_resolved(&alert.resource_id, code)
                    .await?
            }
            AlertType::Info | AlertType::Insertion | AlertType::Missing => true,
        };

        if !emit {
            return Ok(None);
        }

        let outcome = self.egress.publish(alert).await?;
        Ok(Some(outcome))
    }
}
