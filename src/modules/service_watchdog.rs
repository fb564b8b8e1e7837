//! Service watchdog module.
//!
//! Probes configured HTTP service endpoints once per polling tick. A
//! service that fails more consecutive probes than its grace allows gets a
//! fault alert; a later successful probe produces the matching resolved
//! alert. Both pass through the dedup gate, so an unresolved outage never
//! repeats its fault and a resolved alert is only ever emitted against an
//! open fault.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, instrument, trace, warn};

use crate::config::WatchedServiceConfig;
use crate::envelope::{Envelope, EnvelopeBody};
use crate::runtime::{Module, ModuleCtx, ModuleError};
use crate::{AlertRecord, AlertType, Severity};

pub const MODULE_NAME: &str = "ServiceWatchdog";

/// Type tag for inbound service status queries.
pub const SERVICE_QUERY_TAG: &str = "service_query";

/// Dedup code for a down service.
const SERVICE_DOWN_CODE: &str = "service_down";

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ServiceWatchdog {
    services: Vec<WatchedServiceConfig>,
    client: reqwest::Client,
    /// Consecutive failed probes per service name.
    down_counts: HashMap<String, u32>,
}

impl ServiceWatchdog {
    pub fn new(services: Vec<WatchedServiceConfig>) -> Self {
        Self {
            services,
            client: reqwest::Client::builder()
                .timeout(PROBE_TIMEOUT)
                .build()
                .expect("Failed to build HTTP client"),
            down_counts: HashMap::new(),
        }
    }

    /// One GET against the service URL; any 2xx counts as up.
    async fn probe(&self, service: &WatchedServiceConfig) -> bool {
        match self.client.get(&service.url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                trace!("probe of {} failed: {e}", service.name);
                false
            }
        }
    }

    async fn on_probe_result(
        &mut self,
        service: &WatchedServiceConfig,
        up: bool,
        ctx: &ModuleCtx,
    ) -> Result<(), ModuleError> {
        if up {
            self.down_counts.insert(service.name.clone(), 0);

            let resolved = AlertRecord::new(
                "service",
                &service.name,
                AlertType::FaultResolved,
                Severity::Informational,
                format!("service {} is reachable again", service.name),
            )
            .with_specific_info(json!({ "url": service.url }));

            // Suppressed unless a matching fault is open.
            ctx.gate
                .emit(resolved, SERVICE_DOWN_CODE)
                .await
                .map_err(|e| ModuleError::Failed(e.to_string()))?;
            return Ok(());
        }

        let count = self.down_counts.entry(service.name.clone()).or_insert(0);
        *count += 1;
        trace!("{} down ({}/{})", service.name, count, service.grace);

        if *count >= service.grace {
            warn!("service {} is down after {} failed probes", service.name, count);
            let fault = AlertRecord::new(
                "service",
                &service.name,
                AlertType::Fault,
                Severity::Critical,
                format!("service {} is unreachable", service.name),
            )
            .with_specific_info(json!({
                "url": service.url,
                "consecutive_failures": *count,
                "recommendation": "restart service",
            }));

            ctx.gate
                .emit(fault, SERVICE_DOWN_CODE)
                .await
                .map_err(|e| ModuleError::Failed(e.to_string()))?;
        }
        Ok(())
    }

    /// Snapshot of every watched service for query replies.
    fn status_payload(&self) -> serde_json::Value {
        let services: Vec<serde_json::Value> = self
            .services
            .iter()
            .map(|s| {
                let down = self.down_counts.get(&s.name).copied().unwrap_or(0);
                json!({
                    "name": s.name,
                    "url": s.url,
                    "status": if down == 0 { "up" } else { "down" },
                    "consecutive_failures": down,
                })
            })
            .collect();
        json!({ "services": services })
    }
}

#[async_trait]
impl Module for ServiceWatchdog {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    #[instrument(skip_all)]
    async fn tick(&mut self, ctx: &ModuleCtx) -> Result<(), ModuleError> {
        for service in self.services.clone() {
            let up = self.probe(&service).await;
            self.on_probe_result(&service, up, ctx).await?;
        }
        Ok(())
    }

    async fn handle_envelope(
        &mut self,
        envelope: Envelope,
        ctx: &ModuleCtx,
    ) -> Result<(), ModuleError> {
        match &envelope.body {
            EnvelopeBody::SensorRequest { .. } => {
                debug!("answering service status query {}", envelope.message_id);
                let reply = Envelope::reply_to(
                    &envelope,
                    SERVICE_QUERY_TAG,
                    EnvelopeBody::SensorResponse {
                        payload: self.status_payload(),
                    },
                );
                ctx.gate
                    .egress()
                    .send_reply(reply)
                    .await
                    .map_err(|e| ModuleError::TransientIo(e.to_string()))
            }
            other => {
                trace!("ignoring envelope body {other:?}");
                Ok(())
            }
        }
    }
}
