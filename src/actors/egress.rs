//! EgressActor - delivers outbound alerts to the message bus
//!
//! ## Delivery contract
//!
//! `publish` tries a synchronous bus send bounded by the publish timeout.
//! If the bus is unreachable the alert is persisted to the key/value
//! backlog and the caller gets `AcceptedForRetry` immediately; a caller
//! is never blocked waiting for the bus to recover. A timer drives flush
//! cycles over the backlog; entries older than the message timeout are
//! dropped without a delivery attempt (freshness over completeness: a
//! five-minute-old "disk is still faulted" duplicate is not actionable).
//!
//! ## Ordering
//!
//! Backlog keys embed a zero-padded enqueue timestamp, so the store's
//! sorted prefix scan yields FIFO order. A flush cycle stops at the first
//! send the bus cannot be reached for; delivering later entries past a
//! failed older one would reorder the stream, and an unreachable bus will
//! fail them all anyway. An entry the bus answers for but rejects is
//! skipped instead: the bus is up, the entry itself is the problem, and
//! younger entries must not queue behind it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::{debug, error, instrument, trace, warn};

use crate::bus::{BusError, MessageBus};
use crate::config::SignatureConfig;
use crate::envelope::{Envelope, EnvelopeBody, build_alert_envelope};
use crate::store::{KeyValueStore, StoreResult};
use crate::{AlertRecord, NodeIdentity};

use super::messages::{EgressCommand, EgressStats, FlushReport};

pub use super::messages::PublishOutcome;

const BACKLOG_PREFIX: &str = "backlog/";

/// Timing knobs for the pipeline. Production uses the defaults; tests
/// shrink them.
#[derive(Debug, Clone, Copy)]
pub struct EgressTuning {
    /// Bound on one connect + send against the bus.
    pub publish_timeout: Duration,

    /// How often the backlog flush cycle runs.
    pub flush_interval: Duration,

    /// Backlog entries older than this are dropped unsent.
    pub msg_timeout: Duration,
}

impl Default for EgressTuning {
    fn default() -> Self {
        Self {
            publish_timeout: Duration::from_secs(15),
            flush_interval: Duration::from_secs(30),
            msg_timeout: Duration::from_secs(300),
        }
    }
}

/// A persisted alert awaiting redelivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BacklogEntry {
    alert: AlertRecord,
    enqueue_time: DateTime<Utc>,
    attempt_count: u32,
}

pub struct EgressActor {
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn KeyValueStore>,
    node: NodeIdentity,
    signature: SignatureConfig,
    tuning: EgressTuning,
    command_rx: mpsc::Receiver<EgressCommand>,
    stats: EgressStats,
}

impl EgressActor {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn KeyValueStore>,
        node: NodeIdentity,
        signature: SignatureConfig,
        tuning: EgressTuning,
        command_rx: mpsc::Receiver<EgressCommand>,
    ) -> Self {
        Self {
            bus,
            store,
            node,
            signature,
            tuning,
            command_rx,
            stats: EgressStats::default(),
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting egress actor");

        let mut flush_ticker = time::interval(self.tuning.flush_interval);
        // The first tick fires immediately; skip it so startup does not
        // race tests that stage the backlog first.
        flush_ticker.tick().await;

        let mut shutdown_ack = None;

        loop {
            tokio::select! {
                _ = flush_ticker.tick() => {
                    let report = self.flush_backlog().await;
                    if report.delivered + report.dropped_stale > 0 {
                        debug!(
                            "flush cycle: {} delivered, {} dropped stale, {} remaining",
                            report.delivered, report.dropped_stale, report.remaining
                        );
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        EgressCommand::Publish { alert, respond_to } => {
                            let result = self.publish(alert).await;
                            let _ = respond_to.send(result);
                        }

                        EgressCommand::SendReply { envelope } => {
                            self.send_reply(envelope).await;
                        }

                        EgressCommand::FlushNow { respond_to } => {
                            debug!("received FlushNow command");
                            let report = self.flush_backlog().await;
                            let _ = respond_to.send(report);
                        }

                        EgressCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.stats);
                        }

                        EgressCommand::Shutdown { respond_to } => {
                            debug!("received shutdown command");
                            shutdown_ack = Some(respond_to);
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        // Last chance for backlogged alerts before the process exits.
        let report = self.flush_backlog().await;
        if report.remaining > 0 {
            warn!(
                "shutting down with {} alerts still backlogged",
                report.remaining
            );
        }

        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }

        debug!("egress actor stopped");
    }

    /// Attempt an immediate send; backlog the alert if the bus is down.
    #[instrument(skip(self, alert), fields(alert_id = %alert.alert_id))]
    async fn publish(&mut self, alert: AlertRecord) -> anyhow::Result<PublishOutcome> {
        self.stats.published += 1;

        let envelope = build_alert_envelope(&alert, &self.node, &self.signature);

        match self.try_send(envelope).await {
            Ok(()) => {
                trace!("alert delivered immediately");
                self.stats.delivered_immediate += 1;
                Ok(PublishOutcome::Delivered)
            }
            Err(e) => {
                debug!("immediate delivery failed, backlogging: {e}");
                self.enqueue_backlog(alert).await?;
                self.stats.backlogged += 1;
                Ok(PublishOutcome::AcceptedForRetry)
            }
        }
    }

    /// One bus send bounded by the publish timeout.
    async fn try_send(&self, envelope: serde_json::Value) -> Result<(), BusError> {
        match time::timeout(self.tuning.publish_timeout, self.bus.send(envelope)).await {
            Ok(result) => result,
            Err(_) => Err(BusError::Timeout),
        }
    }

    fn backlog_key(enqueue_time: DateTime<Utc>, alert_id: &str) -> String {
        // Zero-padded millis keep the prefix scan in FIFO order.
        format!(
            "{BACKLOG_PREFIX}{:020}-{alert_id}",
            enqueue_time.timestamp_millis()
        )
    }

    async fn enqueue_backlog(&self, alert: AlertRecord) -> StoreResult<()> {
        let entry = BacklogEntry {
            enqueue_time: Utc::now(),
            attempt_count: 1,
            alert,
        };
        let key = Self::backlog_key(entry.enqueue_time, &entry.alert.alert_id);
        let value = serde_json::to_string(&entry)?;
        self.store.put(&key, &value).await
    }

    /// One flush cycle over the backlog, FIFO.
    async fn flush_backlog(&mut self) -> FlushReport {
        let mut report = FlushReport::default();

        let keys = match self.store.keys_with_prefix(BACKLOG_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                error!("failed to scan backlog: {e}");
                return report;
            }
        };

        let total = keys.len();
        let now = Utc::now();

        for key in keys {
            let mut entry = match self.load_entry(&key).await {
                Some(entry) => entry,
                None => continue,
            };

            let age = (now - entry.enqueue_time)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if age > self.tuning.msg_timeout {
                debug!(
                    "dropping stale backlog entry {} (age {:?})",
                    entry.alert.alert_id, age
                );
                if let Err(e) = self.store.delete(&key).await {
                    error!("failed to drop stale backlog entry: {e}");
                }
                report.dropped_stale += 1;
                self.stats.dropped_stale += 1;
                continue;
            }

            let envelope = build_alert_envelope(&entry.alert, &self.node, &self.signature);
            match self.try_send(envelope).await {
                Ok(()) => {
                    if let Err(e) = self.store.delete(&key).await {
                        error!("failed to remove delivered backlog entry: {e}");
                    }
                    report.delivered += 1;
                    self.stats.flushed += 1;
                }
                Err(e) => {
                    trace!("backlog delivery still failing: {e}");
                    entry.attempt_count += 1;
                    match serde_json::to_string(&entry) {
                        Ok(value) => {
                            if let Err(e) = self.store.put(&key, &value).await {
                                error!("failed to update backlog attempt count: {e}");
                            }
                        }
                        Err(e) => error!("failed to serialize backlog entry: {e}"),
                    }
                    match e {
                        // The bus is up but refuses this entry; it must not
                        // wedge younger entries behind it until it goes
                        // stale.
                        BusError::Rejected { status } => {
                            warn!(
                                "bus rejected backlog entry {} (status {status})",
                                entry.alert.alert_id
                            );
                        }
                        // Bus is still down; stop here to keep FIFO order.
                        BusError::Unreachable(_) | BusError::Timeout => break,
                    }
                }
            }
        }

        report.remaining = total - report.delivered - report.dropped_stale;
        report
    }

    async fn load_entry(&self, key: &str) -> Option<BacklogEntry> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                error!("failed to read backlog entry {key}: {e}");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                // Unparseable entries would wedge the queue forever.
                error!("discarding corrupt backlog entry {key}: {e}");
                let _ = self.store.delete(key).await;
                None
            }
        }
    }

    /// Best-effort delivery of a correlated reply envelope.
    async fn send_reply(&self, envelope: Envelope) {
        let payload = reply_payload(&envelope);
        if let Err(e) = self.try_send(payload).await {
            warn!(
                "dropping undeliverable reply (correlation {:?}): {e}",
                envelope.correlation_id
            );
        }
    }
}

/// Wire form of a reply envelope flowing back to the requester.
fn reply_payload(envelope: &Envelope) -> serde_json::Value {
    let message = match &envelope.body {
        EnvelopeBody::ThreadControllerResponse(response) => json!({
            "actuator_response_type": { "thread_controller": response }
        }),
        EnvelopeBody::SensorResponse { payload } => json!({
            "sensor_response_type": payload
        }),
        EnvelopeBody::Error { reason } => json!({ "error": reason }),
        other => serde_json::to_value(other).unwrap_or(serde_json::Value::Null),
    };

    json!({
        "header": envelope.header(),
        "correlation_id": envelope.correlation_id,
        "message": message,
    })
}

/// Handle for controlling the EgressActor
///
/// Cloneable; every monitoring module holds one.
#[derive(Clone)]
pub struct EgressHandle {
    sender: mpsc::Sender<EgressCommand>,
}

impl EgressHandle {
    /// Spawn the egress actor with default timing.
    pub fn spawn(
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn KeyValueStore>,
        node: NodeIdentity,
        signature: SignatureConfig,
    ) -> Self {
        Self::spawn_with_tuning(bus, store, node, signature, EgressTuning::default())
    }

    pub fn spawn_with_tuning(
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn KeyValueStore>,
        node: NodeIdentity,
        signature: SignatureConfig,
        tuning: EgressTuning,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let actor = EgressActor::new(bus, store, node, signature, tuning, cmd_rx);
        tokio::spawn(actor.run());
        Self { sender: cmd_tx }
    }

    /// Deliver an alert. Returns once the immediate attempt resolved:
    /// either the bus confirmed it or it is safely backlogged.
    pub async fn publish(&self, alert: AlertRecord) -> anyhow::Result<PublishOutcome> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EgressCommand::Publish {
                alert,
                respond_to: tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("egress actor is gone"))?;
        rx.await.map_err(|_| anyhow::anyhow!("egress actor dropped the request"))?
    }

    /// Queue a correlated reply for delivery; does not wait for the bus.
    pub async fn send_reply(&self, envelope: Envelope) -> anyhow::Result<()> {
        self.sender
            .send(EgressCommand::SendReply { envelope })
            .await
            .map_err(|_| anyhow::anyhow!("egress actor is gone"))
    }

    /// Trigger a flush cycle immediately and wait for its report.
    pub async fn flush_now(&self) -> anyhow::Result<FlushReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EgressCommand::FlushNow { respond_to: tx })
            .await
            .map_err(|_| anyhow::anyhow!("egress actor is gone"))?;
        rx.await.map_err(|_| anyhow::anyhow!("egress actor dropped the request"))
    }

    pub async fn stats(&self) -> anyhow::Result<EgressStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EgressCommand::GetStats { respond_to: tx })
            .await
            .map_err(|_| anyhow::anyhow!("egress actor is gone"))?;
        rx.await.map_err(|_| anyhow::anyhow!("egress actor dropped the request"))
    }

    /// Shut the pipeline down and wait for its final flush to finish.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(EgressCommand::Shutdown { respond_to: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}
