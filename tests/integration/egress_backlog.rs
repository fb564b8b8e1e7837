//! Backlog behavior of the egress pipeline: persistence while the bus is
//! down, FIFO redelivery, and the staleness drop policy.

use std::time::Duration;

use node_sentinel::actors::egress::{EgressHandle, EgressTuning, PublishOutcome};
use node_sentinel::config::SignatureConfig;
use node_sentinel::store::MemoryStore;
use node_sentinel::{AlertRecord, AlertType, NodeIdentity, Severity};
use pretty_assertions::assert_eq;
use std::sync::Arc;

use super::helpers::{ToggleBus, fast_tuning};

fn spawn_egress(bus: Arc<ToggleBus>, tuning: EgressTuning) -> EgressHandle {
    EgressHandle::spawn_with_tuning(
        bus,
        Arc::new(MemoryStore::new()),
        NodeIdentity::default(),
        SignatureConfig::default(),
        tuning,
    )
}

fn alert(resource_id: &str) -> AlertRecord {
    AlertRecord::new(
        "drive",
        resource_id,
        AlertType::Fault,
        Severity::Critical,
        format!("{resource_id} unresponsive"),
    )
}

#[tokio::test]
async fn publish_while_down_backlogs_then_flush_delivers() {
    let bus = Arc::new(ToggleBus::new(true));
    let egress = spawn_egress(bus.clone(), fast_tuning());

    let outcome = egress.publish(alert("disk-0")).await.unwrap();
    assert_eq!(outcome, PublishOutcome::AcceptedForRetry);

    let stats = egress.stats().await.unwrap();
    assert_eq!(stats.backlogged, 1);
    assert_eq!(bus.sent_count(), 0);

    // Bus still down: the flush cycle leaves the entry for next time.
    let report = egress.flush_now().await.unwrap();
    assert_eq!(report.delivered, 0);
    assert_eq!(report.remaining, 1);

    bus.set_down(false);
    let report = egress.flush_now().await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.remaining, 0);
    assert_eq!(bus.sent_count(), 1);

    // Nothing left to deliver.
    let report = egress.flush_now().await.unwrap();
    assert_eq!(report.delivered, 0);
    assert_eq!(report.remaining, 0);
}

#[tokio::test]
async fn backlog_flushes_in_enqueue_order() {
    let bus = Arc::new(ToggleBus::new(true));
    let egress = spawn_egress(bus.clone(), fast_tuning());

    for id in ["disk-a", "disk-b", "disk-c"] {
        let outcome = egress.publish(alert(id)).await.unwrap();
        assert_eq!(outcome, PublishOutcome::AcceptedForRetry);
        // Distinct enqueue timestamps keep the order observable.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    bus.set_down(false);
    let report = egress.flush_now().await.unwrap();
    assert_eq!(report.delivered, 3);

    let resource_ids: Vec<String> = bus
        .sent()
        .iter()
        .map(|v| {
            v["message"]["sensor_response_type"]["info"]["resource_id"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(resource_ids, vec!["disk-a", "disk-b", "disk-c"]);
}

#[tokio::test]
async fn stale_entries_dropped_without_delivery_attempt() {
    let bus = Arc::new(ToggleBus::new(true));
    let mut tuning = fast_tuning();
    tuning.msg_timeout = Duration::from_millis(50);
    let egress = spawn_egress(bus.clone(), tuning);

    egress.publish(alert("disk-old")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    bus.set_down(false);
    let report = egress.flush_now().await.unwrap();
    assert_eq!(report.dropped_stale, 1);
    assert_eq!(report.delivered, 0);
    assert_eq!(report.remaining, 0);
    // Dropped means dropped: the bus never saw it.
    assert_eq!(bus.sent_count(), 0);
}

#[tokio::test]
async fn delivered_and_backlogged_alerts_share_one_envelope_shape() {
    let bus = Arc::new(ToggleBus::new(true));
    let egress = spawn_egress(bus.clone(), fast_tuning());

    egress.publish(alert("disk-late")).await.unwrap();
    bus.set_down(false);
    egress.publish(alert("disk-now")).await.unwrap();
    egress.flush_now().await.unwrap();

    let sent = bus.sent();
    assert_eq!(sent.len(), 2);
    for envelope in &sent {
        assert_eq!(envelope["message"]["header"]["schema_version"], "1.0");
        assert_eq!(
            envelope["message"]["sensor_response_type"]["alert_type"],
            "fault"
        );
    }
}
