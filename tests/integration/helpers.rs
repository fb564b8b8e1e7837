//! Helper fixtures for integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use node_sentinel::NodeIdentity;
use node_sentinel::actors::egress::{EgressHandle, EgressTuning};
use node_sentinel::actors::recovery::{RECOVERY_MODULE, RecoveryHandle};
use node_sentinel::bus::{BusError, MessageBus};
use node_sentinel::config::{CommonConfig, ResolvedModuleConfig, SignatureConfig};
use node_sentinel::dedup::{AlertGate, DedupStore};
use node_sentinel::mailbox::MailboxRegistry;
use node_sentinel::runtime::{Module, ModuleCtx, ModuleError, ModuleRuntime};
use node_sentinel::store::MemoryStore;

/// Bus double whose reachability can be flipped mid-test. Records every
/// payload it accepted.
pub struct ToggleBus {
    down: AtomicBool,
    sent: Mutex<Vec<serde_json::Value>>,
}

impl ToggleBus {
    pub fn new(down: bool) -> Self {
        Self {
            down: AtomicBool::new(down),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<serde_json::Value> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageBus for ToggleBus {
    async fn send(&self, payload: serde_json::Value) -> Result<(), BusError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(BusError::Unreachable("test bus is down".to_string()));
        }
        self.sent.lock().unwrap().push(payload);
        Ok(())
    }
}

/// Fully wired daemon core against a [`ToggleBus`].
pub struct TestStack {
    pub mailboxes: MailboxRegistry,
    pub bus: Arc<ToggleBus>,
    pub egress: EgressHandle,
    pub gate: AlertGate,
    pub runtime: ModuleRuntime,
    pub recovery: RecoveryHandle,
}

pub fn fast_tuning() -> EgressTuning {
    EgressTuning {
        publish_timeout: Duration::from_millis(200),
        // Long enough that tests drive flushes explicitly via flush_now.
        flush_interval: Duration::from_secs(60),
        msg_timeout: Duration::from_secs(300),
    }
}

pub fn spawn_stack(tuning: EgressTuning) -> TestStack {
    let mailboxes = MailboxRegistry::new();
    let bus = Arc::new(ToggleBus::new(false));
    let store = Arc::new(MemoryStore::new());

    let egress = EgressHandle::spawn_with_tuning(
        bus.clone(),
        store.clone(),
        NodeIdentity::default(),
        SignatureConfig::default(),
        tuning,
    );
    let gate = AlertGate::new(DedupStore::new(store), egress.clone());

    let runtime = ModuleRuntime::new(mailboxes.clone(), gate.clone())
        .with_shutdown_timeout(Duration::from_millis(500));

    let recovery_rx = mailboxes.register(RECOVERY_MODULE).unwrap();
    let recovery = RecoveryHandle::spawn(
        runtime.controller(),
        gate.clone(),
        egress.clone(),
        recovery_rx,
    );

    TestStack {
        mailboxes,
        bus,
        egress,
        gate,
        runtime,
        recovery,
    }
}

/// Module whose tick outcome is controlled by a shared flag.
pub struct FlakyModule {
    name: String,
    failing: Arc<AtomicBool>,
    ticks: Arc<AtomicU32>,
}

impl FlakyModule {
    pub fn new(name: &str) -> (Box<Self>, Arc<AtomicBool>, Arc<AtomicU32>) {
        let failing = Arc::new(AtomicBool::new(false));
        let ticks = Arc::new(AtomicU32::new(0));
        (
            Box::new(Self {
                name: name.to_string(),
                failing: failing.clone(),
                ticks: ticks.clone(),
            }),
            failing,
            ticks,
        )
    }
}

#[async_trait]
impl Module for FlakyModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn tick(&mut self, _ctx: &ModuleCtx) -> Result<(), ModuleError> {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(ModuleError::TransientIo("probe timed out".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Module config with a fast polling interval for tests.
pub fn fast_module_config(recovery_count: u32, recovery_interval: Duration) -> ResolvedModuleConfig {
    let mut config = ResolvedModuleConfig::resolve(&CommonConfig::default(), None);
    config.polling_interval = Duration::from_millis(20);
    config.recovery_count = recovery_count;
    config.recovery_interval = recovery_interval;
    config
}

/// Alert types of everything the bus accepted, in arrival order.
pub fn alert_types(bus: &ToggleBus) -> Vec<String> {
    bus.sent()
        .iter()
        .filter_map(|v| {
            v["message"]["sensor_response_type"]["alert_type"]
                .as_str()
                .map(str::to_string)
        })
        .collect()
}
