//! Runtime lifecycle: mailbox-driven wake-ups, the dedup gate under real
//! module traffic, and cooperative shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use node_sentinel::envelope::{Envelope, EnvelopeBody};
use node_sentinel::runtime::{Module, ModuleCtx, ModuleError, ModuleState};
use node_sentinel::{AlertRecord, AlertType, Severity};
use pretty_assertions::assert_eq;

use super::helpers::{FlakyModule, alert_types, fast_module_config, fast_tuning, spawn_stack};

/// Module that emits a fault alert for a fixed resource on request.
struct FaultEmitter {
    emitted: Arc<AtomicU32>,
}

#[async_trait]
impl Module for FaultEmitter {
    fn name(&self) -> &str {
        "FaultEmitter"
    }

    async fn tick(&mut self, _ctx: &ModuleCtx) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn handle_envelope(
        &mut self,
        _envelope: Envelope,
        ctx: &ModuleCtx,
    ) -> Result<(), ModuleError> {
        let alert = AlertRecord::new(
            "drive",
            "disk-7",
            AlertType::Fault,
            Severity::Critical,
            "SMART failure predicted",
        );
        ctx.gate
            .emit(alert, "smart_failure")
            .await
            .map_err(|e| ModuleError::Failed(e.to_string()))?;
        self.emitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn poke(destination: &str) -> Envelope {
    Envelope::request(
        "poke",
        destination,
        EnvelopeBody::SensorRequest {
            payload: serde_json::json!({}),
        },
    )
}

#[tokio::test]
async fn mailbox_wakes_module_and_dedup_gates_repeat_faults() {
    let mut stack = spawn_stack(fast_tuning());
    let emitted = Arc::new(AtomicU32::new(0));
    let module = Box::new(FaultEmitter {
        emitted: emitted.clone(),
    });

    let mut config = fast_module_config(3, Duration::from_millis(50));
    // Slow ticker: envelope handling is what drives this test.
    config.polling_interval = Duration::from_secs(60);

    stack.runtime.register(module, vec![], config).unwrap();
    stack.runtime.start_all(stack.recovery.clone()).await.unwrap();

    for _ in 0..3 {
        stack.mailboxes.send("FaultEmitter", poke("FaultEmitter")).unwrap();
    }

    for _ in 0..100 {
        if emitted.load(Ordering::SeqCst) == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(emitted.load(Ordering::SeqCst), 3);

    // Three emission attempts for the same open fault: one alert.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(alert_types(&stack.bus), vec!["fault"]);

    stack.runtime.shutdown().await;
}

#[tokio::test]
async fn shutdown_is_observed_by_all_modules() {
    let mut stack = spawn_stack(fast_tuning());

    for name in ["mod-a", "mod-b", "mod-c"] {
        let (module, _failing, _ticks) = FlakyModule::new(name);
        stack
            .runtime
            .register(module, vec![], fast_module_config(3, Duration::from_millis(50)))
            .unwrap();
    }
    stack.runtime.start_all(stack.recovery.clone()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    stack.runtime.shutdown().await;
    for name in ["mod-a", "mod-b", "mod-c"] {
        assert_eq!(stack.runtime.state(name), Some(ModuleState::Shutdown));
    }
}

#[tokio::test]
async fn dependent_modules_start_after_their_dependency() {
    let mut stack = spawn_stack(fast_tuning());

    let (base, _, base_ticks) = FlakyModule::new("base");
    let (dependent, _, dep_ticks) = FlakyModule::new("dependent");

    stack
        .runtime
        .register(base, vec![], fast_module_config(3, Duration::from_millis(50)))
        .unwrap();
    stack
        .runtime
        .register(
            dependent,
            vec!["base".to_string()],
            fast_module_config(3, Duration::from_millis(50)),
        )
        .unwrap();

    stack.runtime.start_all(stack.recovery.clone()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Both run; registration order with an unknown dependency would have
    // failed at register time already.
    assert!(base_ticks.load(Ordering::SeqCst) >= 1);
    assert!(dep_ticks.load(Ordering::SeqCst) >= 1);

    stack.runtime.shutdown().await;
}
