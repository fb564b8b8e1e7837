//! Failure escalation and the thread-controller protocol, driven through
//! the full runtime.

use std::sync::atomic::Ordering;
use std::time::Duration;

use node_sentinel::actors::messages::RecoveryState;
use node_sentinel::envelope::{ThreadAction, ThreadControllerRequest};
use node_sentinel::runtime::ModuleState;
use pretty_assertions::assert_eq;

use super::helpers::{FlakyModule, alert_types, fast_module_config, fast_tuning, spawn_stack};

fn controller_request(module: &str, action: ThreadAction) -> ThreadControllerRequest {
    ThreadControllerRequest {
        module_name: module.to_string(),
        thread_request: action,
    }
}

async fn wait_for_state(
    stack: &super::helpers::TestStack,
    module: &str,
    expected: ModuleState,
) -> bool {
    for _ in 0..100 {
        if stack.runtime.state(module) == Some(expected) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// recovery_count=3, recovery_interval=5s, three failures in well under
/// ten seconds: the module halts, exactly one halted alert goes out, and
/// auto-restart stops until an operator intervenes.
#[tokio::test]
async fn repeated_failures_halt_module_with_single_alert() {
    let mut stack = spawn_stack(fast_tuning());
    let (module, failing, ticks) = FlakyModule::new("NodeHWsensor");
    failing.store(true, Ordering::SeqCst);

    // Short recovery interval so the backoff between failures is fast,
    // while still far longer than the gap between them.
    stack
        .runtime
        .register(module, vec![], fast_module_config(3, Duration::from_millis(50)))
        .unwrap();
    stack.runtime.start_all(stack.recovery.clone()).await.unwrap();

    assert!(wait_for_state(&stack, "NodeHWsensor", ModuleState::Halted).await);

    let snapshot = stack.recovery.record("NodeHWsensor").await.unwrap();
    assert_eq!(snapshot.state, RecoveryState::Halted);

    // Parked: no further ticks happen.
    let ticks_at_halt = ticks.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), ticks_at_halt);

    // Exactly one halted fault, despite three failures.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(alert_types(&stack.bus), vec!["fault"]);
    let sent = stack.bus.sent();
    assert_eq!(
        sent[0]["message"]["sensor_response_type"]["info"]["resource_id"],
        "NodeHWsensor"
    );
    assert_eq!(
        sent[0]["message"]["sensor_response_type"]["specific_info"]["recommendation"],
        "restart service"
    );

    stack.runtime.shutdown().await;
}

#[tokio::test]
async fn restart_command_revives_halted_module() {
    let mut stack = spawn_stack(fast_tuning());
    let (module, failing, ticks) = FlakyModule::new("NodeHWsensor");
    failing.store(true, Ordering::SeqCst);

    stack
        .runtime
        .register(module, vec![], fast_module_config(3, Duration::from_millis(50)))
        .unwrap();
    stack.runtime.start_all(stack.recovery.clone()).await.unwrap();
    assert!(wait_for_state(&stack, "NodeHWsensor", ModuleState::Halted).await);

    let status = stack
        .recovery
        .thread_controller(controller_request("NodeHWsensor", ThreadAction::Status))
        .await
        .unwrap();
    assert_eq!(status.thread_response, "Status: Halted");

    // Let the module succeed after the restart.
    failing.store(false, Ordering::SeqCst);
    let restart = stack
        .recovery
        .thread_controller(controller_request("NodeHWsensor", ThreadAction::Restart))
        .await
        .unwrap();
    assert_eq!(restart.thread_response, "Restart Successful");

    let status = stack
        .recovery
        .thread_controller(controller_request("NodeHWsensor", ThreadAction::Status))
        .await
        .unwrap();
    assert_eq!(status.thread_response, "Status: Running");

    let snapshot = stack.recovery.record("NodeHWsensor").await.unwrap();
    assert_eq!(snapshot.consecutive_failures, 0);
    assert_eq!(snapshot.state, RecoveryState::Healthy);

    // The revived module is actually ticking again.
    let ticks_at_restart = ticks.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(ticks.load(Ordering::SeqCst) > ticks_at_restart);

    stack.runtime.shutdown().await;
}

#[tokio::test]
async fn module_that_recovers_on_its_own_returns_to_healthy() {
    let mut stack = spawn_stack(fast_tuning());
    let (module, failing, _ticks) = FlakyModule::new("NodeHWsensor");
    failing.store(true, Ordering::SeqCst);

    // Generous count: failures degrade but never halt.
    stack
        .runtime
        .register(module, vec![], fast_module_config(50, Duration::from_millis(20)))
        .unwrap();
    stack.runtime.start_all(stack.recovery.clone()).await.unwrap();

    // Wait until at least one failure registered.
    let mut degraded = false;
    for _ in 0..100 {
        if let Some(snapshot) = stack.recovery.record("NodeHWsensor").await {
            if snapshot.state == RecoveryState::Degraded {
                degraded = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(degraded);

    failing.store(false, Ordering::SeqCst);
    let mut healthy = false;
    for _ in 0..100 {
        if let Some(snapshot) = stack.recovery.record("NodeHWsensor").await {
            if snapshot.state == RecoveryState::Healthy && snapshot.consecutive_failures == 0 {
                healthy = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(healthy);

    // Self-recovery never produced a halted alert.
    assert!(alert_types(&stack.bus).is_empty());

    stack.runtime.shutdown().await;
}

#[tokio::test]
async fn stop_command_suspends_module() {
    let mut stack = spawn_stack(fast_tuning());
    let (module, _failing, ticks) = FlakyModule::new("NodeHWsensor");

    stack
        .runtime
        .register(module, vec![], fast_module_config(3, Duration::from_millis(50)))
        .unwrap();
    stack.runtime.start_all(stack.recovery.clone()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stop = stack
        .recovery
        .thread_controller(controller_request("NodeHWsensor", ThreadAction::Stop))
        .await
        .unwrap();
    assert_eq!(stop.thread_response, "Stop Successful");
    assert_eq!(
        stack.runtime.state("NodeHWsensor"),
        Some(ModuleState::Suspended)
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    let at_stop = ticks.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(ticks.load(Ordering::SeqCst) <= at_stop + 1);

    stack.runtime.shutdown().await;
}

#[tokio::test]
async fn status_of_unknown_module_is_explicit() {
    let stack = spawn_stack(fast_tuning());
    let status = stack
        .recovery
        .thread_controller(controller_request("NoSuchModule", ThreadAction::Status))
        .await
        .unwrap();
    assert_eq!(status.thread_response, "Status: Unknown Module");

    let restart = stack
        .recovery
        .thread_controller(controller_request("NoSuchModule", ThreadAction::Restart))
        .await
        .unwrap();
    assert_eq!(restart.thread_response, "Restart Failed");
}
