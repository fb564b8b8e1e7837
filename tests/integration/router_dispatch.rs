//! End-to-end ingress routing: envelopes in, correlated replies out
//! through the egress pipeline.

use std::time::Duration;

use node_sentinel::actors::recovery::RECOVERY_MODULE;
use node_sentinel::envelope::{
    Envelope, EnvelopeBody, THREAD_CONTROLLER_TAG, ThreadAction, ThreadControllerRequest,
};
use node_sentinel::router::{IngressRouter, RouterError};
use pretty_assertions::assert_eq;

use super::helpers::{FlakyModule, fast_module_config, fast_tuning, spawn_stack};

fn thread_controller_envelope(module: &str, action: ThreadAction) -> Envelope {
    Envelope::request(
        THREAD_CONTROLLER_TAG,
        RECOVERY_MODULE,
        EnvelopeBody::ThreadControllerRequest(ThreadControllerRequest {
            module_name: module.to_string(),
            thread_request: action,
        }),
    )
}

#[tokio::test]
async fn status_request_round_trips_through_router_and_egress() {
    let mut stack = spawn_stack(fast_tuning());
    let (module, _failing, _ticks) = FlakyModule::new("NodeHWsensor");
    stack
        .runtime
        .register(module, vec![], fast_module_config(3, Duration::from_millis(50)))
        .unwrap();
    stack.runtime.start_all(stack.recovery.clone()).await.unwrap();

    let mut router = IngressRouter::new(stack.mailboxes.clone(), stack.egress.clone());
    router.add_route(THREAD_CONTROLLER_TAG, RECOVERY_MODULE).unwrap();

    let request = thread_controller_envelope("NodeHWsensor", ThreadAction::Status);
    let request_id = request.message_id;
    router.dispatch(request).await.unwrap();

    // The supervisor answers asynchronously through egress.
    let mut reply = None;
    for _ in 0..50 {
        if let Some(payload) = stack.bus.sent().first().cloned() {
            reply = Some(payload);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let reply = reply.expect("no reply reached the bus");
    assert_eq!(reply["correlation_id"], request_id.to_string());
    let response = &reply["message"]["actuator_response_type"]["thread_controller"];
    assert_eq!(response["module_name"], "NodeHWsensor");
    assert_eq!(response["thread_response"], "Status: Running");

    stack.runtime.shutdown().await;
}

#[tokio::test]
async fn unknown_type_tag_is_rejected_with_error_reply() {
    let stack = spawn_stack(fast_tuning());
    let router = IngressRouter::new(stack.mailboxes.clone(), stack.egress.clone());

    let envelope = Envelope::request(
        "no_such_tag",
        "",
        EnvelopeBody::SensorRequest {
            payload: serde_json::json!({}),
        },
    );
    let id = envelope.message_id;

    let result = router.dispatch(envelope).await;
    assert!(matches!(result, Err(RouterError::UnknownTag(_))));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let sent = stack.bus.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["correlation_id"], id.to_string());
    assert!(sent[0]["message"]["error"].is_string());
}

#[tokio::test]
async fn dispatch_is_fifo_per_module() {
    let stack = spawn_stack(fast_tuning());
    let mut inbox = stack.mailboxes.register("hw").unwrap();

    let mut router = IngressRouter::new(stack.mailboxes.clone(), stack.egress.clone());
    router.add_route("hw_query", "hw").unwrap();

    let mut ids = Vec::new();
    for i in 0..10 {
        let envelope = Envelope::request(
            "hw_query",
            "hw",
            EnvelopeBody::SensorRequest {
                payload: serde_json::json!({ "seq": i }),
            },
        );
        ids.push(envelope.message_id);
        router.dispatch(envelope).await.unwrap();
    }

    for expected in ids {
        let received = inbox.recv().await.unwrap();
        assert_eq!(received.message_id, expected);
    }
}
