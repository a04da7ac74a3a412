//! Request/response integration tests
//!
//! Calls against the in-memory transport: success, typed results, remote
//! errors, timeouts, cancellation, out-of-order settlement and frames the
//! client cannot interpret.

mod common;

use common::{
    builder, connect, echo_responder, mock_error_response, mock_response, wait_for_event,
    MockTransport,
};
use devlink_client::{ConnectionEvent, ConnectionState};
use devlink_core::{Error, ErrorCode};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct ParameterUpdate {
    camera: u32,
    iso: u32,
}

#[tokio::test]
async fn test_ping_returns_pong() {
    let transport = MockTransport::with_responder(echo_responder);
    let manager = connect(builder(transport.clone())).await;

    let result: String = manager.call("ping", ()).await.unwrap();
    assert_eq!(result, "pong");

    let requests = transport.sent_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["jsonrpc"], "2.0");
    assert_eq!(requests[0]["method"], "ping");
    assert_eq!(requests[0]["id"], 1);
    assert!(requests[0].get("params").is_none());
}

#[tokio::test]
async fn test_typed_params_and_result() {
    let transport = MockTransport::with_responder(echo_responder);
    let manager = connect(builder(transport)).await;

    let update = ParameterUpdate { camera: 2, iso: 800 };
    let echoed: ParameterUpdate = manager.call("set_parameter", &update).await.unwrap();
    assert_eq!(echoed, update);
}

#[tokio::test]
async fn test_result_of_wrong_shape_is_serialization_error() {
    let transport = MockTransport::with_responder(echo_responder);
    let manager = connect(builder(transport)).await;

    let result: Result<ParameterUpdate, _> = manager.call("ping", ()).await;
    assert!(matches!(result, Err(Error::Serialization(_))));
}

#[tokio::test]
async fn test_remote_error_is_surfaced() {
    let transport = MockTransport::with_responder(|request| {
        let id = request["id"].as_u64()?;
        Some(mock_error_response(id, -32004, "camera is already recording"))
    });
    let manager = connect(builder(transport)).await;

    let result = manager
        .call_value("start_recording", json!({"camera": 1}))
        .await;
    match result {
        Err(Error::Remote(error)) => {
            assert_eq!(error.code, -32004);
            assert_eq!(error.kind(), ErrorCode::ResourceConflict);
            assert_eq!(error.message, "camera is already recording");
        }
        other => panic!("expected remote error, got {:?}", other),
    }

    // The session is unaffected.
    assert_eq!(manager.status(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_call_times_out() {
    let transport = MockTransport::new();
    let manager = connect(builder(transport)).await;

    let started = Instant::now();
    let result: Result<Value, _> = manager
        .call_with_timeout("format_storage", (), Duration::from_millis(100))
        .await;

    match result {
        Err(Error::CallTimeout { method, timeout }) => {
            assert_eq!(method, "format_storage");
            assert_eq!(timeout, Duration::from_millis(100));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(manager.pending_calls(), 0);
    assert_eq!(manager.status(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_unbounded_timeout_is_accepted() {
    let transport = MockTransport::with_responder(echo_responder);
    let manager = connect(builder(transport).call_timeout(Duration::MAX)).await;

    let pong: String = manager.call("ping", ()).await.unwrap();
    assert_eq!(pong, "pong");

    let list: Value = tokio::spawn({
        let manager = manager.clone();
        async move {
            manager
                .call_with_timeout::<_, Value>("get_list", json!({"kind": "camera"}), Duration::MAX)
                .await
        }
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(list, json!({"kind": "camera"}));
}

#[tokio::test]
async fn test_call_while_disconnected_fails_fast() {
    let transport = MockTransport::new();
    let manager = builder(transport.clone()).build().unwrap();

    let result: Result<Value, _> = manager.call("ping", ()).await;
    assert!(matches!(result, Err(Error::TransportUnavailable(_))));
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_out_of_order_responses_reach_their_callers() {
    let transport = MockTransport::new();
    let manager = connect(builder(transport.clone())).await;

    let handles: Vec<_> = (0..50)
        .map(|n| manager.start_call("get_status", json!({ "n": n })).unwrap())
        .collect();
    assert_eq!(manager.pending_calls(), 50);

    let mut order: Vec<u64> = handles.iter().map(|handle| handle.id()).collect();
    order.shuffle(&mut rand::thread_rng());
    for id in order {
        transport.emit(mock_response(id, json!(id * 10)));
    }

    for handle in handles {
        let id = handle.id();
        let result = handle.wait().await.unwrap();
        assert_eq!(result, json!(id * 10));
    }
    assert_eq!(manager.pending_calls(), 0);
}

#[tokio::test]
async fn test_cancelled_call_ignores_late_response() {
    let transport = MockTransport::new();
    let manager = connect(builder(transport.clone())).await;

    let handle = manager
        .start_call("start_recording", json!({"camera": 1}))
        .unwrap();
    let cancelled_id = handle.id();
    handle.cancel();
    assert_eq!(manager.pending_calls(), 0);

    // Late response is dropped; nothing extra goes on the wire.
    transport.emit(mock_response(cancelled_id, json!("started")));
    assert_eq!(transport.sent().len(), 1);

    let next = manager.start_call("get_status", ()).unwrap();
    assert_eq!(next.id(), cancelled_id + 1);
    transport.emit(mock_response(next.id(), json!({"recording": true})));
    assert_eq!(next.wait().await.unwrap(), json!({"recording": true}));
}

#[tokio::test]
async fn test_pending_call_fails_when_channel_closes() {
    let transport = MockTransport::new();
    let manager = connect(builder(transport.clone())).await;

    let handle = manager.start_call("get_device_list", ()).unwrap();
    transport.drop_connection();

    assert!(matches!(handle.wait().await, Err(Error::ConnectionLost)));
}

#[tokio::test]
async fn test_malformed_frames_keep_the_session() {
    let transport = MockTransport::with_responder(echo_responder);
    let manager = connect(builder(transport.clone())).await;
    let mut events = manager.events();

    transport.emit("this is not json");
    let event = wait_for_event(&mut events, |e| {
        matches!(e, ConnectionEvent::ProtocolError { .. })
    })
    .await;
    assert!(matches!(event, ConnectionEvent::ProtocolError { .. }));

    transport.emit(r#"{"jsonrpc":"2.0","result":1}"#);
    wait_for_event(&mut events, |e| {
        matches!(e, ConnectionEvent::ProtocolError { .. })
    })
    .await;

    // Response for an id nobody is waiting on is ignored quietly.
    transport.emit(mock_response(999, json!(null)));

    let pong: String = manager.call("ping", ()).await.unwrap();
    assert_eq!(pong, "pong");
    assert_eq!(manager.status(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_authenticate_sends_token() {
    let transport = MockTransport::with_responder(|request| {
        let id = request["id"].as_u64()?;
        let ok = request["params"]["token"] == "secret-token";
        Some(mock_response(id, json!({ "authenticated": ok })))
    });
    let manager = connect(builder(transport.clone())).await;

    let result = manager.authenticate("secret-token").await.unwrap();
    assert_eq!(result, json!({"authenticated": true}));
    assert_eq!(transport.sent_methods(), vec!["authenticate"]);
}
