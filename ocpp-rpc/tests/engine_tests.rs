//! End-to-end tests: a CSMS engine and a station engine wired back to back
//! over the in-memory transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ocpp_rpc::messages::{CallResult, ErrorCode, Message};
use ocpp_rpc::transport::{forward, MemoryTransport, Outbound};
use ocpp_rpc::types::{CostUpdatedRequest, CostUpdatedResponse, SetMonitoringLevelRequest};
use ocpp_rpc::validate::{Field, Shape};
use ocpp_rpc::{profiles, Direction, Dispatcher, Engine, EngineConfig, Feature, HandlerError, Profile, Registry, Role, RpcError};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

fn test_profile() -> Profile {
    Profile::new("Test")
        .feature(Feature::new(
            "Foo",
            Direction::ToStation,
            Shape::new("FooRequest").field(Field::integer("n").required()),
            Shape::new("FooResponse").field(Field::boolean("ok").required()),
        ))
        .feature(Feature::new(
            "Slow",
            Direction::ToStation,
            Shape::new("SlowRequest"),
            Shape::new("SlowResponse"),
        ))
}

fn registry() -> Arc<Registry> {
    let mut all = profiles::all();
    all.push(test_profile());
    Arc::new(Registry::with_profiles(all).unwrap())
}

fn config() -> EngineConfig {
    EngineConfig::default().with_call_timeout(Duration::from_millis(200))
}

/// CSMS and station engines linked in both directions
fn pair(station: Dispatcher) -> (Engine, Engine) {
    let registry = station.registry().clone();
    let (csms_transport, csms_out) = MemoryTransport::new();
    let (station_transport, station_out) = MemoryTransport::new();

    let csms = Engine::new(config(), Dispatcher::new(Role::Csms, registry), csms_transport);
    let station = Engine::new(config(), station, station_transport);

    forward(csms_out, station.clone());
    forward(station_out, csms.clone());
    (csms, station)
}

fn connect(csms: &Engine, station: &Engine, id: &str) {
    csms.on_connected(id);
    station.on_connected(id);
}

/// CSMS engine whose outbound frames are captured instead of delivered
fn captured_csms() -> (Engine, mpsc::UnboundedReceiver<Outbound>) {
    let (transport, out) = MemoryTransport::new();
    let engine = Engine::new(config(), Dispatcher::new(Role::Csms, registry()), transport);
    engine.on_connected("cs-1");
    (engine, out)
}

fn message_id_of(out: &Outbound) -> String {
    Message::parse(&out.frame).unwrap().message_id().to_string()
}

#[tokio::test]
async fn test_end_to_end_foo() {
    let mut station = Dispatcher::new(Role::ChargingStation, registry());
    station
        .on("Foo", |_conn, req| async move {
            assert_eq!(req, json!({"n": 5}));
            Ok(json!({"ok": true}))
        })
        .unwrap();

    let (csms, station) = pair(station);
    connect(&csms, &station, "cs-1");

    let handle = csms.send("cs-1", "Foo", json!({"n": 5})).await.unwrap();
    assert_eq!(handle.connection_id(), "cs-1");
    assert_eq!(handle.await.unwrap(), json!({"ok": true}));

    // Back to idle: a second call goes straight through
    let again = csms.call("cs-1", "Foo", json!({"n": 5})).await.unwrap();
    assert_eq!(again, json!({"ok": true}));
}

#[tokio::test]
async fn test_correlation_across_connections() {
    let mut station = Dispatcher::new(Role::ChargingStation, registry());
    station
        .on("Foo", |conn, req| async move {
            // Answer out of order to shake up any accidental coupling
            let n = req["n"].as_i64().unwrap_or_default();
            tokio::time::sleep(Duration::from_millis((20 - n as u64) * 2)).await;
            assert_eq!(conn, format!("cs-{}", n));
            Ok(json!({"ok": n % 2 == 0, "n": n}))
        })
        .unwrap();

    let (csms, station) = pair(station);
    for n in 0..10 {
        connect(&csms, &station, &format!("cs-{}", n));
    }

    let mut tasks = Vec::new();
    for n in 0..10i64 {
        let csms = csms.clone();
        tasks.push(tokio::spawn(async move {
            let id = format!("cs-{}", n);
            let response = csms.call(&id, "Foo", json!({"n": n})).await.unwrap();
            (n, response)
        }));
    }

    for task in tasks {
        let (n, response) = task.await.unwrap();
        assert_eq!(response["n"], json!(n));
        assert_eq!(response["ok"], json!(n % 2 == 0));
    }
}

#[tokio::test]
async fn test_already_pending_sends_nothing() {
    let (csms, mut out) = captured_csms();

    let first = csms.send("cs-1", "Foo", json!({"n": 1})).await.unwrap();
    assert_eq!(message_id_of(&out.recv().await.unwrap()), first.message_id());

    let err = csms.send("cs-1", "Foo", json!({"n": 2})).await.unwrap_err();
    assert!(matches!(err, RpcError::AlreadyPending(_)));
    assert!(out.try_recv().is_err());

    // Other connections are unaffected
    csms.on_connected("cs-2");
    assert!(csms.send("cs-2", "Foo", json!({"n": 3})).await.is_ok());
}

#[tokio::test]
async fn test_timeout_releases_slot() {
    let (csms, mut out) = captured_csms();

    let handle = csms
        .send_with_timeout("cs-1", "Foo", json!({"n": 1}), Duration::from_millis(30))
        .await
        .unwrap();
    let stale_id = message_id_of(&out.recv().await.unwrap());
    assert!(matches!(handle.await, Err(RpcError::Timeout)));

    let next = csms.send("cs-1", "Foo", json!({"n": 2})).await.unwrap();
    let next_id = message_id_of(&out.recv().await.unwrap());
    assert_ne!(stale_id, next_id);

    // The late reply to the expired call must not resolve the new one
    let late = CallResult::new(stale_id, json!({"ok": false}));
    csms.on_frame_received("cs-1", late.to_bytes().unwrap()).await.unwrap();
    let reply = CallResult::new(next_id, json!({"ok": true}));
    csms.on_frame_received("cs-1", reply.to_bytes().unwrap()).await.unwrap();

    assert_eq!(next.await.unwrap(), json!({"ok": true}));
}

#[tokio::test]
async fn test_unknown_reply_is_discarded() {
    let (csms, mut out) = captured_csms();

    let stray = CallResult::new("not-a-pending-id", json!({"ok": true}));
    csms.on_frame_received("cs-1", stray.to_bytes().unwrap()).await.unwrap();
    csms.on_frame_received("cs-1", b"[3,\"x\"".to_vec()).await.unwrap();

    // Engine still healthy and nothing was answered
    let handle = csms.send("cs-1", "Foo", json!({"n": 1})).await.unwrap();
    let id = message_id_of(&out.recv().await.unwrap());
    assert!(out.try_recv().is_err());

    let reply = CallResult::new(id, json!({"ok": true}));
    csms.on_frame_received("cs-1", reply.to_bytes().unwrap()).await.unwrap();
    assert_eq!(handle.await.unwrap(), json!({"ok": true}));
}

#[tokio::test]
async fn test_cancel_discards_late_reply() {
    let (csms, mut out) = captured_csms();

    let handle = csms.send("cs-1", "Foo", json!({"n": 1})).await.unwrap();
    let cancelled_id = message_id_of(&out.recv().await.unwrap());
    handle.cancel();

    let next = csms.send("cs-1", "Foo", json!({"n": 2})).await.unwrap();
    let next_id = message_id_of(&out.recv().await.unwrap());

    let late = CallResult::new(cancelled_id, json!({"ok": false}));
    csms.on_frame_received("cs-1", late.to_bytes().unwrap()).await.unwrap();
    let reply = CallResult::new(next_id, json!({"ok": true}));
    csms.on_frame_received("cs-1", reply.to_bytes().unwrap()).await.unwrap();

    assert_eq!(next.await.unwrap(), json!({"ok": true}));
}

#[tokio::test]
async fn test_missing_handler_is_not_implemented() {
    let station = Dispatcher::new(Role::ChargingStation, registry());
    let (csms, station) = pair(station);
    connect(&csms, &station, "cs-1");

    let err = csms.call("cs-1", "Foo", json!({"n": 1})).await.unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::NotImplemented);
}

#[tokio::test]
async fn test_inbound_validation_and_role_checks() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut station = Dispatcher::new(Role::ChargingStation, registry());
    {
        let calls = calls.clone();
        station
            .on("Foo", move |_, _| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"ok": true}))
                }
            })
            .unwrap();
    }
    let (transport, mut out) = MemoryTransport::new();
    let station = Engine::new(config(), station, transport);
    station.on_connected("cs-1");

    let cases: [(&[u8], ErrorCode); 5] = [
        (br#"[2,"m1","Foo",{"n":"five"}]"#, ErrorCode::TypeConstraintViolation),
        (br#"[2,"m2","Foo",{}]"#, ErrorCode::OccurrenceConstraintViolation),
        (br#"[2,"m3","Heartbeat",{}]"#, ErrorCode::NotSupported),
        (br#"[2,"m4","Bogus",{}]"#, ErrorCode::NotImplemented),
        (br#"[2,"m5","Foo"]"#, ErrorCode::FormatViolation),
    ];

    for (frame, expected) in cases {
        station.on_frame_received("cs-1", frame.to_vec()).await.unwrap();
        let reply = Message::parse(&out.recv().await.unwrap().frame).unwrap();
        match reply {
            Message::CallError(e) => assert_eq!(e.error_code, expected),
            other => panic!("expected CallError, got {:?}", other),
        }
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    station
        .on_frame_received("cs-1", br#"[7,"m6",{}]"#.to_vec())
        .await
        .unwrap();
    match Message::parse(&out.recv().await.unwrap().frame).unwrap() {
        Message::CallError(e) => assert_eq!(e.error_code, ErrorCode::MessageTypeNotSupported),
        other => panic!("expected CallError, got {:?}", other),
    }
}

#[tokio::test]
async fn test_handler_errors_become_call_errors() {
    let mut station = Dispatcher::new(Role::ChargingStation, registry());
    station
        .on("Foo", |_, req| async move {
            match req["n"].as_i64() {
                Some(0) => Err(HandlerError::new(ErrorCode::SecurityError, "not allowed")
                    .with_details(json!({"hint": "auth"}))),
                Some(1) => Ok(json!({"ok": "not a bool"})),
                _ => panic!("handler blew up"),
            }
        })
        .unwrap();
    let (csms, station) = pair(station);
    connect(&csms, &station, "cs-1");

    match csms.call("cs-1", "Foo", json!({"n": 0})).await {
        Err(RpcError::Remote { code, description, details }) => {
            assert_eq!(code, ErrorCode::SecurityError);
            assert_eq!(description, "not allowed");
            assert_eq!(details, json!({"hint": "auth"}));
        }
        other => panic!("expected remote error, got {:?}", other),
    }

    let err = csms.call("cs-1", "Foo", json!({"n": 1})).await.unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::InternalError);

    let err = csms.call("cs-1", "Foo", json!({"n": 2})).await.unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::InternalError);

    // Connection survives all of it
    assert!(station.is_connected("cs-1"));
}

#[tokio::test]
async fn test_inbound_calls_are_serialized() {
    let gate = Arc::new(Notify::new());
    let mut station = Dispatcher::new(Role::ChargingStation, registry());
    {
        let gate = gate.clone();
        station
            .on("Slow", move |_, _| {
                let gate = gate.clone();
                async move {
                    gate.notified().await;
                    Ok(json!({}))
                }
            })
            .unwrap();
    }
    let (transport, mut out) = MemoryTransport::new();
    let config = config().with_max_queued_calls(1);
    let station = Engine::new(config, station, transport);
    station.on_connected("cs-1");

    for id in ["a", "b", "c"] {
        let frame = format!(r#"[2,"{}","Slow",{{}}]"#, id);
        station.on_frame_received("cs-1", frame.into_bytes()).await.unwrap();
    }

    // "a" is running, "b" is queued, "c" overflowed
    let overflow = Message::parse(&out.recv().await.unwrap().frame).unwrap();
    match overflow {
        Message::CallError(e) => {
            assert_eq!(e.message_id, "c");
            assert_eq!(e.error_code, ErrorCode::RpcFrameworkError);
        }
        other => panic!("expected CallError, got {:?}", other),
    }

    gate.notify_one();
    assert_eq!(Message::parse(&out.recv().await.unwrap().frame).unwrap().message_id(), "a");
    gate.notify_one();
    assert_eq!(Message::parse(&out.recv().await.unwrap().frame).unwrap().message_id(), "b");
}

#[tokio::test]
async fn test_typed_requests_round_trip() {
    let mut station = Dispatcher::new(Role::ChargingStation, registry());
    station
        .on_request(|_, req: CostUpdatedRequest| async move {
            assert_eq!(req.custom_data.as_ref().map(|c| c.vendor_id.as_str()), Some("EK"));
            Ok(CostUpdatedResponse::default())
        })
        .unwrap();
    let (csms, station) = pair(station);
    connect(&csms, &station, "cs-1");

    let mut request = CostUpdatedRequest::new(12.75, "tx-42");
    request.custom_data = Some(ocpp_rpc::CustomData::new("EK").with_value("currency", "EUR"));
    let response = csms.send_request("cs-1", &request).await.unwrap();
    assert_eq!(response, CostUpdatedResponse::default());

    // Outbound validation fails before anything is sent
    let err = csms
        .send_request("cs-1", &SetMonitoringLevelRequest { severity: 12, custom_data: None })
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::ValidationFailed(_)));
}

#[tokio::test]
async fn test_data_transfer_both_ways() {
    let mut station = Dispatcher::new(Role::ChargingStation, registry());
    station
        .on("DataTransfer", |_, req| async move {
            Ok(json!({"status": "Accepted", "data": req["data"].clone()}))
        })
        .unwrap();
    let (csms, station) = pair(station);
    connect(&csms, &station, "cs-1");

    let response: Value = csms
        .call("cs-1", "DataTransfer", json!({"vendorId": "EK", "data": [1, 2, 3]}))
        .await
        .unwrap();
    assert_eq!(response["data"], json!([1, 2, 3]));

    // The CSMS has no handler bound, so the station hears NotImplemented
    let err = station
        .call("cs-1", "DataTransfer", json!({"vendorId": "EK"}))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::NotImplemented);
}
