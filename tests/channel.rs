mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use dropbridge::clock::{Clock, ManualClock};
use dropbridge::domains::correlation::CorrelationId;
use dropbridge::domains::envelope::{Envelope, ResponseEnvelope};
use dropbridge::domains::mailbox::MailboxDirs;
use dropbridge::error::{DropBridgeError, TransportError};
use dropbridge::interfaces::transport::FileTransport;
use dropbridge::providers::memory::MemoryTransport;
use dropbridge::services::channel::RequestChannel;

use common::FaultyTransport;

fn manual_channel(transport: Arc<dyn FileTransport>, clock: Arc<ManualClock>) -> RequestChannel {
    RequestChannel::new(transport.clone(), transport, MailboxDirs::default())
        .with_poll_interval(Duration::from_millis(100))
        .with_clock(clock)
}

fn fixed_id(raw: &str) -> CorrelationId {
    raw.parse().unwrap()
}

#[tokio::test]
async fn call_times_out_and_leaves_request_behind() {
    let transport = Arc::new(MemoryTransport::new());
    let clock = Arc::new(ManualClock::new(0));
    let channel = manual_channel(transport.clone(), clock.clone());

    let envelope = Envelope::new("GET", "/users/1").with_id(fixed_id("t1"));
    let err = channel
        .call(envelope, Duration::from_millis(1_000))
        .await
        .unwrap_err();

    match err {
        DropBridgeError::Timeout { id, elapsed } => {
            assert_eq!(id, "t1");
            assert!(elapsed >= Duration::from_millis(1_000));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    // Sleeps are clamped to the remaining time, so the wait never overshoots.
    assert_eq!(clock.now(), Duration::from_millis(1_000));
    assert!(transport.contains("requests/request_t1.json").await);
}

#[tokio::test]
async fn assigns_an_id_when_missing() {
    let transport = Arc::new(MemoryTransport::new());
    let clock = Arc::new(ManualClock::new(0));
    let channel = manual_channel(transport.clone(), clock);

    let err = channel
        .call(Envelope::new("GET", "/users/1"), Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    let names = transport
        .list("requests", "request_*.json")
        .await
        .unwrap();
    assert_eq!(names.len(), 1);
    let bytes = transport
        .get(&format!("requests/{}", names[0]))
        .await
        .unwrap();
    let sent = Envelope::decode(&bytes).unwrap();
    let id = sent.id.unwrap();
    assert_eq!(names[0], format!("request_{id}.json"));
    assert_eq!(id.as_str().len(), 32);
}

#[tokio::test]
async fn returns_matching_response_and_consumes_it() {
    let transport = Arc::new(MemoryTransport::new());
    let clock = Arc::new(ManualClock::new(0));
    let channel = manual_channel(transport.clone(), clock.clone());

    let reply = ResponseEnvelope::new(fixed_id("r1"), 200, json!({"ok": true}), 5);
    transport
        .put("responses/response_r1.json", reply.encode().unwrap())
        .await
        .unwrap();

    let envelope = Envelope::new("GET", "/users/1").with_id(fixed_id("r1"));
    let response = channel
        .call(envelope, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(response, reply);
    assert!(!transport.contains("responses/response_r1.json").await);
    assert_eq!(clock.now(), Duration::from_millis(100));
}

#[tokio::test]
async fn response_with_foreign_id_is_rejected() {
    let transport = Arc::new(MemoryTransport::new());
    let clock = Arc::new(ManualClock::new(0));
    let channel = manual_channel(transport.clone(), clock);

    let foreign = ResponseEnvelope::new(fixed_id("other"), 200, json!({}), 5);
    transport
        .put("responses/response_mine.json", foreign.encode().unwrap())
        .await
        .unwrap();

    let envelope = Envelope::new("GET", "/x").with_id(fixed_id("mine"));
    let err = channel
        .call(envelope, Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, DropBridgeError::Protocol(_)));
}

#[tokio::test]
async fn transport_failure_while_polling_fails_fast() {
    let transport = Arc::new(FaultyTransport::new());
    transport.fail_gets(true);
    let clock = Arc::new(ManualClock::new(0));
    let channel = manual_channel(transport.clone(), clock.clone());

    let err = channel
        .call(Envelope::new("GET", "/x"), Duration::from_secs(30))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DropBridgeError::Transport(TransportError::Network(_))
    ));
    assert_eq!(clock.now(), Duration::from_millis(100));
}

#[tokio::test]
async fn unreadable_response_is_reported_at_deadline() {
    let transport = Arc::new(MemoryTransport::new());
    let clock = Arc::new(ManualClock::new(0));
    let channel = manual_channel(transport.clone(), clock.clone());

    transport
        .put("responses/response_g1.json", b"{\"id\":".to_vec())
        .await
        .unwrap();

    let envelope = Envelope::new("GET", "/x").with_id(fixed_id("g1"));
    let err = channel
        .call(envelope, Duration::from_millis(500))
        .await
        .unwrap_err();
    assert!(matches!(err, DropBridgeError::Protocol(_)));
    assert_eq!(clock.now(), Duration::from_millis(500));
}

#[tokio::test]
async fn path_traversal_ids_cannot_be_built_or_decoded() {
    let err = "../../etc".parse::<CorrelationId>().unwrap_err();
    assert!(matches!(err, DropBridgeError::Protocol(_)));

    let err = Envelope::decode(br#"{"id":"../x","method":"GET","path":"/x","createdAt":1}"#)
        .unwrap_err();
    assert!(matches!(err, DropBridgeError::Protocol(_)));
    let err = ResponseEnvelope::decode(br#"{"id":"a/b","status":200,"body":null,"timestamp":1}"#)
        .unwrap_err();
    assert!(matches!(err, DropBridgeError::Protocol(_)));
}
