use std::sync::Arc;
use std::time::Duration;

use agora_client_core::channel::{ChannelKey, EventKind};
use agora_client_core::config::ReconnectPolicy;
use agora_client_core::events::{BusEvent, EventBus, SessionEvent};
use agora_client_core::protocol::InboundFrame;
use agora_client_core::push::{ConnectionState, PushAdapter, PushHandle};
use agora_client_core::session::SessionContext;
use agora_client_core::transport::mock::{mock_endpoint, MockServer};
use event_bus::Subscription;
use serde_json::json;
use test_timeout::tokio_timeout_test;
use tokio::sync::mpsc;

fn start(session: SessionContext) -> (PushHandle, MockServer, EventBus) {
    let (connector, server) = mock_endpoint();
    let bus = EventBus::new();
    let handle = PushAdapter::new(Arc::new(connector), bus.clone(), session)
        .with_reconnect(ReconnectPolicy {
            initial: Duration::from_millis(20),
            max: Duration::from_millis(200),
        })
        .spawn();
    (handle, server, bus)
}

fn collect(bus: &EventBus, key: ChannelKey) -> (Subscription<ChannelKey, BusEvent>, mpsc::UnboundedReceiver<BusEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = bus.subscribe(key, move |_, event| {
        let _ = tx.send(event.clone());
    });
    (subscription, rx)
}

#[tokio_timeout_test(10)]
async fn message_reaches_both_participants_channel() {
    let (handle, mut server, bus) = start(SessionContext::for_user("42"));
    let (_sub, mut received) = collect(&bus, ChannelKey::conversation("42", "7"));
    let (_other, mut unrelated) = collect(&bus, ChannelKey::conversation("42", "8"));

    let mut peer = server.accept().await.unwrap();
    assert_eq!(
        peer.next_outbound().await.as_deref(),
        Some(r#"{"type":"login","data":{"userID":"42"}}"#)
    );

    peer.push_json(&json!({
        "type": "message",
        "message": {"id": 1, "authorID": 7, "receiverID": "42", "text": "hi", "createDate": "2024-05-01"}
    }));

    let BusEvent::Push(InboundFrame::Message { message }) = received.recv().await.unwrap() else {
        panic!("expected a message event");
    };
    assert_eq!(message.id, "1");
    assert_eq!(message.text, "hi");
    assert!(unrelated.try_recv().is_err());

    handle.shutdown().await;
}

#[tokio_timeout_test(10)]
async fn frames_route_by_kind_and_scope() {
    let (handle, mut server, bus) = start(SessionContext::for_user("7"));
    let (_posts, mut posts) = collect(&bus, ChannelKey::broadcast(EventKind::Post));
    let (_comments, mut comments) = collect(&bus, ChannelKey::comments("12"));
    let (_typing, mut typing) = collect(&bus, ChannelKey::typing("7", "42"));
    let (_status, mut status) = collect(&bus, ChannelKey::status("neo"));

    let peer = server.accept().await.unwrap();
    peer.push_json(&json!({"type": "post", "post": {"id": 3, "title": "hello"}}));
    peer.push_json(&json!({"type": "comment", "postID": 12, "comment": {"id": "c1", "text": "first"}}));
    peer.push_json(&json!({"type": "typing", "authorID": 42, "receiverID": 7, "typing": false}));
    peer.push_json(&json!({"type": "status", "username": "neo", "online": true}));

    assert!(matches!(posts.recv().await, Some(BusEvent::Push(InboundFrame::Post { .. }))));
    assert!(matches!(
        comments.recv().await,
        Some(BusEvent::Push(InboundFrame::Comment { post_id, .. })) if post_id == "12"
    ));
    assert!(matches!(
        typing.recv().await,
        Some(BusEvent::Push(InboundFrame::Typing { typing: false, .. }))
    ));
    assert!(matches!(
        status.recv().await,
        Some(BusEvent::Push(InboundFrame::Status { online: true, .. }))
    ));

    handle.shutdown().await;
}

#[tokio_timeout_test(10)]
async fn unknown_and_malformed_frames_are_dropped() {
    let (handle, mut server, bus) = start(SessionContext::for_user("7"));
    let (_sub, mut received) = collect(&bus, ChannelKey::conversation("7", "42"));

    let peer = server.accept().await.unwrap();
    peer.push("not json at all");
    peer.push(r#"{"type":"reaction","emoji":"+1"}"#);
    peer.push(r#"{"type":"message"}"#);
    peer.push_json(&json!({
        "type": "message",
        "message": {"id": "after", "authorID": "42", "receiverID": "7", "text": "still here"}
    }));

    // the adapter survives the bad frames and keeps dispatching in order
    let BusEvent::Push(InboundFrame::Message { message }) = received.recv().await.unwrap() else {
        panic!("expected a message event");
    };
    assert_eq!(message.id, "after");
    assert_eq!(handle.state(), ConnectionState::Open);

    handle.shutdown().await;
}

#[tokio_timeout_test(10, paused)]
async fn reconnect_replays_identify() {
    let (handle, mut server, _bus) = start(SessionContext::for_user("7"));
    let login = r#"{"type":"login","data":{"userID":"7"}}"#;

    let mut first = server.accept().await.unwrap();
    assert_eq!(first.next_outbound().await.as_deref(), Some(login));

    server.fail_next(2);
    first.disconnect();

    let mut second = server.accept().await.unwrap();
    assert_eq!(second.next_outbound().await.as_deref(), Some(login));
    assert!(handle.wait_for(ConnectionState::Open).await);
    assert_eq!(server.attempts(), 4);

    handle.shutdown().await;
}

#[tokio_timeout_test(10, paused)]
async fn logout_sends_frame_and_keeps_connection() {
    let session = SessionContext::for_user("7");
    let (handle, mut server, bus) = start(session.clone());
    let (_sub, mut session_events) = collect(&bus, ChannelKey::session());

    let mut peer = server.accept().await.unwrap();
    peer.next_outbound().await.unwrap();
    assert!(handle.wait_for(ConnectionState::Open).await);

    handle.logout();
    assert_eq!(
        peer.next_outbound().await.as_deref(),
        Some(r#"{"type":"logout","data":{"userID":"7"}}"#)
    );
    assert!(!session.is_authenticated());
    assert_eq!(
        session_events.recv().await,
        Some(BusEvent::Session(SessionEvent::SignedOut {
            user_id: Some("7".into())
        }))
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(server.attempts(), 1);
    assert_eq!(handle.state(), ConnectionState::Open);
    assert!(peer.push(r#"{"type":"status","username":"neo","online":false}"#));

    // a second logout has no identity left to announce on the wire
    handle.logout();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(peer.drain_outbound().is_empty());

    handle.shutdown().await;
}

#[tokio_timeout_test(10)]
async fn login_after_sign_in_identifies_new_user() {
    let session = SessionContext::in_memory();
    let (handle, mut server, _bus) = start(session.clone());

    let mut peer = server.accept().await.unwrap();
    assert!(handle.wait_for(ConnectionState::Open).await);

    session.sign_in(json!({"id": 99, "nickname": "morpheus"})).unwrap();
    handle.login();
    assert_eq!(
        peer.next_outbound().await.as_deref(),
        Some(r#"{"type":"login","data":{"userID":"99"}}"#)
    );

    handle.shutdown().await;
    assert_eq!(handle.state(), ConnectionState::Closed);
}
