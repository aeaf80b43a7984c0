//! Runs the client against a small in-process forum server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use agora_client_core::auth::AuthApi;
use agora_client_core::channel::ChannelKey;
use agora_client_core::events::{BusEvent, EventBus};
use agora_client_core::pagination::{ChatPane, CursorOptions, MemoryView};
use agora_client_core::protocol::InboundFrame;
use agora_client_core::push::{ConnectionState, PushAdapter};
use agora_client_core::request::{HttpFetcher, Outcome, RequestError, RequestManager};
use agora_client_core::session::{FileCredentialStore, SessionContext};
use agora_client_core::transport::{WebSocketConfig, WebSocketConnector};
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use test_timeout::tokio_timeout_test;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

async fn sign_in(Json(body): Json<Value>) -> impl IntoResponse {
    if body["password"] == "swordfish" {
        (
            StatusCode::OK,
            [("set-cookie", "auth_session=abc; Path=/")],
            Json(json!({"user": {"id": 7, "nickname": body["identifiant"], "email": "neo@example.com"}})),
        )
            .into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"errors": ["invalid credentials"]})),
        )
            .into_response()
    }
}

async fn me(headers: HeaderMap) -> impl IntoResponse {
    let signed_in = headers
        .get("cookie")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|cookies| cookies.contains("auth_session=abc"));
    if signed_in {
        (StatusCode::OK, Json(json!({"user": {"id": 7, "nickname": "neo"}})))
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({"errors": "No active session"})))
    }
}

async fn logout() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("set-cookie", "auth_session=; Path=/; Max-Age=0")],
        Json(json!({})),
    )
}

async fn messages(Path(peer): Path<String>, Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    let offset: u32 = query.get("offset").and_then(|v| v.parse().ok()).unwrap_or(0);
    let limit: u32 = query.get("limit").and_then(|v| v.parse().ok()).unwrap_or(10);
    // 15 messages in total; ids grow with time
    let newest = 15u32.saturating_sub(offset);
    let oldest = newest.saturating_sub(limit) + 1;
    if newest == 0 {
        return Json(json!({"messages": null}));
    }
    let page: Vec<Value> = (oldest..=newest)
        .rev()
        .map(|id| json!({"id": id, "authorID": peer, "receiverID": "7", "text": format!("#{id}")}))
        .collect();
    Json(json!({ "messages": page }))
}

async fn push(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(serve_push)
}

async fn serve_push(mut socket: WebSocket) {
    while let Some(Ok(frame)) = socket.recv().await {
        let WsMessage::Text(text) = frame else { continue };
        let Ok(value) = serde_json::from_str::<Value>(&text) else { continue };
        if value["type"] == "login" {
            let reply = json!({
                "type": "message",
                "message": {"id": 100, "authorID": 42, "receiverID": value["data"]["userID"], "text": "welcome"}
            });
            if socket.send(WsMessage::Text(reply.to_string())).await.is_err() {
                break;
            }
        }
    }
}

async fn start_server() -> SocketAddr {
    let app = Router::new()
        .route("/sign-in", post(sign_in))
        .route("/me", get(me))
        .route("/logout", post(logout))
        .route("/chat/messages/:peer", get(messages))
        .route("/ws", get(push));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio_timeout_test(20)]
async fn sign_in_over_http_installs_session() {
    let addr = start_server().await;
    let session = SessionContext::in_memory();
    let requests = RequestManager::new(Arc::new(HttpFetcher::new(&format!("http://{addr}/"))), session.clone());
    let auth = AuthApi::new(requests);

    match auth.sign_in("neo", "wrong").await {
        Outcome::Failure(err @ RequestError::Http { status: 401, .. }) => {
            assert_eq!(err.user_message(), "invalid credentials");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(!session.is_authenticated());

    let user = auth.sign_in("neo", "swordfish").await.success().unwrap();
    assert_eq!(user.id, "7");
    assert_eq!(user.nickname, "neo");
    assert_eq!(session.user_id().as_deref(), Some("7"));
}

#[tokio_timeout_test(20)]
async fn session_survives_into_a_new_client() {
    let addr = start_server().await;
    let dir = tempfile::tempdir().unwrap();
    let credentials = dir.path().join("credentials.json");
    let cookie = dir.path().join("credentials.cookie");
    let client = |session: &SessionContext| {
        let fetcher = HttpFetcher::new(&format!("http://{addr}")).with_cookie_file(&cookie);
        AuthApi::new(RequestManager::new(Arc::new(fetcher), session.clone()))
    };

    let first = SessionContext::new(Arc::new(FileCredentialStore::new(&credentials)));
    client(&first).sign_in("neo", "swordfish").await.success().unwrap();
    assert!(cookie.exists());

    // a later run starts from what the first one left on disk
    let second = SessionContext::new(Arc::new(FileCredentialStore::new(&credentials)));
    assert_eq!(second.restore().unwrap().as_deref(), Some("7"));
    let api = client(&second);
    let user = api.whoami().await.success().unwrap();
    assert_eq!(user.nickname, "neo");
    assert!(credentials.exists());

    api.sign_out().await.success().unwrap();
    assert!(!second.is_authenticated());
    assert!(!cookie.exists());
    assert!(!credentials.exists());
}

#[tokio_timeout_test(20)]
async fn history_pages_through_http() {
    let addr = start_server().await;
    let requests = RequestManager::new(
        Arc::new(HttpFetcher::new(&format!("localhost:{}", addr.port()))),
        SessionContext::for_user("7"),
    );
    let view = Arc::new(MemoryView::new());
    let pane = ChatPane::new(requests, EventBus::new(), view.clone(), CursorOptions::default());

    assert_eq!(pane.open("42").await, Outcome::Success(10));
    let ids: Vec<String> = (6..=15).map(|id| id.to_string()).collect();
    assert_eq!(view.ids(), ids);
}

#[tokio_timeout_test(20)]
async fn push_connection_identifies_and_delivers() {
    let addr = start_server().await;
    let bus = EventBus::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = bus.subscribe(ChannelKey::conversation("7", "42"), move |_, event| {
        let _ = tx.send(event.clone());
    });

    let connector = WebSocketConnector::new(WebSocketConfig::new(format!("ws://{addr}/ws")));
    let handle = PushAdapter::new(Arc::new(connector), bus.clone(), SessionContext::for_user("7")).spawn();
    assert!(handle.wait_for(ConnectionState::Open).await);

    let Some(BusEvent::Push(InboundFrame::Message { message })) = rx.recv().await else {
        panic!("expected the welcome message");
    };
    assert_eq!(message.id, "100");
    assert_eq!(message.text, "welcome");

    handle.shutdown().await;
    assert_eq!(handle.state(), ConnectionState::Closed);
}
