//! Integration tests for the live connection: upgrade auth, presence, typing
//! relay, and send-message reconciliation.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use chatline_server::db::{MessageStore, SqliteStore};
use chatline_server::state::{AppState, WsTimings};
use chatline_server::ws::protocol::ServerEvent;
use chatline_server::ws::router::{spawn_router, RouterOptions};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Helper: start the server on a random port and return (base_url, addr, jwt_secret).
async fn start_test_server() -> (String, SocketAddr, Vec<u8>) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = chatline_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = chatline_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let store: Arc<dyn MessageStore> = Arc::new(SqliteStore::new(db));
    let router = spawn_router(store.clone(), RouterOptions::default());
    let state = AppState {
        store,
        router,
        jwt_secret: jwt_secret.clone(),
        max_content_chars: 1000,
        ws: WsTimings::default(),
    };

    let app = chatline_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    (format!("http://{}", addr), addr, jwt_secret)
}

fn token_for(secret: &[u8], external_id: &str, username: &str) -> String {
    chatline_server::auth::jwt::issue_access_token(secret, external_id, Some(username), 3600)
        .expect("Failed to issue token")
}

/// Sync a user through the REST API and return (access_token, user_id).
async fn sync_user(base_url: &str, secret: &[u8], username: &str) -> (String, String) {
    let token = token_for(secret, &format!("ext-{}", username), username);
    let resp = reqwest::Client::new()
        .post(format!("{}/api/v1/users/sync", base_url))
        .bearer_auth(&token)
        .send()
        .await
        .expect("sync request failed");
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    (token, body["id"].as_str().unwrap().to_string())
}

async fn connect(addr: SocketAddr, token: &str) -> WsStream {
    let url = format!("ws://{}/ws?token={}", addr, token);
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("WebSocket connect failed");
    ws
}

async fn send_event(ws: &mut WsStream, event: Value) {
    ws.send(Message::Text(event.to_string().into()))
        .await
        .expect("send failed");
}

/// Next server event, skipping keepalive frames.
async fn next_event(ws: &mut WsStream) -> ServerEvent {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("receive error");
        match frame {
            Message::Text(text) => {
                return ServerEvent::decode(text.as_str()).expect("undecodable server event")
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

async fn assert_silent(ws: &mut WsStream) {
    match tokio::time::timeout(Duration::from_millis(200), ws.next()).await {
        Err(_) => {}
        Ok(frame) => panic!("expected no event, got {:?}", frame),
    }
}

/// Connect, announce, and consume the presence snapshot.
async fn go_online(addr: SocketAddr, token: &str, user_id: &str) -> (WsStream, Vec<String>) {
    let mut ws = connect(addr, token).await;
    send_event(&mut ws, json!({"event": "user-online", "data": {"userId": user_id}})).await;
    match next_event(&mut ws).await {
        ServerEvent::PresenceSnapshot(snapshot) => (ws, snapshot.user_ids),
        other => panic!("expected presence-snapshot, got {:?}", other),
    }
}

async fn expect_close_code(addr: SocketAddr, token: &str) -> u16 {
    let mut ws = connect(addr, token).await;
    let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out waiting for close")
        .expect("stream ended")
        .expect("receive error");
    match frame {
        Message::Close(Some(close)) => u16::from(close.code),
        other => panic!("expected close frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_token_closes_with_4002() {
    let (_, addr, _) = start_test_server().await;
    assert_eq!(expect_close_code(addr, "not-a-jwt").await, 4002);
}

#[tokio::test]
async fn test_expired_token_closes_with_4001() {
    let (_, addr, secret) = start_test_server().await;
    let token =
        chatline_server::auth::jwt::issue_access_token(&secret, "ext-alice", Some("alice"), -120)
            .unwrap();
    assert_eq!(expect_close_code(addr, &token).await, 4001);
}

#[tokio::test]
async fn test_unsynced_user_closes_with_4004() {
    let (_, addr, secret) = start_test_server().await;
    let token = token_for(&secret, "ext-ghost", "ghost");
    assert_eq!(expect_close_code(addr, &token).await, 4004);
}

#[tokio::test]
async fn test_presence_typing_and_disconnect() {
    let (base_url, addr, secret) = start_test_server().await;
    let (alice_token, alice_id) = sync_user(&base_url, &secret, "alice").await;
    let (bob_token, bob_id) = sync_user(&base_url, &secret, "bob").await;

    let (mut alice, snapshot) = go_online(addr, &alice_token, &alice_id).await;
    assert!(snapshot.is_empty());

    let (mut bob, snapshot) = go_online(addr, &bob_token, &bob_id).await;
    assert_eq!(snapshot, vec![alice_id.clone()]);

    match next_event(&mut alice).await {
        ServerEvent::PresenceChanged(change) => {
            assert_eq!(change.user_id, bob_id);
            assert!(change.online);
        }
        other => panic!("expected presence-changed, got {:?}", other),
    }

    send_event(
        &mut bob,
        json!({"event": "typing", "data": {"toUserId": alice_id, "fromUserId": bob_id, "username": "bob"}}),
    )
    .await;
    match next_event(&mut alice).await {
        ServerEvent::UserTyping(typing) => {
            assert_eq!(typing.from_user_id, bob_id);
            assert_eq!(typing.username, "bob");
        }
        other => panic!("expected user-typing, got {:?}", other),
    }

    // Drop without stop-typing: exactly one offline notification.
    bob.close(None).await.unwrap();
    drop(bob);

    match next_event(&mut alice).await {
        ServerEvent::PresenceChanged(change) => {
            assert_eq!(change.user_id, bob_id);
            assert!(!change.online);
        }
        other => panic!("expected presence-changed, got {:?}", other),
    }
    assert_silent(&mut alice).await;
}

#[tokio::test]
async fn test_send_message_relays_then_confirms() {
    let (base_url, addr, secret) = start_test_server().await;
    let (alice_token, alice_id) = sync_user(&base_url, &secret, "alice").await;
    let (bob_token, bob_id) = sync_user(&base_url, &secret, "bob").await;

    let (mut alice, _) = go_online(addr, &alice_token, &alice_id).await;
    let (mut bob, _) = go_online(addr, &bob_token, &bob_id).await;
    next_event(&mut alice).await; // bob came online

    send_event(
        &mut alice,
        json!({"event": "send-message", "data": {"receiverId": bob_id, "content": "hi", "correlationToken": "t1"}}),
    )
    .await;

    match next_event(&mut bob).await {
        ServerEvent::NewMessage(message) => {
            assert_eq!(message.sender_id, alice_id);
            assert_eq!(message.content, "hi");
            assert_eq!(message.correlation_token.as_deref(), Some("t1"));
            assert!(!message.confirmed);
        }
        other => panic!("expected new-message, got {:?}", other),
    }

    let durable = match next_event(&mut alice).await {
        ServerEvent::MessageConfirmed(confirmed) => {
            assert_eq!(confirmed.correlation_token, "t1");
            assert_eq!(confirmed.message.content, "hi");
            assert_eq!(confirmed.message.receiver_id, bob_id);
            confirmed.message
        }
        other => panic!("expected message-confirmed, got {:?}", other),
    };

    // The durable record is what a full fetch returns.
    let history: Vec<Value> = reqwest::Client::new()
        .get(format!("{}/api/v1/messages?with={}", base_url, alice_id))
        .bearer_auth(&bob_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["id"], durable.id.as_str());
    assert_eq!(history[0]["senderId"], alice_id.as_str());
}

#[tokio::test]
async fn test_whitespace_message_fails_for_sender_only() {
    let (base_url, addr, secret) = start_test_server().await;
    let (alice_token, alice_id) = sync_user(&base_url, &secret, "alice").await;
    let (bob_token, bob_id) = sync_user(&base_url, &secret, "bob").await;

    let (mut alice, _) = go_online(addr, &alice_token, &alice_id).await;
    let (mut bob, _) = go_online(addr, &bob_token, &bob_id).await;
    next_event(&mut alice).await;

    send_event(
        &mut alice,
        json!({"event": "send-message", "data": {"receiverId": bob_id, "content": "   ", "correlationToken": "t2"}}),
    )
    .await;

    match next_event(&mut alice).await {
        ServerEvent::MessageFailed(failed) => {
            assert_eq!(failed.correlation_token, "t2");
            assert_eq!(failed.error, "Message must be 1-1000 characters");
        }
        other => panic!("expected message-failed, got {:?}", other),
    }
    assert_silent(&mut bob).await;
}

#[tokio::test]
async fn test_malformed_frame_returns_error_event() {
    let (base_url, addr, secret) = start_test_server().await;
    let (alice_token, _) = sync_user(&base_url, &secret, "alice").await;
    let mut alice = connect(addr, &alice_token).await;

    alice
        .send(Message::Text("{not json".to_string().into()))
        .await
        .unwrap();

    match next_event(&mut alice).await {
        ServerEvent::Error(err) => assert!(err.message.starts_with("Malformed event")),
        other => panic!("expected error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_announcing_someone_else_is_ignored() {
    let (base_url, addr, secret) = start_test_server().await;
    let (alice_token, alice_id) = sync_user(&base_url, &secret, "alice").await;
    let (_, bob_id) = sync_user(&base_url, &secret, "bob").await;

    let mut alice = connect(addr, &alice_token).await;
    send_event(&mut alice, json!({"event": "user-online", "data": {"userId": bob_id}})).await;
    assert_silent(&mut alice).await;

    let body: Value = reqwest::Client::new()
        .get(format!("{}/api/v1/users/online?userId={}", base_url, bob_id))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"userId": bob_id, "isOnline": false}));

    // The real identity is still accepted afterwards.
    send_event(&mut alice, json!({"event": "user-online", "data": {"userId": alice_id}})).await;
    assert!(matches!(
        next_event(&mut alice).await,
        ServerEvent::PresenceSnapshot(_)
    ));
}
