//! Integration tests for the island server.
//!
//! These tests start a real server instance and connect via WebSocket
//! to verify end-to-end behavior.

use futures_util::{SinkExt, StreamExt};
use island_server::config::ServerConfig;
use island_server::IslandServer;
use island_shared::protocol::{AuthAckMsg, InitMsg, ServerMsg};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};

type Ws = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

fn test_config(data_dir: &Path) -> ServerConfig {
    ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        data_dir: data_dir.to_path_buf(),
        scrypt_log_n: 4,
        rng_seed: Some(12345),
        ..Default::default()
    }
}

/// Start a test server on a random available port and return it with its WebSocket URL.
async fn start_test_server(data_dir: &Path) -> (IslandServer, String) {
    let server = IslandServer::start(test_config(data_dir))
        .await
        .expect("server should start");
    let url = format!("ws://{}/ws", server.local_addr());
    (server, url)
}

async fn connect(url: &str) -> Ws {
    let (ws, _) = connect_async(url).await.expect("Failed to connect");
    ws
}

async fn send_json(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Read the next text message and parse as ServerMsg.
async fn recv_msg(ws: &mut Ws) -> ServerMsg {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(&text).expect("Failed to parse server message");
            }
            Some(Ok(_)) => continue, // Skip ping/pong
            Some(Err(e)) => panic!("WebSocket error: {}", e),
            None => panic!("WebSocket closed unexpectedly"),
        }
    }
}

/// Read the next text message with a timeout.
async fn recv_msg_timeout(ws: &mut Ws, timeout: Duration) -> Option<ServerMsg> {
    tokio::time::timeout(timeout, recv_msg(ws)).await.ok()
}

/// Skip messages until one matches, failing after two seconds.
async fn recv_until<T>(ws: &mut Ws, mut pick: impl FnMut(ServerMsg) -> Option<T>) -> T {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let msg = recv_msg_timeout(ws, remaining)
            .await
            .expect("timed out waiting for message");
        if let Some(found) = pick(msg) {
            return found;
        }
    }
}

async fn auth(ws: &mut Ws, action: &str, username: &str, password: &str) -> AuthAckMsg {
    send_json(
        ws,
        json!({"type": action, "username": username, "password": password}),
    )
    .await;
    recv_until(ws, |msg| match msg {
        ServerMsg::AuthAck(ack) => Some(ack),
        _ => None,
    })
    .await
}

/// Sign in and return the init message, which arrives before the ack.
async fn sign_in(ws: &mut Ws, action: &str, username: &str, password: &str) -> InitMsg {
    send_json(
        ws,
        json!({"type": action, "username": username, "password": password}),
    )
    .await;
    let init = match recv_msg(ws).await {
        ServerMsg::Init(init) => init,
        other => panic!("Expected Init, got {:?}", other),
    };
    match recv_msg(ws).await {
        ServerMsg::AuthAck(ack) => assert!(ack.ok, "auth failed: {:?}", ack.error),
        other => panic!("Expected AuthAck, got {:?}", other),
    }
    init
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_register_sends_init_then_ack() {
    let dir = tempfile::tempdir().unwrap();
    let (server, url) = start_test_server(dir.path()).await;
    let mut ws = connect(&url).await;

    send_json(
        &mut ws,
        json!({"type": "register", "username": "Ada", "password": "hunter2"}),
    )
    .await;
    let init = match recv_msg(&mut ws).await {
        ServerMsg::Init(init) => init,
        other => panic!("Expected Init, got {:?}", other),
    };
    assert_eq!(init.protocol_version, 1);
    assert_eq!(init.player_data.name, "ada");
    assert!(init.players.is_empty());
    assert_eq!(init.interactables.len(), 1);

    match recv_msg(&mut ws).await {
        ServerMsg::AuthAck(ack) => {
            assert!(ack.ok);
            assert_eq!(ack.username.as_deref(), Some("ada"));
        }
        other => panic!("Expected AuthAck, got {:?}", other),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_registration_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (server, url) = start_test_server(dir.path()).await;

    let mut ws1 = connect(&url).await;
    sign_in(&mut ws1, "register", "ada", "hunter2").await;

    let mut ws2 = connect(&url).await;
    let ack = auth(&mut ws2, "register", "ADA", "other-password").await;
    assert!(!ack.ok);
    assert_eq!(ack.error.as_deref(), Some("Username already taken."));

    server.shutdown().await;
}

#[tokio::test]
async fn test_login_errors_do_not_reveal_accounts() {
    let dir = tempfile::tempdir().unwrap();
    let (server, url) = start_test_server(dir.path()).await;

    let mut ws = connect(&url).await;
    sign_in(&mut ws, "register", "ada", "hunter2").await;

    let mut other = connect(&url).await;
    let unknown = auth(&mut other, "login", "grace", "hunter2").await;
    let wrong = auth(&mut other, "login", "ada", "wrong-password").await;
    assert!(!unknown.ok && !wrong.ok);
    assert_eq!(unknown.error, wrong.error);
    assert_eq!(unknown.error.as_deref(), Some("Invalid credentials."));

    server.shutdown().await;
}

#[tokio::test]
async fn test_signed_out_messages_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let (server, url) = start_test_server(dir.path()).await;

    let mut watcher = connect(&url).await;
    sign_in(&mut watcher, "register", "watcher", "hunter2").await;

    let mut anon = connect(&url).await;
    send_json(&mut anon, json!({"type": "chat", "text": "hello?"})).await;
    send_json(&mut anon, json!({"type": "move", "x": 1, "y": 1, "z": 1})).await;

    // Signed-out customize gets a failed ack and nothing else
    send_json(&mut anon, json!({"type": "customize", "name": "Ghost"})).await;
    match recv_msg(&mut anon).await {
        ServerMsg::CustomizeAck(ack) => assert!(!ack.ok),
        other => panic!("Expected CustomizeAck, got {:?}", other),
    }

    assert!(
        recv_msg_timeout(&mut watcher, Duration::from_millis(200)).await.is_none(),
        "signed-out traffic must not reach other players"
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_move_broadcast_excludes_sender() {
    let dir = tempfile::tempdir().unwrap();
    let (server, url) = start_test_server(dir.path()).await;

    let mut ws1 = connect(&url).await;
    let init1 = sign_in(&mut ws1, "register", "ada", "hunter2").await;
    let mut ws2 = connect(&url).await;
    let init2 = sign_in(&mut ws2, "register", "grace", "hunter2").await;
    assert_eq!(init2.players.len(), 1);
    assert_eq!(init2.players[0].id, init1.id);

    // ada hears about grace
    let joined = recv_until(&mut ws1, |msg| match msg {
        ServerMsg::PlayerJoined(p) => Some(p),
        _ => None,
    })
    .await;
    assert_eq!(joined.id, init2.id);

    send_json(
        &mut ws1,
        json!({"type": "move", "x": 2.5, "y": 1.35, "z": -1.5, "yaw": 0.5, "isSwimming": false}),
    )
    .await;
    let moved = recv_until(&mut ws2, |msg| match msg {
        ServerMsg::PlayerMoved(m) => Some(m),
        _ => None,
    })
    .await;
    assert_eq!(moved.id, init1.id);
    assert_eq!((moved.x, moved.z, moved.yaw), (2.5, -1.5, 0.5));

    let echoed = recv_msg_timeout(&mut ws1, Duration::from_millis(200)).await;
    assert!(
        !matches!(echoed, Some(ServerMsg::PlayerMoved(_))),
        "sender should not receive its own move"
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_second_login_ends_first_session() {
    let dir = tempfile::tempdir().unwrap();
    let (server, url) = start_test_server(dir.path()).await;

    let mut first = connect(&url).await;
    sign_in(&mut first, "register", "ada", "hunter2").await;

    let mut second = connect(&url).await;
    let init = sign_in(&mut second, "login", "ada", "hunter2").await;
    assert!(init.players.is_empty());

    recv_until(&mut first, |msg| match msg {
        ServerMsg::SessionEnded(_) => Some(()),
        _ => None,
    })
    .await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_frames_close_connection() {
    let dir = tempfile::tempdir().unwrap();
    let (server, url) = start_test_server(dir.path()).await;
    let mut ws = connect(&url).await;

    for _ in 0..5 {
        let _ = ws.send(Message::Text("{not json".into())).await;
    }

    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return true,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .unwrap_or(false);
    assert!(closed, "connection should be closed after repeated garbage");

    server.shutdown().await;
}

#[tokio::test]
async fn test_position_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let (server, url) = start_test_server(dir.path()).await;
    let mut ws = connect(&url).await;
    sign_in(&mut ws, "register", "ada", "hunter2").await;
    send_json(
        &mut ws,
        json!({"type": "move", "x": 4.0, "y": 1.5, "z": -7.0, "yaw": 0.0}),
    )
    .await;
    // Let the hub apply the move before shutting down
    tokio::time::sleep(Duration::from_millis(100)).await;
    server.shutdown().await;

    let (server, url) = start_test_server(dir.path()).await;
    let mut ws = connect(&url).await;
    let init = sign_in(&mut ws, "login", "ada", "hunter2").await;
    assert_eq!(
        (init.player_data.x, init.player_data.y, init.player_data.z),
        (4.0, 1.5, -7.0)
    );

    server.shutdown().await;
}
