use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Semaphore};
use tokio::time::Instant;

use crate::accounts::{Authenticated, CredentialStore};
use crate::config::ServerConfig;
use crate::error::AuthError;
use crate::game_loop::{GameBroadcast, GameCommand};
use crate::state::Audience;
use island_shared::protocol::{
    AuthAckMsg, AuthAction, ClientMsg, ConnId, CredentialsCmd, CustomizeAckMsg, ServerMsg,
};

/// Per-connection limits taken from the server configuration
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub max_message_bytes: usize,
    pub max_parse_errors: u32,
    pub ping_interval: Duration,
    pub liveness_timeout: Duration,
}

impl From<&ServerConfig> for ConnectionLimits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_message_bytes: config.max_message_bytes,
            max_parse_errors: config.max_parse_errors,
            ping_interval: config.ping_interval(),
            liveness_timeout: config.liveness_timeout(),
        }
    }
}

/// Shared app state passed to each WebSocket handler
#[derive(Clone)]
pub struct AppState {
    pub game_tx: mpsc::Sender<GameCommand>,
    pub broadcast_tx: broadcast::Sender<GameBroadcast>,
    pub accounts: Arc<CredentialStore>,
    pub limits: ConnectionLimits,
    connections: Arc<Semaphore>,
    next_conn_id: Arc<AtomicU32>,
}

impl AppState {
    pub fn new(
        game_tx: mpsc::Sender<GameCommand>,
        broadcast_tx: broadcast::Sender<GameBroadcast>,
        accounts: Arc<CredentialStore>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            game_tx,
            broadcast_tx,
            accounts,
            limits: ConnectionLimits::from(config),
            connections: Arc::new(Semaphore::new(config.max_connections)),
            next_conn_id: Arc::new(AtomicU32::new(1)),
        }
    }

    fn next_conn_id(&self) -> ConnId {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// HTTP handler for WebSocket upgrade
pub async fn ws_handler(ws: WebSocketUpgrade, State(app_state): State<AppState>) -> Response {
    let Ok(permit) = app_state.connections.clone().try_acquire_owned() else {
        tracing::warn!("Connection limit reached, rejecting upgrade");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    ws.max_message_size(app_state.limits.max_message_bytes)
        .on_upgrade(move |socket| async move {
            handle_socket(socket, app_state).await;
            drop(permit);
        })
}

type WsSink = SplitSink<WebSocket, Message>;

enum Flow {
    Continue,
    Close,
}

/// Per-connection view of the session.
struct Connection {
    id: ConnId,
    /// Hub sequence number at spawn. Only broadcasts after it are forwarded;
    /// `None` while signed out.
    spawn_seq: Option<u64>,
    parse_errors: u32,
}

async fn send_msg(sink: &mut WsSink, msg: &ServerMsg) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => sink.send(Message::Text(json.into())).await,
        Err(e) => {
            tracing::error!("Failed to encode server message: {}", e);
            Ok(())
        }
    }
}

async fn handle_socket(socket: WebSocket, app_state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let mut conn = Connection {
        id: app_state.next_conn_id(),
        spawn_seq: None,
        parse_errors: 0,
    };
    tracing::info!("Connection {} opened", conn.id);

    // Subscribe before any spawn so nothing published after it can be missed
    let mut broadcast_rx = app_state.broadcast_tx.subscribe();

    let limits = app_state.limits;
    let mut ping =
        tokio::time::interval_at(Instant::now() + limits.ping_interval, limits.ping_interval);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            // Client -> Server
            msg = stream.next() => {
                let flow = match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        match serde_json::from_str::<ClientMsg>(&text) {
                            Ok(client_msg) => {
                                handle_client_msg(&app_state, &mut conn, &mut sink, client_msg)
                                    .await
                            }
                            Err(e) => note_parse_error(&mut conn, limits, &e.to_string()),
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        last_seen = Instant::now();
                        note_parse_error(&mut conn, limits, "binary frame")
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        last_seen = Instant::now();
                        Flow::Continue
                    }
                    Some(Ok(Message::Close(_))) | None => Flow::Close,
                    Some(Err(e)) => {
                        tracing::debug!("Connection {} read error: {}", conn.id, e);
                        Flow::Close
                    }
                };
                if matches!(flow, Flow::Close) {
                    break;
                }
            }

            // Server -> Client (broadcast)
            result = broadcast_rx.recv() => {
                match result {
                    Ok(broadcast) => {
                        let Some(spawn_seq) = conn.spawn_seq else { continue };
                        if broadcast.seq <= spawn_seq || !broadcast.audience.includes(conn.id) {
                            continue;
                        }
                        let text = Message::Text(broadcast.json.to_string().into());
                        if sink.send(text).await.is_err() {
                            break;
                        }
                        if broadcast.ends_session && broadcast.audience == Audience::Only(conn.id) {
                            tracing::info!("Connection {} session taken over", conn.id);
                            conn.spawn_seq = None;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Connection {} lagged by {} messages", conn.id, n);
                        // A dropped session-ended would leave us forwarding for nobody
                        if conn.spawn_seq.is_some() && !session_alive(&app_state, conn.id).await {
                            tracing::info!("Connection {} session ended while lagging", conn.id);
                            conn.spawn_seq = None;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            _ = ping.tick() => {
                if last_seen.elapsed() > limits.liveness_timeout {
                    tracing::info!("Connection {} timed out", conn.id);
                    break;
                }
                if sink.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
        }
    }

    // The game loop ignores connections without a session
    let _ = app_state
        .game_tx
        .send(GameCommand::Leave { conn_id: conn.id })
        .await;
    tracing::info!("Connection {} closed", conn.id);
}

/// Ask the game loop whether `conn_id` still owns a session.
async fn session_alive(app_state: &AppState, conn_id: ConnId) -> bool {
    let (response, response_rx) = oneshot::channel();
    if app_state
        .game_tx
        .send(GameCommand::SessionAlive { conn_id, response })
        .await
        .is_err()
    {
        return false;
    }
    response_rx.await.unwrap_or(false)
}

fn note_parse_error(conn: &mut Connection, limits: ConnectionLimits, detail: &str) -> Flow {
    conn.parse_errors += 1;
    tracing::debug!("Connection {} sent an undecodable frame: {}", conn.id, detail);
    if conn.parse_errors >= limits.max_parse_errors {
        tracing::warn!(
            "Closing connection {} after {} undecodable frames",
            conn.id,
            conn.parse_errors
        );
        Flow::Close
    } else {
        Flow::Continue
    }
}

async fn handle_client_msg(
    app_state: &AppState,
    conn: &mut Connection,
    sink: &mut WsSink,
    msg: ClientMsg,
) -> Flow {
    match msg {
        ClientMsg::Register(creds) => {
            authenticate(app_state, conn, sink, AuthAction::Register, creds).await
        }
        ClientMsg::Login(creds) => {
            authenticate(app_state, conn, sink, AuthAction::Login, creds).await
        }
        // Signed-out customize still gets its ack
        ClientMsg::Customize(_) if conn.spawn_seq.is_none() => {
            let ack = ServerMsg::CustomizeAck(CustomizeAckMsg {
                ok: false,
                name: None,
                color: None,
                appearance: None,
            });
            match send_msg(sink, &ack).await {
                Ok(()) => Flow::Continue,
                Err(_) => Flow::Close,
            }
        }
        _ if conn.spawn_seq.is_none() => Flow::Continue,
        msg => {
            if matches!(msg, ClientMsg::Logout) {
                tracing::info!("Connection {} signed out", conn.id);
                conn.spawn_seq = None;
            }
            match app_state
                .game_tx
                .send(GameCommand::Client { conn_id: conn.id, msg })
                .await
            {
                Ok(()) => Flow::Continue,
                Err(_) => Flow::Close,
            }
        }
    }
}

/// Check credentials, spawn the session, then send `init` followed by the ack.
async fn authenticate(
    app_state: &AppState,
    conn: &mut Connection,
    sink: &mut WsSink,
    action: AuthAction,
    creds: CredentialsCmd,
) -> Flow {
    let result = match action {
        AuthAction::Register => {
            app_state
                .accounts
                .register(creds.username.as_deref(), creds.password.as_deref())
                .await
        }
        AuthAction::Login => {
            app_state
                .accounts
                .verify(creds.username.as_deref(), creds.password.as_deref())
                .await
        }
    };

    let ack = match result {
        Ok(Authenticated {
            username,
            profile_id,
        }) => match spawn(app_state, conn, action, &username, profile_id).await {
            Ok(init) => {
                if send_msg(sink, &init).await.is_err() {
                    return Flow::Close;
                }
                AuthAckMsg {
                    action,
                    ok: true,
                    username: Some(username),
                    error: None,
                }
            }
            Err(e) => AuthAckMsg {
                action,
                ok: false,
                username: None,
                error: Some(e.to_string()),
            },
        },
        Err(e) => {
            tracing::debug!("Connection {} {:?} rejected: {}", conn.id, action, e);
            AuthAckMsg {
                action,
                ok: false,
                username: None,
                error: Some(e.to_string()),
            }
        }
    };

    match send_msg(sink, &ServerMsg::AuthAck(ack)).await {
        Ok(()) => Flow::Continue,
        Err(_) => Flow::Close,
    }
}

async fn spawn(
    app_state: &AppState,
    conn: &mut Connection,
    action: AuthAction,
    username: &str,
    profile_id: String,
) -> Result<ServerMsg, AuthError> {
    let (response, response_rx) = oneshot::channel();
    app_state
        .game_tx
        .send(GameCommand::Spawn {
            conn_id: conn.id,
            profile_id,
            username: username.to_string(),
            fresh_account: action == AuthAction::Register,
            response,
        })
        .await
        .map_err(|_| AuthError::Internal)?;
    let (seq, init) = response_rx.await.map_err(|_| AuthError::Internal)?;
    conn.spawn_seq = Some(seq);
    Ok(ServerMsg::Init(init))
}
