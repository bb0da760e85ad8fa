use crate::accounts::CredentialStore;
use crate::config::ServerConfig;
use crate::persistence::{sleep_until_opt, Debounce, TableWriter};
use crate::state::{Audience, Outbound, WorldState};
use island_shared::protocol::{ClientMsg, ConnId, InitMsg, ServerMsg};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;

/// Commands from client connections to the game loop
pub enum GameCommand {
    /// Credentials checked out; create the session.
    Spawn {
        conn_id: ConnId,
        profile_id: String,
        username: String,
        /// Just registered: provision a profile and save the accounts table
        fresh_account: bool,
        response: oneshot::Sender<(u64, InitMsg)>,
    },
    Client {
        conn_id: ConnId,
        msg: ClientMsg,
    },
    Leave {
        conn_id: ConnId,
    },
    /// Whether the connection still owns a session. Asked after a lagged
    /// receiver may have dropped its `session-ended`.
    SessionAlive {
        conn_id: ConnId,
        response: oneshot::Sender<bool>,
    },
    /// Flush everything to disk, then stop.
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Encoded message fanned out to every connection task, which filters it by
/// audience and sequence number.
#[derive(Debug, Clone)]
pub struct GameBroadcast {
    pub seq: u64,
    pub audience: Audience,
    /// The recipient's session is over after this message
    pub ends_session: bool,
    pub json: Arc<str>,
}

struct Publisher {
    tx: broadcast::Sender<GameBroadcast>,
    seq: u64,
}

impl Publisher {
    fn publish(&mut self, outbound: Vec<Outbound>) {
        for Outbound { audience, msg } in outbound {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Failed to encode server message: {}", e);
                    continue;
                }
            };
            self.seq += 1;
            // No receivers just means nobody is connected
            let _ = self.tx.send(GameBroadcast {
                seq: self.seq,
                audience,
                ends_session: matches!(msg, ServerMsg::SessionEnded(_)),
                json: json.into(),
            });
        }
    }
}

struct Storage {
    accounts: Arc<CredentialStore>,
    profiles_writer: TableWriter,
    accounts_writer: TableWriter,
    profiles_due: Debounce,
    accounts_due: Debounce,
}

impl Storage {
    async fn save_profiles(&mut self, state: &WorldState) {
        match state.profiles().to_table_bytes() {
            Ok(bytes) => self.profiles_writer.write(bytes).await,
            Err(e) => tracing::warn!("Failed to encode profiles: {}", e),
        }
    }

    async fn save_accounts(&mut self) {
        match self.accounts.to_table_bytes().await {
            Ok(bytes) => self.accounts_writer.write(bytes).await,
            Err(e) => tracing::warn!("Failed to encode accounts: {}", e),
        }
    }

    async fn flush_final(&mut self, state: &WorldState) {
        self.profiles_due.clear();
        self.accounts_due.clear();
        match state.profiles().to_table_bytes() {
            Ok(bytes) => {
                if let Err(e) = self.profiles_writer.write_final(&bytes).await {
                    tracing::error!("Final profiles save failed: {}", e);
                }
            }
            Err(e) => tracing::error!("Failed to encode profiles: {}", e),
        }
        match self.accounts.to_table_bytes().await {
            Ok(bytes) => {
                if let Err(e) = self.accounts_writer.write_final(&bytes).await {
                    tracing::error!("Final accounts save failed: {}", e);
                }
            }
            Err(e) => tracing::error!("Failed to encode accounts: {}", e),
        }
    }
}

/// Run the main game loop. Owns the world state and the save schedule.
pub async fn run_game_loop(
    mut cmd_rx: mpsc::Receiver<GameCommand>,
    broadcast_tx: broadcast::Sender<GameBroadcast>,
    server_config: ServerConfig,
    mut state: WorldState,
    accounts: Arc<CredentialStore>,
) {
    let mut publisher = Publisher {
        tx: broadcast_tx,
        seq: 0,
    };
    let mut storage = Storage {
        accounts,
        profiles_writer: TableWriter::new("profiles", server_config.profiles_path()),
        accounts_writer: TableWriter::new("accounts", server_config.accounts_path()),
        profiles_due: Debounce::new(Duration::from_millis(
            server_config.profile_save_debounce_ms,
        )),
        accounts_due: Debounce::new(Duration::from_millis(
            server_config.account_save_debounce_ms,
        )),
    };

    let autosave_period = Duration::from_millis(server_config.autosave_interval_ms);
    let mut autosave =
        tokio::time::interval_at(Instant::now() + autosave_period, autosave_period);
    autosave.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    GameCommand::Spawn {
                        conn_id,
                        profile_id,
                        username,
                        fresh_account,
                        response,
                    } => {
                        let (init, outbound) =
                            state.spawn(conn_id, &profile_id, &username, fresh_account);
                        publisher.publish(outbound);
                        if fresh_account {
                            storage.accounts_due.mark(Instant::now());
                        }
                        tracing::info!(
                            "Player {} joined as connection {} ({} online)",
                            username,
                            conn_id,
                            state.session_count()
                        );
                        if response.send((publisher.seq, init)).is_err() {
                            // Connection went away while we were spawning it
                            publisher.publish(state.remove_session(conn_id));
                        }
                    }
                    GameCommand::Client { conn_id, msg } => {
                        publisher.publish(state.handle(conn_id, msg, Instant::now()));
                    }
                    GameCommand::Leave { conn_id } => {
                        let outbound = state.remove_session(conn_id);
                        if !outbound.is_empty() {
                            tracing::info!(
                                "Connection {} left ({} online)",
                                conn_id,
                                state.session_count()
                            );
                        }
                        publisher.publish(outbound);
                    }
                    GameCommand::SessionAlive { conn_id, response } => {
                        let _ = response.send(state.session(conn_id).is_some());
                    }
                    GameCommand::Shutdown { done } => {
                        let flushed = state.flush_all_sessions();
                        storage.flush_final(&state).await;
                        tracing::info!("Saved {} live sessions on shutdown", flushed);
                        let _ = done.send(());
                        break;
                    }
                }
            }

            _ = autosave.tick() => {
                let flushed = state.flush_all_sessions();
                if flushed > 0 {
                    tracing::debug!("Autosave swept {} sessions", flushed);
                }
            }

            _ = sleep_until_opt(storage.profiles_due.deadline()) => {
                if storage.profiles_due.take_due(Instant::now()) {
                    storage.save_profiles(&state).await;
                }
            }

            _ = sleep_until_opt(storage.accounts_due.deadline()) => {
                if storage.accounts_due.take_due(Instant::now()) {
                    storage.save_accounts().await;
                }
            }
        }

        if state.take_profiles_dirty() {
            storage.profiles_due.mark(Instant::now());
        }
    }

    tracing::info!("Game loop ended");
}
