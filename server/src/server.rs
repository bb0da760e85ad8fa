use crate::accounts::CredentialStore;
use crate::config::ServerConfig;
use crate::error::StartError;
use crate::game_loop::{run_game_loop, GameBroadcast, GameCommand};
use crate::profiles::ProfileStore;
use crate::state::WorldState;
use crate::ws::{ws_handler, AppState};
use axum::routing::get;
use axum::Router;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

/// A running island server: the game loop plus the HTTP/WebSocket listener.
pub struct IslandServer {
    local_addr: SocketAddr,
    game_tx: mpsc::Sender<GameCommand>,
    game_handle: JoinHandle<()>,
    http_handle: JoinHandle<()>,
}

impl IslandServer {
    /// Load durable state, bind the listener and start serving.
    pub async fn start(config: ServerConfig) -> Result<Self, StartError> {
        config.validate().map_err(StartError::Config)?;
        std::fs::create_dir_all(&config.data_dir).map_err(StartError::DataDir)?;

        let accounts = Arc::new(
            CredentialStore::load(&config.accounts_path(), config.scrypt_log_n)
                .map_err(StartError::Config)?,
        );
        let mut load_rng = match config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed.wrapping_add(1)),
            None => ChaCha8Rng::from_entropy(),
        };
        let profiles =
            ProfileStore::open(&config.profiles_path(), config.name_max_len, &mut load_rng);
        let state = WorldState::new(&config, profiles);

        let (game_tx, game_rx) = mpsc::channel::<GameCommand>(1024);
        let (broadcast_tx, _) = broadcast::channel::<GameBroadcast>(1024);

        let app_state =
            AppState::new(game_tx.clone(), broadcast_tx.clone(), accounts.clone(), &config);
        let mut app = Router::new().route("/ws", get(ws_handler));
        if let Some(dir) = &config.static_dir {
            tracing::info!("Serving static files from {}", dir.display());
            app = app.fallback_service(ServeDir::new(dir));
        }
        let app = app.layer(CorsLayer::permissive()).with_state(app_state);

        let listener = tokio::net::TcpListener::bind(&config.listen_addr)
            .await
            .map_err(|source| StartError::Bind {
                addr: config.listen_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| StartError::Bind {
            addr: config.listen_addr.clone(),
            source,
        })?;

        let game_handle =
            tokio::spawn(run_game_loop(game_rx, broadcast_tx, config, state, accounts));
        let http_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("HTTP server stopped: {}", e);
            }
        });

        tracing::info!("Island server listening on {}", local_addr);
        Ok(Self {
            local_addr,
            game_tx,
            game_handle,
            http_handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections, flush all sessions and tables to disk and
    /// wait for the game loop to finish.
    pub async fn shutdown(self) {
        self.http_handle.abort();
        let (done, done_rx) = oneshot::channel();
        if self.game_tx.send(GameCommand::Shutdown { done }).await.is_ok() {
            let _ = done_rx.await;
        }
        let _ = self.game_handle.await;
        tracing::info!("Island server stopped");
    }
}
