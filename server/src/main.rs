use anyhow::Context;
use clap::Parser;
use island_server::config::ServerConfig;
use island_server::IslandServer;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "island-server", about = "Realtime island world server")]
struct Args {
    /// Interface to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Directory for profiles.json and accounts.json
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Serve the browser client from this directory
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Fixed seed for spawn points and starter colours
    #[arg(long)]
    rng_seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = ServerConfig {
        listen_addr: format!("{}:{}", args.host, args.port),
        data_dir: args.data_dir,
        static_dir: args.static_dir,
        rng_seed: args.rng_seed,
        ..Default::default()
    };

    let server = IslandServer::start(config)
        .await
        .context("failed to start island server")?;
    println!("Island server listening on {}", server.local_addr());

    shutdown_signal().await;
    tracing::info!("Shutdown requested");
    server.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
