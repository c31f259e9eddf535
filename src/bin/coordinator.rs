//! Rhisis Cache Coordinator
//!
//! Tracks which world node hosts each player and relays messages between nodes.
//!
//! Set `RHISIS_LOG_FORMAT=json` for machine-readable logs.

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use rhisis_server::cluster::CoordinatorServer;
use rhisis_server::config::CoordinatorConfig;
use rhisis_server::VERSION;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Rhisis Cache Coordinator v{}", VERSION);

    let config = CoordinatorConfig::load().await?;
    info!(
        "Configuration loaded from: {}",
        config.config_path.display()
    );

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!("Coordinator listening on: {}", config.bind_address());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let server = Arc::new(CoordinatorServer::new(config));
    let registry = server.registry().clone();

    let serve_handle = tokio::spawn(server.serve(listener, shutdown_tx.subscribe()));

    shutdown_signal().await;
    let _ = shutdown_tx.send(());
    let _ = serve_handle.await;

    info!(
        nodes = registry.node_count(),
        players = registry.player_count(),
        "Coordinator stopped"
    );
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,rhisis_server=debug"));

    let json = std::env::var("RHISIS_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .init();
    }
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating shutdown..."),
        Err(e) => {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
