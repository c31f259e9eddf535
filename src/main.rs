//! Rhisis World Server
//!
//! A world node of the Rhisis cluster. It hosts player sessions, runs the
//! quest engine and talks to the cache coordinator for cross-node lookups.

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use rhisis_server::cluster::CoordinatorClient;
use rhisis_server::config::ServerConfig;
use rhisis_server::game::resources::GameResources;
use rhisis_server::net::handler::ConnectionHandler;
use rhisis_server::state::AppState;
use rhisis_server::VERSION;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("╔══════════════════════════════════════════════╗");
    info!("║        Rhisis World Server v{}             ║", VERSION);
    info!("╚══════════════════════════════════════════════╝");

    let config = ServerConfig::load().await?;
    info!(
        "Configuration loaded from: {}",
        config.config_path.display()
    );

    // The world role cannot run without its coordinator
    let endpoint = config.coordinator_endpoint()?.clone();

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let resources = GameResources::load(&config.data.resources_path).await?;
    let store = AppState::store_from_config(&config);
    let state = AppState::new(config.clone(), resources, store, shutdown_tx.clone());

    let coordinator = CoordinatorClient::connect(
        endpoint,
        config.server.node_id,
        config.server.name.clone(),
        config.server.max_packet_size,
        state.session_manager.clone(),
        shutdown_tx.subscribe(),
    )
    .await?;
    let state = Arc::new(state.with_coordinator(coordinator));

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!(
        node_id = config.server.node_id,
        name = %config.server.name,
        "World server listening on: {}",
        config.bind_address()
    );

    let accept_state = state.clone();
    let mut accept_shutdown_rx = shutdown_tx.subscribe();
    let accept_handle = tokio::spawn(async move {
        accept_connections(listener, accept_state, &mut accept_shutdown_rx).await;
    });

    info!("Server startup complete!");

    wait_for_shutdown(shutdown_tx.clone()).await;

    info!("Shutting down server...");
    let _ = accept_handle.await;

    // Session actors save their players on the way out
    state.session_manager.shutdown_all();
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    while state.session_manager.count() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    if state.session_manager.count() > 0 {
        warn!(
            sessions = state.session_manager.count(),
            "Sessions still open at shutdown"
        );
    }

    info!("Server shutdown complete. Goodbye!");
    Ok(())
}

/// Initialize the logging/tracing system
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,rhisis_server=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();
}

/// Accept incoming game client connections
async fn accept_connections(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        info!("New game connection from: {}", addr);
                        let handler = ConnectionHandler::new(state.clone());
                        tokio::spawn(async move {
                            if let Err(e) = handler.handle_tcp(stream, addr).await {
                                warn!("Game connection error from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept game connection: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Game connection acceptor shutting down");
                break;
            }
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Signal all tasks to shut down
    let _ = shutdown_tx.send(());
}
