//! Application state module
//!
//! Contains the shared state used across all client connections of a world node.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::cluster::CoordinatorClient;
use crate::config::ServerConfig;
use crate::game::persistence::PlayerStore;
use crate::game::resources::GameResources;
use crate::net::pool::BufferPool;
use crate::net::session::SessionManager;

/// Application state shared across all connections
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Session manager for tracking connected clients
    pub session_manager: Arc<SessionManager>,
    /// Design data (items, quests, texts)
    pub resources: Arc<GameResources>,
    /// Player storage
    pub store: PlayerStore,
    /// Outbound packet buffers
    pub pool: BufferPool,
    /// Cache coordinator connection (None only in tests)
    pub coordinator: Option<CoordinatorClient>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Create the state without a coordinator connection
    pub fn new(
        config: ServerConfig,
        resources: GameResources,
        store: PlayerStore,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        let session_manager = Arc::new(SessionManager::with_limits(
            config.server.max_connections_per_ip,
        ));

        if config.server.dev_mode {
            info!(
                "World node running in DEVELOPMENT mode - unknown characters are created on join"
            );
        }

        Self {
            config,
            session_manager,
            resources: Arc::new(resources),
            store,
            pool: BufferPool::new(64),
            coordinator: None,
            shutdown_tx,
        }
    }

    /// Attach the coordinator connection
    pub fn with_coordinator(mut self, coordinator: CoordinatorClient) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Create the player store configured in `[data]`
    pub fn store_from_config(config: &ServerConfig) -> PlayerStore {
        match &config.data.players_path {
            Some(path) => {
                info!(path = %path.display(), "Persisting players as JSON files");
                PlayerStore::json(path.clone())
            }
            None => {
                info!("No players path configured, players are kept in memory");
                PlayerStore::memory()
            }
        }
    }
}
