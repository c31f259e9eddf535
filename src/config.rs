//! Server configuration module
//!
//! Handles loading and parsing of world node and coordinator configuration
//! from TOML files and environment variables.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::RhisisError;
use crate::net::buffer::MAX_PACKET_SIZE;

/// World node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub server: WorldServerConfig,

    /// Cache coordinator endpoint; required by the world role
    #[serde(default)]
    pub coordinator: Option<CoordinatorEndpoint>,

    #[serde(default)]
    pub data: DataConfig,
}

/// Listener and session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldServerConfig {
    /// Node name reported to the coordinator
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Cluster-unique node id (non-zero)
    #[serde(default = "default_node_id")]
    pub node_id: u32,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_world_port")]
    pub port: u16,

    /// Largest accepted frame payload
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,

    /// Commands buffered per session before the reader waits
    #[serde(default = "default_inbound_queue_depth")]
    pub inbound_queue_depth: usize,

    /// Packets buffered per session before new ones are dropped
    #[serde(default = "default_outbound_queue_depth")]
    pub outbound_queue_depth: usize,

    #[serde(default = "default_max_connections_per_ip")]
    pub max_connections_per_ip: usize,

    /// Create unknown characters on join instead of rejecting them
    #[serde(default)]
    pub dev_mode: bool,
}

/// Where the cache coordinator listens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorEndpoint {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_coordinator_port")]
    pub port: u16,
}

impl CoordinatorEndpoint {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Design data and player storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_resources_path")]
    pub resources_path: PathBuf,

    /// Directory of per-player JSON files; players are kept in memory when unset
    #[serde(default)]
    pub players_path: Option<PathBuf>,
}

/// Cache coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_coordinator_port")]
    pub port: u16,

    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,

    /// Messages buffered per node before new ones are dropped
    #[serde(default = "default_outbound_queue_depth")]
    pub outbound_queue_depth: usize,
}

fn default_server_name() -> String {
    "world-1".to_string()
}

fn default_node_id() -> u32 {
    1
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_world_port() -> u16 {
    5400
}

fn default_coordinator_port() -> u16 {
    15000
}

fn default_max_packet_size() -> usize {
    MAX_PACKET_SIZE
}

fn default_inbound_queue_depth() -> usize {
    64
}

fn default_outbound_queue_depth() -> usize {
    256
}

fn default_max_connections_per_ip() -> usize {
    10
}

fn default_resources_path() -> PathBuf {
    PathBuf::from("data/resources")
}

impl Default for WorldServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            node_id: default_node_id(),
            host: default_host(),
            port: default_world_port(),
            max_packet_size: default_max_packet_size(),
            inbound_queue_depth: default_inbound_queue_depth(),
            outbound_queue_depth: default_outbound_queue_depth(),
            max_connections_per_ip: default_max_connections_per_ip(),
            dev_mode: false,
        }
    }
}

impl Default for CoordinatorEndpoint {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_coordinator_port(),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            resources_path: default_resources_path(),
            players_path: None,
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/coordinator.toml"),
            host: default_host(),
            port: default_coordinator_port(),
            max_packet_size: default_max_packet_size(),
            outbound_queue_depth: default_outbound_queue_depth(),
        }
    }
}

/// Read a TOML file, falling back to defaults when it does not exist
async fn read_toml<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if !path.exists() {
        tracing::warn!("Config file not found at {}, using defaults", path.display());
        return Ok(T::default());
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

impl ServerConfig {
    /// Load configuration from file and environment variables
    pub async fn load() -> Result<Self> {
        let config_path = env::var("RHISIS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/world-server.toml"));

        let mut config: Self = read_toml(&config_path).await?;
        config.config_path = config_path;
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("RHISIS_SERVER_NAME") {
            self.server.name = val;
        }
        if let Ok(val) = env::var("RHISIS_NODE_ID") {
            if let Ok(id) = val.parse() {
                self.server.node_id = id;
            }
        }
        if let Ok(val) = env::var("RHISIS_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = env::var("RHISIS_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }
        if let Ok(val) = env::var("RHISIS_DEV_MODE") {
            self.server.dev_mode = val == "1" || val.to_lowercase() == "true";
        }
        if let Ok(val) = env::var("RHISIS_COORDINATOR_HOST") {
            self.coordinator.get_or_insert_with(Default::default).host = val;
        }
        if let Ok(val) = env::var("RHISIS_COORDINATOR_PORT") {
            if let Ok(port) = val.parse() {
                self.coordinator.get_or_insert_with(Default::default).port = port;
            }
        }
        if let Ok(val) = env::var("RHISIS_RESOURCES_PATH") {
            self.data.resources_path = PathBuf::from(val);
        }
        if let Ok(val) = env::var("RHISIS_PLAYERS_PATH") {
            self.data.players_path = Some(PathBuf::from(val));
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.server.node_id == 0 {
            anyhow::bail!("Node ID must be non-zero");
        }

        if self.server.inbound_queue_depth == 0 || self.server.outbound_queue_depth == 0 {
            anyhow::bail!("Session queue depths must be at least 1");
        }

        if self.server.max_packet_size < 64 {
            anyhow::bail!("Max packet size must be at least 64 bytes");
        }

        Ok(())
    }

    /// Coordinator settings, which the world role cannot run without
    pub fn coordinator_endpoint(&self) -> crate::error::Result<&CoordinatorEndpoint> {
        self.coordinator.as_ref().ok_or_else(|| {
            RhisisError::ConfigurationMissing(format!(
                "[coordinator] section is missing from {}",
                self.config_path.display()
            ))
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl CoordinatorConfig {
    /// Load configuration from file and environment variables
    pub async fn load() -> Result<Self> {
        let config_path = env::var("RHISIS_COORDINATOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/coordinator.toml"));

        let mut config: Self = read_toml(&config_path).await?;
        config.config_path = config_path;

        if let Ok(val) = env::var("RHISIS_COORDINATOR_HOST") {
            config.host = val;
        }
        if let Ok(val) = env::var("RHISIS_COORDINATOR_PORT") {
            if let Ok(port) = val.parse() {
                config.port = port;
            }
        }

        if config.outbound_queue_depth == 0 {
            anyhow::bail!("Outbound queue depth must be at least 1");
        }

        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
