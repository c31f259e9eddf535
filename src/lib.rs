//! Rhisis Server Library
//!
//! Core of a Rhisis cluster: world nodes hosting player sessions, and the
//! cache coordinator that tells nodes where every player lives.
//!
//! ## Modules
//!
//! - `cluster` - Cache coordinator server, client and wire messages
//! - `config` - Server configuration management
//! - `error` - Error types and result definitions
//! - `game` - Players, inventory, quests and design data
//! - `net` - Framing, buffers, sessions and connection handling
//! - `protocol` - Client packets and snapshots

pub mod cluster;
pub mod config;
pub mod error;
pub mod game;
pub mod net;
pub mod protocol;
pub mod state;

// Re-export commonly used types
pub use config::ServerConfig;
pub use error::{Result, RhisisError};
pub use state::AppState;

/// Server version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
