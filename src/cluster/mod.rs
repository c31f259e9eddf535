//! Cluster module
//!
//! World nodes coordinate through a single cache coordinator:
//! - `protocol` - Node <-> coordinator messages
//! - `server` - The coordinator itself
//! - `client` - The node side of the connection, with reconnects

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{CoordinatorClient, ReconnectPolicy};
pub use protocol::{CoordinatorMessage, CoordinatorOpcode};
pub use server::{CoordinatorRegistry, CoordinatorServer};
