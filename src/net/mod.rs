//! Networking module
//!
//! This module handles all network-related functionality for a world node:
//! - Length-prefixed framing of the TCP stream
//! - Little-endian packet buffers and their pool
//! - Session management and the per-session actor
//! - Connection lifecycle

pub mod buffer;
pub mod codec;
pub mod handler;
pub mod pool;
pub mod session;
