//! Protocol module
//!
//! Client-facing wire formats:
//! - `packets` - Opcodes, packet header and client commands
//! - `snapshot` - Batched state updates sent to clients

pub mod packets;
pub mod snapshot;
