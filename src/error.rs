//! Error handling module
//!
//! Defines custom error types for the Rhisis world node and coordinator.

use std::io;

use thiserror::Error;

/// Main error type for the Rhisis server
#[derive(Error, Debug)]
pub enum RhisisError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Game logic errors
    #[error("Game error: {0}")]
    Game(#[from] GameError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Design data or player data could not be (de)serialized
    #[error("Data error: {0}")]
    Data(#[from] serde_json::Error),

    /// Required connection settings are absent; fatal to the affected server role
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),
}

/// Network-specific errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Session not found: {0}")]
    SessionNotFound(u64),

    #[error("Too many connections from {0}")]
    TooManyConnections(String),

    #[error("Session inbound queue full: {0}")]
    InboundQueueFull(u64),

    #[error("Write buffer full")]
    WriteBufferFull,

    #[error("Coordinator unavailable")]
    CoordinatorUnavailable,

    #[error("Coordinator handshake rejected: {0}")]
    HandshakeRejected(String),
}

/// Protocol-specific errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid frame header: 0x{0:02X}")]
    InvalidHeader(u8),

    #[error("Unknown opcode: 0x{0:08X}")]
    UnknownOpcode(u32),

    #[error("Unexpected end of packet: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("Packet too large: {size} bytes (max: {max})")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Invalid string length: {0}")]
    InvalidStringLength(i32),

    #[error("Invalid string encoding")]
    InvalidStringEncoding,

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Unexpected packet 0x{opcode:08X} in state {state}")]
    UnexpectedPacket { state: String, opcode: u32 },
}

/// Game logic errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    /// A required argument was undefined
    #[error("Validation error: {0}")]
    Validation(String),

    /// The entity already exists where it must be unique
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A recognized game feature that is not implemented yet
    #[error("Unimplemented feature: {0}")]
    Unimplemented(&'static str),

    #[error("Quest not found: {0}")]
    QuestNotFound(i32),

    /// The diary cannot describe another quest on the wire
    #[error("Quest diary is full: {0} quests")]
    DiaryFull(usize),
}

/// Result type alias for Rhisis operations
pub type Result<T> = std::result::Result<T, RhisisError>;
