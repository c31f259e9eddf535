//! Coordinator protocol
//!
//! Messages exchanged between world nodes and the cache coordinator. They use
//! the same framing and header as client packets; the object id field is
//! unused and always [`NULL_OBJECT_ID`].

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::net::buffer::PacketBuffer;
use crate::net::pool::BufferPool;
use crate::protocol::packets::{PacketCodec, NULL_OBJECT_ID};

/// Coordinator opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CoordinatorOpcode {
    Handshake = 0x0C00_0001,
    HandshakeAck = 0x0C00_0002,
    Register = 0x0C00_0010,
    Deregister = 0x0C00_0011,
    Lookup = 0x0C00_0020,
    LookupResult = 0x0C00_0021,
    Forward = 0x0C00_0030,
    Push = 0x0C00_0031,
    Evict = 0x0C00_0040,
}

impl CoordinatorOpcode {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x0C00_0001 => Some(Self::Handshake),
            0x0C00_0002 => Some(Self::HandshakeAck),
            0x0C00_0010 => Some(Self::Register),
            0x0C00_0011 => Some(Self::Deregister),
            0x0C00_0020 => Some(Self::Lookup),
            0x0C00_0021 => Some(Self::LookupResult),
            0x0C00_0030 => Some(Self::Forward),
            0x0C00_0031 => Some(Self::Push),
            0x0C00_0040 => Some(Self::Evict),
            _ => None,
        }
    }
}

/// Node <-> coordinator message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorMessage {
    /// Node -> coordinator, first message on every connection
    Handshake { node_id: u32, name: String },
    /// Coordinator -> node
    HandshakeAck { accepted: bool, reason: String },
    /// Node -> coordinator: a player joined on this node
    Register { player_id: u32, name: String },
    /// Node -> coordinator: a player left this node
    Deregister { player_id: u32 },
    /// Node -> coordinator: which node hosts `player_id`?
    Lookup { request_id: u32, player_id: u32 },
    /// Coordinator -> node
    LookupResult {
        request_id: u32,
        node_id: Option<u32>,
    },
    /// Node -> coordinator: deliver a whisper to wherever the target is
    Forward {
        target_id: u32,
        from: String,
        message: String,
    },
    /// Coordinator -> node: a whisper for a player hosted here
    Push {
        target_id: u32,
        from: String,
        message: String,
    },
    /// Coordinator -> node: the player registered on another node
    Evict { player_id: u32 },
}

impl CoordinatorMessage {
    pub fn opcode(&self) -> CoordinatorOpcode {
        match self {
            Self::Handshake { .. } => CoordinatorOpcode::Handshake,
            Self::HandshakeAck { .. } => CoordinatorOpcode::HandshakeAck,
            Self::Register { .. } => CoordinatorOpcode::Register,
            Self::Deregister { .. } => CoordinatorOpcode::Deregister,
            Self::Lookup { .. } => CoordinatorOpcode::Lookup,
            Self::LookupResult { .. } => CoordinatorOpcode::LookupResult,
            Self::Forward { .. } => CoordinatorOpcode::Forward,
            Self::Push { .. } => CoordinatorOpcode::Push,
            Self::Evict { .. } => CoordinatorOpcode::Evict,
        }
    }

    pub fn encode(&self, pool: &BufferPool) -> Bytes {
        let mut buffer = PacketCodec::begin(pool, self.opcode() as u32, NULL_OBJECT_ID);

        match self {
            Self::Handshake { node_id, name } => {
                buffer.write_uint(*node_id);
                buffer.write_string(name);
            }
            Self::HandshakeAck { accepted, reason } => {
                buffer.write_bool(*accepted);
                buffer.write_string(reason);
            }
            Self::Register { player_id, name } => {
                buffer.write_uint(*player_id);
                buffer.write_string(name);
            }
            Self::Deregister { player_id } | Self::Evict { player_id } => {
                buffer.write_uint(*player_id);
            }
            Self::Lookup {
                request_id,
                player_id,
            } => {
                buffer.write_uint(*request_id);
                buffer.write_uint(*player_id);
            }
            Self::LookupResult {
                request_id,
                node_id,
            } => {
                buffer.write_uint(*request_id);
                buffer.write_bool(node_id.is_some());
                buffer.write_uint(node_id.unwrap_or(0));
            }
            Self::Forward {
                target_id,
                from,
                message,
            }
            | Self::Push {
                target_id,
                from,
                message,
            } => {
                buffer.write_uint(*target_id);
                buffer.write_string(from);
                buffer.write_string(message);
            }
        }

        buffer.to_bytes()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let (header, mut buffer) = PacketCodec::decode(payload)?;
        let opcode = CoordinatorOpcode::from_u32(header.opcode)
            .ok_or(ProtocolError::UnknownOpcode(header.opcode))?;
        let buffer = &mut buffer;

        let message = match opcode {
            CoordinatorOpcode::Handshake => Self::Handshake {
                node_id: buffer.read_uint()?,
                name: buffer.read_string()?,
            },
            CoordinatorOpcode::HandshakeAck => Self::HandshakeAck {
                accepted: buffer.read_bool()?,
                reason: buffer.read_string()?,
            },
            CoordinatorOpcode::Register => Self::Register {
                player_id: buffer.read_uint()?,
                name: buffer.read_string()?,
            },
            CoordinatorOpcode::Deregister => Self::Deregister {
                player_id: buffer.read_uint()?,
            },
            CoordinatorOpcode::Lookup => Self::Lookup {
                request_id: buffer.read_uint()?,
                player_id: buffer.read_uint()?,
            },
            CoordinatorOpcode::LookupResult => {
                let request_id = buffer.read_uint()?;
                let found = buffer.read_bool()?;
                let node_id = buffer.read_uint()?;
                Self::LookupResult {
                    request_id,
                    node_id: found.then_some(node_id),
                }
            }
            CoordinatorOpcode::Forward => {
                let (target_id, from, message) = read_whisper(buffer)?;
                Self::Forward {
                    target_id,
                    from,
                    message,
                }
            }
            CoordinatorOpcode::Push => {
                let (target_id, from, message) = read_whisper(buffer)?;
                Self::Push {
                    target_id,
                    from,
                    message,
                }
            }
            CoordinatorOpcode::Evict => Self::Evict {
                player_id: buffer.read_uint()?,
            },
        };

        Ok(message)
    }
}

fn read_whisper(buffer: &mut PacketBuffer) -> Result<(u32, String, String), ProtocolError> {
    Ok((buffer.read_uint()?, buffer.read_string()?, buffer.read_string()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_result_layout() {
        let pool = BufferPool::new(1);
        let bytes = CoordinatorMessage::LookupResult {
            request_id: 3,
            node_id: Some(2),
        }
        .encode(&pool);

        assert_eq!(
            &bytes[8..],
            &[3, 0, 0, 0, 1, 2, 0, 0, 0],
        );
    }

    #[test]
    fn test_messages_decode() {
        let pool = BufferPool::new(1);
        let messages = [
            CoordinatorMessage::Handshake {
                node_id: 1,
                name: "world-1".to_string(),
            },
            CoordinatorMessage::LookupResult {
                request_id: 9,
                node_id: None,
            },
            CoordinatorMessage::Push {
                target_id: 4,
                from: "Alice".to_string(),
                message: "hi there".to_string(),
            },
        ];

        for message in messages {
            assert_eq!(
                CoordinatorMessage::decode(&message.encode(&pool)).unwrap(),
                message
            );
        }
    }

    #[test]
    fn test_client_opcode_rejected() {
        let mut buffer = PacketBuffer::new();
        buffer.write_uint(0x0000_FF00);
        buffer.write_uint(NULL_OBJECT_ID);

        assert!(matches!(
            CoordinatorMessage::decode(buffer.as_bytes()),
            Err(ProtocolError::UnknownOpcode(0x0000_FF00))
        ));
    }
}
