//! Packet definitions module
//!
//! Every payload (after framing) starts with the same header:
//!
//! ```text
//! [Opcode u32 LE] [Object id u32 LE] [Fields...]
//! ```
//!
//! Fields are positional. A packet's field order is append-only and consumers
//! read by position, so the order written by [`OutgoingPacket::encode`] is part
//! of the wire contract.

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::net::buffer::PacketBuffer;
use crate::net::pool::{BufferPool, PooledBuffer};

/// Object id used by packets that are not addressed to an entity
pub const NULL_OBJECT_ID: u32 = 0xFFFF_FFFF;

/// Size of the opcode + object id header
pub const PACKET_HEADER_SIZE: usize = 8;

/// Packet opcodes exchanged with game clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    /// Client -> server: enter the world with a character
    Join = 0x0000_FF00,
    /// Server -> client: join outcome
    JoinResult = 0x0000_FF01,
    /// Client -> server: keep-alive
    Ping = 0x0000_0014,
    /// Server -> client: keep-alive answer
    Pong = 0x0000_0015,
    /// Client -> server: leave the world
    Logout = 0x0000_00FF,
    /// Client -> server: accept a quest offered by an NPC
    QuestAccept = 0x00FF_0301,
    /// Client -> server: hand in a quest
    QuestComplete = 0x00FF_0302,
    /// Client -> server: abandon a quest
    QuestRemove = 0x00FF_0303,
    /// Client -> server: pin/unpin a quest in the tracker
    QuestCheck = 0x00FF_0304,
    /// Client -> server: private message to a player on any node
    Whisper = 0x00FF_0401,
    /// Server -> client: batch of snapshots
    Snapshot = 0xFFFF_FF00,
}

impl Opcode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x0000_FF00 => Some(Self::Join),
            0x0000_FF01 => Some(Self::JoinResult),
            0x0000_0014 => Some(Self::Ping),
            0x0000_0015 => Some(Self::Pong),
            0x0000_00FF => Some(Self::Logout),
            0x00FF_0301 => Some(Self::QuestAccept),
            0x00FF_0302 => Some(Self::QuestComplete),
            0x00FF_0303 => Some(Self::QuestRemove),
            0x00FF_0304 => Some(Self::QuestCheck),
            0x00FF_0401 => Some(Self::Whisper),
            0xFFFF_FF00 => Some(Self::Snapshot),
            _ => None,
        }
    }
}

/// Decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub opcode: u32,
    pub object_id: u32,
}

/// A nested record written inline inside a packet
pub trait WireRecord: Sized {
    /// Append the record's fields in declaration order
    fn write_record(&self, buffer: &mut PacketBuffer);

    /// Read the record back from the current cursor position
    fn read_record(buffer: &mut PacketBuffer) -> Result<Self, ProtocolError>;
}

/// Incoming packet trait
pub trait IncomingPacket: Sized {
    /// The packet opcode
    const OPCODE: Opcode;

    /// Decode the packet body from the field cursor
    fn decode(buffer: &mut PacketBuffer) -> Result<Self, ProtocolError>;
}

/// Outgoing packet trait
pub trait OutgoingPacket {
    /// The packet opcode
    const OPCODE: Opcode;

    /// Append the packet fields in wire order
    fn encode(&self, buffer: &mut PacketBuffer);
}

/// Header encode / decode shared by client and coordinator packets
pub struct PacketCodec;

impl PacketCodec {
    /// Acquire a pooled buffer with the header already written
    pub fn begin(pool: &BufferPool, opcode: u32, object_id: u32) -> PooledBuffer {
        let mut buffer = pool.acquire();
        buffer.write_uint(opcode);
        buffer.write_uint(object_id);
        buffer
    }

    /// Encode an outgoing packet addressed to `object_id`
    pub fn encode<P: OutgoingPacket>(pool: &BufferPool, object_id: u32, packet: &P) -> Bytes {
        let mut buffer = Self::begin(pool, P::OPCODE.as_u32(), object_id);
        packet.encode(&mut buffer);
        buffer.to_bytes()
    }

    /// Split a payload into its header and a cursor over the fields
    pub fn decode(payload: &[u8]) -> Result<(PacketHeader, PacketBuffer), ProtocolError> {
        let mut buffer = PacketBuffer::from_bytes(payload);
        let opcode = buffer.read_uint()?;
        let object_id = buffer.read_uint()?;
        Ok((PacketHeader { opcode, object_id }, buffer))
    }
}

// ============ Incoming Packets ============

/// Enter the world (opcode JOIN)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPacket {
    pub player_id: u32,
}

impl IncomingPacket for JoinPacket {
    const OPCODE: Opcode = Opcode::Join;

    fn decode(buffer: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        Ok(Self {
            player_id: buffer.read_uint()?,
        })
    }
}

/// Keep-alive (opcode PING)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingPacket {
    pub time: i32,
}

impl IncomingPacket for PingPacket {
    const OPCODE: Opcode = Opcode::Ping;

    fn decode(buffer: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        Ok(Self {
            time: buffer.read_int()?,
        })
    }
}

/// Quest commands all carry a single quest id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestCommandPacket {
    pub quest_id: i32,
}

impl QuestCommandPacket {
    fn decode(buffer: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        Ok(Self {
            quest_id: buffer.read_int()?,
        })
    }
}

/// Private message (opcode WHISPER)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhisperPacket {
    pub target_id: u32,
    pub message: String,
}

impl IncomingPacket for WhisperPacket {
    const OPCODE: Opcode = Opcode::Whisper;

    fn decode(buffer: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        Ok(Self {
            target_id: buffer.read_uint()?,
            message: buffer.read_string()?,
        })
    }
}

/// Every packet a game client may send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPacket {
    Join(JoinPacket),
    Ping(PingPacket),
    Logout,
    QuestAccept(QuestCommandPacket),
    QuestComplete(QuestCommandPacket),
    QuestRemove(QuestCommandPacket),
    QuestCheck(QuestCommandPacket),
    Whisper(WhisperPacket),
}

impl ClientPacket {
    /// Decode a full payload (header included)
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let (header, mut buffer) = PacketCodec::decode(payload)?;
        let opcode = Opcode::from_u32(header.opcode)
            .ok_or(ProtocolError::UnknownOpcode(header.opcode))?;

        let packet = match opcode {
            Opcode::Join => Self::Join(JoinPacket::decode(&mut buffer)?),
            Opcode::Ping => Self::Ping(PingPacket::decode(&mut buffer)?),
            Opcode::Logout => Self::Logout,
            Opcode::QuestAccept => Self::QuestAccept(QuestCommandPacket::decode(&mut buffer)?),
            Opcode::QuestComplete => {
                Self::QuestComplete(QuestCommandPacket::decode(&mut buffer)?)
            }
            Opcode::QuestRemove => Self::QuestRemove(QuestCommandPacket::decode(&mut buffer)?),
            Opcode::QuestCheck => Self::QuestCheck(QuestCommandPacket::decode(&mut buffer)?),
            Opcode::Whisper => Self::Whisper(WhisperPacket::decode(&mut buffer)?),
            Opcode::JoinResult | Opcode::Pong | Opcode::Snapshot => {
                return Err(ProtocolError::UnexpectedPacket {
                    state: "client".to_string(),
                    opcode: header.opcode,
                })
            }
        };

        Ok(packet)
    }

    /// Encode as a client would; used by tools and tests
    pub fn encode(&self, pool: &BufferPool) -> Bytes {
        let mut buffer = PacketCodec::begin(pool, self.opcode().as_u32(), NULL_OBJECT_ID);

        match self {
            Self::Join(p) => buffer.write_uint(p.player_id),
            Self::Ping(p) => buffer.write_int(p.time),
            Self::Logout => {}
            Self::QuestAccept(p)
            | Self::QuestComplete(p)
            | Self::QuestRemove(p)
            | Self::QuestCheck(p) => buffer.write_int(p.quest_id),
            Self::Whisper(p) => {
                buffer.write_uint(p.target_id);
                buffer.write_string(&p.message);
            }
        }

        buffer.to_bytes()
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Join(_) => Opcode::Join,
            Self::Ping(_) => Opcode::Ping,
            Self::Logout => Opcode::Logout,
            Self::QuestAccept(_) => Opcode::QuestAccept,
            Self::QuestComplete(_) => Opcode::QuestComplete,
            Self::QuestRemove(_) => Opcode::QuestRemove,
            Self::QuestCheck(_) => Opcode::QuestCheck,
            Self::Whisper(_) => Opcode::Whisper,
        }
    }
}

// ============ Outgoing Packets ============

/// Join outcome codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JoinResult {
    Success = 0,
    UnknownCharacter = 1,
    AlreadyConnected = 2,
    ServerError = 3,
}

impl JoinResult {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Success),
            1 => Some(Self::UnknownCharacter),
            2 => Some(Self::AlreadyConnected),
            3 => Some(Self::ServerError),
            _ => None,
        }
    }
}

/// Join outcome (opcode JOIN_RESULT); the header carries the assigned object id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinResultPacket {
    pub result: JoinResult,
}

impl OutgoingPacket for JoinResultPacket {
    const OPCODE: Opcode = Opcode::JoinResult;

    fn encode(&self, buffer: &mut PacketBuffer) {
        buffer.write_ubyte(self.result as u8);
    }
}

/// Keep-alive answer (opcode PONG)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PongPacket {
    pub time: i32,
}

impl OutgoingPacket for PongPacket {
    const OPCODE: Opcode = Opcode::Pong;

    fn encode(&self, buffer: &mut PacketBuffer) {
        buffer.write_int(self.time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let pool = BufferPool::new(1);
        let bytes = PacketCodec::encode(&pool, 7, &PongPacket { time: 42 });

        assert_eq!(
            &bytes[..],
            &[0x15, 0, 0, 0, 7, 0, 0, 0, 42, 0, 0, 0],
        );
    }

    #[test]
    fn test_decode_header_and_cursor() {
        let pool = BufferPool::new(1);
        let bytes = PacketCodec::encode(
            &pool,
            NULL_OBJECT_ID,
            &JoinResultPacket {
                result: JoinResult::AlreadyConnected,
            },
        );

        let (header, mut cursor) = PacketCodec::decode(&bytes).unwrap();
        assert_eq!(header.opcode, Opcode::JoinResult.as_u32());
        assert_eq!(header.object_id, NULL_OBJECT_ID);
        assert_eq!(
            JoinResult::from_u8(cursor.read_ubyte().unwrap()),
            Some(JoinResult::AlreadyConnected)
        );
        assert!(!cursor.has_remaining());
    }

    #[test]
    fn test_client_packet_decode() {
        let pool = BufferPool::new(1);
        let whisper = ClientPacket::Whisper(WhisperPacket {
            target_id: 9,
            message: "hello".to_string(),
        });

        let decoded = ClientPacket::decode(&whisper.encode(&pool)).unwrap();
        assert_eq!(decoded, whisper);
    }

    #[test]
    fn test_unknown_opcode() {
        let mut buffer = PacketBuffer::new();
        buffer.write_uint(0x1234_5678);
        buffer.write_uint(NULL_OBJECT_ID);

        assert!(matches!(
            ClientPacket::decode(buffer.as_bytes()),
            Err(ProtocolError::UnknownOpcode(0x1234_5678))
        ));
    }

    #[test]
    fn test_truncated_packet() {
        let mut buffer = PacketBuffer::new();
        buffer.write_uint(Opcode::QuestAccept.as_u32());
        buffer.write_uint(NULL_OBJECT_ID);
        buffer.write_short(1);

        assert!(matches!(
            ClientPacket::decode(buffer.as_bytes()),
            Err(ProtocolError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_server_opcode_from_client_rejected() {
        let pool = BufferPool::new(1);
        let bytes = PacketCodec::encode(&pool, 1, &PongPacket { time: 1 });

        assert!(matches!(
            ClientPacket::decode(&bytes),
            Err(ProtocolError::UnexpectedPacket { .. })
        ));
    }

    #[test]
    fn test_opcode_round_trip() {
        for opcode in [Opcode::Join, Opcode::QuestCheck, Opcode::Snapshot] {
            assert_eq!(Opcode::from_u32(opcode.as_u32()), Some(opcode));
        }
        assert_eq!(Opcode::from_u32(0), None);
    }
}
