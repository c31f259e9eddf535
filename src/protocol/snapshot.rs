//! Snapshot module
//!
//! Snapshots are the client-bound state changes. They travel inside a
//! SNAPSHOT packet:
//!
//! ```text
//! [Opcode 0xFFFFFF00] [Recipient object id] [Count u16]
//!   [Object id u32] [Snapshot type u16] [Fields...]   (repeated Count times)
//! ```
//!
//! A [`SnapshotWriter`] holds a pooled buffer for its whole life and returns
//! it to the pool when dropped, whether or not the packet was finished.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::ProtocolError;
use crate::game::item::ItemRecord;
use crate::game::quest::QuestRecord;
use crate::game::quest_diary::QuestDiaryRecord;
use crate::net::buffer::PacketBuffer;
use crate::net::pool::{BufferPool, PooledBuffer};
use crate::protocol::packets::{Opcode, PacketCodec, WireRecord};

/// Snapshot type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SnapshotType {
    /// Localized text with parameters
    DefinedText = 0x0100,
    /// Localized text without parameters
    DefinedText1 = 0x0101,
    SetQuest = 0x0200,
    QuestDiary = 0x0201,
    CreateItem = 0x0300,
    UpdateItem = 0x0301,
    SetGold = 0x0400,
    SetExperience = 0x0401,
    SetStatistics = 0x0402,
    SetSkillPoints = 0x0403,
    SystemMessage = 0x0500,
    Whisper = 0x0501,
}

impl SnapshotType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0100 => Some(Self::DefinedText),
            0x0101 => Some(Self::DefinedText1),
            0x0200 => Some(Self::SetQuest),
            0x0201 => Some(Self::QuestDiary),
            0x0300 => Some(Self::CreateItem),
            0x0301 => Some(Self::UpdateItem),
            0x0400 => Some(Self::SetGold),
            0x0401 => Some(Self::SetExperience),
            0x0402 => Some(Self::SetStatistics),
            0x0403 => Some(Self::SetSkillPoints),
            0x0500 => Some(Self::SystemMessage),
            0x0501 => Some(Self::Whisper),
            _ => None,
        }
    }
}

/// Ids of client-side localized texts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DefineText {
    /// "Quest {title} started"
    QuestStarted = 0x0000_0101,
    /// "Quest {title} completed"
    QuestEnded = 0x0000_0102,
    /// Not enough inventory space for the quest rewards
    QuestNoInventorySpace = 0x0000_0103,
    /// "You received {item}"
    ItemReceived = 0x0000_0201,
    /// Whisper target is not online
    WhisperTargetOffline = 0x0000_0301,
}

impl DefineText {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x0000_0101 => Some(Self::QuestStarted),
            0x0000_0102 => Some(Self::QuestEnded),
            0x0000_0103 => Some(Self::QuestNoInventorySpace),
            0x0000_0201 => Some(Self::ItemReceived),
            0x0000_0301 => Some(Self::WhisperTargetOffline),
            _ => None,
        }
    }
}

/// Character statistics as sent to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatisticsRecord {
    pub strength: u16,
    pub stamina: u16,
    pub dexterity: u16,
    pub intelligence: u16,
    pub available_points: u16,
}

impl WireRecord for StatisticsRecord {
    fn write_record(&self, buffer: &mut PacketBuffer) {
        buffer.write_ushort(self.strength);
        buffer.write_ushort(self.stamina);
        buffer.write_ushort(self.dexterity);
        buffer.write_ushort(self.intelligence);
        buffer.write_ushort(self.available_points);
    }

    fn read_record(buffer: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        Ok(Self {
            strength: buffer.read_ushort()?,
            stamina: buffer.read_ushort()?,
            dexterity: buffer.read_ushort()?,
            intelligence: buffer.read_ushort()?,
            available_points: buffer.read_ushort()?,
        })
    }
}

/// One client-bound state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    DefinedText {
        text: DefineText,
        parameters: Vec<String>,
    },
    SetQuest(QuestRecord),
    QuestDiary(QuestDiaryRecord),
    CreateItem {
        slot: u8,
        item: ItemRecord,
    },
    /// Quantity 0 means the slot was emptied
    UpdateItem {
        slot: u8,
        quantity: i16,
    },
    SetGold {
        gold: i32,
    },
    SetExperience {
        level: u16,
        experience: i64,
    },
    SetStatistics(StatisticsRecord),
    SetSkillPoints {
        skill_points: u16,
    },
    SystemMessage {
        text: String,
    },
    Whisper {
        from: String,
        message: String,
    },
}

impl Snapshot {
    /// Localized text snapshot
    pub fn defined_text(text: DefineText, parameters: Vec<String>) -> Self {
        Self::DefinedText { text, parameters }
    }

    /// Wire tag; parameterless texts use the defaults variant
    pub fn snapshot_type(&self) -> SnapshotType {
        match self {
            Self::DefinedText { parameters, .. } if parameters.is_empty() => {
                SnapshotType::DefinedText1
            }
            Self::DefinedText { .. } => SnapshotType::DefinedText,
            Self::SetQuest(_) => SnapshotType::SetQuest,
            Self::QuestDiary(_) => SnapshotType::QuestDiary,
            Self::CreateItem { .. } => SnapshotType::CreateItem,
            Self::UpdateItem { .. } => SnapshotType::UpdateItem,
            Self::SetGold { .. } => SnapshotType::SetGold,
            Self::SetExperience { .. } => SnapshotType::SetExperience,
            Self::SetStatistics(_) => SnapshotType::SetStatistics,
            Self::SetSkillPoints { .. } => SnapshotType::SetSkillPoints,
            Self::SystemMessage { .. } => SnapshotType::SystemMessage,
            Self::Whisper { .. } => SnapshotType::Whisper,
        }
    }

    /// Append the snapshot fields (without the object id / type prefix)
    pub fn encode(&self, buffer: &mut PacketBuffer) {
        match self {
            Self::DefinedText { text, parameters } => {
                buffer.write_uint(*text as u32);
                buffer.write_string(&parameters.join(" "));
            }
            Self::SetQuest(record) => record.write_record(buffer),
            Self::QuestDiary(record) => record.write_record(buffer),
            Self::CreateItem { slot, item } => {
                buffer.write_ubyte(*slot);
                item.write_record(buffer);
            }
            Self::UpdateItem { slot, quantity } => {
                buffer.write_ubyte(*slot);
                buffer.write_short(*quantity);
            }
            Self::SetGold { gold } => buffer.write_int(*gold),
            Self::SetExperience { level, experience } => {
                buffer.write_ushort(*level);
                buffer.write_long(*experience);
            }
            Self::SetStatistics(record) => record.write_record(buffer),
            Self::SetSkillPoints { skill_points } => buffer.write_ushort(*skill_points),
            Self::SystemMessage { text } => buffer.write_string(text),
            Self::Whisper { from, message } => {
                buffer.write_string(from);
                buffer.write_string(message);
            }
        }
    }

    /// Read the fields of a snapshot of the given type
    pub fn decode(kind: SnapshotType, buffer: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        let snapshot = match kind {
            SnapshotType::DefinedText | SnapshotType::DefinedText1 => {
                let id = buffer.read_uint()?;
                let text = DefineText::from_u32(id).ok_or_else(|| {
                    ProtocolError::MalformedPacket(format!("unknown text id {id:#x}"))
                })?;
                let joined = buffer.read_string()?;
                let parameters = if kind == SnapshotType::DefinedText1 {
                    Vec::new()
                } else {
                    joined.split(' ').map(str::to_string).collect()
                };
                Self::DefinedText { text, parameters }
            }
            SnapshotType::SetQuest => Self::SetQuest(QuestRecord::read_record(buffer)?),
            SnapshotType::QuestDiary => Self::QuestDiary(QuestDiaryRecord::read_record(buffer)?),
            SnapshotType::CreateItem => Self::CreateItem {
                slot: buffer.read_ubyte()?,
                item: ItemRecord::read_record(buffer)?,
            },
            SnapshotType::UpdateItem => Self::UpdateItem {
                slot: buffer.read_ubyte()?,
                quantity: buffer.read_short()?,
            },
            SnapshotType::SetGold => Self::SetGold {
                gold: buffer.read_int()?,
            },
            SnapshotType::SetExperience => Self::SetExperience {
                level: buffer.read_ushort()?,
                experience: buffer.read_long()?,
            },
            SnapshotType::SetStatistics => {
                Self::SetStatistics(StatisticsRecord::read_record(buffer)?)
            }
            SnapshotType::SetSkillPoints => Self::SetSkillPoints {
                skill_points: buffer.read_ushort()?,
            },
            SnapshotType::SystemMessage => Self::SystemMessage {
                text: buffer.read_string()?,
            },
            SnapshotType::Whisper => Self::Whisper {
                from: buffer.read_string()?,
                message: buffer.read_string()?,
            },
        };
        Ok(snapshot)
    }
}

/// Builds one SNAPSHOT packet out of one or more snapshots
#[derive(Debug)]
pub struct SnapshotWriter {
    buffer: PooledBuffer,
    count_position: usize,
    count: u16,
}

impl SnapshotWriter {
    /// Start a packet addressed to `recipient`
    pub fn new(pool: &BufferPool, recipient: u32) -> Self {
        let mut buffer = PacketCodec::begin(pool, Opcode::Snapshot.as_u32(), recipient);
        let count_position = buffer.write_position();
        buffer.write_ushort(0);
        Self {
            buffer,
            count_position,
            count: 0,
        }
    }

    /// Append a snapshot about `object_id`
    pub fn push(&mut self, object_id: u32, snapshot: &Snapshot) -> &mut Self {
        self.buffer.write_uint(object_id);
        self.buffer.write_ushort(snapshot.snapshot_type() as u16);
        snapshot.encode(&mut self.buffer);
        self.count += 1;
        self
    }

    pub fn len(&self) -> u16 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Patch the count and hand the bytes to the transport
    pub fn finish(mut self) -> Bytes {
        let position = self.count_position;
        let count = self.count;
        self.buffer.patch_ushort(position, count);
        self.buffer.to_bytes()
    }
}

/// A decoded SNAPSHOT packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPacket {
    pub recipient: u32,
    pub snapshots: Vec<(u32, Snapshot)>,
}

impl SnapshotPacket {
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let (header, mut buffer) = PacketCodec::decode(payload)?;
        if header.opcode != Opcode::Snapshot.as_u32() {
            return Err(ProtocolError::UnexpectedPacket {
                state: "snapshot".to_string(),
                opcode: header.opcode,
            });
        }

        let count = buffer.read_ushort()?;
        let mut snapshots = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let object_id = buffer.read_uint()?;
            let tag = buffer.read_ushort()?;
            let kind = SnapshotType::from_u16(tag).ok_or_else(|| {
                ProtocolError::MalformedPacket(format!("unknown snapshot type {tag:#06x}"))
            })?;
            snapshots.push((object_id, Snapshot::decode(kind, &mut buffer)?));
        }

        Ok(Self {
            recipient: header.object_id,
            snapshots,
        })
    }
}

/// Client-bound channel of one player
#[derive(Debug, Clone)]
pub struct Outbox {
    pool: BufferPool,
    sender: Option<mpsc::Sender<Bytes>>,
}

impl Outbox {
    pub fn new(pool: BufferPool, sender: mpsc::Sender<Bytes>) -> Self {
        Self {
            pool,
            sender: Some(sender),
        }
    }

    /// An outbox that discards everything (offline processing)
    pub fn detached(pool: BufferPool) -> Self {
        Self { pool, sender: None }
    }

    /// Convenience for tests and tools: an outbox with its receiving end
    pub fn channel(pool: BufferPool, capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(pool, tx), rx)
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Send a single snapshot about `object_id` to `recipient`
    pub fn send(&self, recipient: u32, object_id: u32, snapshot: &Snapshot) {
        let mut writer = SnapshotWriter::new(&self.pool, recipient);
        writer.push(object_id, snapshot);
        self.send_bytes(writer.finish());
    }

    /// Queue an encoded packet for the writer task
    pub fn send_bytes(&self, bytes: Bytes) {
        let Some(sender) = &self.sender else {
            return;
        };

        match sender.try_send(bytes) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Outbound queue full, dropping packet");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Outbound queue closed, dropping packet");
            }
        }
    }
}
