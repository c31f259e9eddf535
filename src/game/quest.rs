//! Quest definitions module
//!
//! This module contains quest design data and per-player quest state:
//! - Quest properties (start requirements, end conditions, rewards)
//! - Quest instances tracked by a player's diary
//! - The fixed-layout wire record sent to clients

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::game::item::{ElementType, ItemId};
use crate::game::player::{Gender, JobId};
use crate::net::buffer::PacketBuffer;
use crate::protocol::packets::WireRecord;

/// Quest identifier from the design data
pub type QuestId = i32;

/// Number of monster kill counters carried by a quest
pub const MAX_QUEST_MONSTERS: usize = 2;

/// Gender restriction on a quest item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenderType {
    #[default]
    Any,
    Male,
    Female,
}

impl GenderType {
    /// Whether an item with this restriction applies to `gender`
    pub fn matches(self, gender: Gender) -> bool {
        match self {
            Self::Any => true,
            Self::Male => gender == Gender::Male,
            Self::Female => gender == Gender::Female,
        }
    }
}

fn default_quantity() -> i16 {
    1
}

/// An item required by or granted by a quest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestItem {
    pub id: ItemId,
    #[serde(default = "default_quantity")]
    pub quantity: i16,
    #[serde(default)]
    pub gender: GenderType,
    /// End condition items flagged here are taken on completion
    #[serde(default)]
    pub remove: bool,
    #[serde(default)]
    pub refine: u8,
    #[serde(default)]
    pub element: ElementType,
    #[serde(default)]
    pub element_refine: u8,
}

impl QuestItem {
    pub fn new(id: ItemId, quantity: i16) -> Self {
        Self {
            id,
            quantity,
            gender: GenderType::Any,
            remove: false,
            refine: 0,
            element: ElementType::None,
            element_refine: 0,
        }
    }
}

/// Monster kill objective
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestMonster {
    pub id: i32,
    pub amount: i16,
}

/// Conditions a player must meet to accept a quest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestStartRequirements {
    pub min_level: u16,
    pub max_level: u16,
    pub previous_quest: Option<QuestId>,
    /// Empty means any job
    pub jobs: Vec<JobId>,
}

impl Default for QuestStartRequirements {
    fn default() -> Self {
        Self {
            min_level: 1,
            max_level: u16::MAX,
            previous_quest: None,
            jobs: Vec::new(),
        }
    }
}

/// Objectives of a quest
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestEndConditions {
    pub items: Vec<QuestItem>,
    pub monsters: Vec<QuestMonster>,
    pub patrol_zone: Option<u32>,
    pub dialog_npc: Option<String>,
}

/// What the player receives on completion
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestRewards {
    pub items: Vec<QuestItem>,
    pub gold: i32,
    pub experience: i64,
    pub job: Option<JobId>,
    pub restat: bool,
    pub reskill: bool,
    pub skill_points: u16,
}

impl QuestRewards {
    /// Reward items that apply to a character of `gender`
    pub fn items_for(&self, gender: Gender) -> impl Iterator<Item = &QuestItem> {
        self.items
            .iter()
            .filter(move |item| item.gender.matches(gender))
    }
}

/// Quest design data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestProperties {
    pub id: QuestId,
    /// Text key of the localized title
    pub title: String,
    #[serde(default)]
    pub start_requirements: QuestStartRequirements,
    #[serde(default)]
    pub end_conditions: QuestEndConditions,
    #[serde(default)]
    pub rewards: QuestRewards,
    /// Seconds; 0 means no limit
    #[serde(default)]
    pub time_limit: i16,
}

impl QuestProperties {
    pub fn new(id: QuestId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            start_requirements: QuestStartRequirements::default(),
            end_conditions: QuestEndConditions::default(),
            rewards: QuestRewards::default(),
            time_limit: 0,
        }
    }
}

/// Quest progress state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum QuestState {
    #[default]
    Active = 0,
    Completed = 14,
}

impl QuestState {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Active),
            14 => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Game events that advance quest objectives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestAction {
    KillMonster { monster_id: i32 },
    Patrol { zone_id: u32 },
    Dialog { npc: String },
}

/// A quest tracked by a player's diary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quest {
    properties: Arc<QuestProperties>,
    pub character_id: u32,
    pub state: QuestState,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_finished: bool,
    pub is_checked: bool,
    /// Tombstone flag; a deleted quest stays stored until purged
    pub is_deleted: bool,
    pub monster_kills: [i16; MAX_QUEST_MONSTERS],
    pub is_patrol_done: bool,
    pub is_dialog_done: bool,
}

impl Quest {
    /// Create a freshly accepted quest
    pub fn new(properties: Arc<QuestProperties>, character_id: u32) -> Self {
        Self {
            properties,
            character_id,
            state: QuestState::Active,
            start_time: Utc::now(),
            end_time: None,
            is_finished: false,
            is_checked: false,
            is_deleted: false,
            monster_kills: [0; MAX_QUEST_MONSTERS],
            is_patrol_done: false,
            is_dialog_done: false,
        }
    }

    pub fn id(&self) -> QuestId {
        self.properties.id
    }

    pub fn properties(&self) -> &Arc<QuestProperties> {
        &self.properties
    }

    /// Not finished and not tombstoned
    pub fn is_active(&self) -> bool {
        !self.is_finished && !self.is_deleted
    }

    pub fn record(&self) -> QuestRecord {
        QuestRecord {
            state: self.state as u8,
            time_limit: self.properties.time_limit,
            id: self.id() as i16,
            monster_kills: self.monster_kills,
            patrol_done: self.is_patrol_done,
            dialog_done: self.is_dialog_done,
        }
    }
}

/// Fixed layout of a quest on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestRecord {
    pub state: u8,
    pub time_limit: i16,
    pub id: i16,
    pub monster_kills: [i16; MAX_QUEST_MONSTERS],
    pub patrol_done: bool,
    pub dialog_done: bool,
}

impl WireRecord for QuestRecord {
    fn write_record(&self, buffer: &mut PacketBuffer) {
        buffer.write_ubyte(self.state);
        buffer.write_short(self.time_limit);
        buffer.write_short(self.id);
        buffer.write_short(self.monster_kills[0]);
        buffer.write_short(self.monster_kills[1]);
        buffer.write_bool(self.patrol_done);
        buffer.write_bool(self.dialog_done);
    }

    fn read_record(buffer: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        Ok(Self {
            state: buffer.read_ubyte()?,
            time_limit: buffer.read_short()?,
            id: buffer.read_short()?,
            monster_kills: [buffer.read_short()?, buffer.read_short()?],
            patrol_done: buffer.read_bool()?,
            dialog_done: buffer.read_bool()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_quest_is_active() {
        let quest = Quest::new(Arc::new(QuestProperties::new(7, "QUEST_7")), 1);
        assert_eq!(quest.id(), 7);
        assert_eq!(quest.state, QuestState::Active);
        assert!(quest.is_active());
        assert!(quest.end_time.is_none());
    }

    #[test]
    fn test_record_layout() {
        let mut properties = QuestProperties::new(0x0102, "QUEST");
        properties.time_limit = 60;
        let mut quest = Quest::new(Arc::new(properties), 1);
        quest.monster_kills = [3, 0];
        quest.is_dialog_done = true;

        let mut buffer = PacketBuffer::new();
        quest.record().write_record(&mut buffer);

        assert_eq!(
            buffer.as_bytes(),
            &[0, 60, 0, 0x02, 0x01, 3, 0, 0, 0, 0, 1]
        );
        assert_eq!(QuestRecord::read_record(&mut buffer).unwrap(), quest.record());
    }

    #[test]
    fn test_gender_filter() {
        assert!(GenderType::Any.matches(Gender::Female));
        assert!(GenderType::Male.matches(Gender::Male));
        assert!(!GenderType::Male.matches(Gender::Female));

        let rewards = QuestRewards {
            items: vec![
                QuestItem {
                    gender: GenderType::Male,
                    ..QuestItem::new(1, 1)
                },
                QuestItem {
                    gender: GenderType::Female,
                    ..QuestItem::new(2, 1)
                },
                QuestItem::new(3, 1),
            ],
            ..QuestRewards::default()
        };
        let ids: Vec<_> = rewards.items_for(Gender::Female).map(|i| i.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_properties_from_json() {
        let json = r#"{
            "id": 10,
            "title": "QUEST_TITLE_10",
            "start_requirements": { "min_level": 5, "max_level": 20 },
            "rewards": { "gold": 100, "items": [{ "id": 4, "gender": "female" }] }
        }"#;
        let properties: QuestProperties = serde_json::from_str(json).unwrap();

        assert_eq!(properties.start_requirements.min_level, 5);
        assert_eq!(properties.start_requirements.previous_quest, None);
        assert_eq!(properties.rewards.gold, 100);
        assert_eq!(properties.rewards.items[0].quantity, 1);
        assert_eq!(properties.rewards.items[0].gender, GenderType::Female);
        assert!(properties.end_conditions.items.is_empty());
    }

    #[test]
    fn test_missing_level_bounds_are_open() {
        let properties: QuestProperties =
            serde_json::from_str(r#"{ "id": 11, "title": "QUEST_TITLE_11" }"#).unwrap();

        assert_eq!(properties.start_requirements.min_level, 1);
        assert_eq!(properties.start_requirements.max_level, u16::MAX);
        assert!(properties.start_requirements.jobs.is_empty());
    }
}
