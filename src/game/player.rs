//! Player module
//!
//! The player aggregate owns everything a character carries:
//! - Identity (storage id, network object id, name)
//! - Job, appearance, level and experience
//! - Gold, statistics and skills
//! - Inventory and quest diary
//!
//! A player is owned by exactly one session actor, so none of its fields
//! need interior locking.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::game::inventory::{ItemContainer, INVENTORY_SIZE};
use crate::game::item::{ElementType, Item};
use crate::game::persistence::{ItemData, PlayerData, QuestData};
use crate::game::quest::{Quest, QuestState};
use crate::game::quest_diary::QuestDiary;
use crate::game::resources::GameResources;
use crate::protocol::snapshot::{DefineText, Outbox, Snapshot, SnapshotWriter, StatisticsRecord};

/// Value every statistic starts at and returns to on reset
pub const BASE_STATISTIC: u16 = 15;

/// Character gender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    #[default]
    Male,
    Female,
}

/// Player appearance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Appearance {
    pub gender: Gender,
    pub hair_id: u8,
    pub hair_color: u32,
    pub face_id: u8,
}

/// Job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u16);

impl JobId {
    pub const VAGRANT: JobId = JobId(0);
    pub const MERCENARY: JobId = JobId(1);
    pub const ACROBAT: JobId = JobId(2);
    pub const ASSIST: JobId = JobId(3);
    pub const MAGICIAN: JobId = JobId(4);
}

/// Character statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub strength: u16,
    pub stamina: u16,
    pub dexterity: u16,
    pub intelligence: u16,
    pub available_points: u16,
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            strength: BASE_STATISTIC,
            stamina: BASE_STATISTIC,
            dexterity: BASE_STATISTIC,
            intelligence: BASE_STATISTIC,
            available_points: 0,
        }
    }
}

impl Statistics {
    /// Return every spent point to the pool
    pub fn reset(&mut self) {
        let spent = [
            self.strength,
            self.stamina,
            self.dexterity,
            self.intelligence,
        ]
        .iter()
        .map(|value| value.saturating_sub(BASE_STATISTIC))
        .fold(0u16, u16::saturating_add);

        self.strength = BASE_STATISTIC;
        self.stamina = BASE_STATISTIC;
        self.dexterity = BASE_STATISTIC;
        self.intelligence = BASE_STATISTIC;
        self.available_points = self.available_points.saturating_add(spent);
    }

    pub fn record(&self) -> StatisticsRecord {
        StatisticsRecord {
            strength: self.strength,
            stamina: self.stamina,
            dexterity: self.dexterity,
            intelligence: self.intelligence,
            available_points: self.available_points,
        }
    }
}

/// Learned skills and unspent skill points
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skills {
    /// Skill id -> level
    pub levels: BTreeMap<u16, u8>,
    pub points: u16,
}

impl Skills {
    pub fn level(&self, skill_id: u16) -> u8 {
        self.levels.get(&skill_id).copied().unwrap_or(0)
    }

    pub fn set_level(&mut self, skill_id: u16, level: u8) {
        self.levels.insert(skill_id, level);
    }

    /// Unlearn every skill, refunding one point per level
    pub fn reset(&mut self) {
        let refunded = self
            .levels
            .values()
            .map(|level| u16::from(*level))
            .fold(0u16, u16::saturating_add);
        self.levels.clear();
        self.points = self.points.saturating_add(refunded);
    }

    pub fn add_points(&mut self, points: u16) {
        self.points = self.points.saturating_add(points);
    }
}

/// A player entity in the game
#[derive(Debug)]
pub struct Player {
    /// Storage id
    pub id: u32,
    /// Network-scoped id assigned on join
    pub object_id: u32,
    pub name: String,
    pub job: JobId,
    pub appearance: Appearance,
    pub level: u16,
    pub experience: i64,
    pub gold: i32,
    pub statistics: Statistics,
    pub skills: Skills,
    pub inventory: ItemContainer,
    pub quest_diary: QuestDiary,
    outbox: Outbox,
}

impl Player {
    /// Create a level 1 vagrant
    pub fn new(id: u32, object_id: u32, name: impl Into<String>, outbox: Outbox) -> Self {
        Self {
            id,
            object_id,
            name: name.into(),
            job: JobId::VAGRANT,
            appearance: Appearance::default(),
            level: 1,
            experience: 0,
            gold: 0,
            statistics: Statistics::default(),
            skills: Skills::default(),
            inventory: ItemContainer::new(INVENTORY_SIZE),
            quest_diary: QuestDiary::new(),
            outbox,
        }
    }

    /// Create a player from persisted data.
    ///
    /// Items and quests whose design data no longer exists are dropped
    /// with a warning.
    pub fn from_data(
        data: &PlayerData,
        object_id: u32,
        resources: &GameResources,
        outbox: Outbox,
    ) -> Self {
        let mut player = Self::new(data.id, object_id, data.name.clone(), outbox);
        player.job = data.job;
        player.appearance = data.appearance;
        player.level = data.level;
        player.experience = data.experience;
        player.gold = data.gold;
        player.statistics = data.statistics;
        player.skills = data.skills.clone();

        for (slot, entry) in data.inventory.iter().enumerate() {
            let Some(entry) = entry else { continue };
            let Some(properties) = resources.item(entry.id) else {
                warn!(player_id = data.id, item_id = entry.id, "Dropping unknown item");
                continue;
            };
            let item = Item::new(properties)
                .with_quantity(entry.quantity)
                .with_refine(entry.refine)
                .with_element(
                    ElementType::from_u8(entry.element).unwrap_or_default(),
                    entry.element_refine,
                );
            if player.inventory.set(slot, Some(item)).is_err() {
                warn!(player_id = data.id, slot, "Dropping item outside inventory bounds");
            }
        }

        let quests = data.quests.iter().filter_map(|entry| {
            let Some(properties) = resources.quest(entry.id) else {
                warn!(player_id = data.id, quest_id = entry.id, "Dropping unknown quest");
                return None;
            };
            let mut quest = Quest::new(properties, data.id);
            quest.state = entry.state;
            quest.start_time = entry.start_time;
            quest.end_time = entry.end_time;
            quest.is_finished = entry.state == QuestState::Completed;
            quest.is_deleted = entry.is_deleted;
            quest.is_checked = entry.is_checked && !quest.is_finished && !quest.is_deleted;
            quest.monster_kills = entry.monster_kills;
            quest.is_patrol_done = entry.is_patrol_done;
            quest.is_dialog_done = entry.is_dialog_done;
            Some(quest)
        });
        player.quest_diary = QuestDiary::from_quests(quests);

        debug!(
            player_id = data.id,
            object_id,
            name = %data.name,
            quests = player.quest_diary.len(),
            "Created player from persisted data"
        );

        player
    }

    /// Convert the player's current state for persistence
    pub fn to_data(&self) -> PlayerData {
        let inventory = (0..self.inventory.capacity())
            .map(|slot| {
                self.inventory.get(slot).map(|item| ItemData {
                    id: item.id(),
                    quantity: item.quantity,
                    refine: item.refine,
                    element: item.element as u8,
                    element_refine: item.element_refine,
                })
            })
            .collect();

        let quests = self
            .quest_diary
            .iter()
            .map(|quest| QuestData {
                id: quest.id(),
                state: quest.state,
                start_time: quest.start_time,
                end_time: quest.end_time,
                is_checked: quest.is_checked,
                monster_kills: quest.monster_kills,
                is_patrol_done: quest.is_patrol_done,
                is_dialog_done: quest.is_dialog_done,
                is_deleted: quest.is_deleted,
            })
            .collect();

        PlayerData {
            id: self.id,
            name: self.name.clone(),
            job: self.job,
            appearance: self.appearance,
            level: self.level,
            experience: self.experience,
            gold: self.gold,
            statistics: self.statistics,
            skills: self.skills.clone(),
            inventory,
            quests,
            last_saved: None,
        }
    }

    pub fn gender(&self) -> Gender {
        self.appearance.gender
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    // ============ Rewards ============

    /// Add gold, capping at the maximum purse size
    pub fn increase_gold(&mut self, amount: i32) -> i32 {
        self.gold = self.gold.saturating_add(amount).max(0);
        self.gold
    }

    pub fn increase_experience(&mut self, amount: i64) -> i64 {
        self.experience = self.experience.saturating_add(amount);
        self.experience
    }

    // ============ Client Updates ============

    /// Send one snapshot about this player to its own client
    pub fn send(&self, snapshot: Snapshot) {
        self.outbox.send(self.object_id, self.object_id, &snapshot);
    }

    /// Send a localized text notice
    pub fn send_defined_text(&self, text: DefineText, parameters: Vec<String>) {
        self.send(Snapshot::defined_text(text, parameters));
    }

    /// Send the full character state in one merged packet
    pub fn send_full_state(&self) {
        let mut writer = SnapshotWriter::new(self.outbox.pool(), self.object_id);
        writer
            .push(self.object_id, &Snapshot::SetGold { gold: self.gold })
            .push(
                self.object_id,
                &Snapshot::SetExperience {
                    level: self.level,
                    experience: self.experience,
                },
            )
            .push(
                self.object_id,
                &Snapshot::SetStatistics(self.statistics.record()),
            )
            .push(
                self.object_id,
                &Snapshot::SetSkillPoints {
                    skill_points: self.skills.points,
                },
            );
        for (slot, item) in self.inventory.items() {
            writer.push(
                self.object_id,
                &Snapshot::CreateItem {
                    slot: slot as u8,
                    item: item.record(),
                },
            );
        }
        writer.push(
            self.object_id,
            &Snapshot::QuestDiary(self.quest_diary.record()),
        );
        self.outbox.send_bytes(writer.finish());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GameError;
    use crate::game::item::ItemProperties;
    use crate::game::quest::QuestProperties;
    use crate::game::quest_engine::QuestEngine;
    use crate::net::pool::BufferPool;
    use crate::protocol::snapshot::SnapshotPacket;

    fn resources() -> GameResources {
        GameResources::new()
            .with_item(ItemProperties::new(1, "Sword"))
            .with_quest(QuestProperties::new(10, "QUEST_10"))
    }

    #[test]
    fn test_statistics_reset() {
        let mut stats = Statistics {
            strength: 20,
            stamina: 15,
            dexterity: 30,
            intelligence: 15,
            available_points: 2,
        };
        stats.reset();

        assert_eq!(stats.strength, BASE_STATISTIC);
        assert_eq!(stats.dexterity, BASE_STATISTIC);
        assert_eq!(stats.available_points, 22);
    }

    #[test]
    fn test_skills_reset() {
        let mut skills = Skills::default();
        skills.set_level(1, 3);
        skills.set_level(2, 4);
        skills.points = 1;
        skills.reset();

        assert_eq!(skills.level(1), 0);
        assert_eq!(skills.points, 8);
    }

    #[test]
    fn test_gold_saturates() {
        let mut player = Player::new(1, 1, "Tester", Outbox::detached(BufferPool::new(1)));
        player.gold = i32::MAX - 5;
        assert_eq!(player.increase_gold(100), i32::MAX);
    }

    #[test]
    fn test_data_round_trip() {
        let resources = resources();
        let mut player = Player::new(7, 1, "Tester", Outbox::detached(BufferPool::new(1)));
        player
            .inventory
            .create_item(Item::new(resources.item(1).unwrap()).with_refine(3))
            .unwrap();
        player
            .quest_diary
            .insert(Quest::new(resources.quest(10).unwrap(), 7))
            .unwrap();

        let data = player.to_data();
        let restored =
            Player::from_data(&data, 2, &resources, Outbox::detached(BufferPool::new(1)));
        assert_eq!(restored.inventory.get(0).unwrap().refine, 3);
        assert!(restored.quest_diary.has_active_quest(10));
    }

    #[test]
    fn test_removed_quest_stays_reserved_after_reload() {
        let resources = resources();
        let mut player = Player::new(7, 1, "Tester", Outbox::detached(BufferPool::new(1)));
        let mut engine = QuestEngine::new(&mut player, &resources);
        engine.accept_quest(resources.quest(10)).unwrap();
        engine.remove_quest(10).unwrap();
        assert!(matches!(
            engine.accept_quest(resources.quest(10)),
            Err(GameError::Conflict(_))
        ));

        let data = player.to_data();
        assert_eq!(data.quests.len(), 1);
        assert!(data.quests[0].is_deleted);

        let mut restored =
            Player::from_data(&data, 2, &resources, Outbox::detached(BufferPool::new(1)));
        assert!(restored.quest_diary.contains(10));
        assert!(!restored.quest_diary.has_quest(10));
        assert_eq!(restored.quest_diary.active().count(), 0);

        let mut engine = QuestEngine::new(&mut restored, &resources);
        assert!(!engine.can_start_quest(resources.quest(10).as_deref()));
        assert!(matches!(
            engine.accept_quest(resources.quest(10)),
            Err(GameError::Conflict(_))
        ));
    }

    #[test]
    fn test_unknown_design_data_dropped() {
        let mut data = PlayerData::new(1, "Tester");
        data.inventory[0] = Some(ItemData {
            id: 999,
            quantity: 1,
            refine: 0,
            element: 0,
            element_refine: 0,
        });

        let player =
            Player::from_data(&data, 1, &resources(), Outbox::detached(BufferPool::new(1)));
        assert_eq!(player.inventory.storage_count(), 0);
    }

    #[tokio::test]
    async fn test_full_state_is_one_packet() {
        let (outbox, mut rx) = Outbox::channel(BufferPool::new(1), 4);
        let player = Player::new(1, 42, "Tester", outbox);
        player.send_full_state();

        let packet = SnapshotPacket::decode(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(packet.recipient, 42);
        assert_eq!(packet.snapshots.len(), 5);
        assert!(rx.try_recv().is_err());
    }
}
