//! Quest engine module
//!
//! Drives a player's quests through their lifecycle:
//!
//! ```text
//! (absent) --accept--> Active --complete--> Completed
//!     any state --remove--> tombstoned
//! ```
//!
//! Every operation runs on the session actor that owns the player, so the
//! engine mutates the aggregate directly and emits snapshots through the
//! player's outbox as it goes.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::GameError;
use crate::game::item::Item;
use crate::game::player::Player;
use crate::game::quest::{
    Quest, QuestAction, QuestId, QuestProperties, QuestState, MAX_QUEST_MONSTERS,
};
use crate::game::resources::GameResources;
use crate::protocol::snapshot::{DefineText, Snapshot};

/// Outcome of a completion attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestCompletion {
    /// Rewards do not fit; nothing changed and the player was notified
    NoInventorySpace,
    /// The quest is completed. `gaps` lists reward parts that are not
    /// supported yet and were skipped.
    Completed { gaps: Vec<GameError> },
}

/// Quest state machine bound to one player
pub struct QuestEngine<'a> {
    player: &'a mut Player,
    resources: &'a GameResources,
}

impl<'a> QuestEngine<'a> {
    pub fn new(player: &'a mut Player, resources: &'a GameResources) -> Self {
        Self { player, resources }
    }

    /// Whether the player may accept a quest. Emits nothing and mutates nothing.
    pub fn can_start_quest(&self, properties: Option<&QuestProperties>) -> bool {
        let Some(properties) = properties else {
            return false;
        };

        let diary = &self.player.quest_diary;
        if diary.contains(properties.id) {
            return false;
        }

        let requirements = &properties.start_requirements;
        if let Some(previous) = requirements.previous_quest {
            if !diary.has_completed_quest(previous) {
                return false;
            }
        }

        if self.player.level < requirements.min_level || self.player.level > requirements.max_level
        {
            return false;
        }

        if !requirements.jobs.is_empty() && !requirements.jobs.contains(&self.player.job) {
            return false;
        }

        true
    }

    /// Add a quest to the diary and notify the client
    pub fn accept_quest(
        &mut self,
        properties: Option<Arc<QuestProperties>>,
    ) -> Result<(), GameError> {
        let properties = properties
            .ok_or_else(|| GameError::Validation("quest properties are undefined".to_string()))?;

        if self.player.quest_diary.contains(properties.id) {
            return Err(GameError::Conflict(format!(
                "{} already has quest {}",
                self.player.name, properties.id
            )));
        }

        let quest = Quest::new(properties.clone(), self.player.id);
        let record = quest.record();
        self.player.quest_diary.insert(quest)?;

        info!(
            player_id = self.player.id,
            quest_id = properties.id,
            "Quest accepted"
        );

        self.player.send(Snapshot::SetQuest(record));
        self.player
            .send_defined_text(DefineText::QuestStarted, vec![self.quoted_title(&properties)]);

        Ok(())
    }

    /// Hand in an active quest and apply its rewards.
    ///
    /// Fitting the rewards into the inventory is the only precondition, both
    /// by slot count and once stack limits apply. Once it passes every
    /// remaining step runs to the end.
    pub fn complete_quest(&mut self, quest_id: QuestId) -> Result<QuestCompletion, GameError> {
        let properties = self
            .player
            .quest_diary
            .get_active_quest(quest_id)
            .map(|quest| quest.properties().clone())
            .ok_or_else(|| GameError::Validation(format!("quest {quest_id} is not active")))?;

        let gender = self.player.gender();
        let rewards: Vec<_> = properties.rewards.items_for(gender).collect();

        let inventory = &self.player.inventory;
        if inventory.storage_count() + rewards.len() > inventory.capacity() {
            return Ok(self.reject_for_space(quest_id, rewards.len()));
        }

        let items: Vec<Item> = rewards
            .iter()
            .filter_map(|reward| {
                let Some(item_properties) = self.resources.item(reward.id) else {
                    warn!(quest_id, item_id = reward.id, "Unknown reward item");
                    return None;
                };
                if reward.quantity <= 0 {
                    warn!(quest_id, item_id = reward.id, "Reward item without quantity");
                    return None;
                }
                Some(
                    Item::new(item_properties)
                        .with_quantity(reward.quantity)
                        .with_refine(reward.refine)
                        .with_element(reward.element, reward.element_refine),
                )
            })
            .collect();
        let names: Vec<String> = items
            .iter()
            .map(|item| format!("\"{}\"", item.name()))
            .collect();

        // Rewards larger than one stack need extra slots
        let changed = match self.player.inventory.create_items(items) {
            Ok(changed) => changed,
            Err(e) => {
                debug!(quest_id, error = %e, "Quest rewards do not fit once stacked");
                return Ok(self.reject_for_space(quest_id, rewards.len()));
            }
        };

        // Reward items
        for (slots, name) in changed.into_iter().zip(names) {
            for slot in slots {
                self.send_slot(slot);
            }
            self.player.send_defined_text(DefineText::ItemReceived, vec![name]);
        }

        // Quest items taken back
        for required in properties
            .end_conditions
            .items
            .iter()
            .filter(|item| item.remove && item.gender.matches(gender))
        {
            self.take_items(required.id, required.quantity);
        }

        let rewards = &properties.rewards;
        if rewards.gold > 0 {
            let gold = self.player.increase_gold(rewards.gold);
            self.player.send(Snapshot::SetGold { gold });
        }

        if rewards.experience > 0 {
            let experience = self.player.increase_experience(rewards.experience);
            self.player.send(Snapshot::SetExperience {
                level: self.player.level,
                experience,
            });
        }

        let mut gaps = Vec::new();
        if let Some(job) = rewards.job {
            warn!(
                player_id = self.player.id,
                quest_id,
                job = job.0,
                "Job change rewards are not supported yet"
            );
            gaps.push(GameError::Unimplemented("job change reward"));
        }

        if rewards.restat {
            self.player.statistics.reset();
            self.player
                .send(Snapshot::SetStatistics(self.player.statistics.record()));
        }

        if rewards.reskill || rewards.skill_points > 0 {
            if rewards.reskill {
                self.player.skills.reset();
            }
            self.player.skills.add_points(rewards.skill_points);
            self.player.send(Snapshot::SetSkillPoints {
                skill_points: self.player.skills.points,
            });
        }

        let record = match self.player.quest_diary.get_active_quest_mut(quest_id) {
            Some(quest) => {
                quest.is_finished = true;
                quest.is_checked = false;
                quest.state = QuestState::Completed;
                quest.end_time = Some(chrono::Utc::now());
                quest.record()
            }
            None => return Err(GameError::QuestNotFound(quest_id)),
        };

        info!(player_id = self.player.id, quest_id, "Quest completed");

        self.player
            .send_defined_text(DefineText::QuestEnded, vec![self.quoted_title(&properties)]);
        self.player.send(Snapshot::SetQuest(record));

        Ok(QuestCompletion::Completed { gaps })
    }

    /// Whether every end condition of an active quest is satisfied
    pub fn conditions_met(&self, quest_id: QuestId) -> bool {
        let Some(quest) = self.player.quest_diary.get_active_quest(quest_id) else {
            return false;
        };

        let gender = self.player.gender();
        let conditions = &quest.properties().end_conditions;

        let items_ok = conditions
            .items
            .iter()
            .filter(|item| item.gender.matches(gender))
            .all(|item| self.player.inventory.count_item(item.id) >= i32::from(item.quantity));

        let monsters_ok = conditions
            .monsters
            .iter()
            .take(MAX_QUEST_MONSTERS)
            .enumerate()
            .all(|(index, monster)| quest.monster_kills[index] >= monster.amount);

        let patrol_ok = conditions.patrol_zone.is_none() || quest.is_patrol_done;
        let dialog_ok = conditions.dialog_npc.is_none() || quest.is_dialog_done;

        items_ok && monsters_ok && patrol_ok && dialog_ok
    }

    /// Abandon a quest (tombstone) and resync the diary
    pub fn remove_quest(&mut self, quest_id: QuestId) -> Result<(), GameError> {
        self.player.quest_diary.remove(quest_id)?;
        debug!(player_id = self.player.id, quest_id, "Quest removed");
        self.send_diary();
        Ok(())
    }

    /// Toggle the tracker pin of an active quest and resync the diary
    pub fn check_quest(&mut self, quest_id: QuestId) -> Result<bool, GameError> {
        let checked = self.player.quest_diary.toggle_check(quest_id)?;
        self.send_diary();
        Ok(checked)
    }

    /// Advance quest objectives after a game event.
    ///
    /// Counters cap at the required amount and the quest state never changes
    /// here. Returns how many quests progressed.
    pub fn update(&mut self, action: &QuestAction) -> usize {
        let mut changed = Vec::new();

        for quest in self.player.quest_diary.active_mut() {
            let properties = quest.properties().clone();
            let conditions = &properties.end_conditions;
            let mut progressed = false;

            match action {
                QuestAction::KillMonster { monster_id } => {
                    for (index, monster) in conditions
                        .monsters
                        .iter()
                        .take(MAX_QUEST_MONSTERS)
                        .enumerate()
                    {
                        if monster.id == *monster_id && quest.monster_kills[index] < monster.amount
                        {
                            quest.monster_kills[index] += 1;
                            progressed = true;
                        }
                    }
                }
                QuestAction::Patrol { zone_id } => {
                    if conditions.patrol_zone == Some(*zone_id) && !quest.is_patrol_done {
                        quest.is_patrol_done = true;
                        progressed = true;
                    }
                }
                QuestAction::Dialog { npc } => {
                    if conditions.dialog_npc.as_deref() == Some(npc.as_str())
                        && !quest.is_dialog_done
                    {
                        quest.is_dialog_done = true;
                        progressed = true;
                    }
                }
            }

            if progressed {
                changed.push(quest.record());
            }
        }

        for record in &changed {
            debug!(player_id = self.player.id, quest_id = record.id, "Quest progressed");
            self.player.send(Snapshot::SetQuest(*record));
        }

        changed.len()
    }

    // ============ Helpers ============

    fn reject_for_space(&self, quest_id: QuestId, rewards: usize) -> QuestCompletion {
        info!(
            player_id = self.player.id,
            quest_id,
            rewards,
            free_slots = self.player.inventory.free_slots(),
            "Not enough inventory space for quest rewards"
        );
        self.player
            .send_defined_text(DefineText::QuestNoInventorySpace, Vec::new());
        QuestCompletion::NoInventorySpace
    }

    fn quoted_title(&self, properties: &QuestProperties) -> String {
        format!("\"{}\"", self.resources.text(&properties.title))
    }

    fn send_slot(&self, slot: usize) {
        if let Some(item) = self.player.inventory.get(slot) {
            self.player.send(Snapshot::CreateItem {
                slot: slot as u8,
                item: item.record(),
            });
        }
    }

    fn send_diary(&self) {
        self.player
            .send(Snapshot::QuestDiary(self.player.quest_diary.record()));
    }

    /// Remove `quantity` of an item across as many slots as needed
    fn take_items(&mut self, item_id: i32, quantity: i16) {
        let mut remaining = quantity;
        while remaining > 0 {
            let Some(slot) = self.player.inventory.find_slot(|item| item.id() == item_id) else {
                warn!(
                    player_id = self.player.id,
                    item_id,
                    missing = remaining,
                    "Quest item missing on completion"
                );
                return;
            };

            let held = self
                .player
                .inventory
                .get(slot)
                .map(|item| item.quantity)
                .unwrap_or(0);
            let taken = held.min(remaining);

            match self.player.inventory.delete_item(slot, taken) {
                Ok(left) => {
                    remaining -= taken;
                    self.player.send(Snapshot::UpdateItem {
                        slot: slot as u8,
                        quantity: left,
                    });
                }
                Err(e) => {
                    warn!(item_id, slot, error = %e, "Could not remove quest item");
                    return;
                }
            }
        }
    }
}
