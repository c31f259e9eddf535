//! Quest diary module
//!
//! A player's quests live in one ordered store. The active, completed and
//! checked views are filters over that store, computed on demand.

use crate::error::{GameError, ProtocolError};
use crate::game::quest::{Quest, QuestId, QuestRecord};
use crate::net::buffer::PacketBuffer;
use crate::protocol::packets::WireRecord;

/// Each serialized section carries a one-byte count
pub const MAX_SECTION_LEN: usize = u8::MAX as usize;

/// Per-player quest store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestDiary {
    quests: Vec<Quest>,
}

impl QuestDiary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a diary from persisted quests, dropping duplicate ids
    pub fn from_quests(quests: impl IntoIterator<Item = Quest>) -> Self {
        let mut diary = Self::new();
        for quest in quests {
            if !diary.contains(quest.id()) {
                diary.quests.push(quest);
            }
        }
        diary
    }

    /// Number of stored quests, tombstones included
    pub fn len(&self) -> usize {
        self.quests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quests.is_empty()
    }

    /// Whether any entry, tombstoned or not, uses `quest_id`
    pub fn contains(&self, quest_id: QuestId) -> bool {
        self.quests.iter().any(|quest| quest.id() == quest_id)
    }

    /// Number of quests that are not tombstoned
    pub fn live_count(&self) -> usize {
        self.quests.iter().filter(|quest| !quest.is_deleted).count()
    }

    /// Store a new quest; ids are unique across the whole diary.
    ///
    /// Live quests are capped at [`MAX_SECTION_LEN`] so that neither the
    /// active nor the completed section outgrows its count byte.
    pub fn insert(&mut self, quest: Quest) -> Result<(), GameError> {
        if self.contains(quest.id()) {
            return Err(GameError::Conflict(format!(
                "quest {} is already in the diary",
                quest.id()
            )));
        }
        let live = self.live_count();
        if live >= MAX_SECTION_LEN {
            return Err(GameError::DiaryFull(live));
        }
        self.quests.push(quest);
        Ok(())
    }

    // ============ Views ============

    /// Every stored quest in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Quest> {
        self.quests.iter()
    }

    pub fn active(&self) -> impl Iterator<Item = &Quest> {
        self.quests.iter().filter(|quest| quest.is_active())
    }

    pub fn completed(&self) -> impl Iterator<Item = &Quest> {
        self.quests
            .iter()
            .filter(|quest| quest.is_finished && !quest.is_deleted)
    }

    /// Active quests pinned in the tracker
    pub fn checked(&self) -> impl Iterator<Item = &Quest> {
        self.active().filter(|quest| quest.is_checked)
    }

    // ============ Lookups ============

    pub fn get_quest(&self, quest_id: QuestId) -> Option<&Quest> {
        self.quests
            .iter()
            .find(|quest| quest.id() == quest_id && !quest.is_deleted)
    }

    pub fn get_quest_mut(&mut self, quest_id: QuestId) -> Option<&mut Quest> {
        self.quests
            .iter_mut()
            .find(|quest| quest.id() == quest_id && !quest.is_deleted)
    }

    pub fn get_active_quest(&self, quest_id: QuestId) -> Option<&Quest> {
        self.active().find(|quest| quest.id() == quest_id)
    }

    pub fn get_active_quest_mut(&mut self, quest_id: QuestId) -> Option<&mut Quest> {
        self.quests
            .iter_mut()
            .find(|quest| quest.id() == quest_id && quest.is_active())
    }

    pub fn has_quest(&self, quest_id: QuestId) -> bool {
        self.get_quest(quest_id).is_some()
    }

    pub fn has_active_quest(&self, quest_id: QuestId) -> bool {
        self.get_active_quest(quest_id).is_some()
    }

    pub fn has_completed_quest(&self, quest_id: QuestId) -> bool {
        self.completed().any(|quest| quest.id() == quest_id)
    }

    pub(crate) fn active_mut(&mut self) -> impl Iterator<Item = &mut Quest> {
        self.quests.iter_mut().filter(|quest| quest.is_active())
    }

    // ============ Mutations ============

    /// Tombstone a quest. The entry keeps its id reserved until purged.
    pub fn remove(&mut self, quest_id: QuestId) -> Result<(), GameError> {
        let quest = self
            .get_quest_mut(quest_id)
            .ok_or(GameError::QuestNotFound(quest_id))?;
        quest.is_deleted = true;
        quest.is_checked = false;
        Ok(())
    }

    /// Flip the tracker pin of an active quest; returns the new value
    pub fn toggle_check(&mut self, quest_id: QuestId) -> Result<bool, GameError> {
        let quest = self
            .get_active_quest_mut(quest_id)
            .ok_or(GameError::QuestNotFound(quest_id))?;
        quest.is_checked = !quest.is_checked;
        Ok(quest.is_checked)
    }

    /// Drop tombstoned entries; returns how many were removed
    pub fn purge_deleted(&mut self) -> usize {
        let before = self.quests.len();
        self.quests.retain(|quest| !quest.is_deleted);
        before - self.quests.len()
    }

    // ============ Serialization ============

    /// Wire view of the three sections
    pub fn record(&self) -> QuestDiaryRecord {
        QuestDiaryRecord {
            active: self.active().map(Quest::record).collect(),
            completed: self.completed().map(|quest| quest.id() as i16).collect(),
            checked: self.checked().map(|quest| quest.id() as i16).collect(),
        }
    }

    /// Write the diary into a packet
    pub fn serialize(&self, buffer: &mut PacketBuffer) {
        self.record().write_record(buffer);
    }
}

/// Serialized diary layout:
///
/// ```text
/// [u8 count] [QuestRecord...]   active
/// [u8 count] [i16 id...]        completed
/// [u8 count] [i16 id...]        checked
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestDiaryRecord {
    pub active: Vec<QuestRecord>,
    pub completed: Vec<i16>,
    pub checked: Vec<i16>,
}

/// Leading part of a section that fits behind its count byte
fn section<T>(entries: &[T]) -> &[T] {
    &entries[..entries.len().min(MAX_SECTION_LEN)]
}

impl WireRecord for QuestDiaryRecord {
    // Diaries restored from older saves can exceed the cap; the count byte
    // always matches the entries written after it.
    fn write_record(&self, buffer: &mut PacketBuffer) {
        let active = section(&self.active);
        buffer.write_ubyte(active.len() as u8);
        for quest in active {
            quest.write_record(buffer);
        }

        let completed = section(&self.completed);
        buffer.write_ubyte(completed.len() as u8);
        for id in completed {
            buffer.write_short(*id);
        }

        let checked = section(&self.checked);
        buffer.write_ubyte(checked.len() as u8);
        for id in checked {
            buffer.write_short(*id);
        }
    }

    fn read_record(buffer: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        let active_count = buffer.read_ubyte()?;
        let active = (0..active_count)
            .map(|_| QuestRecord::read_record(buffer))
            .collect::<Result<Vec<_>, _>>()?;

        let completed_count = buffer.read_ubyte()?;
        let completed = (0..completed_count)
            .map(|_| buffer.read_short())
            .collect::<Result<Vec<_>, _>>()?;

        let checked_count = buffer.read_ubyte()?;
        let checked = (0..checked_count)
            .map(|_| buffer.read_short())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            active,
            completed,
            checked,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::game::quest::{QuestProperties, QuestState};

    fn quest(id: QuestId) -> Quest {
        Quest::new(Arc::new(QuestProperties::new(id, format!("QUEST_{id}"))), 1)
    }

    fn finished(id: QuestId) -> Quest {
        let mut quest = quest(id);
        quest.is_finished = true;
        quest.state = QuestState::Completed;
        quest
    }

    #[test]
    fn test_insert_rejects_duplicate() {
        let mut diary = QuestDiary::new();
        diary.insert(quest(100)).unwrap();

        let err = diary.insert(quest(100)).unwrap_err();
        assert!(matches!(err, GameError::Conflict(_)));
        assert_eq!(diary.len(), 1);
    }

    #[test]
    fn test_views_are_filters() {
        let mut diary = QuestDiary::new();
        diary.insert(quest(1)).unwrap();
        diary.insert(finished(2)).unwrap();
        diary.insert(quest(3)).unwrap();
        diary.toggle_check(3).unwrap();

        let ids = |it: Vec<&Quest>| it.iter().map(|q| q.id()).collect::<Vec<_>>();
        assert_eq!(ids(diary.active().collect()), vec![1, 3]);
        assert_eq!(ids(diary.completed().collect()), vec![2]);
        assert_eq!(ids(diary.checked().collect()), vec![3]);

        diary.get_quest_mut(3).unwrap().is_finished = true;
        assert_eq!(ids(diary.checked().collect()), Vec::<QuestId>::new());
        assert_eq!(ids(diary.completed().collect()), vec![2, 3]);
    }

    #[test]
    fn test_tombstone_hides_but_reserves_id() {
        let mut diary = QuestDiary::new();
        diary.insert(quest(5)).unwrap();
        diary.remove(5).unwrap();

        assert!(!diary.has_quest(5));
        assert!(!diary.has_active_quest(5));
        assert!(diary.contains(5));
        assert_eq!(diary.active().count(), 0);
        assert!(diary.insert(quest(5)).is_err());

        assert_eq!(diary.remove(5), Err(GameError::QuestNotFound(5)));
        assert_eq!(diary.purge_deleted(), 1);
        assert!(diary.insert(quest(5)).is_ok());
    }

    #[test]
    fn test_toggle_check_requires_active() {
        let mut diary = QuestDiary::new();
        diary.insert(finished(1)).unwrap();
        diary.insert(quest(2)).unwrap();

        assert_eq!(diary.toggle_check(1), Err(GameError::QuestNotFound(1)));
        assert_eq!(diary.toggle_check(2), Ok(true));
        assert_eq!(diary.toggle_check(2), Ok(false));
    }

    #[test]
    fn test_serialize_layout() {
        let mut diary = QuestDiary::new();
        diary.insert(quest(1)).unwrap();
        diary.insert(quest(2)).unwrap();
        diary.insert(finished(3)).unwrap();
        diary.toggle_check(2).unwrap();

        let mut buffer = PacketBuffer::new();
        diary.serialize(&mut buffer);

        let mut expected = PacketBuffer::new();
        expected.write_ubyte(2);
        diary.get_quest(1).unwrap().record().write_record(&mut expected);
        diary.get_quest(2).unwrap().record().write_record(&mut expected);
        expected.write_ubyte(1);
        expected.write_short(3);
        expected.write_ubyte(1);
        expected.write_short(2);

        assert_eq!(buffer.as_bytes(), expected.as_bytes());
        assert_eq!(buffer.len(), 1 + 2 * 11 + 1 + 2 + 1 + 2);
    }

    #[test]
    fn test_parse_matches_views() {
        let mut diary = QuestDiary::new();
        for id in 1..=4 {
            diary.insert(quest(id)).unwrap();
        }
        diary.insert(finished(10)).unwrap();
        diary.insert(finished(11)).unwrap();
        diary.toggle_check(4).unwrap();
        diary.remove(2).unwrap();

        let mut buffer = PacketBuffer::new();
        diary.serialize(&mut buffer);
        let parsed = QuestDiaryRecord::read_record(&mut buffer).unwrap();

        let active: Vec<i16> = diary.active().map(|q| q.id() as i16).collect();
        let completed: Vec<i16> = diary.completed().map(|q| q.id() as i16).collect();
        let checked: Vec<i16> = diary.checked().map(|q| q.id() as i16).collect();

        assert_eq!(parsed.active.iter().map(|q| q.id).collect::<Vec<_>>(), active);
        assert_eq!(parsed.completed, completed);
        assert_eq!(parsed.checked, checked);
        assert!(!buffer.has_remaining());
    }

    #[test]
    fn test_insert_stops_at_section_limit() {
        let mut diary = QuestDiary::new();
        for id in 0..MAX_SECTION_LEN as QuestId {
            diary.insert(quest(id)).unwrap();
        }

        assert_eq!(
            diary.insert(quest(1000)),
            Err(GameError::DiaryFull(MAX_SECTION_LEN))
        );
        assert!(!diary.contains(1000));

        // A tombstone frees a live slot but keeps its id
        diary.remove(0).unwrap();
        diary.insert(quest(1000)).unwrap();
        assert_eq!(diary.live_count(), MAX_SECTION_LEN);
    }

    #[test]
    fn test_full_diary_parses_back() {
        let mut diary = QuestDiary::new();
        for id in 0..200 {
            diary.insert(quest(id)).unwrap();
        }
        for id in 200..MAX_SECTION_LEN as QuestId {
            diary.insert(finished(id)).unwrap();
        }

        let mut buffer = PacketBuffer::new();
        diary.serialize(&mut buffer);
        let parsed = QuestDiaryRecord::read_record(&mut buffer).unwrap();

        assert_eq!(parsed.active.len(), 200);
        assert_eq!(parsed.completed.len(), MAX_SECTION_LEN - 200);
        assert!(parsed.checked.is_empty());
        assert!(!buffer.has_remaining());
    }

    #[test]
    fn test_oversized_record_writes_matching_counts() {
        let record = QuestDiaryRecord {
            active: Vec::new(),
            completed: (0..300).collect(),
            checked: Vec::new(),
        };

        let mut buffer = PacketBuffer::new();
        record.write_record(&mut buffer);
        let parsed = QuestDiaryRecord::read_record(&mut buffer).unwrap();

        assert_eq!(parsed.completed.len(), MAX_SECTION_LEN);
        assert_eq!(&parsed.completed[..], &record.completed[..MAX_SECTION_LEN]);
        assert!(!buffer.has_remaining());
    }

    #[test]
    fn test_from_quests_drops_duplicates() {
        let diary = QuestDiary::from_quests(vec![quest(1), quest(1), quest(2)]);
        assert_eq!(diary.len(), 2);
    }
}
