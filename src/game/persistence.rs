//! Player persistence module
//!
//! Handles saving and loading player aggregates. This includes:
//! - Identity, job and appearance
//! - Level, experience, gold, statistics and skills
//! - Inventory slots
//! - Quest diary entries (tombstoned quests are never written)
//!
//! Two backends are provided: an in-memory map and one JSON file per player.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::game::inventory::INVENTORY_SIZE;
use crate::game::item::ItemId;
use crate::game::player::{Appearance, JobId, Skills, Statistics};
use crate::game::quest::{QuestId, QuestState, MAX_QUEST_MONSTERS};

/// Persisted item slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemData {
    pub id: ItemId,
    pub quantity: i16,
    #[serde(default)]
    pub refine: u8,
    #[serde(default)]
    pub element: u8,
    #[serde(default)]
    pub element_refine: u8,
}

/// Persisted quest entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestData {
    pub id: QuestId,
    pub state: QuestState,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_checked: bool,
    #[serde(default)]
    pub monster_kills: [i16; MAX_QUEST_MONSTERS],
    #[serde(default)]
    pub is_patrol_done: bool,
    #[serde(default)]
    pub is_dialog_done: bool,
    /// Removed quests are stored so their id stays reserved
    #[serde(default)]
    pub is_deleted: bool,
}

/// Complete player data for persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerData {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub job: JobId,
    #[serde(default)]
    pub appearance: Appearance,
    pub level: u16,
    #[serde(default)]
    pub experience: i64,
    #[serde(default)]
    pub gold: i32,
    #[serde(default)]
    pub statistics: Statistics,
    #[serde(default)]
    pub skills: Skills,
    /// One entry per slot, `None` for empty slots
    #[serde(default)]
    pub inventory: Vec<Option<ItemData>>,
    #[serde(default)]
    pub quests: Vec<QuestData>,
    #[serde(default)]
    pub last_saved: Option<DateTime<Utc>>,
}

impl PlayerData {
    /// Fresh level 1 character
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            job: JobId::VAGRANT,
            appearance: Appearance::default(),
            level: 1,
            experience: 0,
            gold: 0,
            statistics: Statistics::default(),
            skills: Skills::default(),
            inventory: vec![None; INVENTORY_SIZE],
            quests: Vec::new(),
            last_saved: None,
        }
    }
}

/// Player storage backend
#[derive(Debug)]
pub enum PlayerStore {
    Memory(MemoryPlayerStore),
    Json(JsonPlayerStore),
}

impl PlayerStore {
    pub fn memory() -> Self {
        Self::Memory(MemoryPlayerStore::default())
    }

    pub fn json(root: impl Into<PathBuf>) -> Self {
        Self::Json(JsonPlayerStore::new(root))
    }

    /// Load a player; `None` when no such player was ever saved
    pub async fn load(&self, player_id: u32) -> Result<Option<PlayerData>> {
        match self {
            Self::Memory(store) => Ok(store.load(player_id)),
            Self::Json(store) => store.load(player_id).await,
        }
    }

    /// Save a player, stamping `last_saved`
    pub async fn save(&self, data: &PlayerData) -> Result<()> {
        let mut data = data.clone();
        data.last_saved = Some(Utc::now());

        match self {
            Self::Memory(store) => {
                store.save(data);
                Ok(())
            }
            Self::Json(store) => store.save(&data).await,
        }
    }
}

/// Volatile store used in development and tests
#[derive(Debug, Default)]
pub struct MemoryPlayerStore {
    players: DashMap<u32, PlayerData>,
}

impl MemoryPlayerStore {
    fn load(&self, player_id: u32) -> Option<PlayerData> {
        self.players.get(&player_id).map(|entry| entry.clone())
    }

    fn save(&self, data: PlayerData) {
        debug!(player_id = data.id, "Saved player to memory store");
        self.players.insert(data.id, data);
    }
}

/// One `<id>.json` file per player under a root directory
#[derive(Debug)]
pub struct JsonPlayerStore {
    root: PathBuf,
}

impl JsonPlayerStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, player_id: u32) -> PathBuf {
        self.root.join(format!("{player_id}.json"))
    }

    async fn load(&self, player_id: u32) -> Result<Option<PlayerData>> {
        match tokio::fs::read(self.path_for(player_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a temporary file then rename over the old one
    async fn save(&self, data: &PlayerData) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;

        let path = self.path_for(data.id);
        let temp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(data)?;
        tokio::fs::write(&temp, bytes).await?;
        tokio::fs::rename(&temp, &path).await?;

        info!(player_id = data.id, path = %path.display(), "Saved player");
        Ok(())
    }
}
