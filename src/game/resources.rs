//! Game resources module
//!
//! Read-only design tables loaded once at startup:
//! - `items.json`: array of item properties
//! - `quests.json`: array of quest properties
//! - `texts.json`: map of text key to localized string

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::error::Result;
use crate::game::item::{ItemId, ItemProperties};
use crate::game::quest::{QuestId, QuestProperties};

/// Design data shared by every session
#[derive(Debug, Clone, Default)]
pub struct GameResources {
    items: HashMap<ItemId, Arc<ItemProperties>>,
    quests: HashMap<QuestId, Arc<QuestProperties>>,
    texts: HashMap<String, String>,
}

impl GameResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every table from a resource directory. Missing files yield empty tables.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let items: Vec<ItemProperties> = load_table(&path.join("items.json")).await?;
        let quests: Vec<QuestProperties> = load_table(&path.join("quests.json")).await?;
        let texts: HashMap<String, String> = load_table(&path.join("texts.json")).await?;

        let mut resources = Self::new();
        for item in items {
            resources = resources.with_item(item);
        }
        for quest in quests {
            resources = resources.with_quest(quest);
        }
        resources.texts = texts;

        info!(
            path = %path.display(),
            items = resources.items.len(),
            quests = resources.quests.len(),
            texts = resources.texts.len(),
            "Loaded game resources"
        );

        Ok(resources)
    }

    /// Builder: register an item definition
    pub fn with_item(mut self, item: ItemProperties) -> Self {
        self.items.insert(item.id, Arc::new(item));
        self
    }

    /// Builder: register a quest definition
    pub fn with_quest(mut self, quest: QuestProperties) -> Self {
        self.quests.insert(quest.id, Arc::new(quest));
        self
    }

    /// Builder: register a localized text
    pub fn with_text(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.texts.insert(key.into(), value.into());
        self
    }

    pub fn item(&self, id: ItemId) -> Option<Arc<ItemProperties>> {
        self.items.get(&id).cloned()
    }

    pub fn quest(&self, id: QuestId) -> Option<Arc<QuestProperties>> {
        self.quests.get(&id).cloned()
    }

    /// Localized text, falling back to the key itself
    pub fn text<'a>(&'a self, key: &'a str) -> &'a str {
        self.texts.get(key).map(String::as_str).unwrap_or(key)
    }
}

async fn load_table<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "Resource file not found, using empty table");
            Ok(T::default())
        }
        Err(e) => Err(e.into()),
    }
}
