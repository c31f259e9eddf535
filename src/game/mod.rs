//! Game module
//!
//! This module contains the game logic of a world node:
//! - Items and the inventory container
//! - Quest design data, the quest diary and the quest engine
//! - The player aggregate and its persistence
//! - Design data loading

pub mod inventory;
pub mod item;
pub mod persistence;
pub mod player;
pub mod quest;
pub mod quest_diary;
pub mod quest_engine;
pub mod resources;
