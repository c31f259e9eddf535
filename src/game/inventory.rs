//! Inventory module
//!
//! This module handles player item storage:
//! - Capacity-bounded slots
//! - Item creation with stacking for stackable items
//! - Slot lookup and partial or full deletion

use thiserror::Error;

use crate::game::item::{Item, ItemId};

/// Number of inventory slots available to a character
pub const INVENTORY_SIZE: usize = 42;

/// Inventory operation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    #[error("Inventory is full")]
    Full,

    #[error("Invalid slot: {0}")]
    InvalidSlot(usize),

    #[error("Slot {0} is empty")]
    EmptySlot(usize),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(i16),
}

/// Capacity-bounded item storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemContainer {
    slots: Vec<Option<Item>>,
}

impl Default for ItemContainer {
    fn default() -> Self {
        Self::new(INVENTORY_SIZE)
    }
}

impl ItemContainer {
    /// Create an empty container with `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots
    pub fn storage_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn free_slots(&self) -> usize {
        self.capacity() - self.storage_count()
    }

    pub fn is_full(&self) -> bool {
        self.free_slots() == 0
    }

    pub fn get(&self, slot: usize) -> Option<&Item> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Occupied slots with their index
    pub fn items(&self) -> impl Iterator<Item = (usize, &Item)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|item| (index, item)))
    }

    /// First occupied slot whose item matches
    pub fn find_slot<F>(&self, predicate: F) -> Option<usize>
    where
        F: Fn(&Item) -> bool,
    {
        self.items()
            .find(|(_, item)| predicate(item))
            .map(|(index, _)| index)
    }

    /// Total quantity of an item across all slots
    pub fn count_item(&self, item_id: ItemId) -> i32 {
        self.items()
            .filter(|(_, item)| item.id() == item_id)
            .map(|(_, item)| i32::from(item.quantity))
            .sum()
    }

    /// Place an item into a specific slot, replacing its contents
    pub fn set(&mut self, slot: usize, item: Option<Item>) -> Result<(), InventoryError> {
        let target = self
            .slots
            .get_mut(slot)
            .ok_or(InventoryError::InvalidSlot(slot))?;
        *target = item;
        Ok(())
    }

    /// Store an item, topping up existing stacks first.
    ///
    /// Returns the slots that changed. Nothing is modified when the
    /// item does not fit.
    pub fn create_item(&mut self, item: Item) -> Result<Vec<usize>, InventoryError> {
        if item.quantity <= 0 {
            return Err(InventoryError::InvalidQuantity(item.quantity));
        }

        let mut remaining = item.quantity;
        let mut plan: Vec<(usize, i16)> = Vec::new();

        if item.properties().is_stackable() {
            for (index, stored) in self.items() {
                if remaining == 0 {
                    break;
                }
                if stored.stacks_with(&item) {
                    let moved = stored.stack_room().min(remaining);
                    if moved > 0 {
                        plan.push((index, moved));
                        remaining -= moved;
                    }
                }
            }
        }

        let max_stack = item.properties().max_stack.max(1);
        let empty_slots: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(index, _)| index)
            .collect();

        let mut new_stacks: Vec<(usize, i16)> = Vec::new();
        let mut empty = empty_slots.into_iter();
        while remaining > 0 {
            let index = empty.next().ok_or(InventoryError::Full)?;
            let quantity = remaining.min(max_stack);
            new_stacks.push((index, quantity));
            remaining -= quantity;
        }

        let mut changed = Vec::with_capacity(plan.len() + new_stacks.len());
        for (index, moved) in plan {
            if let Some(stored) = self.slots[index].as_mut() {
                stored.quantity += moved;
                changed.push(index);
            }
        }
        for (index, quantity) in new_stacks {
            self.slots[index] = Some(item.clone().with_quantity(quantity));
            changed.push(index);
        }

        Ok(changed)
    }

    /// Store several items as one unit.
    ///
    /// Returns the changed slots of each item in order. When any item does
    /// not fit the container is left untouched.
    pub fn create_items(
        &mut self,
        items: impl IntoIterator<Item = Item>,
    ) -> Result<Vec<Vec<usize>>, InventoryError> {
        let mut staged = self.clone();
        let changed = items
            .into_iter()
            .map(|item| staged.create_item(item))
            .collect::<Result<Vec<_>, _>>()?;
        *self = staged;
        Ok(changed)
    }

    /// Remove up to `quantity` from a slot; the slot empties when it reaches zero.
    ///
    /// Returns the quantity left in the slot.
    pub fn delete_item(&mut self, slot: usize, quantity: i16) -> Result<i16, InventoryError> {
        if quantity <= 0 {
            return Err(InventoryError::InvalidQuantity(quantity));
        }

        let entry = self
            .slots
            .get_mut(slot)
            .ok_or(InventoryError::InvalidSlot(slot))?;
        let item = entry.as_mut().ok_or(InventoryError::EmptySlot(slot))?;

        let left = item.quantity.saturating_sub(quantity).max(0);
        if left == 0 {
            *entry = None;
        } else {
            item.quantity = left;
        }

        Ok(left)
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }
}
