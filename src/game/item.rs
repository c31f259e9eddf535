//! Item definitions module
//!
//! This module contains item design data and item instances:
//! - Item properties loaded from the resource files
//! - Item instances with quantity, refine and element attributes
//! - Wire record used by inventory snapshots

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::net::buffer::PacketBuffer;
use crate::protocol::packets::WireRecord;

/// Item identifier from the design data
pub type ItemId = i32;

/// Default stack limit for stackable items
pub const DEFAULT_MAX_STACK: i16 = 9999;

/// Elemental attribute of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ElementType {
    #[default]
    None = 0,
    Fire = 1,
    Water = 2,
    Electricity = 3,
    Wind = 4,
    Earth = 5,
}

impl ElementType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Fire),
            2 => Some(Self::Water),
            3 => Some(Self::Electricity),
            4 => Some(Self::Wind),
            5 => Some(Self::Earth),
            _ => None,
        }
    }
}

fn default_max_stack() -> i16 {
    1
}

/// Item design data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemProperties {
    pub id: ItemId,
    pub name: String,
    /// Items with a stack limit of 1 never stack
    #[serde(default = "default_max_stack")]
    pub max_stack: i16,
}

impl ItemProperties {
    pub fn new(id: ItemId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            max_stack: 1,
        }
    }

    /// Builder: make the item stackable
    pub fn stackable(mut self, max_stack: i16) -> Self {
        self.max_stack = max_stack;
        self
    }

    pub fn is_stackable(&self) -> bool {
        self.max_stack > 1
    }
}

/// An item instance held by a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    properties: Arc<ItemProperties>,
    pub quantity: i16,
    pub refine: u8,
    pub element: ElementType,
    pub element_refine: u8,
}

impl Item {
    /// Create a single plain item
    pub fn new(properties: Arc<ItemProperties>) -> Self {
        Self {
            properties,
            quantity: 1,
            refine: 0,
            element: ElementType::None,
            element_refine: 0,
        }
    }

    pub fn with_quantity(mut self, quantity: i16) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn with_refine(mut self, refine: u8) -> Self {
        self.refine = refine;
        self
    }

    pub fn with_element(mut self, element: ElementType, element_refine: u8) -> Self {
        self.element = element;
        self.element_refine = element_refine;
        self
    }

    pub fn id(&self) -> ItemId {
        self.properties.id
    }

    pub fn name(&self) -> &str {
        &self.properties.name
    }

    pub fn properties(&self) -> &Arc<ItemProperties> {
        &self.properties
    }

    /// Whether `other` may be merged into this stack
    pub fn stacks_with(&self, other: &Item) -> bool {
        self.properties.is_stackable()
            && self.id() == other.id()
            && self.refine == other.refine
            && self.element == other.element
            && self.element_refine == other.element_refine
    }

    /// Room left in this stack
    pub fn stack_room(&self) -> i16 {
        self.properties.max_stack.saturating_sub(self.quantity).max(0)
    }

    pub fn record(&self) -> ItemRecord {
        ItemRecord {
            id: self.id(),
            quantity: self.quantity,
            refine: self.refine,
            element: self.element as u8,
            element_refine: self.element_refine,
        }
    }
}

/// Item fields as sent to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemRecord {
    pub id: ItemId,
    pub quantity: i16,
    pub refine: u8,
    pub element: u8,
    pub element_refine: u8,
}

impl WireRecord for ItemRecord {
    fn write_record(&self, buffer: &mut PacketBuffer) {
        buffer.write_int(self.id);
        buffer.write_short(self.quantity);
        buffer.write_ubyte(self.refine);
        buffer.write_ubyte(self.element);
        buffer.write_ubyte(self.element_refine);
    }

    fn read_record(buffer: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: buffer.read_int()?,
            quantity: buffer.read_short()?,
            refine: buffer.read_ubyte()?,
            element: buffer.read_ubyte()?,
            element_refine: buffer.read_ubyte()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn potion() -> Arc<ItemProperties> {
        Arc::new(ItemProperties::new(10, "Potion").stackable(20))
    }

    #[test]
    fn test_new_item_defaults() {
        let item = Item::new(potion());
        assert_eq!(item.quantity, 1);
        assert_eq!(item.refine, 0);
        assert_eq!(item.element, ElementType::None);
        assert_eq!(item.name(), "Potion");
    }

    #[test]
    fn test_stacking_rules() {
        let a = Item::new(potion()).with_quantity(15);
        let b = Item::new(potion());
        let refined = Item::new(potion()).with_refine(3);

        assert!(a.stacks_with(&b));
        assert!(!a.stacks_with(&refined));
        assert_eq!(a.stack_room(), 5);

        let sword = Item::new(Arc::new(ItemProperties::new(20, "Sword")));
        assert!(!sword.stacks_with(&sword.clone()));
    }

    #[test]
    fn test_record_layout() {
        let item = Item::new(potion())
            .with_quantity(3)
            .with_element(ElementType::Wind, 2);
        let mut buffer = PacketBuffer::new();
        item.record().write_record(&mut buffer);

        assert_eq!(buffer.as_bytes(), &[10, 0, 0, 0, 3, 0, 0, 4, 2]);
        assert_eq!(ItemRecord::read_record(&mut buffer).unwrap(), item.record());
    }
}
