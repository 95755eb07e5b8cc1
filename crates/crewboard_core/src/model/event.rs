//! Remote change notification envelope.
//!
//! # Invariants
//! - `operation` is a closed set; new kinds are compile-time checked at every
//!   `match`.
//! - `insert`/`update` events carry the full item as payload; `delete` events
//!   carry none.

use crate::model::ids::ItemId;
use crate::model::item::{EntityKind, Item};
use serde::{Deserialize, Serialize};

/// Operation carried by one change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

/// One remote change as delivered by the change notifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub operation: ChangeOperation,
    pub entity_id: ItemId,
    pub entity_type: EntityKind,
    #[serde(default)]
    pub payload: Option<Item>,
    /// Logical timestamp assigned by the writer.
    pub timestamp: u64,
}

impl ChangeEvent {
    pub fn insert(item: Item, timestamp: u64) -> Self {
        Self::with_payload(ChangeOperation::Insert, item, timestamp)
    }

    pub fn update(item: Item, timestamp: u64) -> Self {
        Self::with_payload(ChangeOperation::Update, item, timestamp)
    }

    pub fn delete(entity_id: ItemId, entity_type: EntityKind, timestamp: u64) -> Self {
        Self {
            operation: ChangeOperation::Delete,
            entity_id,
            entity_type,
            payload: None,
            timestamp,
        }
    }

    fn with_payload(operation: ChangeOperation, item: Item, timestamp: u64) -> Self {
        Self {
            operation,
            entity_id: item.id.clone(),
            entity_type: item.kind,
            payload: Some(item),
            timestamp,
        }
    }

    /// Decodes one event from its JSON wire form.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Encodes this event into its JSON wire form.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
