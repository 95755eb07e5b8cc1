//! Item domain model.
//!
//! # Responsibility
//! - Define the canonical record shared by tasks, tools, shifts and meetings.
//! - Validate kind-specific fields before an item enters the engine.
//!
//! # Invariants
//! - `id` is stable and never reused for another item.
//! - `status` belongs to the machine of `kind` (or is absent).
//! - `claimant` is only ever set on claimable kinds.
//! - `revision` only grows for a given item.

use crate::model::ids::{BucketId, Identity, ItemId, ValidationError};
use crate::model::status::{MeetingStatus, Status, TaskStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Entity kinds rendered by the dashboard boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Card on the task board; carries a task status.
    Task,
    /// Entry in the tool catalog; claimable.
    Tool,
    /// Slot on the shift-claim board; claimable.
    Shift,
    /// Meeting with a planned/ongoing/completed workflow.
    Meeting,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Tool => "tool",
            Self::Shift => "shift",
            Self::Meeting => "meeting",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "task" => Some(Self::Task),
            "tool" => Some(Self::Tool),
            "shift" => Some(Self::Shift),
            "meeting" => Some(Self::Meeting),
            _ => None,
        }
    }

    /// Whether items of this kind can hold an exclusive claimant.
    pub fn is_claimable(self) -> bool {
        matches!(self, Self::Tool | Self::Shift)
    }

    /// Status assigned to freshly created items of this kind.
    pub fn initial_status(self) -> Option<Status> {
        match self {
            Self::Task => Some(Status::Task(TaskStatus::Todo)),
            Self::Meeting => Some(Status::Meeting(MeetingStatus::Planned)),
            Self::Tool | Self::Shift => None,
        }
    }

    fn accepts_status(self, status: Status) -> bool {
        matches!(
            (self, status),
            (Self::Task, Status::Task(_)) | (Self::Meeting, Status::Meeting(_))
        )
    }
}

/// Canonical cached record for one board entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    /// Serialized as `type` to match the notifier payload naming.
    #[serde(rename = "type")]
    pub kind: EntityKind,
    /// Owning bucket (board column, catalog category, ...).
    pub bucket: BucketId,
    /// Arbitrary user-editable fields. Always a JSON object.
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub claimant: Option<Identity>,
    /// Logical timestamp of the last applied write.
    #[serde(default)]
    pub revision: u64,
    /// Set while a local mutation on this item awaits confirmation.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending: bool,
    /// Index hint within `bucket`, carried on the wire only.
    ///
    /// The cache keeps order in bucket sequences and strips this on upsert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
}

impl Item {
    /// Creates a new item with a generated id and the kind's initial status.
    pub fn new(kind: EntityKind, bucket: BucketId) -> Self {
        Self::with_id(ItemId::generate(), kind, bucket)
    }

    /// Creates a new item with a caller-provided stable id.
    ///
    /// Used by import and remote insert paths where identity already exists.
    pub fn with_id(id: ItemId, kind: EntityKind, bucket: BucketId) -> Self {
        Self {
            id,
            kind,
            bucket,
            fields: Map::new(),
            status: kind.initial_status(),
            claimant: None,
            revision: 0,
            pending: false,
            position: None,
        }
    }

    /// Builder-style helper for setting one field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Reads one string field, if present and textual.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Checks kind-specific invariants.
    ///
    /// # Errors
    /// - `StatusKindMismatch` when `status` belongs to another machine or a
    ///   status is set on a kind without one.
    /// - `ClaimantNotAllowed` when a non-claimable kind carries a claimant.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(status) = self.status {
            if !self.kind.accepts_status(status) {
                return Err(ValidationError::StatusKindMismatch {
                    kind: self.kind.as_str(),
                });
            }
        }
        if self.claimant.is_some() && !self.kind.is_claimable() {
            return Err(ValidationError::ClaimantNotAllowed {
                kind: self.kind.as_str(),
            });
        }
        Ok(())
    }

    pub fn is_claimed(&self) -> bool {
        self.claimant.is_some()
    }
}

/// Ordered grouping of items inside a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub id: BucketId,
    pub label: String,
    /// Item ids in display order.
    pub items: Vec<ItemId>,
}

impl Bucket {
    /// Creates an empty bucket after trimming and checking the label.
    pub fn new(id: BucketId, label: impl Into<String>) -> Result<Self, ValidationError> {
        let label = normalize_label(label.into())?;
        Ok(Self {
            id,
            label,
            items: Vec::new(),
        })
    }
}

pub(crate) fn normalize_label(value: String) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::BlankLabel);
    }
    Ok(trimmed.to_string())
}
