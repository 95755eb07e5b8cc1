//! Authoritative in-memory cache of items and bucket order.
//!
//! # Responsibility
//! - Own every cached item and the ordered membership of every bucket.
//! - Provide O(1) reads by id and O(bucket size) bucket listing.
//!
//! # Invariants
//! - Every cached item id appears in exactly one bucket sequence, once.
//! - `item.bucket` always names the bucket whose sequence holds the item.
//! - Failed operations leave the store unchanged.
//! - Bucket ids are unique within the board.

use crate::model::ids::{BucketId, ItemId, ValidationError};
use crate::model::item::{normalize_label, Bucket, Item};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from entity store operations.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    Validation(ValidationError),
    NotFound(ItemId),
    UnknownBucket(BucketId),
    DuplicateBucket(BucketId),
    /// Destination index outside `0..=max_index` under `IndexPolicy::Reject`.
    InvalidIndex {
        bucket: BucketId,
        index: usize,
        max_index: usize,
    },
    /// Partition check found an item in zero or several sequences.
    PartitionViolation(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "item not found: {id}"),
            Self::UnknownBucket(id) => write!(f, "bucket not found: {id}"),
            Self::DuplicateBucket(id) => write!(f, "bucket already exists: {id}"),
            Self::InvalidIndex {
                bucket,
                index,
                max_index,
            } => write!(
                f,
                "index {index} is out of bounds for bucket {bucket} (max {max_index})"
            ),
            Self::PartitionViolation(message) => write!(f, "partition violated: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for StoreError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

/// How out-of-range move indices are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexPolicy {
    /// Fail with `StoreError::InvalidIndex`.
    #[default]
    Reject,
    /// Clamp to the last valid index.
    Clamp,
}

/// Bucket and index of one item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Placement {
    pub bucket: BucketId,
    pub index: usize,
}

/// Captured state of one entity, used as a rollback target.
///
/// `item == None` means the entity did not exist when captured.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSnapshot {
    pub id: ItemId,
    pub item: Option<Item>,
    pub placement: Option<Placement>,
}

/// Owned, read-only copy of the board handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardSnapshot {
    pub buckets: Vec<BucketSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketSnapshot {
    pub id: BucketId,
    pub label: String,
    pub items: Vec<Item>,
}

impl BoardSnapshot {
    pub fn bucket(&self, id: &BucketId) -> Option<&BucketSnapshot> {
        self.buckets.iter().find(|bucket| &bucket.id == id)
    }
}

/// Entity cache for one mounted board.
#[derive(Debug, Default)]
pub struct EntityStore {
    items: HashMap<ItemId, Item>,
    buckets: Vec<Bucket>,
    slots: HashMap<BucketId, usize>,
    index_policy: IndexPolicy,
}

impl EntityStore {
    pub fn new(index_policy: IndexPolicy) -> Self {
        Self {
            index_policy,
            ..Self::default()
        }
    }

    /// Creates a store with the given buckets in board order.
    pub fn with_buckets<I, L>(index_policy: IndexPolicy, buckets: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = (BucketId, L)>,
        L: Into<String>,
    {
        let mut store = Self::new(index_policy);
        for (id, label) in buckets {
            store.add_bucket(id, label)?;
        }
        Ok(store)
    }

    pub fn index_policy(&self) -> IndexPolicy {
        self.index_policy
    }

    /// Appends one bucket to the board.
    pub fn add_bucket(&mut self, id: BucketId, label: impl Into<String>) -> StoreResult<()> {
        if self.slots.contains_key(&id) {
            return Err(StoreError::DuplicateBucket(id));
        }
        let bucket = Bucket::new(id.clone(), label)?;
        self.slots.insert(id, self.buckets.len());
        self.buckets.push(bucket);
        Ok(())
    }

    pub fn rename_bucket(&mut self, id: &BucketId, label: impl Into<String>) -> StoreResult<()> {
        let label = normalize_label(label.into())?;
        let slot = self.slot(id)?;
        self.buckets[slot].label = label;
        Ok(())
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    pub fn has_bucket(&self, id: &BucketId) -> bool {
        self.slots.contains_key(id)
    }

    pub fn get(&self, id: &ItemId) -> Option<&Item> {
        self.items.get(id)
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.items.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item ids of one bucket in display order. Unknown buckets are empty.
    pub fn bucket_item_ids(&self, bucket: &BucketId) -> &[ItemId] {
        match self.slots.get(bucket) {
            Some(&slot) => &self.buckets[slot].items,
            None => &[],
        }
    }

    /// Items of one bucket in display order.
    pub fn bucket_items(&self, bucket: &BucketId) -> Vec<&Item> {
        self.bucket_item_ids(bucket)
            .iter()
            .filter_map(|id| self.items.get(id))
            .collect()
    }

    pub fn placement_of(&self, id: &ItemId) -> Option<Placement> {
        let item = self.items.get(id)?;
        let index = self
            .bucket_item_ids(&item.bucket)
            .iter()
            .position(|candidate| candidate == id)?;
        Some(Placement {
            bucket: item.bucket.clone(),
            index,
        })
    }

    /// Inserts or replaces one item.
    ///
    /// New items and items changing bucket land at their position hint
    /// (clamped) or at the end. Items staying in their bucket keep their
    /// index unless the hint names another one. Unknown buckets are
    /// registered at the end of the board, labelled with their id.
    ///
    /// Returns the previously cached value.
    pub fn upsert(&mut self, mut item: Item) -> StoreResult<Option<Item>> {
        item.validate()?;
        let hint = item.position.take().map(|value| value as usize);
        if !self.slots.contains_key(&item.bucket) {
            let label = item.bucket.as_str().to_string();
            self.add_bucket(item.bucket.clone(), label)?;
        }

        let current = self.placement_of(&item.id);
        match current {
            Some(placement) if placement.bucket == item.bucket => {
                if let Some(target) = hint {
                    if target != placement.index {
                        self.detach(&item.id, &placement);
                        self.attach(item.id.clone(), &item.bucket, target);
                    }
                }
            }
            Some(placement) => {
                self.detach(&item.id, &placement);
                self.attach(item.id.clone(), &item.bucket, hint.unwrap_or(usize::MAX));
            }
            None => {
                self.attach(item.id.clone(), &item.bucket, hint.unwrap_or(usize::MAX));
            }
        }

        Ok(self.items.insert(item.id.clone(), item))
    }

    /// Removes one item. Removing an unknown id is a no-op.
    pub fn remove(&mut self, id: &ItemId) -> Option<Item> {
        if let Some(placement) = self.placement_of(id) {
            self.detach(id, &placement);
        }
        self.items.remove(id)
    }

    /// Moves one item to `bucket` at `index`.
    ///
    /// Bounds are those of the destination after the item has left its
    /// source: `0..len-1` within the same bucket, `0..=len` across buckets.
    ///
    /// Returns the placement the item had before the move.
    ///
    /// # Errors
    /// - `NotFound` for unknown ids.
    /// - `UnknownBucket` for unregistered destinations.
    /// - `InvalidIndex` for out-of-range indices under `IndexPolicy::Reject`.
    pub fn move_to_bucket(
        &mut self,
        id: &ItemId,
        bucket: &BucketId,
        index: usize,
    ) -> StoreResult<Placement> {
        let source = self
            .placement_of(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let target = self.resolve_index(id, bucket, index)?;

        self.detach(id, &source);
        self.attach(id.clone(), bucket, target);
        if let Some(item) = self.items.get_mut(id) {
            item.bucket = bucket.clone();
        }
        Ok(source)
    }

    /// Validates a move target and returns the effective index.
    pub fn resolve_index(
        &self,
        id: &ItemId,
        bucket: &BucketId,
        index: usize,
    ) -> StoreResult<usize> {
        let slot = self.slot(bucket)?;
        let len = self.buckets[slot].items.len();
        let already_inside = self.items.get(id).map(|item| &item.bucket) == Some(bucket);
        let max_index = if already_inside {
            len.saturating_sub(1)
        } else {
            len
        };
        if index <= max_index {
            return Ok(index);
        }
        match self.index_policy {
            IndexPolicy::Clamp => Ok(max_index),
            IndexPolicy::Reject => Err(StoreError::InvalidIndex {
                bucket: bucket.clone(),
                index,
                max_index,
            }),
        }
    }

    /// Sets the pending flag. Returns `false` for unknown ids.
    pub fn set_pending(&mut self, id: &ItemId, pending: bool) -> bool {
        match self.items.get_mut(id) {
            Some(item) => {
                item.pending = pending;
                true
            }
            None => false,
        }
    }

    /// Raises the cached revision to at least `revision`.
    pub fn raise_revision(&mut self, id: &ItemId, revision: u64) {
        if let Some(item) = self.items.get_mut(id) {
            item.revision = item.revision.max(revision);
        }
    }

    /// Captures value and placement of one entity for later restore.
    pub fn capture(&self, id: &ItemId) -> ItemSnapshot {
        ItemSnapshot {
            id: id.clone(),
            item: self.items.get(id).cloned(),
            placement: self.placement_of(id),
        }
    }

    /// Puts one entity back into a previously captured state.
    pub fn restore(&mut self, snapshot: ItemSnapshot) {
        self.remove(&snapshot.id);
        let Some(mut item) = snapshot.item else {
            return;
        };
        if let Some(placement) = snapshot.placement {
            item.bucket = placement.bucket;
            item.position = u32::try_from(placement.index).ok();
        }
        // Captured items were valid when captured; a failure here means the
        // bucket vanished, which this store never does.
        let _ = self.upsert(item);
    }

    /// Owned copy of the whole board for rendering.
    pub fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            buckets: self
                .buckets
                .iter()
                .map(|bucket| BucketSnapshot {
                    id: bucket.id.clone(),
                    label: bucket.label.clone(),
                    items: bucket
                        .items
                        .iter()
                        .filter_map(|id| self.items.get(id).cloned())
                        .collect(),
                })
                .collect(),
        }
    }

    /// Checks that every cached item sits in exactly one sequence, once.
    pub fn verify_partition(&self) -> StoreResult<()> {
        let mut seen = HashSet::new();
        for bucket in &self.buckets {
            for id in &bucket.items {
                if !seen.insert(id) {
                    return Err(StoreError::PartitionViolation(format!(
                        "item {id} appears more than once"
                    )));
                }
                match self.items.get(id) {
                    Some(item) if item.bucket == bucket.id => {}
                    Some(item) => {
                        return Err(StoreError::PartitionViolation(format!(
                            "item {id} listed in {} but owned by {}",
                            bucket.id, item.bucket
                        )));
                    }
                    None => {
                        return Err(StoreError::PartitionViolation(format!(
                            "bucket {} lists unknown item {id}",
                            bucket.id
                        )));
                    }
                }
            }
        }
        if seen.len() != self.items.len() {
            return Err(StoreError::PartitionViolation(format!(
                "{} cached items but {} listed",
                self.items.len(),
                seen.len()
            )));
        }
        Ok(())
    }

    fn slot(&self, bucket: &BucketId) -> StoreResult<usize> {
        self.slots
            .get(bucket)
            .copied()
            .ok_or_else(|| StoreError::UnknownBucket(bucket.clone()))
    }

    fn detach(&mut self, id: &ItemId, placement: &Placement) {
        if let Some(&slot) = self.slots.get(&placement.bucket) {
            let sequence = &mut self.buckets[slot].items;
            if sequence.get(placement.index) == Some(id) {
                sequence.remove(placement.index);
            } else {
                sequence.retain(|candidate| candidate != id);
            }
        }
    }

    fn attach(&mut self, id: ItemId, bucket: &BucketId, index: usize) {
        if let Some(&slot) = self.slots.get(bucket) {
            let sequence = &mut self.buckets[slot].items;
            let index = index.min(sequence.len());
            sequence.insert(index, id);
        }
    }
}
