//! Optimistic overlay of locally issued, unconfirmed mutations.
//!
//! # Responsibility
//! - Apply local mutations to `EntityStore` immediately.
//! - Remember what each entity looked like before, so a failed write can be
//!   undone without touching unrelated entities.
//!
//! # Invariants
//! - At most one pending mutation per entity is authoritative; a newer one
//!   supersedes the older and takes over its rollback baseline.
//! - `enqueue` either applies fully or leaves the store unchanged.
//! - `rollback` never fails.

use crate::engine::store::{EntityStore, ItemSnapshot, StoreError};
use crate::model::ids::{BucketId, Identity, ItemId, ValidationError};
use crate::model::item::Item;
use crate::model::status::Status;
use log::debug;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type QueueResult<T> = Result<T, QueueError>;

/// Errors raised while queueing or settling a mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueError {
    Store(StoreError),
    /// Target entity is not cached.
    NotFound(ItemId),
    /// `Create` names an id that is already cached.
    AlreadyExists(ItemId),
    /// Handle was never issued, or its entity has already settled.
    UnknownHandle(PendingHandle),
    /// Claimant and status changes are only issued by their arbiters.
    Restricted {
        id: ItemId,
        operation: &'static str,
    },
}

impl Display for QueueError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "item not found: {id}"),
            Self::AlreadyExists(id) => write!(f, "item already exists: {id}"),
            Self::UnknownHandle(handle) => write!(
                f,
                "no pending mutation #{} for item {}",
                handle.seq, handle.entity
            ),
            Self::Restricted { id, operation } => write!(
                f,
                "{operation} on {id} must be issued through its arbiter"
            ),
        }
    }
}

impl Error for QueueError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for QueueError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}

impl From<ValidationError> for QueueError {
    fn from(value: ValidationError) -> Self {
        Self::Store(StoreError::Validation(value))
    }
}

/// One local change to a single entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Create(Item),
    /// Merges `fields` into the item; `null` values remove keys.
    Patch {
        id: ItemId,
        fields: Map<String, Value>,
    },
    Move {
        id: ItemId,
        bucket: BucketId,
        index: usize,
    },
    SetClaimant {
        id: ItemId,
        claimant: Option<Identity>,
    },
    SetStatus {
        id: ItemId,
        status: Status,
    },
    Delete {
        id: ItemId,
    },
}

impl Mutation {
    pub fn entity_id(&self) -> &ItemId {
        match self {
            Self::Create(item) => &item.id,
            Self::Patch { id, .. }
            | Self::Move { id, .. }
            | Self::SetClaimant { id, .. }
            | Self::SetStatus { id, .. }
            | Self::Delete { id } => id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Patch { .. } => "patch",
            Self::Move { .. } => "move",
            Self::SetClaimant { .. } => "set_claimant",
            Self::SetStatus { .. } => "set_status",
            Self::Delete { .. } => "delete",
        }
    }
}

/// Receipt for one queued mutation, used to confirm or roll it back.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingHandle {
    entity: ItemId,
    seq: u64,
    issued_at: u64,
}

impl PendingHandle {
    pub fn entity(&self) -> &ItemId {
        &self.entity
    }

    pub fn issued_at(&self) -> u64 {
        self.issued_at
    }
}

/// Result of confirming one handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// The authoritative mutation confirmed; the entity is no longer pending.
    Confirmed,
    /// An older, superseded mutation confirmed; the entity stays pending.
    Superseded,
}

/// Recoverable notice produced by a rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackNotice {
    pub entity: ItemId,
    pub issued_at: u64,
    /// `true` when the store was reverted, `false` when the handle had
    /// already been superseded or settled.
    pub restored: bool,
    pub reason: String,
}

#[derive(Debug, Clone)]
struct SupersededMutation {
    seq: u64,
    applied: ItemSnapshot,
}

#[derive(Debug, Clone)]
struct PendingEntry {
    seq: u64,
    issued_at: u64,
    mutation: Mutation,
    base: ItemSnapshot,
    superseded: Vec<SupersededMutation>,
}

/// Per-entity queue of pending optimistic mutations.
#[derive(Debug, Default)]
pub struct MutationQueue {
    pending: HashMap<ItemId, PendingEntry>,
    next_seq: u64,
}

impl MutationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `mutation` optimistically and records it as pending.
    ///
    /// The applied item carries `pending = true` and `revision = issued_at`.
    ///
    /// # Errors
    /// - `NotFound` when the target is not cached (all but `Create`).
    /// - `AlreadyExists` when `Create` targets a cached id.
    /// - `Store` for validation, bucket and index failures.
    pub fn enqueue(
        &mut self,
        store: &mut EntityStore,
        issued_at: u64,
        mutation: Mutation,
    ) -> QueueResult<PendingHandle> {
        let id = mutation.entity_id().clone();
        let before = store.capture(&id);
        apply(store, &mutation, issued_at)?;

        self.next_seq += 1;
        let seq = self.next_seq;
        debug!(
            "event=mutation_enqueue module=queue status=ok kind={} seq={} issued_at={}",
            mutation.label(),
            seq,
            issued_at
        );

        match self.pending.get_mut(&id) {
            Some(entry) => {
                entry.superseded.push(SupersededMutation {
                    seq: entry.seq,
                    applied: before,
                });
                entry.seq = seq;
                entry.issued_at = issued_at;
                entry.mutation = mutation;
            }
            None => {
                self.pending.insert(
                    id.clone(),
                    PendingEntry {
                        seq,
                        issued_at,
                        mutation,
                        base: before,
                        superseded: Vec::new(),
                    },
                );
            }
        }

        Ok(PendingHandle {
            entity: id,
            seq,
            issued_at,
        })
    }

    /// Marks one mutation as persisted.
    ///
    /// `persisted_revision` is the revision the persistence store assigned,
    /// if any; the cached revision is raised to it.
    pub fn confirm(
        &mut self,
        store: &mut EntityStore,
        handle: &PendingHandle,
        persisted_revision: Option<u64>,
    ) -> QueueResult<Settlement> {
        let authoritative = self
            .pending
            .get(&handle.entity)
            .map(|entry| entry.seq == handle.seq)
            .ok_or_else(|| QueueError::UnknownHandle(handle.clone()))?;

        if authoritative {
            self.pending.remove(&handle.entity);
            store.set_pending(&handle.entity, false);
            if let Some(revision) = persisted_revision {
                store.raise_revision(&handle.entity, revision);
            }
            return Ok(Settlement::Confirmed);
        }

        let entry = self
            .pending
            .get_mut(&handle.entity)
            .ok_or_else(|| QueueError::UnknownHandle(handle.clone()))?;
        let position = entry
            .superseded
            .iter()
            .position(|older| older.seq == handle.seq)
            .ok_or_else(|| QueueError::UnknownHandle(handle.clone()))?;
        // Everything up to the confirmed mutation is now durable; the newest
        // of them becomes the state to fall back to.
        if let Some(confirmed) = entry.superseded.drain(..=position).last() {
            entry.base = confirmed.applied;
            if let Some(item) = entry.base.item.as_mut() {
                item.pending = false;
                if let Some(revision) = persisted_revision {
                    item.revision = item.revision.max(revision);
                }
            }
        }
        Ok(Settlement::Superseded)
    }

    /// Reverts one mutation. Never fails.
    ///
    /// Rolling back the authoritative mutation restores the entity's
    /// baseline. Rolling back a superseded mutation only forgets it, since
    /// its effect has already been overwritten locally.
    pub fn rollback(
        &mut self,
        store: &mut EntityStore,
        handle: &PendingHandle,
        reason: impl Into<String>,
    ) -> RollbackNotice {
        let authoritative = self
            .pending
            .get(&handle.entity)
            .map(|entry| entry.seq == handle.seq);
        let mut restored = false;
        match authoritative {
            Some(true) => {
                if let Some(entry) = self.pending.remove(&handle.entity) {
                    store.restore(entry.base);
                    store.set_pending(&handle.entity, false);
                    restored = true;
                }
            }
            Some(false) => {
                if let Some(entry) = self.pending.get_mut(&handle.entity) {
                    entry.superseded.retain(|older| older.seq != handle.seq);
                }
            }
            None => {}
        }

        RollbackNotice {
            entity: handle.entity.clone(),
            issued_at: handle.issued_at,
            restored,
            reason: reason.into(),
        }
    }

    /// Drops all pending state for one entity. Returns whether any existed.
    pub fn discard(&mut self, id: &ItemId) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Replaces the rollback baseline of a pending entity.
    pub fn rebase(&mut self, snapshot: ItemSnapshot) {
        if let Some(entry) = self.pending.get_mut(&snapshot.id) {
            let mut snapshot = snapshot;
            if let Some(item) = snapshot.item.as_mut() {
                item.pending = false;
            }
            entry.base = snapshot;
            entry.superseded.clear();
        }
    }

    /// `issued_at` of the authoritative pending mutation for `id`.
    pub fn pending_issued_at(&self, id: &ItemId) -> Option<u64> {
        self.pending.get(id).map(|entry| entry.issued_at)
    }

    pub fn pending_mutation(&self, id: &ItemId) -> Option<&Mutation> {
        self.pending.get(id).map(|entry| &entry.mutation)
    }

    pub fn is_pending(&self, id: &ItemId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn apply(store: &mut EntityStore, mutation: &Mutation, issued_at: u64) -> QueueResult<()> {
    match mutation {
        Mutation::Create(item) => {
            if store.contains(&item.id) {
                return Err(QueueError::AlreadyExists(item.id.clone()));
            }
            let mut item = item.clone();
            item.revision = issued_at;
            item.pending = true;
            store.upsert(item)?;
        }
        Mutation::Patch { id, fields } => {
            let mut item = cached(store, id)?;
            for (key, value) in fields {
                if value.is_null() {
                    item.fields.remove(key);
                } else {
                    item.fields.insert(key.clone(), value.clone());
                }
            }
            stamp_and_store(store, item, issued_at)?;
        }
        Mutation::Move { id, bucket, index } => {
            store.move_to_bucket(id, bucket, *index)?;
            store.set_pending(id, true);
            store.raise_revision(id, issued_at);
        }
        Mutation::SetClaimant { id, claimant } => {
            let mut item = cached(store, id)?;
            item.claimant = claimant.clone();
            stamp_and_store(store, item, issued_at)?;
        }
        Mutation::SetStatus { id, status } => {
            let mut item = cached(store, id)?;
            item.status = Some(*status);
            stamp_and_store(store, item, issued_at)?;
        }
        Mutation::Delete { id } => {
            if store.remove(id).is_none() {
                return Err(QueueError::NotFound(id.clone()));
            }
        }
    }
    Ok(())
}

fn cached(store: &EntityStore, id: &ItemId) -> QueueResult<Item> {
    store
        .get(id)
        .cloned()
        .ok_or_else(|| QueueError::NotFound(id.clone()))
}

fn stamp_and_store(store: &mut EntityStore, mut item: Item, issued_at: u64) -> QueueResult<()> {
    item.revision = item.revision.max(issued_at);
    item.pending = true;
    store.upsert(item)?;
    Ok(())
}
