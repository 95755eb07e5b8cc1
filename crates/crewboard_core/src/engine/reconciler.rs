//! Merges remote change notifications into the entity store.
//!
//! # Responsibility
//! - Apply remote inserts, updates and deletes to `EntityStore`.
//! - Hold back remote writes that are older than an in-flight local edit.
//!
//! # Invariants
//! - A remote event older than a pending local mutation never changes the
//!   entity's observable state.
//! - Applying the same event twice yields the same store as applying it once.
//! - Deletes are terminal: they clear buffered events and pending local
//!   state, and later inserts/updates for the id are stale.
//! - One bad event never stops the stream; it is dropped and logged.

use crate::engine::mutation_queue::MutationQueue;
use crate::engine::store::EntityStore;
use crate::model::event::{ChangeEvent, ChangeOperation};
use crate::model::ids::ItemId;
use crate::model::item::Item;
use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Why an event was dropped instead of applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// Event is older than state already applied for the entity.
    Stale {
        entity: ItemId,
        timestamp: u64,
        current: u64,
    },
    /// Event could not be decoded or does not describe a valid item.
    Malformed(String),
}

impl Display for ReconcileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stale {
                entity,
                timestamp,
                current,
            } => write!(
                f,
                "stale event for {entity}: timestamp {timestamp} older than {current}"
            ),
            Self::Malformed(message) => write!(f, "malformed change event: {message}"),
        }
    }
}

impl Error for ReconcileError {}

/// Result of handing one event to the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// The store now reflects the event. `previous` is the value it replaced.
    Applied {
        entity: ItemId,
        operation: ChangeOperation,
        previous: Option<Item>,
    },
    /// Buffered until the entity's pending local mutation settles.
    Deferred { entity: ItemId },
    Dropped(ReconcileError),
}

/// Remote-change arbiter for one mounted board.
#[derive(Debug)]
pub struct ChangeEventReconciler {
    deferred: HashMap<ItemId, ChangeEvent>,
    deferred_capacity: usize,
    tombstones: HashMap<ItemId, u64>,
    tombstone_order: VecDeque<ItemId>,
    tombstone_capacity: usize,
}

impl ChangeEventReconciler {
    /// Creates a reconciler with bounded deferral and tombstone memory.
    ///
    /// Capacities below one are raised to one.
    pub fn new(deferred_capacity: usize, tombstone_capacity: usize) -> Self {
        Self {
            deferred: HashMap::new(),
            deferred_capacity: deferred_capacity.max(1),
            tombstones: HashMap::new(),
            tombstone_order: VecDeque::new(),
            tombstone_capacity: tombstone_capacity.max(1),
        }
    }

    /// Decodes one JSON event and reconciles it.
    pub fn on_raw_event(
        &mut self,
        store: &mut EntityStore,
        queue: &mut MutationQueue,
        raw: &str,
    ) -> ReconcileOutcome {
        match ChangeEvent::decode(raw) {
            Ok(event) => self.on_event(store, queue, event),
            Err(err) => {
                warn!(
                    "event=reconcile_drop module=reconciler status=malformed reason=decode error={err}"
                );
                ReconcileOutcome::Dropped(ReconcileError::Malformed(err.to_string()))
            }
        }
    }

    /// Reconciles one remote event against the store and pending mutations.
    pub fn on_event(
        &mut self,
        store: &mut EntityStore,
        queue: &mut MutationQueue,
        event: ChangeEvent,
    ) -> ReconcileOutcome {
        if let Err(reason) = check_shape(&event) {
            return self.drop_event(&event, ReconcileError::Malformed(reason));
        }

        match event.operation {
            ChangeOperation::Delete => self.apply_delete(store, queue, event),
            ChangeOperation::Insert | ChangeOperation::Update => {
                if let Some(&deleted_at) = self.tombstones.get(&event.entity_id) {
                    let stale = ReconcileError::Stale {
                        entity: event.entity_id.clone(),
                        timestamp: event.timestamp,
                        current: deleted_at,
                    };
                    return self.drop_event(&event, stale);
                }
                match queue.pending_issued_at(&event.entity_id) {
                    Some(issued_at) if issued_at > event.timestamp => self.defer(event),
                    _ => self.apply_upsert(store, queue, event),
                }
            }
        }
    }

    /// Re-attempts the buffered event of one entity, if any.
    ///
    /// Called after that entity's pending mutation confirmed or rolled back.
    pub fn resume(
        &mut self,
        store: &mut EntityStore,
        queue: &mut MutationQueue,
        id: &ItemId,
    ) -> Option<ReconcileOutcome> {
        let event = self.deferred.remove(id)?;
        debug!(
            "event=reconcile_resume module=reconciler status=start timestamp={}",
            event.timestamp
        );
        Some(self.on_event(store, queue, event))
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn deferred_for(&self, id: &ItemId) -> Option<&ChangeEvent> {
        self.deferred.get(id)
    }

    pub fn is_tombstoned(&self, id: &ItemId) -> bool {
        self.tombstones.contains_key(id)
    }

    fn apply_upsert(
        &mut self,
        store: &mut EntityStore,
        queue: &mut MutationQueue,
        event: ChangeEvent,
    ) -> ReconcileOutcome {
        let pending = queue.is_pending(&event.entity_id);
        if !pending {
            if let Some(current) = store.get(&event.entity_id) {
                if current.revision > event.timestamp {
                    let stale = ReconcileError::Stale {
                        entity: event.entity_id.clone(),
                        timestamp: event.timestamp,
                        current: current.revision,
                    };
                    return self.drop_event(&event, stale);
                }
            }
        }

        let ChangeEvent {
            operation,
            entity_id,
            payload,
            timestamp,
            ..
        } = event;
        let Some(mut item) = payload else {
            return ReconcileOutcome::Dropped(ReconcileError::Malformed(
                "missing payload".to_string(),
            ));
        };
        item.revision = timestamp;
        item.pending = pending;

        let previous = match store.upsert(item) {
            Ok(previous) => previous,
            Err(err) => {
                warn!(
                    "event=reconcile_drop module=reconciler status=malformed reason=invalid_payload error={err}"
                );
                return ReconcileOutcome::Dropped(ReconcileError::Malformed(err.to_string()));
            }
        };

        if pending {
            // Remote state at or after our issue time becomes the fallback
            // should the local write fail.
            queue.rebase(store.capture(&entity_id));
        }
        if self
            .deferred
            .get(&entity_id)
            .is_some_and(|buffered| buffered.timestamp <= timestamp)
        {
            self.deferred.remove(&entity_id);
        }

        debug!(
            "event=reconcile_apply module=reconciler status=ok operation={:?} timestamp={} pending={}",
            operation, timestamp, pending
        );
        ReconcileOutcome::Applied {
            entity: entity_id,
            operation,
            previous,
        }
    }

    fn apply_delete(
        &mut self,
        store: &mut EntityStore,
        queue: &mut MutationQueue,
        event: ChangeEvent,
    ) -> ReconcileOutcome {
        let id = event.entity_id;
        let dropped_buffer = self.deferred.remove(&id).is_some();
        let dropped_pending = queue.discard(&id);
        let previous = store.remove(&id);
        self.remember_tombstone(id.clone(), event.timestamp);

        debug!(
            "event=reconcile_apply module=reconciler status=ok operation=Delete timestamp={} cleared_buffer={} cleared_pending={}",
            event.timestamp, dropped_buffer, dropped_pending
        );
        ReconcileOutcome::Applied {
            entity: id,
            operation: ChangeOperation::Delete,
            previous,
        }
    }

    fn defer(&mut self, event: ChangeEvent) -> ReconcileOutcome {
        let id = event.entity_id.clone();
        if let Some(buffered) = self.deferred.get(&id) {
            if buffered.timestamp > event.timestamp {
                let stale = ReconcileError::Stale {
                    entity: id,
                    timestamp: event.timestamp,
                    current: buffered.timestamp,
                };
                return self.drop_event(&event, stale);
            }
        } else if self.deferred.len() >= self.deferred_capacity {
            self.evict_oldest();
        }

        debug!(
            "event=reconcile_defer module=reconciler status=ok timestamp={}",
            event.timestamp
        );
        self.deferred.insert(id.clone(), event);
        ReconcileOutcome::Deferred { entity: id }
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .deferred
            .iter()
            .min_by_key(|(_, event)| event.timestamp)
            .map(|(id, _)| id.clone());
        if let Some(id) = oldest {
            if let Some(event) = self.deferred.remove(&id) {
                warn!(
                    "event=reconcile_evict module=reconciler status=dropped timestamp={} capacity={}",
                    event.timestamp, self.deferred_capacity
                );
            }
        }
    }

    fn remember_tombstone(&mut self, id: ItemId, timestamp: u64) {
        if let Some(existing) = self.tombstones.get_mut(&id) {
            *existing = (*existing).max(timestamp);
            return;
        }
        self.tombstones.insert(id.clone(), timestamp);
        self.tombstone_order.push_back(id);
        while self.tombstone_order.len() > self.tombstone_capacity {
            if let Some(expired) = self.tombstone_order.pop_front() {
                self.tombstones.remove(&expired);
            }
        }
    }

    fn drop_event(&self, event: &ChangeEvent, reason: ReconcileError) -> ReconcileOutcome {
        match &reason {
            ReconcileError::Stale { .. } => debug!(
                "event=reconcile_drop module=reconciler status=stale operation={:?} timestamp={}",
                event.operation, event.timestamp
            ),
            ReconcileError::Malformed(message) => warn!(
                "event=reconcile_drop module=reconciler status=malformed operation={:?} timestamp={} reason={}",
                event.operation, event.timestamp, message
            ),
        }
        ReconcileOutcome::Dropped(reason)
    }
}

impl Default for ChangeEventReconciler {
    fn default() -> Self {
        Self::new(256, 4096)
    }
}

fn check_shape(event: &ChangeEvent) -> Result<(), String> {
    if event.operation == ChangeOperation::Delete {
        return Ok(());
    }
    let Some(payload) = event.payload.as_ref() else {
        return Err("insert/update without payload".to_string());
    };
    if payload.id != event.entity_id {
        return Err(format!(
            "payload id {} does not match entity id {}",
            payload.id, event.entity_id
        ));
    }
    if payload.kind != event.entity_type {
        return Err(format!(
            "payload kind {} does not match entity type {}",
            payload.kind.as_str(),
            event.entity_type.as_str()
        ));
    }
    Ok(())
}
