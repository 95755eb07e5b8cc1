//! Client-resident reconciliation engine.
//!
//! # Responsibility
//! - Own one board's cache and every component that writes to it.
//! - Route local gestures through the mutation queue and remote events
//!   through the reconciler, so nothing else ever writes the store.
//! - Feed every store change to the workflow trigger.
//!
//! # Invariants
//! - `BoardEngine` is the single writer of its `EntityStore`.
//! - Local `issued_at` values come from one Lamport clock that also witnesses
//!   remote timestamps and persisted revisions.

pub mod claim;
pub mod clock;
pub mod drag;
pub mod mutation_queue;
pub mod reconciler;
pub mod store;
pub mod transition;

use crate::config::EngineConfig;
use crate::model::event::ChangeEvent;
use crate::model::ids::{BucketId, Identity, ItemId};
use crate::model::item::Item;
use crate::model::status::Status;
use claim::{ClaimArbiter, ClaimError};
use clock::LamportClock;
use drag::{
    DragError, DragPhase, DragRelocationProtocol, DropOutcome, Orientation, Point, SlotRect,
};
use log::{debug, info};
use mutation_queue::{
    Mutation, MutationQueue, PendingHandle, QueueError, QueueResult, RollbackNotice, Settlement,
};
use reconciler::{ChangeEventReconciler, ReconcileOutcome};
use store::{BoardSnapshot, EntityStore, StoreResult};
use transition::{check_transition, TransitionError, TransitionWorkflowTrigger, WorkflowHook};

/// One mounted board: cache, pending overlay, remote arbiter and gesture state.
#[derive(Debug)]
pub struct BoardEngine {
    config: EngineConfig,
    store: EntityStore,
    queue: MutationQueue,
    clock: LamportClock,
    reconciler: ChangeEventReconciler,
    drag: DragRelocationProtocol,
    claims: ClaimArbiter,
    trigger: TransitionWorkflowTrigger,
}

impl BoardEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            store: EntityStore::new(config.index_policy),
            queue: MutationQueue::new(),
            clock: LamportClock::new(),
            reconciler: ChangeEventReconciler::new(
                config.deferred_capacity,
                config.tombstone_capacity,
            ),
            drag: DragRelocationProtocol::new(),
            claims: ClaimArbiter::new(),
            trigger: TransitionWorkflowTrigger::new(),
            config,
        }
    }

    /// Creates an engine whose board starts with the given buckets.
    pub fn with_buckets<I, L>(config: EngineConfig, buckets: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = (BucketId, L)>,
        L: Into<String>,
    {
        let mut engine = Self::new(config);
        for (id, label) in buckets {
            engine.store.add_bucket(id, label)?;
        }
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read-only view of the cache.
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        self.store.snapshot()
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub fn reconciler(&self) -> &ChangeEventReconciler {
        &self.reconciler
    }

    /// Current logical time.
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn add_bucket(&mut self, id: BucketId, label: impl Into<String>) -> StoreResult<()> {
        self.store.add_bucket(id, label)
    }

    pub fn rename_bucket(&mut self, id: &BucketId, label: impl Into<String>) -> StoreResult<()> {
        self.store.rename_bucket(id, label)
    }

    /// Loads persisted items as the starting state.
    ///
    /// Hydration does not fire workflow hooks; items already terminal were
    /// completed before this engine existed.
    pub fn hydrate(&mut self, items: impl IntoIterator<Item = Item>) -> StoreResult<usize> {
        let mut loaded = 0usize;
        for mut item in items {
            item.pending = false;
            self.clock.witness(item.revision);
            self.store.upsert(item)?;
            loaded += 1;
        }
        info!(
            "event=board_hydrate module=engine status=ok items={} clock={}",
            loaded,
            self.clock.now()
        );
        Ok(loaded)
    }

    pub fn register_hook(&mut self, hook: impl WorkflowHook + 'static) {
        self.trigger.register(hook);
    }

    /// Number of terminal-status edges fired so far.
    pub fn fired_count(&self) -> u64 {
        self.trigger.fired_count()
    }

    /// Applies a local mutation optimistically.
    ///
    /// `SetClaimant` and `SetStatus` are refused with `Restricted`; they are
    /// issued by `claim`, `release` and `transition`, which check the cache
    /// first.
    pub fn submit(&mut self, mutation: Mutation) -> QueueResult<PendingHandle> {
        if let Mutation::SetClaimant { id, .. } | Mutation::SetStatus { id, .. } = &mutation {
            debug!(
                "event=mutation_submit module=engine status=restricted kind={}",
                mutation.label()
            );
            return Err(QueueError::Restricted {
                id: id.clone(),
                operation: mutation.label(),
            });
        }
        self.apply_local(mutation)
    }

    fn apply_local(&mut self, mutation: Mutation) -> QueueResult<PendingHandle> {
        let id = mutation.entity_id().clone();
        let previous = self.status_of(&id);
        let issued_at = self.clock.tick();
        let handle = self.queue.enqueue(&mut self.store, issued_at, mutation)?;
        self.observe(&id, previous);
        Ok(handle)
    }

    /// Settles a mutation as persisted and re-attempts any buffered event.
    pub fn confirm(
        &mut self,
        handle: &PendingHandle,
        persisted_revision: Option<u64>,
    ) -> QueueResult<Settlement> {
        if let Some(revision) = persisted_revision {
            self.clock.witness(revision);
        }
        let settlement = self
            .queue
            .confirm(&mut self.store, handle, persisted_revision)?;
        if settlement == Settlement::Confirmed {
            self.resume(handle.entity());
        }
        Ok(settlement)
    }

    /// Reverts a mutation and re-attempts any buffered event. Never fails.
    pub fn rollback(
        &mut self,
        handle: &PendingHandle,
        reason: impl Into<String>,
    ) -> RollbackNotice {
        let id = handle.entity().clone();
        let previous = self.status_of(&id);
        let notice = self.queue.rollback(&mut self.store, handle, reason);
        if notice.restored {
            self.observe(&id, previous);
            self.resume(&id);
        }
        info!(
            "event=mutation_rollback module=engine status={} issued_at={}",
            if notice.restored { "restored" } else { "ignored" },
            notice.issued_at
        );
        notice
    }

    /// Reconciles one remote change.
    pub fn on_event(&mut self, event: ChangeEvent) -> ReconcileOutcome {
        self.clock.witness(event.timestamp);
        let outcome = self
            .reconciler
            .on_event(&mut self.store, &mut self.queue, event);
        self.observe_outcome(&outcome);
        outcome
    }

    /// Decodes and reconciles one JSON change notification.
    pub fn on_raw_event(&mut self, raw: &str) -> ReconcileOutcome {
        match ChangeEvent::decode(raw) {
            Ok(event) => self.on_event(event),
            // Let the reconciler classify and log the decode failure.
            Err(_) => self
                .reconciler
                .on_raw_event(&mut self.store, &mut self.queue, raw),
        }
    }

    pub fn drag_phase(&self) -> &DragPhase {
        self.drag.phase()
    }

    pub fn drag_start(&mut self, id: &ItemId) -> Result<(), DragError> {
        self.drag.drag_start(&self.store, id)
    }

    pub fn drag_over(&mut self, bucket: &BucketId) -> Result<(), DragError> {
        self.drag.drag_over(bucket)
    }

    /// Ends the drag; a changed placement is submitted as one move.
    pub fn drop_item(
        &mut self,
        bucket: &BucketId,
        index: usize,
    ) -> Result<Option<PendingHandle>, DragError> {
        let outcome = self.drag.drop(bucket, index)?;
        self.submit_drop(outcome)
    }

    /// Ends the drag using pointer geometry to choose the index.
    pub fn drop_at_pointer(
        &mut self,
        bucket: &BucketId,
        orientation: Orientation,
        leading_edge: Point,
        siblings: &[SlotRect],
    ) -> Result<Option<PendingHandle>, DragError> {
        let outcome = self
            .drag
            .drop_at_pointer(bucket, orientation, leading_edge, siblings)?;
        self.submit_drop(outcome)
    }

    pub fn cancel_drag(&mut self) -> bool {
        self.drag.cancel()
    }

    /// Claims a free resource for `identity`.
    pub fn claim(&mut self, id: &ItemId, identity: &Identity) -> Result<PendingHandle, ClaimError> {
        let mutation = self.claims.claim(&self.store, id, identity)?;
        Ok(self.apply_local(mutation)?)
    }

    /// Releases a resource held by `identity`.
    pub fn release(
        &mut self,
        id: &ItemId,
        identity: &Identity,
    ) -> Result<PendingHandle, ClaimError> {
        let mutation = self.claims.release(&self.store, id, identity)?;
        Ok(self.apply_local(mutation)?)
    }

    /// Moves an item along its status machine.
    ///
    /// Returns `None` when `status` is already current.
    pub fn transition(
        &mut self,
        id: &ItemId,
        status: Status,
    ) -> Result<Option<PendingHandle>, TransitionError> {
        if !check_transition(&self.store, id, status)? {
            debug!(
                "event=status_transition module=engine status=noop to={}",
                status.as_str()
            );
            return Ok(None);
        }
        let handle = self.apply_local(Mutation::SetStatus {
            id: id.clone(),
            status,
        })?;
        Ok(Some(handle))
    }

    fn submit_drop(&mut self, outcome: DropOutcome) -> Result<Option<PendingHandle>, DragError> {
        match outcome {
            DropOutcome::Moved(mutation) => Ok(Some(self.submit(mutation)?)),
            DropOutcome::Unchanged => Ok(None),
        }
    }

    fn resume(&mut self, id: &ItemId) {
        if let Some(outcome) = self.reconciler.resume(&mut self.store, &mut self.queue, id) {
            self.observe_outcome(&outcome);
        }
    }

    fn status_of(&self, id: &ItemId) -> Option<Status> {
        self.store.get(id).and_then(|item| item.status)
    }

    fn observe(&mut self, id: &ItemId, previous: Option<Status>) {
        if let Some(item) = self.store.get(id) {
            self.trigger.observe(previous, item);
        }
    }

    fn observe_outcome(&mut self, outcome: &ReconcileOutcome) {
        if let ReconcileOutcome::Applied {
            entity, previous, ..
        } = outcome
        {
            let previous = previous.as_ref().and_then(|item| item.status);
            self.observe(entity, previous);
        }
    }
}

impl Default for BoardEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::BoardEngine;
    use crate::config::EngineConfig;
    use crate::engine::drag::{DragPhase, Orientation, Point, SlotRect};
    use crate::engine::mutation_queue::{Mutation, QueueError};
    use crate::engine::reconciler::{ReconcileError, ReconcileOutcome};
    use crate::engine::transition::TransitionError;
    use crate::model::event::ChangeEvent;
    use crate::model::ids::{BucketId, Identity, ItemId};
    use crate::model::item::{EntityKind, Item};
    use crate::model::status::{MeetingStatus, Status};

    fn bucket(id: &str) -> BucketId {
        BucketId::new(id).unwrap()
    }

    fn id(value: &str) -> ItemId {
        ItemId::new(value).unwrap()
    }

    fn engine() -> BoardEngine {
        BoardEngine::with_buckets(
            EngineConfig::default(),
            [(bucket("todo"), "To do"), (bucket("done"), "Done")],
        )
        .unwrap()
    }

    #[test]
    fn local_issue_times_follow_remote_timestamps() {
        let mut engine = engine();
        engine.on_event(ChangeEvent::insert(
            Item::with_id(id("A"), EntityKind::Task, bucket("todo")),
            40,
        ));
        let handle = engine
            .submit(Mutation::Move {
                id: id("A"),
                bucket: bucket("done"),
                index: 0,
            })
            .unwrap();
        assert_eq!(handle.issued_at(), 41);
    }

    #[test]
    fn confirm_resumes_deferred_event_as_stale() {
        let mut engine = engine();
        engine
            .hydrate([Item::with_id(id("A"), EntityKind::Task, bucket("todo"))])
            .unwrap();
        let handle = engine
            .submit(Mutation::Move {
                id: id("A"),
                bucket: bucket("done"),
                index: 0,
            })
            .unwrap();
        let older = ChangeEvent::update(
            Item::with_id(id("A"), EntityKind::Task, bucket("todo")),
            handle.issued_at() - 1,
        );
        assert!(matches!(engine.on_event(older), ReconcileOutcome::Deferred { .. }));

        engine.confirm(&handle, Some(handle.issued_at())).unwrap();
        assert_eq!(engine.reconciler().deferred_len(), 0);
        assert_eq!(engine.store().bucket_item_ids(&bucket("done")), [id("A")]);
    }

    #[test]
    fn rollback_resumes_deferred_event_and_applies_it() {
        let mut engine = engine();
        let seed =
            Item::with_id(id("A"), EntityKind::Task, bucket("todo")).with_field("title", "a");
        engine.hydrate([seed]).unwrap();
        let handle = engine
            .submit(Mutation::Patch {
                id: id("A"),
                fields: serde_json::json!({"title": "local"}).as_object().cloned().unwrap(),
            })
            .unwrap();
        let remote =
            Item::with_id(id("A"), EntityKind::Task, bucket("todo")).with_field("title", "remote");
        engine.on_event(ChangeEvent::update(remote, handle.issued_at() - 1));

        let notice = engine.rollback(&handle, "write rejected");
        assert!(notice.restored);
        assert_eq!(
            engine.store().get(&id("A")).unwrap().field_str("title"),
            Some("remote")
        );
    }

    #[test]
    fn meeting_completion_fires_once_and_same_status_is_noop() {
        let mut engine = engine();
        let mut meeting = Item::with_id(id("M"), EntityKind::Meeting, bucket("todo"));
        meeting.status = Some(Status::Meeting(MeetingStatus::Ongoing));
        engine.hydrate([meeting]).unwrap();

        let handle = engine
            .transition(&id("M"), Status::Meeting(MeetingStatus::Completed))
            .unwrap();
        assert!(handle.is_some());
        assert_eq!(engine.fired_count(), 1);

        let again = engine
            .transition(&id("M"), Status::Meeting(MeetingStatus::Completed))
            .unwrap();
        assert!(again.is_none());
        assert_eq!(engine.fired_count(), 1);

        let err = engine
            .transition(&id("M"), Status::Meeting(MeetingStatus::Planned))
            .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn undecodable_raw_event_is_dropped() {
        let mut engine = engine();
        assert!(matches!(
            engine.on_raw_event("[]"),
            ReconcileOutcome::Dropped(ReconcileError::Malformed(_))
        ));
    }

    fn board_with_cards() -> BoardEngine {
        let mut engine = engine();
        engine
            .hydrate([
                Item::with_id(id("A"), EntityKind::Task, bucket("todo")),
                Item::with_id(id("B"), EntityKind::Task, bucket("todo")),
                Item::with_id(id("C"), EntityKind::Task, bucket("done")),
            ])
            .unwrap();
        engine
    }

    #[test]
    fn claimant_and_status_changes_cannot_bypass_their_arbiters() {
        let mut engine = engine();
        let mut shift = Item::with_id(id("S1"), EntityKind::Shift, bucket("todo"));
        shift.claimant = Some(Identity::new("alice").unwrap());
        let meeting = Item::with_id(id("M"), EntityKind::Meeting, bucket("todo"));
        engine.hydrate([shift, meeting]).unwrap();

        let err = engine
            .submit(Mutation::SetClaimant {
                id: id("S1"),
                claimant: Some(Identity::new("bob").unwrap()),
            })
            .unwrap_err();
        assert!(matches!(err, QueueError::Restricted { .. }));
        let holder = engine.store().get(&id("S1")).unwrap().claimant.clone();
        assert_eq!(holder, Some(Identity::new("alice").unwrap()));

        let err = engine
            .submit(Mutation::SetStatus {
                id: id("M"),
                status: Status::Meeting(MeetingStatus::Completed),
            })
            .unwrap_err();
        assert!(matches!(err, QueueError::Restricted { .. }));
        assert_eq!(
            engine.store().get(&id("M")).unwrap().status,
            Some(Status::Meeting(MeetingStatus::Planned))
        );
        assert_eq!(engine.fired_count(), 0);
        assert!(engine.queue().is_empty());

        let err = engine
            .transition(&id("M"), Status::Meeting(MeetingStatus::Completed))
            .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn dropped_move_rolls_back_to_source_slot() {
        let mut engine = board_with_cards();
        engine.drag_start(&id("B")).unwrap();
        engine.drag_over(&bucket("done")).unwrap();
        let handle = engine.drop_item(&bucket("done"), 0).unwrap().unwrap();

        assert_eq!(engine.drag_phase(), &DragPhase::Idle);
        assert_eq!(engine.store().bucket_item_ids(&bucket("todo")), [id("A")]);
        assert_eq!(
            engine.store().bucket_item_ids(&bucket("done")),
            [id("B"), id("C")]
        );
        assert!(engine.store().get(&id("B")).unwrap().pending);

        let notice = engine.rollback(&handle, "write rejected");
        assert!(notice.restored);
        assert_eq!(
            engine.store().bucket_item_ids(&bucket("todo")),
            [id("A"), id("B")]
        );
        assert_eq!(engine.store().bucket_item_ids(&bucket("done")), [id("C")]);
        assert!(!engine.store().get(&id("B")).unwrap().pending);
        engine.store().verify_partition().unwrap();
    }

    #[test]
    fn cancelled_drag_leaves_board_untouched() {
        let mut engine = board_with_cards();
        let before = engine.snapshot();
        engine.drag_start(&id("A")).unwrap();
        engine.drag_over(&bucket("done")).unwrap();
        assert!(engine.cancel_drag());

        assert_eq!(engine.snapshot(), before);
        assert!(engine.queue().is_empty());
        assert_eq!(engine.drag_phase(), &DragPhase::Idle);
    }

    #[test]
    fn pointer_drop_queues_move_at_resolved_index() {
        let mut engine = board_with_cards();
        engine.drag_start(&id("A")).unwrap();
        let handle = engine
            .drop_at_pointer(
                &bucket("done"),
                Orientation::Vertical,
                Point::new(10.0, 100.0),
                &[SlotRect::new(0.0, 0.0, 200.0, 40.0)],
            )
            .unwrap()
            .unwrap();

        assert_eq!(
            engine.store().bucket_item_ids(&bucket("done")),
            [id("C"), id("A")]
        );
        assert!(engine.queue().is_pending(handle.entity()));
        engine.confirm(&handle, Some(handle.issued_at())).unwrap();
        assert!(!engine.store().get(&id("A")).unwrap().pending);
    }
}
