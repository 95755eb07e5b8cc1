//! Board session: engine + persistence + change subscription.
//!
//! # Responsibility
//! - Run every user operation as apply -> persist -> confirm/rollback, either
//!   in one call or split into `begin_*`, `perform` and `complete` so remote
//!   events can be pumped while a write is in flight.
//! - Hydrate the engine from the persistence store on open.
//! - Pump remote change events into the engine.
//!
//! # Invariants
//! - A failed persistence call always rolls back the optimistic change and
//!   records exactly one `UserNotice`.
//! - Local rejections (validation, already claimed, invalid transition)
//!   never reach the persistence store.

use crate::config::EngineConfig;
use crate::engine::claim::ClaimError;
use crate::engine::drag::{DragError, DragPhase, Orientation, Point, SlotRect};
use crate::engine::mutation_queue::{Mutation, PendingHandle, QueueError};
use crate::engine::reconciler::ReconcileOutcome;
use crate::engine::store::{BoardSnapshot, StoreError};
use crate::engine::transition::{TransitionError, WorkflowHook};
use crate::engine::BoardEngine;
use crate::model::ids::{BucketId, Identity, ItemId, ValidationError};
use crate::model::item::Item;
use crate::model::status::Status;
use crate::repo::persistence::{
    ClaimOutcome, ItemPatch, PersistError, PersistenceStore, ReleaseOutcome,
};
use crate::sync::notifier::Subscription;
use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug)]
pub enum SessionError {
    Validation(ValidationError),
    Store(StoreError),
    Queue(QueueError),
    Drag(DragError),
    Claim(ClaimError),
    Transition(TransitionError),
    /// The persistence store rejected the write; it has been rolled back.
    Persist(PersistError),
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Queue(err) => write!(f, "{err}"),
            Self::Drag(err) => write!(f, "{err}"),
            Self::Claim(err) => write!(f, "{err}"),
            Self::Transition(err) => write!(f, "{err}"),
            Self::Persist(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Queue(err) => Some(err),
            Self::Drag(err) => Some(err),
            Self::Claim(err) => Some(err),
            Self::Transition(err) => Some(err),
            Self::Persist(err) => Some(err),
        }
    }
}

impl From<ValidationError> for SessionError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<StoreError> for SessionError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<QueueError> for SessionError {
    fn from(value: QueueError) -> Self {
        Self::Queue(value)
    }
}

impl From<DragError> for SessionError {
    fn from(value: DragError) -> Self {
        Self::Drag(value)
    }
}

impl From<ClaimError> for SessionError {
    fn from(value: ClaimError) -> Self {
        Self::Claim(value)
    }
}

impl From<TransitionError> for SessionError {
    fn from(value: TransitionError) -> Self {
        Self::Transition(value)
    }
}

impl From<PersistError> for SessionError {
    fn from(value: PersistError) -> Self {
        Self::Persist(value)
    }
}

/// Recoverable message surfaced to the user after a rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserNotice {
    pub entity: ItemId,
    /// Mutation kind that was undone, e.g. `move`.
    pub operation: &'static str,
    pub message: String,
}

/// Store call owed by one locally applied mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    Create(Item),
    Update { id: ItemId, patch: ItemPatch },
    Delete { id: ItemId },
    Claim { id: ItemId, identity: Identity },
    Release { id: ItemId, identity: Identity },
}

/// A mutation already applied to the board whose durable write is still
/// outstanding.
///
/// Remote events may be pumped while it is in flight. Finish it with
/// `BoardSession::complete`; dropping it leaves the item marked pending.
#[must_use = "a pending write stays optimistic until it is completed"]
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    handle: PendingHandle,
    operation: &'static str,
    request: WriteRequest,
}

impl PendingWrite {
    fn new(handle: PendingHandle, operation: &'static str, request: WriteRequest) -> Self {
        Self {
            handle,
            operation,
            request,
        }
    }

    pub fn handle(&self) -> &PendingHandle {
        &self.handle
    }

    /// Mutation kind, e.g. `move`.
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn request(&self) -> &WriteRequest {
        &self.request
    }
}

/// One mounted board bound to a persistence store.
pub struct BoardSession<P: PersistenceStore> {
    engine: BoardEngine,
    persistence: P,
    subscription: Option<Subscription>,
    notices: Vec<UserNotice>,
}

impl<P: PersistenceStore> BoardSession<P> {
    /// Mounts a board and hydrates it from `persistence`.
    pub fn open(persistence: P, config: EngineConfig) -> SessionResult<Self> {
        let mut engine = BoardEngine::new(config);
        for bucket in persistence.list_buckets()? {
            engine.add_bucket(bucket.id, bucket.label)?;
        }
        engine.hydrate(persistence.list()?)?;
        Ok(Self {
            engine,
            persistence,
            subscription: None,
            notices: Vec::new(),
        })
    }

    /// Starts consuming remote changes from `subscription`.
    ///
    /// Replaces (and thereby cancels) any previous subscription.
    pub fn attach(&mut self, subscription: Subscription) {
        self.subscription = Some(subscription);
    }

    /// Cancels the change subscription. Returns whether one was active.
    pub fn detach(&mut self) -> bool {
        self.subscription.take().is_some()
    }

    /// Reconciles every change event received since the last pump.
    pub fn pump(&mut self) -> Vec<ReconcileOutcome> {
        let Some(subscription) = self.subscription.as_mut() else {
            return Vec::new();
        };
        let events: Vec<_> = subscription.by_ref().collect();
        events
            .into_iter()
            .map(|event| self.engine.on_event(event))
            .collect()
    }

    /// Feeds one raw JSON notification from an external transport.
    pub fn receive_raw(&mut self, raw: &str) -> ReconcileOutcome {
        self.engine.on_raw_event(raw)
    }

    pub fn engine(&self) -> &BoardEngine {
        &self.engine
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        self.engine.snapshot()
    }

    pub fn get(&self, id: &ItemId) -> Option<&Item> {
        self.engine.store().get(id)
    }

    pub fn register_hook(&mut self, hook: impl WorkflowHook + 'static) {
        self.engine.register_hook(hook);
    }

    pub fn notices(&self) -> &[UserNotice] {
        &self.notices
    }

    pub fn take_notices(&mut self) -> Vec<UserNotice> {
        std::mem::take(&mut self.notices)
    }

    /// Registers a bucket locally and in the persistence store.
    pub fn add_bucket(&mut self, id: BucketId, label: &str) -> SessionResult<()> {
        self.persistence.put_bucket(&id, label)?;
        self.engine.add_bucket(id, label)?;
        Ok(())
    }

    pub fn create_item(&mut self, item: Item) -> SessionResult<ItemId> {
        let id = item.id.clone();
        let write = self.begin_create(item)?;
        self.commit(write)?;
        Ok(id)
    }

    /// Merges `fields` into the item; `null` values remove keys.
    pub fn edit_fields(&mut self, id: &ItemId, fields: Map<String, Value>) -> SessionResult<()> {
        let write = self.begin_edit_fields(id, fields)?;
        self.commit(write)
    }

    pub fn move_item(&mut self, id: &ItemId, bucket: &BucketId, index: usize) -> SessionResult<()> {
        let write = self.begin_move(id, bucket, index)?;
        self.commit(write)
    }

    pub fn delete_item(&mut self, id: &ItemId) -> SessionResult<()> {
        let write = self.begin_delete(id)?;
        self.commit(write)
    }

    /// Claims a tool or shift for `identity`.
    ///
    /// Losing the store-side compare-and-set rolls the local claim back and
    /// reports `AlreadyClaimed` with the winning holder.
    pub fn claim(&mut self, id: &ItemId, identity: &str) -> SessionResult<()> {
        let write = self.begin_claim(id, identity)?;
        self.commit(write)
    }

    /// Releases a claim held by `identity`.
    pub fn release(&mut self, id: &ItemId, identity: &str) -> SessionResult<()> {
        let write = self.begin_release(id, identity)?;
        self.commit(write)
    }

    /// Moves an item along its status machine. Re-asserting the current
    /// status is a no-op and writes nothing.
    pub fn transition(&mut self, id: &ItemId, status: Status) -> SessionResult<()> {
        match self.begin_transition(id, status)? {
            Some(write) => self.commit(write),
            None => Ok(()),
        }
    }

    pub fn drag_phase(&self) -> &DragPhase {
        self.engine.drag_phase()
    }

    pub fn drag_start(&mut self, id: &ItemId) -> SessionResult<()> {
        Ok(self.engine.drag_start(id)?)
    }

    pub fn drag_over(&mut self, bucket: &BucketId) -> SessionResult<()> {
        Ok(self.engine.drag_over(bucket)?)
    }

    /// Drops the dragged item and persists the resulting move, if any.
    pub fn drop_item(&mut self, bucket: &BucketId, index: usize) -> SessionResult<()> {
        match self.begin_drop_item(bucket, index)? {
            Some(write) => self.commit(write),
            None => Ok(()),
        }
    }

    pub fn drop_at_pointer(
        &mut self,
        bucket: &BucketId,
        orientation: Orientation,
        leading_edge: Point,
        siblings: &[SlotRect],
    ) -> SessionResult<()> {
        match self.begin_drop_at_pointer(bucket, orientation, leading_edge, siblings)? {
            Some(write) => self.commit(write),
            None => Ok(()),
        }
    }

    pub fn cancel_drag(&mut self) -> bool {
        self.engine.cancel_drag()
    }

    /// Applies a create locally and returns the write still to be persisted.
    pub fn begin_create(&mut self, item: Item) -> SessionResult<PendingWrite> {
        let handle = self.engine.submit(Mutation::Create(item.clone()))?;
        Ok(PendingWrite::new(handle, "create", WriteRequest::Create(item)))
    }

    pub fn begin_edit_fields(
        &mut self,
        id: &ItemId,
        fields: Map<String, Value>,
    ) -> SessionResult<PendingWrite> {
        let handle = self.engine.submit(Mutation::Patch {
            id: id.clone(),
            fields: fields.clone(),
        })?;
        let patch = ItemPatch {
            fields,
            ..ItemPatch::at(handle.issued_at())
        };
        Ok(update_write(handle, "patch", id, patch))
    }

    pub fn begin_move(
        &mut self,
        id: &ItemId,
        bucket: &BucketId,
        index: usize,
    ) -> SessionResult<PendingWrite> {
        let handle = self.engine.submit(Mutation::Move {
            id: id.clone(),
            bucket: bucket.clone(),
            index,
        })?;
        self.move_write(handle)
    }

    pub fn begin_delete(&mut self, id: &ItemId) -> SessionResult<PendingWrite> {
        let handle = self.engine.submit(Mutation::Delete { id: id.clone() })?;
        Ok(PendingWrite::new(
            handle,
            "delete",
            WriteRequest::Delete { id: id.clone() },
        ))
    }

    pub fn begin_claim(&mut self, id: &ItemId, identity: &str) -> SessionResult<PendingWrite> {
        let identity = Identity::new(identity).map_err(ClaimError::from)?;
        let handle = self.engine.claim(id, &identity)?;
        Ok(PendingWrite::new(
            handle,
            "set_claimant",
            WriteRequest::Claim {
                id: id.clone(),
                identity,
            },
        ))
    }

    pub fn begin_release(&mut self, id: &ItemId, identity: &str) -> SessionResult<PendingWrite> {
        let identity = Identity::new(identity).map_err(ClaimError::from)?;
        let handle = self.engine.release(id, &identity)?;
        Ok(PendingWrite::new(
            handle,
            "set_claimant",
            WriteRequest::Release {
                id: id.clone(),
                identity,
            },
        ))
    }

    /// Returns `None` when `status` is already current.
    pub fn begin_transition(
        &mut self,
        id: &ItemId,
        status: Status,
    ) -> SessionResult<Option<PendingWrite>> {
        let Some(handle) = self.engine.transition(id, status)? else {
            return Ok(None);
        };
        let patch = ItemPatch {
            status: Some(status),
            ..ItemPatch::at(handle.issued_at())
        };
        Ok(Some(update_write(handle, "set_status", id, patch)))
    }

    /// Returns `None` when the item was dropped back onto its source slot.
    pub fn begin_drop_item(
        &mut self,
        bucket: &BucketId,
        index: usize,
    ) -> SessionResult<Option<PendingWrite>> {
        self.engine
            .drop_item(bucket, index)?
            .map(|handle| self.move_write(handle))
            .transpose()
    }

    pub fn begin_drop_at_pointer(
        &mut self,
        bucket: &BucketId,
        orientation: Orientation,
        leading_edge: Point,
        siblings: &[SlotRect],
    ) -> SessionResult<Option<PendingWrite>> {
        self.engine
            .drop_at_pointer(bucket, orientation, leading_edge, siblings)?
            .map(|handle| self.move_write(handle))
            .transpose()
    }

    /// Sends one pending write to the persistence store.
    ///
    /// Returns the revision the store assigned, if any. The board is not
    /// touched; pass the result to `complete`.
    pub fn perform(&self, write: &PendingWrite) -> SessionResult<Option<u64>> {
        let issued_at = write.handle.issued_at();
        match &write.request {
            WriteRequest::Create(item) => {
                let mut item = item.clone();
                item.revision = issued_at;
                Ok(Some(self.persistence.create(&item)?.revision))
            }
            WriteRequest::Update { id, patch } => {
                Ok(Some(self.persistence.update(id, patch)?.revision))
            }
            WriteRequest::Delete { id } => Ok(self.persistence.delete(id, issued_at)?),
            WriteRequest::Claim { id, identity } => {
                match self.persistence.conditional_claim(id, identity, issued_at)? {
                    ClaimOutcome::Claimed(item) => Ok(Some(item.revision)),
                    ClaimOutcome::AlreadyClaimed { holder } => Err(ClaimError::AlreadyClaimed {
                        id: id.clone(),
                        holder,
                    }
                    .into()),
                }
            }
            WriteRequest::Release { id, identity } => {
                match self.persistence.conditional_release(id, identity, issued_at)? {
                    ReleaseOutcome::Released(item) => Ok(Some(item.revision)),
                    ReleaseOutcome::NotClaimant { holder } => Err(ClaimError::NotClaimant {
                        id: id.clone(),
                        holder,
                    }
                    .into()),
                }
            }
        }
    }

    /// Confirms or rolls back a write once its persistence result is known.
    ///
    /// A failure rolls the optimistic change back, records one `UserNotice`
    /// and is returned unchanged. A success whose entity has meanwhile been
    /// settled by a winning remote delete is accepted as is.
    pub fn complete(
        &mut self,
        write: PendingWrite,
        result: SessionResult<Option<u64>>,
    ) -> SessionResult<()> {
        let PendingWrite {
            handle, operation, ..
        } = write;
        match result {
            Ok(revision) => {
                match self.engine.confirm(&handle, revision) {
                    Ok(_) => {}
                    Err(QueueError::UnknownHandle(_)) => {
                        debug!(
                            "event=mutation_settle module=session status=already_settled operation={} issued_at={}",
                            operation,
                            handle.issued_at()
                        );
                        return Ok(());
                    }
                    Err(err) => return Err(err.into()),
                }
                info!(
                    "event=mutation_settle module=session status=confirmed operation={} issued_at={}",
                    operation,
                    handle.issued_at()
                );
                Ok(())
            }
            Err(err) => {
                let notice = self.engine.rollback(&handle, err.to_string());
                warn!(
                    "event=mutation_settle module=session status=rolled_back operation={} issued_at={} restored={}",
                    operation, notice.issued_at, notice.restored
                );
                self.notices.push(UserNotice {
                    entity: notice.entity,
                    operation,
                    message: notice.reason,
                });
                Err(err)
            }
        }
    }

    fn commit(&mut self, write: PendingWrite) -> SessionResult<()> {
        let result = self.perform(&write);
        self.complete(write, result)
    }

    fn move_write(&self, handle: PendingHandle) -> SessionResult<PendingWrite> {
        let Some(Mutation::Move { id, bucket, index }) =
            self.engine.queue().pending_mutation(handle.entity()).cloned()
        else {
            return Err(QueueError::UnknownHandle(handle).into());
        };
        let patch = ItemPatch {
            bucket: Some(bucket),
            index: Some(index),
            ..ItemPatch::at(handle.issued_at())
        };
        Ok(update_write(handle, "move", &id, patch))
    }
}

fn update_write(
    handle: PendingHandle,
    operation: &'static str,
    id: &ItemId,
    patch: ItemPatch,
) -> PendingWrite {
    PendingWrite::new(
        handle,
        operation,
        WriteRequest::Update {
            id: id.clone(),
            patch,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::{BoardSession, SessionError, SessionResult};
    use crate::config::EngineConfig;
    use crate::db::open_db_in_memory;
    use crate::engine::claim::ClaimError;
    use crate::engine::drag::{Orientation, Point, SlotRect};
    use crate::engine::reconciler::ReconcileOutcome;
    use crate::model::ids::{BucketId, Identity, ItemId};
    use crate::model::item::{EntityKind, Item};
    use crate::repo::persistence::{ItemPatch, PersistError, PersistenceStore};
    use crate::repo::sqlite_store::SqlitePersistenceStore;
    use crate::sync::notifier::ChangeNotifier;
    use serde_json::json;

    fn id(value: &str) -> ItemId {
        ItemId::new(value).unwrap()
    }

    fn bucket(value: &str) -> BucketId {
        BucketId::new(value).unwrap()
    }

    #[test]
    fn open_hydrates_buckets_and_items_in_order() {
        let conn = open_db_in_memory().unwrap();
        let store = SqlitePersistenceStore::new(&conn);
        store.put_bucket(&bucket("todo"), "To do").unwrap();
        store.put_bucket(&bucket("done"), "Done").unwrap();
        store
            .create(&Item::with_id(id("T1"), EntityKind::Task, bucket("done")))
            .unwrap();
        store
            .create(&Item::with_id(id("T2"), EntityKind::Task, bucket("done")))
            .unwrap();

        let session = BoardSession::open(&store, EngineConfig::default()).unwrap();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.buckets.len(), 2);
        assert_eq!(snapshot.buckets[0].label, "To do");
        let done: Vec<&str> = snapshot.buckets[1]
            .items
            .iter()
            .map(|item| item.id.as_str())
            .collect();
        assert_eq!(done, vec!["T1", "T2"]);
        assert!(session.engine().now() >= 1);
    }

    #[test]
    fn failed_write_rolls_back_with_one_notice() {
        let conn = open_db_in_memory().unwrap();
        let store = SqlitePersistenceStore::new(&conn);
        store
            .create(
                &Item::with_id(id("T1"), EntityKind::Task, bucket("todo")).with_field("title", "a"),
            )
            .unwrap();
        let mut session = BoardSession::open(&store, EngineConfig::default()).unwrap();

        // Another writer moves the stored revision far ahead.
        store
            .update(&id("T1"), &ItemPatch::at(100))
            .unwrap();

        let err = session
            .edit_fields(&id("T1"), json!({"title": "b"}).as_object().cloned().unwrap())
            .unwrap_err();
        assert!(matches!(err, SessionError::Persist(PersistError::Conflict { .. })));
        assert_eq!(session.get(&id("T1")).unwrap().field_str("title"), Some("a"));
        assert!(!session.get(&id("T1")).unwrap().pending);
        assert_eq!(session.notices().len(), 1);
        assert_eq!(session.notices()[0].operation, "patch");
    }

    #[test]
    fn invalid_identity_never_reaches_store() {
        let conn = open_db_in_memory().unwrap();
        let store = SqlitePersistenceStore::new(&conn);
        store
            .create(&Item::with_id(id("drill"), EntityKind::Tool, bucket("shelf")))
            .unwrap();
        let mut session = BoardSession::open(&store, EngineConfig::default()).unwrap();

        let err = session.claim(&id("drill"), " ").unwrap_err();
        assert!(matches!(err, SessionError::Claim(ClaimError::Validation(_))));
        assert!(session.notices().is_empty());
        assert!(store.get(&id("drill")).unwrap().unwrap().claimant.is_none());
    }

    fn column(store: &SqlitePersistenceStore<'_>, name: &str) -> Vec<String> {
        store
            .list()
            .unwrap()
            .into_iter()
            .filter(|item| item.bucket.as_str() == name)
            .map(|item| item.id.to_string())
            .collect()
    }

    #[test]
    fn stale_remote_event_pumped_while_write_is_in_flight_is_deferred() {
        let conn = open_db_in_memory().unwrap();
        let notifier = ChangeNotifier::new();
        let store = SqlitePersistenceStore::new(&conn).with_notifier(notifier.clone());
        store
            .create(
                &Item::with_id(id("E"), EntityKind::Task, bucket("todo"))
                    .with_field("title", "orig"),
            )
            .unwrap();
        let mut session = BoardSession::open(&store, EngineConfig::default()).unwrap();
        session.attach(notifier.subscribe(EntityKind::Task));
        for name in ["F1", "F2"] {
            session
                .create_item(Item::with_id(id(name), EntityKind::Task, bucket("todo")))
                .unwrap();
        }

        let write = session
            .begin_edit_fields(&id("E"), json!({"title": "local"}).as_object().cloned().unwrap())
            .unwrap();
        assert_eq!(write.operation(), "patch");

        // Another writer lands an older revision while ours is outstanding.
        let older = ItemPatch {
            fields: json!({"title": "remote"}).as_object().cloned().unwrap(),
            ..ItemPatch::at(2)
        };
        assert!(store.update(&id("E"), &older).unwrap().revision < write.handle().issued_at());

        let outcomes = session.pump();
        assert!(outcomes
            .iter()
            .any(|outcome| matches!(outcome, ReconcileOutcome::Deferred { .. })));
        assert_eq!(session.get(&id("E")).unwrap().field_str("title"), Some("local"));
        assert!(session.get(&id("E")).unwrap().pending);

        let result = session.perform(&write);
        session.complete(write, result).unwrap();
        session.pump();

        let item = session.get(&id("E")).unwrap();
        assert_eq!(item.field_str("title"), Some("local"));
        assert!(!item.pending);
        assert_eq!(session.engine().reconciler().deferred_len(), 0);
        assert_eq!(
            store.get(&id("E")).unwrap().unwrap().field_str("title"),
            Some("local")
        );
        assert!(session.notices().is_empty());
    }

    #[test]
    fn failed_in_flight_write_rolls_back_on_complete() {
        let conn = open_db_in_memory().unwrap();
        let store = SqlitePersistenceStore::new(&conn);
        store
            .create(&Item::with_id(id("T1"), EntityKind::Task, bucket("todo")))
            .unwrap();
        let mut session = BoardSession::open(&store, EngineConfig::default()).unwrap();
        let write = session.begin_delete(&id("T1")).unwrap();
        assert!(session.get(&id("T1")).is_none());

        let rejected: SessionResult<Option<u64>> =
            Err(PersistError::InvalidData("disk full".to_string()).into());
        assert!(session.complete(write, rejected).is_err());
        assert!(session.get(&id("T1")).is_some());
        assert_eq!(session.notices()[0].operation, "delete");
    }

    #[test]
    fn release_by_non_claimant_never_reaches_store() {
        let conn = open_db_in_memory().unwrap();
        let store = SqlitePersistenceStore::new(&conn);
        store
            .create(&Item::with_id(id("drill"), EntityKind::Tool, bucket("shelf")))
            .unwrap();
        let alice = Identity::new("alice").unwrap();
        store.conditional_claim(&id("drill"), &alice, 0).unwrap();
        let mut session = BoardSession::open(&store, EngineConfig::default()).unwrap();

        let err = session.release(&id("drill"), "bob").unwrap_err();
        match err {
            SessionError::Claim(ClaimError::NotClaimant { holder, .. }) => {
                assert_eq!(holder, Some(alice.clone()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(session.notices().is_empty());
        let stored = store.get(&id("drill")).unwrap().unwrap();
        assert_eq!(stored.claimant, Some(alice));
        assert_eq!(stored.revision, 2);

        session.release(&id("drill"), "alice").unwrap();
        assert!(store.get(&id("drill")).unwrap().unwrap().claimant.is_none());
        assert!(session.get(&id("drill")).unwrap().claimant.is_none());
    }

    #[test]
    fn drops_are_persisted_in_order() {
        let conn = open_db_in_memory().unwrap();
        let store = SqlitePersistenceStore::new(&conn);
        store.put_bucket(&bucket("todo"), "To do").unwrap();
        store.put_bucket(&bucket("done"), "Done").unwrap();
        for name in ["A", "B"] {
            store
                .create(&Item::with_id(id(name), EntityKind::Task, bucket("todo")))
                .unwrap();
        }
        let mut session = BoardSession::open(&store, EngineConfig::default()).unwrap();

        session.drag_start(&id("B")).unwrap();
        session.drag_over(&bucket("done")).unwrap();
        session.drop_item(&bucket("done"), 0).unwrap();
        assert_eq!(column(&store, "done"), vec!["B"]);

        session.drag_start(&id("A")).unwrap();
        session
            .drop_at_pointer(
                &bucket("done"),
                Orientation::Vertical,
                Point::new(0.0, 100.0),
                &[SlotRect::new(0.0, 0.0, 200.0, 40.0)],
            )
            .unwrap();
        assert_eq!(column(&store, "todo"), Vec::<String>::new());
        assert_eq!(column(&store, "done"), vec!["B", "A"]);
        assert!(session.get(&id("A")).is_some_and(|item| !item.pending));
        assert!(session.notices().is_empty());
    }
}
