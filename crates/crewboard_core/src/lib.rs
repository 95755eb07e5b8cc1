//! Core domain logic for crewboard.
//! This crate owns the shared-state reconciliation engine behind the task
//! board, tool catalog, shift-claim board and meeting workflow.

pub mod config;
pub mod db;
pub mod engine;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod sync;

pub use config::{ConfigError, EngineConfig};
pub use engine::claim::{ClaimArbiter, ClaimError};
pub use engine::clock::LamportClock;
pub use engine::drag::{
    drop_index_for, DragError, DragPhase, DragRelocationProtocol, DropOutcome, Orientation, Point,
    SlotRect,
};
pub use engine::mutation_queue::{
    Mutation, MutationQueue, PendingHandle, QueueError, QueueResult, RollbackNotice, Settlement,
};
pub use engine::reconciler::{ChangeEventReconciler, ReconcileError, ReconcileOutcome};
pub use engine::store::{
    BoardSnapshot, BucketSnapshot, EntityStore, IndexPolicy, ItemSnapshot, Placement, StoreError,
    StoreResult,
};
pub use engine::transition::{
    validate_transition, TransitionError, TransitionWorkflowTrigger, WorkflowHook,
    WorkflowInvocation,
};
pub use engine::BoardEngine;
pub use logging::{default_log_level, init_logging, logging_status, LogLevel, LoggingError};
pub use model::event::{ChangeEvent, ChangeOperation};
pub use model::ids::{BucketId, Identity, ItemId, ValidationError};
pub use model::item::{Bucket, EntityKind, Item};
pub use model::status::{MeetingStatus, Status, TaskStatus};
pub use repo::persistence::{
    BucketRecord, ClaimOutcome, ItemPatch, PersistError, PersistResult, PersistenceStore,
    ReleaseOutcome,
};
pub use repo::sqlite_store::SqlitePersistenceStore;
pub use service::board_session::{
    BoardSession, PendingWrite, SessionError, SessionResult, UserNotice, WriteRequest,
};
pub use sync::notifier::{ChangeNotifier, Subscription};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
