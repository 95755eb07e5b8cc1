//! Status transition validation and terminal-edge side effects.
//!
//! # Responsibility
//! - Reject status changes that are not edges of the kind's state machine.
//! - Invoke registered hooks exactly once per entry into a terminal status.
//!
//! # Invariants
//! - A hook fires only when `previous != terminal && new == terminal`.
//! - Redundant re-assertions of a terminal status never fire again.

use crate::engine::mutation_queue::QueueError;
use crate::engine::store::EntityStore;
use crate::model::ids::ItemId;
use crate::model::item::{EntityKind, Item};
use crate::model::status::Status;
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionError {
    NotFound(ItemId),
    /// Requested status belongs to another machine, or the kind has none.
    KindMismatch { id: ItemId, kind: EntityKind },
    InvalidTransition {
        id: ItemId,
        from: Status,
        to: Status,
    },
    Queue(QueueError),
}

impl Display for TransitionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "item not found: {id}"),
            Self::KindMismatch { id, kind } => {
                write!(f, "status does not apply to {} {id}", kind.as_str())
            }
            Self::InvalidTransition { id, from, to } => write!(
                f,
                "invalid transition for {id}: {} -> {}",
                from.as_str(),
                to.as_str()
            ),
            Self::Queue(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TransitionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Queue(err) => Some(err),
            _ => None,
        }
    }
}

impl From<QueueError> for TransitionError {
    fn from(value: QueueError) -> Self {
        match value {
            QueueError::NotFound(id) => Self::NotFound(id),
            other => Self::Queue(other),
        }
    }
}

/// Checks that `item` may move to `next`.
///
/// Returns `Ok(false)` when `next` equals the current status, which is an
/// accepted no-op; `Ok(true)` when a real edge would be taken.
pub fn validate_transition(item: &Item, next: Status) -> Result<bool, TransitionError> {
    let Some(current) = item.status else {
        return Err(TransitionError::KindMismatch {
            id: item.id.clone(),
            kind: item.kind,
        });
    };
    if std::mem::discriminant(&current) != std::mem::discriminant(&next) {
        return Err(TransitionError::KindMismatch {
            id: item.id.clone(),
            kind: item.kind,
        });
    }
    if current == next {
        return Ok(false);
    }
    if !current.can_transition_to(next) {
        return Err(TransitionError::InvalidTransition {
            id: item.id.clone(),
            from: current,
            to: next,
        });
    }
    Ok(true)
}

/// Looks up `id` in the store and validates the transition to `next`.
pub fn check_transition(
    store: &EntityStore,
    id: &ItemId,
    next: Status,
) -> Result<bool, TransitionError> {
    let item = store
        .get(id)
        .ok_or_else(|| TransitionError::NotFound(id.clone()))?;
    validate_transition(item, next)
}

/// Payload handed to hooks when an item enters its terminal status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowInvocation {
    pub entity: ItemId,
    pub kind: EntityKind,
    /// Status before the edge; `None` when the item arrived already terminal.
    pub from: Option<Status>,
    pub to: Status,
    pub revision: u64,
}

/// Side effect bound to terminal-status edges.
pub trait WorkflowHook {
    fn on_completed(&mut self, invocation: &WorkflowInvocation);
}

impl<F> WorkflowHook for F
where
    F: FnMut(&WorkflowInvocation),
{
    fn on_completed(&mut self, invocation: &WorkflowInvocation) {
        self(invocation)
    }
}

/// Observes item changes and fires hooks on terminal edges.
#[derive(Default)]
pub struct TransitionWorkflowTrigger {
    hooks: Vec<Box<dyn WorkflowHook>>,
    fired: u64,
}

impl std::fmt::Debug for TransitionWorkflowTrigger {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionWorkflowTrigger")
            .field("hooks", &self.hooks.len())
            .field("fired", &self.fired)
            .finish()
    }
}

impl TransitionWorkflowTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: impl WorkflowHook + 'static) {
        self.hooks.push(Box::new(hook));
    }

    /// Compares the status before and after one store change.
    ///
    /// Returns `true` when hooks fired.
    pub fn observe(&mut self, previous: Option<Status>, current: &Item) -> bool {
        let Some(to) = current.status else {
            return false;
        };
        let was_terminal = previous.is_some_and(Status::is_terminal);
        if was_terminal || !to.is_terminal() {
            return false;
        }

        let invocation = WorkflowInvocation {
            entity: current.id.clone(),
            kind: current.kind,
            from: previous,
            to,
            revision: current.revision,
        };
        self.fired += 1;
        info!(
            "event=workflow_fire module=transition status=ok kind={} to={} revision={}",
            current.kind.as_str(),
            to.as_str(),
            current.revision
        );
        for hook in &mut self.hooks {
            hook.on_completed(&invocation);
        }
        true
    }

    /// Total number of terminal edges observed so far.
    pub fn fired_count(&self) -> u64 {
        self.fired
    }
}

#[cfg(test)]
mod tests {
    use super::{
        validate_transition, TransitionError, TransitionWorkflowTrigger, WorkflowInvocation,
    };
    use crate::model::ids::{BucketId, ItemId};
    use crate::model::item::{EntityKind, Item};
    use crate::model::status::{MeetingStatus, Status, TaskStatus};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn meeting(status: MeetingStatus) -> Item {
        let mut item = Item::with_id(
            ItemId::new("M1").unwrap(),
            EntityKind::Meeting,
            BucketId::new("week").unwrap(),
        );
        item.status = Some(Status::Meeting(status));
        item
    }

    #[test]
    fn skipping_ongoing_is_invalid() {
        let err = validate_transition(
            &meeting(MeetingStatus::Planned),
            Status::Meeting(MeetingStatus::Completed),
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn same_status_is_a_no_op() {
        let item = meeting(MeetingStatus::Ongoing);
        assert_eq!(
            validate_transition(&item, Status::Meeting(MeetingStatus::Ongoing)),
            Ok(false)
        );
        assert_eq!(
            validate_transition(&item, Status::Meeting(MeetingStatus::Completed)),
            Ok(true)
        );
    }

    #[test]
    fn task_status_on_meeting_is_kind_mismatch() {
        let err = validate_transition(
            &meeting(MeetingStatus::Planned),
            Status::Task(TaskStatus::Todo),
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::KindMismatch { .. }));

        let tool = Item::with_id(
            ItemId::new("T").unwrap(),
            EntityKind::Tool,
            BucketId::new("shelf").unwrap(),
        );
        assert!(matches!(
            validate_transition(&tool, Status::Task(TaskStatus::Done)),
            Err(TransitionError::KindMismatch { kind: EntityKind::Tool, .. })
        ));
    }

    #[test]
    fn hook_fires_once_per_terminal_edge() {
        let seen: Rc<RefCell<Vec<WorkflowInvocation>>> = Rc::default();
        let sink = Rc::clone(&seen);
        let mut trigger = TransitionWorkflowTrigger::new();
        trigger.register(move |invocation: &WorkflowInvocation| {
            sink.borrow_mut().push(invocation.clone());
        });

        let ongoing = Some(Status::Meeting(MeetingStatus::Ongoing));
        let completed = meeting(MeetingStatus::Completed);
        assert!(trigger.observe(ongoing, &completed));
        assert!(!trigger.observe(completed.status, &completed));
        assert!(!trigger.observe(ongoing, &meeting(MeetingStatus::Ongoing)));

        assert_eq!(trigger.fired_count(), 1);
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].from, ongoing);
        assert_eq!(seen[0].to, Status::Meeting(MeetingStatus::Completed));
    }

    #[test]
    fn item_arriving_terminal_fires() {
        let mut trigger = TransitionWorkflowTrigger::new();
        assert!(trigger.observe(None, &meeting(MeetingStatus::Completed)));
        assert_eq!(trigger.fired_count(), 1);
    }
}
