//! Drag gesture state machine: `idle -> dragging -> {dropped, cancelled} -> idle`.
//!
//! # Responsibility
//! - Turn a pointer gesture into at most one discrete move mutation.
//! - Resolve pointer geometry into a drop index deterministically.
//!
//! # Invariants
//! - `drag_over` never produces a mutation.
//! - `drop` onto the source slot and `cancel` produce nothing.
//! - The protocol never touches the store; mutations go through the queue.

use crate::engine::mutation_queue::{Mutation, QueueError};
use crate::engine::store::{EntityStore, Placement};
use crate::model::ids::{BucketId, ItemId};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors from gesture handling.
#[derive(Debug, Clone, PartialEq)]
pub enum DragError {
    /// `drag_start` while another drag is active.
    AlreadyDragging(ItemId),
    /// `drag_over`/`drop` without an active drag.
    NotDragging,
    /// Dragged item is not cached.
    NotFound(ItemId),
    /// The resulting move could not be queued.
    Queue(QueueError),
}

impl Display for DragError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyDragging(id) => write!(f, "drag already active for {id}"),
            Self::NotDragging => write!(f, "no drag in progress"),
            Self::NotFound(id) => write!(f, "item not found: {id}"),
            Self::Queue(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DragError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Queue(err) => Some(err),
            _ => None,
        }
    }
}

impl From<QueueError> for DragError {
    fn from(value: QueueError) -> Self {
        Self::Queue(value)
    }
}

/// Layout direction of a bucket's items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Vertical,
    Horizontal,
}

/// A position in board coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn along(self, orientation: Orientation) -> f64 {
        match orientation {
            Orientation::Vertical => self.y,
            Orientation::Horizontal => self.x,
        }
    }
}

/// Laid-out bounds of one sibling item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl SlotRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    fn midpoint(self, orientation: Orientation) -> f64 {
        match orientation {
            Orientation::Vertical => self.y + self.height / 2.0,
            Orientation::Horizontal => self.x + self.width / 2.0,
        }
    }
}

/// Active gesture data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragSession {
    pub item: ItemId,
    pub source: Placement,
    /// Bucket currently hovered; visual feedback only.
    pub candidate: Option<BucketId>,
}

/// Observable phase of the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DragPhase {
    #[default]
    Idle,
    Dragging(DragSession),
}

/// How a gesture ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DropOutcome {
    /// Target differs from source; exactly one move mutation.
    Moved(Mutation),
    /// Dropped back onto the source slot.
    Unchanged,
}

/// Gesture-to-mutation translator for one board.
#[derive(Debug, Default)]
pub struct DragRelocationProtocol {
    phase: DragPhase,
}

impl DragRelocationProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> &DragPhase {
        &self.phase
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.phase, DragPhase::Dragging(_))
    }

    /// Begins a drag, capturing the item's source bucket and index.
    pub fn drag_start(&mut self, store: &EntityStore, item: &ItemId) -> Result<(), DragError> {
        if let DragPhase::Dragging(session) = &self.phase {
            return Err(DragError::AlreadyDragging(session.item.clone()));
        }
        let source = store
            .placement_of(item)
            .ok_or_else(|| DragError::NotFound(item.clone()))?;
        self.phase = DragPhase::Dragging(DragSession {
            item: item.clone(),
            candidate: Some(source.bucket.clone()),
            source,
        });
        Ok(())
    }

    /// Updates the hovered bucket.
    pub fn drag_over(&mut self, bucket: &BucketId) -> Result<(), DragError> {
        match &mut self.phase {
            DragPhase::Dragging(session) => {
                session.candidate = Some(bucket.clone());
                Ok(())
            }
            DragPhase::Idle => Err(DragError::NotDragging),
        }
    }

    /// Ends the drag over `bucket` at `index` and returns to idle.
    pub fn drop(&mut self, bucket: &BucketId, index: usize) -> Result<DropOutcome, DragError> {
        let session = match std::mem::take(&mut self.phase) {
            DragPhase::Dragging(session) => session,
            DragPhase::Idle => return Err(DragError::NotDragging),
        };
        if &session.source.bucket == bucket && session.source.index == index {
            return Ok(DropOutcome::Unchanged);
        }
        Ok(DropOutcome::Moved(Mutation::Move {
            id: session.item,
            bucket: bucket.clone(),
            index,
        }))
    }

    /// Ends the drag over `bucket`, resolving the index from pointer geometry.
    ///
    /// `siblings` are the bounds of the bucket's other items, in order,
    /// excluding the dragged one.
    pub fn drop_at_pointer(
        &mut self,
        bucket: &BucketId,
        orientation: Orientation,
        leading_edge: Point,
        siblings: &[SlotRect],
    ) -> Result<DropOutcome, DragError> {
        let index = drop_index_for(orientation, leading_edge, siblings);
        self.drop(bucket, index)
    }

    /// Abandons the drag. Returns whether a drag was active.
    pub fn cancel(&mut self) -> bool {
        let was_dragging = self.is_dragging();
        self.phase = DragPhase::Idle;
        was_dragging
    }
}

/// Resolves the drop index from the dragged item's leading edge.
///
/// `orientation` selects the axis: vertical buckets compare `y` against
/// sibling vertical midpoints, horizontal buckets compare `x` against
/// horizontal midpoints. The index is the number of siblings whose midpoint
/// lies strictly before the leading edge on that axis, so an edge exactly on
/// a midpoint resolves to the earlier index.
pub fn drop_index_for(
    orientation: Orientation,
    leading_edge: Point,
    siblings: &[SlotRect],
) -> usize {
    let edge = leading_edge.along(orientation);
    siblings
        .iter()
        .take_while(|slot| slot.midpoint(orientation) < edge)
        .count()
}

#[cfg(test)]
mod tests {
    use super::{
        drop_index_for, DragError, DragPhase, DragRelocationProtocol, DropOutcome, Orientation,
        Point, SlotRect,
    };
    use crate::engine::mutation_queue::Mutation;
    use crate::engine::store::{EntityStore, IndexPolicy};
    use crate::model::ids::{BucketId, ItemId};
    use crate::model::item::{EntityKind, Item};

    fn bucket(id: &str) -> BucketId {
        BucketId::new(id).unwrap()
    }

    fn id(value: &str) -> ItemId {
        ItemId::new(value).unwrap()
    }

    fn store() -> EntityStore {
        let mut store = EntityStore::with_buckets(
            IndexPolicy::Reject,
            [(bucket("todo"), "To do"), (bucket("done"), "Done")],
        )
        .unwrap();
        for name in ["A", "B"] {
            store
                .upsert(Item::with_id(id(name), EntityKind::Task, bucket("todo")))
                .unwrap();
        }
        store
    }

    #[test]
    fn drop_elsewhere_emits_one_move() {
        let store = store();
        let mut drag = DragRelocationProtocol::new();
        drag.drag_start(&store, &id("B")).unwrap();
        drag.drag_over(&bucket("done")).unwrap();
        match drag.phase() {
            DragPhase::Dragging(session) => {
                assert_eq!(session.source.index, 1);
                assert_eq!(session.candidate, Some(bucket("done")));
            }
            DragPhase::Idle => panic!("drag should be active"),
        }

        let outcome = drag.drop(&bucket("done"), 0).unwrap();
        assert_eq!(
            outcome,
            DropOutcome::Moved(Mutation::Move {
                id: id("B"),
                bucket: bucket("done"),
                index: 0,
            })
        );
        assert_eq!(drag.phase(), &DragPhase::Idle);
    }

    #[test]
    fn drop_on_source_slot_emits_nothing() {
        let store = store();
        let mut drag = DragRelocationProtocol::new();
        drag.drag_start(&store, &id("A")).unwrap();
        assert_eq!(
            drag.drop(&bucket("todo"), 0).unwrap(),
            DropOutcome::Unchanged
        );
        assert!(!drag.is_dragging());
    }

    #[test]
    fn cancel_returns_to_idle() {
        let store = store();
        let mut drag = DragRelocationProtocol::new();
        assert!(!drag.cancel());
        drag.drag_start(&store, &id("A")).unwrap();
        assert!(drag.cancel());
        assert_eq!(
            drag.drop(&bucket("done"), 0).unwrap_err(),
            DragError::NotDragging
        );
    }

    #[test]
    fn second_start_and_unknown_items_are_rejected() {
        let store = store();
        let mut drag = DragRelocationProtocol::new();
        assert_eq!(
            drag.drag_start(&store, &id("Z")).unwrap_err(),
            DragError::NotFound(id("Z"))
        );
        drag.drag_start(&store, &id("A")).unwrap();
        assert_eq!(
            drag.drag_start(&store, &id("B")).unwrap_err(),
            DragError::AlreadyDragging(id("A"))
        );
        assert_eq!(drag.drag_over(&bucket("done")), Ok(()));
    }

    fn column() -> [SlotRect; 3] {
        [
            SlotRect::new(0.0, 0.0, 200.0, 40.0),
            SlotRect::new(0.0, 40.0, 200.0, 40.0),
            SlotRect::new(0.0, 80.0, 200.0, 40.0),
        ]
    }

    #[test]
    fn pointer_index_counts_passed_midpoints() {
        let siblings = column();
        let at = |y| drop_index_for(Orientation::Vertical, Point::new(150.0, y), &siblings);
        assert_eq!(at(5.0), 0);
        assert_eq!(at(25.0), 1);
        assert_eq!(at(200.0), 3);
    }

    #[test]
    fn pointer_on_midpoint_resolves_to_earlier_index() {
        let siblings = column();
        let at = |y| drop_index_for(Orientation::Vertical, Point::new(0.0, y), &siblings);
        assert_eq!(at(20.0), 0);
        assert_eq!(at(60.0), 1);
        assert_eq!(at(60.5), 2);
    }

    #[test]
    fn orientation_selects_the_measured_axis() {
        // A row of three 100-wide cards, all 40 tall.
        let row = [
            SlotRect::new(0.0, 0.0, 100.0, 40.0),
            SlotRect::new(100.0, 0.0, 100.0, 40.0),
            SlotRect::new(200.0, 0.0, 100.0, 40.0),
        ];
        let edge = Point::new(50.0, 150.0);
        assert_eq!(drop_index_for(Orientation::Horizontal, edge, &row), 0);
        assert_eq!(drop_index_for(Orientation::Vertical, edge, &row), 3);

        let edge = Point::new(160.0, 10.0);
        assert_eq!(drop_index_for(Orientation::Horizontal, edge, &row), 2);
        assert_eq!(drop_index_for(Orientation::Vertical, edge, &row), 0);
    }

    #[test]
    fn drop_at_pointer_uses_geometry() {
        let store = store();
        let mut drag = DragRelocationProtocol::new();
        drag.drag_start(&store, &id("A")).unwrap();
        let outcome = drag
            .drop_at_pointer(
                &bucket("done"),
                Orientation::Horizontal,
                Point::new(10.0, 500.0),
                &[SlotRect::new(0.0, 0.0, 100.0, 40.0)],
            )
            .unwrap();
        assert!(matches!(
            outcome,
            DropOutcome::Moved(Mutation::Move { index: 0, .. })
        ));
    }
}
