//! In-process change notifier.
//!
//! # Responsibility
//! - Fan out published `ChangeEvent`s to live subscriptions.
//! - Let subscribers pull events at their own pace.
//!
//! # Invariants
//! - A subscription only receives events published while it is live.
//! - Each live subscription receives every matching event exactly once;
//!   consumers still treat delivery as at-least-once.
//! - Dropping a `Subscription` unsubscribes it.

use crate::model::event::ChangeEvent;
use crate::model::item::EntityKind;
use log::debug;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

#[derive(Debug)]
struct Subscriber {
    id: u64,
    kind: Option<EntityKind>,
    inbox: VecDeque<ChangeEvent>,
}

#[derive(Debug, Default)]
struct Hub {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

impl Hub {
    fn inbox_of(&mut self, id: u64) -> Option<&mut VecDeque<ChangeEvent>> {
        self.subscribers
            .iter_mut()
            .find(|subscriber| subscriber.id == id)
            .map(|subscriber| &mut subscriber.inbox)
    }
}

/// Cloneable handle to one notification hub.
#[derive(Debug, Clone, Default)]
pub struct ChangeNotifier {
    hub: Rc<RefCell<Hub>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to events of one entity kind.
    pub fn subscribe(&self, kind: EntityKind) -> Subscription {
        self.register(Some(kind))
    }

    /// Subscribes to events of every kind.
    pub fn subscribe_all(&self) -> Subscription {
        self.register(None)
    }

    /// Delivers `event` to every matching subscription.
    ///
    /// Returns the number of subscriptions that received it.
    pub fn publish(&self, event: &ChangeEvent) -> usize {
        let mut hub = self.hub.borrow_mut();
        let mut delivered = 0usize;
        for subscriber in hub
            .subscribers
            .iter_mut()
            .filter(|subscriber| subscriber.kind.map_or(true, |kind| kind == event.entity_type))
        {
            subscriber.inbox.push_back(event.clone());
            delivered += 1;
        }
        debug!(
            "event=notify_publish module=notifier status=ok operation={:?} kind={} timestamp={} delivered={}",
            event.operation,
            event.entity_type.as_str(),
            event.timestamp,
            delivered
        );
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.borrow().subscribers.len()
    }

    fn register(&self, kind: Option<EntityKind>) -> Subscription {
        let mut hub = self.hub.borrow_mut();
        hub.next_id += 1;
        let id = hub.next_id;
        hub.subscribers.push(Subscriber {
            id,
            kind,
            inbox: VecDeque::new(),
        });
        Subscription {
            id,
            hub: Rc::downgrade(&self.hub),
        }
    }
}

/// Pull-based, cancellable view of a notifier's stream.
///
/// Iterating yields buffered events and returns `None` once the inbox is
/// empty; iterate again after more events are published.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    hub: Weak<RefCell<Hub>>,
}

impl Subscription {
    /// Stops delivery and drops any undelivered events.
    ///
    /// Returns `false` when already unsubscribed.
    pub fn unsubscribe(&mut self) -> bool {
        let Some(hub) = self.hub.upgrade() else {
            return false;
        };
        self.hub = Weak::new();
        let mut hub = hub.borrow_mut();
        let before = hub.subscribers.len();
        hub.subscribers.retain(|subscriber| subscriber.id != self.id);
        before != hub.subscribers.len()
    }

    pub fn is_active(&self) -> bool {
        self.hub
            .upgrade()
            .is_some_and(|hub| hub.borrow().subscribers.iter().any(|s| s.id == self.id))
    }

    /// Number of events waiting to be pulled.
    pub fn pending(&self) -> usize {
        self.hub.upgrade().map_or(0, |hub| {
            hub.borrow_mut()
                .inbox_of(self.id)
                .map_or(0, |inbox| inbox.len())
        })
    }
}

impl Iterator for Subscription {
    type Item = ChangeEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let hub = self.hub.upgrade()?;
        let mut hub = hub.borrow_mut();
        hub.inbox_of(self.id)?.pop_front()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::ChangeNotifier;
    use crate::model::event::ChangeEvent;
    use crate::model::ids::{BucketId, ItemId};
    use crate::model::item::{EntityKind, Item};

    fn event(kind: EntityKind, name: &str, at: u64) -> ChangeEvent {
        ChangeEvent::insert(
            Item::with_id(
                ItemId::new(name).unwrap(),
                kind,
                BucketId::new("b").unwrap(),
            ),
            at,
        )
    }

    #[test]
    fn kind_filter_and_fan_out() {
        let notifier = ChangeNotifier::new();
        let mut tools = notifier.subscribe(EntityKind::Tool);
        let mut all = notifier.subscribe_all();

        assert_eq!(notifier.publish(&event(EntityKind::Tool, "drill", 1)), 2);
        assert_eq!(notifier.publish(&event(EntityKind::Task, "t1", 2)), 1);

        assert_eq!(tools.pending(), 1);
        let received: Vec<u64> = all.by_ref().map(|event| event.timestamp).collect();
        assert_eq!(received, vec![1, 2]);
        assert_eq!(tools.next().map(|event| event.timestamp), Some(1));
        assert!(tools.next().is_none());
    }

    #[test]
    fn subscription_only_sees_later_events() {
        let notifier = ChangeNotifier::new();
        notifier.publish(&event(EntityKind::Shift, "s1", 1));
        let mut late = notifier.subscribe(EntityKind::Shift);
        assert!(late.next().is_none());
        notifier.publish(&event(EntityKind::Shift, "s1", 2));
        assert_eq!(late.next().map(|event| event.timestamp), Some(2));
    }

    #[test]
    fn unsubscribe_and_drop_stop_delivery() {
        let notifier = ChangeNotifier::new();
        let mut first = notifier.subscribe_all();
        {
            let _second = notifier.subscribe_all();
            assert_eq!(notifier.subscriber_count(), 2);
        }
        assert_eq!(notifier.subscriber_count(), 1);

        assert!(first.unsubscribe());
        assert!(!first.unsubscribe());
        assert!(!first.is_active());
        assert_eq!(notifier.publish(&event(EntityKind::Task, "t", 3)), 0);
        assert!(first.next().is_none());
    }

    #[test]
    fn subscription_outliving_notifier_is_inert() {
        let notifier = ChangeNotifier::new();
        let mut sub = notifier.subscribe_all();
        drop(notifier);
        assert!(sub.next().is_none());
        assert!(!sub.is_active());
    }
}
