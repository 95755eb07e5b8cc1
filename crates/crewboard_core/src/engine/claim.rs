//! Local arbitration of exclusive claims on tools and shifts.
//!
//! The arbiter only decides what the cache allows. Cross-client exclusivity
//! comes from the persistence store's conditional claim; a local `Claimed`
//! may still be rolled back when that compare-and-set loses.

use crate::engine::mutation_queue::{Mutation, QueueError};
use crate::engine::store::EntityStore;
use crate::model::ids::{Identity, ItemId, ValidationError};
use crate::model::item::EntityKind;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Rejections raised by claim and release requests.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimError {
    Validation(ValidationError),
    /// Resource already has a claimant. No mutation was issued.
    AlreadyClaimed { id: ItemId, holder: Identity },
    NotFound(ItemId),
    /// Item kind cannot hold a claimant.
    NotClaimable { id: ItemId, kind: EntityKind },
    /// Release requested by someone other than the current claimant.
    NotClaimant {
        id: ItemId,
        holder: Option<Identity>,
    },
    Queue(QueueError),
}

impl Display for ClaimError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::AlreadyClaimed { id, holder } => write!(f, "{id} is already claimed by {holder}"),
            Self::NotFound(id) => write!(f, "resource not found: {id}"),
            Self::NotClaimable { id, kind } => {
                write!(f, "{id} is a {} and cannot be claimed", kind.as_str())
            }
            Self::NotClaimant { id, holder } => match holder {
                Some(holder) => write!(f, "{id} is held by {holder}"),
                None => write!(f, "{id} is not claimed"),
            },
            Self::Queue(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ClaimError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Queue(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for ClaimError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<QueueError> for ClaimError {
    fn from(value: QueueError) -> Self {
        match value {
            QueueError::NotFound(id) => Self::NotFound(id),
            other => Self::Queue(other),
        }
    }
}

/// Stateless gatekeeper for claim and release requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClaimArbiter;

impl ClaimArbiter {
    pub fn new() -> Self {
        Self
    }

    /// Checks a claim against the cache and returns the mutation to issue.
    ///
    /// # Errors
    /// - `NotFound` / `NotClaimable` for missing or non-claimable items.
    /// - `AlreadyClaimed` when any claimant is set, including `identity`.
    pub fn claim(
        &self,
        store: &EntityStore,
        id: &ItemId,
        identity: &Identity,
    ) -> Result<Mutation, ClaimError> {
        let item = store
            .get(id)
            .ok_or_else(|| ClaimError::NotFound(id.clone()))?;
        if !item.kind.is_claimable() {
            return Err(ClaimError::NotClaimable {
                id: id.clone(),
                kind: item.kind,
            });
        }
        if let Some(holder) = &item.claimant {
            return Err(ClaimError::AlreadyClaimed {
                id: id.clone(),
                holder: holder.clone(),
            });
        }
        Ok(Mutation::SetClaimant {
            id: id.clone(),
            claimant: Some(identity.clone()),
        })
    }

    /// Checks a release against the cache and returns the mutation to issue.
    ///
    /// Only the current claimant may release.
    pub fn release(
        &self,
        store: &EntityStore,
        id: &ItemId,
        identity: &Identity,
    ) -> Result<Mutation, ClaimError> {
        let item = store
            .get(id)
            .ok_or_else(|| ClaimError::NotFound(id.clone()))?;
        if !item.kind.is_claimable() {
            return Err(ClaimError::NotClaimable {
                id: id.clone(),
                kind: item.kind,
            });
        }
        if item.claimant.as_ref() != Some(identity) {
            return Err(ClaimError::NotClaimant {
                id: id.clone(),
                holder: item.claimant.clone(),
            });
        }
        Ok(Mutation::SetClaimant {
            id: id.clone(),
            claimant: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ClaimArbiter, ClaimError};
    use crate::engine::mutation_queue::Mutation;
    use crate::engine::store::{EntityStore, IndexPolicy};
    use crate::model::ids::{BucketId, Identity, ItemId};
    use crate::model::item::{EntityKind, Item};

    fn id(value: &str) -> ItemId {
        ItemId::new(value).unwrap()
    }

    fn who(value: &str) -> Identity {
        Identity::new(value).unwrap()
    }

    fn store() -> EntityStore {
        let shelf = BucketId::new("shelf").unwrap();
        let mut store = EntityStore::new(IndexPolicy::Reject);
        store
            .upsert(Item::with_id(id("drill"), EntityKind::Tool, shelf.clone()))
            .unwrap();
        let mut saw = Item::with_id(id("saw"), EntityKind::Tool, shelf.clone());
        saw.claimant = Some(who("alice"));
        store.upsert(saw).unwrap();
        store
            .upsert(Item::with_id(id("memo"), EntityKind::Task, shelf))
            .unwrap();
        store
    }

    #[test]
    fn free_resource_yields_one_set_claimant() {
        let store = store();
        let mutation = ClaimArbiter::new()
            .claim(&store, &id("drill"), &who("bob"))
            .unwrap();
        assert_eq!(
            mutation,
            Mutation::SetClaimant {
                id: id("drill"),
                claimant: Some(who("bob")),
            }
        );
    }

    #[test]
    fn held_resource_reports_holder() {
        let store = store();
        let err = ClaimArbiter::new()
            .claim(&store, &id("saw"), &who("bob"))
            .unwrap_err();
        assert_eq!(
            err,
            ClaimError::AlreadyClaimed {
                id: id("saw"),
                holder: who("alice"),
            }
        );
    }

    #[test]
    fn missing_and_unclaimable_items_are_rejected() {
        let store = store();
        let arbiter = ClaimArbiter::new();
        assert_eq!(
            arbiter.claim(&store, &id("ghost"), &who("bob")).unwrap_err(),
            ClaimError::NotFound(id("ghost"))
        );
        assert!(matches!(
            arbiter.claim(&store, &id("memo"), &who("bob")),
            Err(ClaimError::NotClaimable { kind: EntityKind::Task, .. })
        ));
    }

    #[test]
    fn only_claimant_may_release() {
        let store = store();
        let arbiter = ClaimArbiter::new();
        assert!(matches!(
            arbiter.release(&store, &id("saw"), &who("bob")),
            Err(ClaimError::NotClaimant { .. })
        ));
        assert!(matches!(
            arbiter.release(&store, &id("drill"), &who("bob")),
            Err(ClaimError::NotClaimant { holder: None, .. })
        ));
        let mutation = arbiter.release(&store, &id("saw"), &who("alice")).unwrap();
        assert_eq!(
            mutation,
            Mutation::SetClaimant {
                id: id("saw"),
                claimant: None,
            }
        );
    }
}
