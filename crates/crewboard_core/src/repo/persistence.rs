//! Persistence store contract used by board sessions.
//!
//! # Responsibility
//! - Define the durable operations a session needs to settle mutations.
//! - Keep conditional claim/release atomic on the store side.
//!
//! # Invariants
//! - Stored revisions only grow: each write stores
//!   `max(stored + 1, requested)`.
//! - `update` with a requested revision older than the stored one fails
//!   with `Conflict` and changes nothing.
//! - `delete` is idempotent.

use crate::db::DbError;
use crate::model::ids::{BucketId, Identity, ItemId, ValidationError};
use crate::model::item::Item;
use crate::model::status::Status;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

pub type PersistResult<T> = Result<T, PersistError>;

#[derive(Debug)]
pub enum PersistError {
    Validation(ValidationError),
    NotFound(ItemId),
    /// Another writer got there first; nothing was written.
    Conflict { id: ItemId, stored_revision: u64 },
    /// Claim or release on a kind that cannot hold a claimant.
    NotClaimable(ItemId),
    /// Row content could not be mapped back to a valid item.
    InvalidData(String),
    Db(DbError),
}

impl Display for PersistError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "item not found: {id}"),
            Self::Conflict {
                id,
                stored_revision,
            } => write!(f, "write conflict on {id}: stored revision is {stored_revision}"),
            Self::NotClaimable(id) => write!(f, "item cannot be claimed: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted item data: {message}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for PersistError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for PersistError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for PersistError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for PersistError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for PersistError {
    fn from(value: serde_json::Error) -> Self {
        Self::Db(DbError::FieldsJson(value))
    }
}

/// Partial update of one stored item.
///
/// Claimant changes are not part of a patch; they go through the
/// conditional claim operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPatch {
    /// Merged into stored fields; `null` removes a key.
    pub fields: Map<String, Value>,
    pub status: Option<Status>,
    /// Destination bucket; `None` keeps the current one.
    pub bucket: Option<BucketId>,
    /// Destination index, clamped to the destination's bounds.
    pub index: Option<usize>,
    /// Revision the writer believes it is writing.
    pub revision: u64,
}

impl ItemPatch {
    pub fn at(revision: u64) -> Self {
        Self {
            revision,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(Item),
    AlreadyClaimed { holder: Identity },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseOutcome {
    Released(Item),
    NotClaimant { holder: Option<Identity> },
}

/// Stored bucket row: id and display label, in board order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketRecord {
    pub id: BucketId,
    pub label: String,
}

/// Durable storage behind a board session.
pub trait PersistenceStore {
    /// Inserts a new item. Duplicate ids fail with `Conflict`.
    fn create(&self, item: &Item) -> PersistResult<Item>;
    fn update(&self, id: &ItemId, patch: &ItemPatch) -> PersistResult<Item>;
    /// Removes an item. Returns the delete revision, or `None` if absent.
    fn delete(&self, id: &ItemId, revision: u64) -> PersistResult<Option<u64>>;
    /// Sets the claimant only if none is set, atomically.
    fn conditional_claim(
        &self,
        id: &ItemId,
        identity: &Identity,
        revision: u64,
    ) -> PersistResult<ClaimOutcome>;
    /// Clears the claimant only if it equals `identity`, atomically.
    fn conditional_release(
        &self,
        id: &ItemId,
        identity: &Identity,
        revision: u64,
    ) -> PersistResult<ReleaseOutcome>;
    /// All items in board order, then bucket order.
    fn list(&self) -> PersistResult<Vec<Item>>;
    fn list_buckets(&self) -> PersistResult<Vec<BucketRecord>>;
    /// Registers a bucket or renames an existing one.
    fn put_bucket(&self, id: &BucketId, label: &str) -> PersistResult<()>;
}

macro_rules! forward_persistence_store {
    ($($wrapper:ty),+ $(,)?) => {
        $(
            impl<T: PersistenceStore + ?Sized> PersistenceStore for $wrapper {
                fn create(&self, item: &Item) -> PersistResult<Item> {
                    (**self).create(item)
                }

                fn update(&self, id: &ItemId, patch: &ItemPatch) -> PersistResult<Item> {
                    (**self).update(id, patch)
                }

                fn delete(&self, id: &ItemId, revision: u64) -> PersistResult<Option<u64>> {
                    (**self).delete(id, revision)
                }

                fn conditional_claim(
                    &self,
                    id: &ItemId,
                    identity: &Identity,
                    revision: u64,
                ) -> PersistResult<ClaimOutcome> {
                    (**self).conditional_claim(id, identity, revision)
                }

                fn conditional_release(
                    &self,
                    id: &ItemId,
                    identity: &Identity,
                    revision: u64,
                ) -> PersistResult<ReleaseOutcome> {
                    (**self).conditional_release(id, identity, revision)
                }

                fn list(&self) -> PersistResult<Vec<Item>> {
                    (**self).list()
                }

                fn list_buckets(&self) -> PersistResult<Vec<BucketRecord>> {
                    (**self).list_buckets()
                }

                fn put_bucket(&self, id: &BucketId, label: &str) -> PersistResult<()> {
                    (**self).put_bucket(id, label)
                }
            }
        )+
    };
}

forward_persistence_store!(&T, Rc<T>);
