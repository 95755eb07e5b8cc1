//! Board database bootstrap.
//!
//! # Responsibility
//! - Hand out connections that already carry the items and buckets schema.
//! - Own the one error type shared by every SQL-facing module.
//!
//! # Invariants
//! - A connection returned by `open_db*` is fully migrated.
//! - Files written by a newer schema are refused, never downgraded.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// An item's `fields` column could not be encoded or decoded.
    FieldsJson(serde_json::Error),
    /// `PRAGMA user_version` is ahead of the newest known migration.
    SchemaTooNew { found: u32, supported: u32 },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite: {err}"),
            Self::FieldsJson(err) => write!(f, "item fields are not valid json: {err}"),
            Self::SchemaTooNew { found, supported } => write!(
                f,
                "board database uses schema {found}, this build understands up to {supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::FieldsJson(err) => Some(err),
            Self::SchemaTooNew { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for DbError {
    fn from(value: serde_json::Error) -> Self {
        Self::FieldsJson(value)
    }
}
