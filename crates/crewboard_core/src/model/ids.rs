//! Validated identifiers for items, buckets and claimant identities.
//!
//! # Invariants
//! - Values are 1..=128 ASCII characters and start with an alphanumeric.
//! - Construction through `new` is the only way to obtain a value, so every
//!   id held by the engine has already passed validation.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

static ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:-]{0,127}$").expect("id pattern is a valid regex")
});

static IDENTITY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:@+-]{0,127}$")
        .expect("identity pattern is a valid regex")
});

/// Rejections raised before anything reaches the store or the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Item id is empty or contains unsupported characters.
    InvalidItemId(String),
    /// Bucket id is empty or contains unsupported characters.
    InvalidBucketId(String),
    /// Claimant identity is empty or contains unsupported characters.
    InvalidIdentity(String),
    /// Bucket label is blank after trim.
    BlankLabel,
    /// Status variant does not belong to the item's kind.
    StatusKindMismatch { kind: &'static str },
    /// Claimant set on a kind that cannot be claimed.
    ClaimantNotAllowed { kind: &'static str },
    /// Field payload is not a JSON object.
    FieldsNotObject,
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidItemId(value) => write!(f, "invalid item id `{value}`"),
            Self::InvalidBucketId(value) => write!(f, "invalid bucket id `{value}`"),
            Self::InvalidIdentity(value) => write!(f, "invalid identity `{value}`"),
            Self::BlankLabel => write!(f, "bucket label must not be blank"),
            Self::StatusKindMismatch { kind } => {
                write!(f, "status does not belong to entity kind `{kind}`")
            }
            Self::ClaimantNotAllowed { kind } => {
                write!(f, "entity kind `{kind}` cannot carry a claimant")
            }
            Self::FieldsNotObject => write!(f, "item fields must be a JSON object"),
        }
    }
}

impl Error for ValidationError {}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $pattern:ident, $error:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Validates and wraps one identifier value.
            pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
                let value = value.into();
                if !$pattern.is_match(&value) {
                    return Err(ValidationError::$error(value));
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                Self::new(raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

string_id!(
    /// Stable item identifier. Never reused after delete.
    ItemId,
    ID_PATTERN,
    InvalidItemId
);

string_id!(
    /// Bucket identifier, unique within one board.
    BucketId,
    ID_PATTERN,
    InvalidBucketId
);

string_id!(
    /// Identity of a claimant (user handle or email-like login).
    Identity,
    IDENTITY_PATTERN,
    InvalidIdentity
);

impl ItemId {
    /// Generates a fresh random id for locally created items.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{BucketId, Identity, ItemId, ValidationError};

    #[test]
    fn accepts_short_and_uuid_ids() {
        assert!(ItemId::new("T1").is_ok());
        assert!(ItemId::new("11111111-2222-4333-8444-555555555555").is_ok());
        assert!(BucketId::new("in_progress").is_ok());
    }

    #[test]
    fn rejects_blank_and_spaced_ids() {
        assert_eq!(
            ItemId::new("").unwrap_err(),
            ValidationError::InvalidItemId(String::new())
        );
        assert!(BucketId::new("to do").is_err());
        assert!(ItemId::new("-leading").is_err());
    }

    #[test]
    fn identity_allows_email_like_logins() {
        assert!(Identity::new("alice@example.com").is_ok());
        assert!(Identity::new("bob+ops").is_ok());
        assert!(Identity::new(" alice").is_err());
    }

    #[test]
    fn generated_ids_are_valid_and_distinct() {
        let first = ItemId::generate();
        let second = ItemId::generate();
        assert_ne!(first, second);
        assert!(ItemId::new(first.as_str()).is_ok());
    }

    #[test]
    fn deserialize_runs_validation() {
        let ok: ItemId = serde_json::from_str("\"S1\"").unwrap();
        assert_eq!(ok.as_str(), "S1");
        assert!(serde_json::from_str::<ItemId>("\"bad id\"").is_err());
    }
}
