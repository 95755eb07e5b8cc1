//! Engine tuning knobs.
//!
//! # Invariants
//! - Every field has a serde default, so `{}` is a complete config.
//! - Capacities are at least one after `validate`.

use crate::engine::store::IndexPolicy;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const DEFAULT_DEFERRED_CAPACITY: usize = 256;
pub const DEFAULT_TOMBSTONE_CAPACITY: usize = 4096;

#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    /// A capacity was configured as zero.
    ZeroCapacity(&'static str),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid engine config: {err}"),
            Self::ZeroCapacity(field) => write!(f, "`{field}` must be at least 1"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::ZeroCapacity(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Configuration for one `BoardEngine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Out-of-range move indices are rejected or clamped.
    pub index_policy: IndexPolicy,
    /// Maximum number of entities with a buffered remote event.
    pub deferred_capacity: usize,
    /// Maximum number of remembered remote deletes.
    pub tombstone_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            index_policy: IndexPolicy::default(),
            deferred_capacity: DEFAULT_DEFERRED_CAPACITY,
            tombstone_capacity: DEFAULT_TOMBSTONE_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON config document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.deferred_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("deferred_capacity"));
        }
        if self.tombstone_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("tombstone_capacity"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, EngineConfig, DEFAULT_DEFERRED_CAPACITY};
    use crate::engine::store::IndexPolicy;

    #[test]
    fn empty_document_yields_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.index_policy, IndexPolicy::Reject);
        assert_eq!(config.deferred_capacity, DEFAULT_DEFERRED_CAPACITY);
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config =
            EngineConfig::from_json_str(r#"{"index_policy":"clamp","deferred_capacity":8}"#)
                .unwrap();
        assert_eq!(config.index_policy, IndexPolicy::Clamp);
        assert_eq!(config.deferred_capacity, 8);
    }

    #[test]
    fn zero_capacity_and_unknown_keys_are_rejected() {
        assert!(matches!(
            EngineConfig::from_json_str(r#"{"tombstone_capacity":0}"#),
            Err(ConfigError::ZeroCapacity("tombstone_capacity"))
        ));
        assert!(matches!(
            EngineConfig::from_json_str(r#"{"capacity":3}"#),
            Err(ConfigError::Parse(_))
        ));
    }
}
