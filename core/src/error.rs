//! Error types for rack and transport operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the core. Intent-level failures are returned to the
/// caller; failures during reconciliation are delivered as
/// `Notification::Error`.
#[derive(Debug, Error)]
pub enum RigError {
    /// URI is not in the configured plugin whitelist
    #[error("unsupported plugin: {0}")]
    UnsupportedPlugin(String),

    /// The HOST is unreachable or returned an error reply
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// A request or an expected event did not arrive in time
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The HOST assigned a label that already exists in the registry
    #[error("duplicate label from host: {0}")]
    DuplicateLabel(String),

    /// No slot carries the given label
    #[error("no slot with label: {0}")]
    SlotNotFound(String),

    /// A registry invariant no longer holds. The chain is left at the
    /// last known good state.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A make-before-break transition failed and was rolled back
    #[error("routing conflict: {0}")]
    RoutingConflict(String),

    /// The configured `rack.slots_limit` would be exceeded
    #[error("slot limit reached ({0})")]
    SlotsLimitReached(usize),

    /// Failed to read the configuration file
    #[error("failed to read config '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse the configuration file
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Preset (de)serialization failure
    #[error("preset error: {0}")]
    Preset(#[from] serde_json::Error),
}

impl RigError {
    /// Short machine-readable kind tag, used by `Notification::Error`.
    pub fn kind(&self) -> &'static str {
        match self {
            RigError::UnsupportedPlugin(_) => "unsupported_plugin",
            RigError::TransportFailure(_) => "transport_failure",
            RigError::Timeout(_) => "timeout",
            RigError::DuplicateLabel(_) => "duplicate_label",
            RigError::SlotNotFound(_) => "slot_not_found",
            RigError::InvariantViolation(_) => "invariant_violation",
            RigError::RoutingConflict(_) => "routing_conflict",
            RigError::SlotsLimitReached(_) => "slots_limit_reached",
            RigError::ConfigRead { .. } => "config_read",
            RigError::ConfigParse(_) => "config_parse",
            RigError::Preset(_) => "preset",
        }
    }

    /// Fatal errors leave the chain untouched and are not retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RigError::DuplicateLabel(_) | RigError::InvariantViolation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(RigError::UnsupportedPlugin("x".into()).kind(), "unsupported_plugin");
        assert_eq!(RigError::Timeout("add echo".into()).kind(), "timeout");
        assert_eq!(RigError::SlotsLimitReached(4).kind(), "slots_limit_reached");
    }

    #[test]
    fn fatality() {
        assert!(RigError::DuplicateLabel("DS1_0".into()).is_fatal());
        assert!(RigError::InvariantViolation("index drift".into()).is_fatal());
        assert!(!RigError::SlotNotFound("DS1_0".into()).is_fatal());
        assert!(!RigError::RoutingConflict("connect refused".into()).is_fatal());
    }
}
