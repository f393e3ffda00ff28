//! Errors raised by the listing domain.

use thiserror::Error;

/// Rejected domain input or a lost optimistic-concurrency race.
///
/// Disallowed lifecycle transitions have their own type in `aetos-listings`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A factory or parser refused a value.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// A string that should hold a typed identifier.
    #[error("invalid {kind} '{raw}': {reason}")]
    InvalidId {
        kind: &'static str,
        raw: String,
        reason: String,
    },

    /// The stored aggregate moved on since it was loaded.
    #[error("version conflict: expected {expected}, stored {actual}")]
    VersionConflict { expected: u64, actual: u64 },
}

impl DomainError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}
