//! Lifecycle transition rules.
//!
//! ```text
//! FOUND ─► MESSAGING ─► NEGOTIATING ─► PURCHASED ─► RECEIVED ─► LISTED ─► SOLD
//!   │          │             │             │
//!   └──────────┴─────────────┴─────────────┴──► CANCELLED
//! ```

use thiserror::Error;

use crate::state::ListingState;

/// A transition that the lifecycle does not allow.
///
/// Carries both endpoints and the allowed set for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition from {from} to {to}; allowed: {}", format_allowed(.allowed))]
pub struct InvalidStateTransition {
    pub from: ListingState,
    pub to: ListingState,
    pub allowed: Vec<ListingState>,
}

fn format_allowed(allowed: &[ListingState]) -> String {
    if allowed.is_empty() {
        return "none (terminal state)".to_string();
    }
    allowed
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Stateless transition validator.
#[derive(Debug, Default, Clone, Copy)]
pub struct LifecycleStateMachine;

impl LifecycleStateMachine {
    pub fn new() -> Self {
        Self
    }

    /// States reachable from `from` in a single step.
    pub fn get_allowed_transitions(&self, from: ListingState) -> &'static [ListingState] {
        use ListingState::*;

        match from {
            Found => &[Messaging, Cancelled],
            Messaging => &[Negotiating, Cancelled],
            Negotiating => &[Purchased, Cancelled],
            Purchased => &[Received, Cancelled],
            Received => &[Listed],
            Listed => &[Sold],
            Sold | Cancelled => &[],
        }
    }

    pub fn can_transition(&self, from: ListingState, to: ListingState) -> bool {
        if from.is_terminal() {
            return false;
        }
        self.get_allowed_transitions(from).contains(&to)
    }

    pub fn validate_transition(
        &self,
        from: ListingState,
        to: ListingState,
    ) -> Result<(), InvalidStateTransition> {
        if self.can_transition(from, to) {
            Ok(())
        } else {
            Err(InvalidStateTransition {
                from,
                to,
                allowed: self.get_allowed_transitions(from).to_vec(),
            })
        }
    }
}
