use core::str::FromStr;

use serde::{Deserialize, Serialize};

use aetos_core::DomainError;

/// Lifecycle state of a tracked listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListingState {
    Found,
    Messaging,
    Negotiating,
    Purchased,
    Received,
    Listed,
    Sold,
    Cancelled,
}

impl ListingState {
    pub const ALL: [ListingState; 8] = [
        ListingState::Found,
        ListingState::Messaging,
        ListingState::Negotiating,
        ListingState::Purchased,
        ListingState::Received,
        ListingState::Listed,
        ListingState::Sold,
        ListingState::Cancelled,
    ];

    /// Terminal states have no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, ListingState::Sold | ListingState::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ListingState::Found => "FOUND",
            ListingState::Messaging => "MESSAGING",
            ListingState::Negotiating => "NEGOTIATING",
            ListingState::Purchased => "PURCHASED",
            ListingState::Received => "RECEIVED",
            ListingState::Listed => "LISTED",
            ListingState::Sold => "SOLD",
            ListingState::Cancelled => "CANCELLED",
        }
    }
}

impl core::fmt::Display for ListingState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        ListingState::ALL
            .into_iter()
            .find(|state| state.as_str() == upper)
            .ok_or_else(|| DomainError::invalid("listing state", format!("unknown value '{s}'")))
    }
}
