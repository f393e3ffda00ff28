//! Listings domain module (marketplace listings tracked through the
//! buy/resell lifecycle).
//!
//! Business rules only: the lifecycle state machine, the `ProductListing`
//! aggregate, and the domain events it emits. No IO, no storage.

pub mod events;
pub mod listing;
pub mod state;
pub mod state_machine;

pub use events::{ListingCreated, ListingEvent, ListingStateChanged, ScraperJobCreated};
pub use listing::{
    CostBreakdown, DealDetails, LifecycleTimestamps, ListingSnapshot, NewScraperListing,
    ProductListing, ResaleDetails,
};
pub use state::ListingState;
pub use state_machine::{InvalidStateTransition, LifecycleStateMachine};
