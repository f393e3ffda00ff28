//! Listing repository boundary.
//!
//! Upsert-by-identity storage for `ProductListing` aggregates with an
//! optimistic version check, plus the paged query surface.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryListingRepository;
pub use postgres::PostgresListingRepository;
pub use r#trait::{ListingPage, ListingQuery, ListingRepository};
