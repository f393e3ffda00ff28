//! `aetos-core`: domain building blocks for the listing orchestrator.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use error::DomainError;
pub use id::{HistoryRecordId, ListingId, ScrapeJobId};
