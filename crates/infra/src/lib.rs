//! Infrastructure layer: persistence, external services, event bus,
//! configuration, use cases and background scrape jobs.

pub mod config;
pub mod db;
pub mod event_bus;
pub mod external;
pub mod history_store;
pub mod jobs;
pub mod listing_store;
pub mod search_rotation;
pub mod use_cases;
