//! Round-robin brand/search rotation for scheduled scrapes.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{InMemorySearchRotation, RotationEntry};
pub use postgres::PostgresSearchRotation;
pub use r#trait::{RotatedSearch, SearchRotation};
