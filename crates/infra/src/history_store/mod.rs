//! Append-only audit trail of listing state changes.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStateHistoryRepository;
pub use postgres::PostgresStateHistoryRepository;
pub use r#trait::{HistoryMetadata, StateHistoryRecord, StateHistoryRepository};
