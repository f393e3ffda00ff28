//! Application use cases over the repository and publisher ports.
//!
//! Each use case is generic over its ports so the same code runs against the
//! in-memory adapters in tests and a Postgres session in production.

pub mod history;
pub mod ingest;
pub mod postgres;
pub mod transition;

use async_trait::async_trait;
use thiserror::Error;

use aetos_core::{DomainError, ListingId};
use aetos_listings::InvalidStateTransition;

use crate::db::StoreError;

pub use history::GetListingHistory;
pub use ingest::{IngestOutcome, IngestScraperMatches, MatchBatch};
pub use postgres::PgListingService;
pub use transition::{TransitionListing, TransitionRequest};

/// Use-case failure.
///
/// `Validation` and `NotFound` stay distinct so a boundary layer can map them
/// to different responses.
#[derive(Debug, Error)]
pub enum UseCaseError {
    /// The requested transition is not allowed from the current state.
    #[error(transparent)]
    Validation(#[from] InvalidStateTransition),

    #[error("listing {0} not found")]
    NotFound(ListingId),

    /// Input rejected by the aggregate factory.
    #[error("invalid input: {0}")]
    InvalidInput(#[from] DomainError),

    /// The listing changed concurrently; reload and retry.
    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for UseCaseError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => UseCaseError::Conflict(msg),
            other => UseCaseError::Store(other),
        }
    }
}

/// Hand-off point between the polling coordinator and ingestion.
#[async_trait]
pub trait MatchIngestor: Send + Sync {
    async fn ingest(&self, batch: MatchBatch) -> Result<IngestOutcome, UseCaseError>;
}

#[async_trait]
impl<I> MatchIngestor for std::sync::Arc<I>
where
    I: MatchIngestor + ?Sized,
{
    async fn ingest(&self, batch: MatchBatch) -> Result<IngestOutcome, UseCaseError> {
        (**self).ingest(batch).await
    }
}
