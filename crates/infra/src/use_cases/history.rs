use aetos_core::ListingId;

use super::UseCaseError;
use crate::history_store::{StateHistoryRecord, StateHistoryRepository};
use crate::listing_store::ListingRepository;

/// Audit trail of one listing, oldest first.
#[derive(Debug, Clone)]
pub struct GetListingHistory<L, H> {
    listings: L,
    history: H,
}

impl<L, H> GetListingHistory<L, H>
where
    L: ListingRepository,
    H: StateHistoryRepository,
{
    pub fn new(listings: L, history: H) -> Self {
        Self { listings, history }
    }

    pub async fn execute(&self, listing_id: ListingId) -> Result<Vec<StateHistoryRecord>, UseCaseError> {
        if self.listings.get_by_id(listing_id).await?.is_none() {
            return Err(UseCaseError::NotFound(listing_id));
        }
        Ok(self.history.get_history_for_listing(listing_id).await?)
    }
}
