use std::sync::Arc;

use async_trait::async_trait;

use aetos_core::ListingId;
use aetos_listings::{ListingState, ProductListing};

use crate::db::StoreError;

/// Largest page `list` will return.
pub const MAX_PAGE_SIZE: u32 = 200;

/// Filter and page for [`ListingRepository::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingQuery {
    pub state: Option<ListingState>,
    /// Case-insensitive substring match on brand.
    pub brand: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl ListingQuery {
    /// `limit` clamped to `1..=MAX_PAGE_SIZE`.
    pub fn effective_limit(&self) -> u32 {
        self.limit.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn with_state(mut self, state: ListingState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_brand(mut self, brand: impl Into<String>) -> Self {
        self.brand = Some(brand.into());
        self
    }
}

impl Default for ListingQuery {
    fn default() -> Self {
        Self {
            state: None,
            brand: None,
            limit: 50,
            offset: 0,
        }
    }
}

/// One page of listings, newest first, plus the total matching the filter.
#[derive(Debug, Clone)]
pub struct ListingPage {
    pub listings: Vec<ProductListing>,
    pub total: u64,
}

/// Storage port for listing aggregates.
#[async_trait]
pub trait ListingRepository: Send + Sync {
    /// Insert or update by identity.
    ///
    /// Fails with `StoreError::Conflict` when the stored row is no longer at the
    /// version the aggregate was loaded at.
    async fn save(&self, listing: &ProductListing) -> Result<(), StoreError>;

    async fn get_by_id(&self, id: ListingId) -> Result<Option<ProductListing>, StoreError>;

    async fn list(&self, query: &ListingQuery) -> Result<ListingPage, StoreError>;
}

#[async_trait]
impl<R> ListingRepository for Arc<R>
where
    R: ListingRepository + ?Sized,
{
    async fn save(&self, listing: &ProductListing) -> Result<(), StoreError> {
        (**self).save(listing).await
    }

    async fn get_by_id(&self, id: ListingId) -> Result<Option<ProductListing>, StoreError> {
        (**self).get_by_id(id).await
    }

    async fn list(&self, query: &ListingQuery) -> Result<ListingPage, StoreError> {
        (**self).list(query).await
    }
}
