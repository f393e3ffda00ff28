use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aetos_core::{HistoryRecordId, ListingId};
use aetos_listings::ListingState;

use crate::db::StoreError;

/// Free-form context attached to a history row (job id, reason, ...).
pub type HistoryMetadata = serde_json::Map<String, serde_json::Value>;

/// One recorded state change. Never updated or deleted once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateHistoryRecord {
    pub id: HistoryRecordId,
    pub listing_id: ListingId,
    /// `None` for the creation row.
    pub from_state: Option<ListingState>,
    pub to_state: ListingState,
    pub transitioned_at: DateTime<Utc>,
    pub triggered_by: String,
    pub metadata: HistoryMetadata,
}

#[async_trait]
pub trait StateHistoryRepository: Send + Sync {
    async fn save(
        &self,
        listing_id: ListingId,
        from_state: Option<ListingState>,
        to_state: ListingState,
        triggered_by: &str,
        metadata: HistoryMetadata,
    ) -> Result<StateHistoryRecord, StoreError>;

    /// Every row for `listing_id`, oldest first.
    async fn get_history_for_listing(
        &self,
        listing_id: ListingId,
    ) -> Result<Vec<StateHistoryRecord>, StoreError>;
}

#[async_trait]
impl<R> StateHistoryRepository for Arc<R>
where
    R: StateHistoryRepository + ?Sized,
{
    async fn save(
        &self,
        listing_id: ListingId,
        from_state: Option<ListingState>,
        to_state: ListingState,
        triggered_by: &str,
        metadata: HistoryMetadata,
    ) -> Result<StateHistoryRecord, StoreError> {
        (**self)
            .save(listing_id, from_state, to_state, triggered_by, metadata)
            .await
    }

    async fn get_history_for_listing(
        &self,
        listing_id: ListingId,
    ) -> Result<Vec<StateHistoryRecord>, StoreError> {
        (**self).get_history_for_listing(listing_id).await
    }
}
