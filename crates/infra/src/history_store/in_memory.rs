use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use aetos_core::{HistoryRecordId, ListingId};
use aetos_listings::ListingState;

use super::r#trait::{HistoryMetadata, StateHistoryRecord, StateHistoryRepository};
use crate::db::StoreError;

/// In-memory history store. Rows are kept in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryStateHistoryRepository {
    rows: Mutex<Vec<StateHistoryRecord>>,
}

impl InMemoryStateHistoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row across all listings.
    pub fn all(&self) -> Vec<StateHistoryRecord> {
        self.rows().clone()
    }

    fn rows(&self) -> MutexGuard<'_, Vec<StateHistoryRecord>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StateHistoryRepository for InMemoryStateHistoryRepository {
    async fn save(
        &self,
        listing_id: ListingId,
        from_state: Option<ListingState>,
        to_state: ListingState,
        triggered_by: &str,
        metadata: HistoryMetadata,
    ) -> Result<StateHistoryRecord, StoreError> {
        let record = StateHistoryRecord {
            id: HistoryRecordId::new(),
            listing_id,
            from_state,
            to_state,
            transitioned_at: Utc::now(),
            triggered_by: triggered_by.to_string(),
            metadata,
        };
        self.rows().push(record.clone());
        Ok(record)
    }

    async fn get_history_for_listing(
        &self,
        listing_id: ListingId,
    ) -> Result<Vec<StateHistoryRecord>, StoreError> {
        let mut history: Vec<_> = self
            .rows()
            .iter()
            .filter(|r| r.listing_id == listing_id)
            .cloned()
            .collect();
        // Stable: equal timestamps keep insertion order.
        history.sort_by_key(|r| r.transitioned_at);
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn history_is_per_listing_and_oldest_first() {
        let repo = InMemoryStateHistoryRepository::new();
        let listing = ListingId::new();
        let other = ListingId::new();

        repo.save(listing, None, ListingState::Found, "scraper", HistoryMetadata::new())
            .await
            .unwrap();
        repo.save(other, None, ListingState::Found, "scraper", HistoryMetadata::new())
            .await
            .unwrap();
        repo.save(
            listing,
            Some(ListingState::Found),
            ListingState::Messaging,
            "chatterbot",
            HistoryMetadata::new(),
        )
        .await
        .unwrap();

        let history = repo.get_history_for_listing(listing).await.unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].from_state, None);
        assert_eq!(history[0].to_state, ListingState::Found);
        assert_eq!(history[1].from_state, Some(ListingState::Found));
        assert_eq!(history[1].triggered_by, "chatterbot");
        assert!(history[0].transitioned_at <= history[1].transitioned_at);
    }
}
