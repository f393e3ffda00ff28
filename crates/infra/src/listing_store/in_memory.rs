use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use aetos_core::{AggregateRoot, ListingId};
use aetos_listings::{ListingSnapshot, ProductListing};

use super::r#trait::{ListingPage, ListingQuery, ListingRepository};
use crate::db::StoreError;

/// In-memory listing repository.
///
/// Stores snapshots, so a loaded aggregate never shares its event buffer with
/// the one that was saved.
#[derive(Debug, Default)]
pub struct InMemoryListingRepository {
    rows: Mutex<HashMap<ListingId, ListingSnapshot>>,
}

impl InMemoryListingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn rows(&self) -> MutexGuard<'_, HashMap<ListingId, ListingSnapshot>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn matches_query(row: &ListingSnapshot, query: &ListingQuery) -> bool {
    if let Some(state) = query.state {
        if row.state != state {
            return false;
        }
    }
    if let Some(brand) = &query.brand {
        if !row.brand.to_lowercase().contains(&brand.to_lowercase()) {
            return false;
        }
    }
    true
}

#[async_trait]
impl ListingRepository for InMemoryListingRepository {
    async fn save(&self, listing: &ProductListing) -> Result<(), StoreError> {
        let mut rows = self.rows();
        if let Some(stored) = rows.get(listing.id()) {
            listing
                .expected_version()
                .check(stored.version)
                .map_err(|e| StoreError::Conflict(e.to_string()))?;
        }
        rows.insert(*listing.id(), listing.snapshot().clone());
        Ok(())
    }

    async fn get_by_id(&self, id: ListingId) -> Result<Option<ProductListing>, StoreError> {
        Ok(self
            .rows()
            .get(&id)
            .cloned()
            .map(ProductListing::from_snapshot))
    }

    async fn list(&self, query: &ListingQuery) -> Result<ListingPage, StoreError> {
        let rows = self.rows();
        let mut matching: Vec<&ListingSnapshot> =
            rows.values().filter(|row| matches_query(row, query)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let listings = matching
            .into_iter()
            .skip(query.offset as usize)
            .take(query.effective_limit() as usize)
            .cloned()
            .map(ProductListing::from_snapshot)
            .collect();

        Ok(ListingPage { listings, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aetos_core::{ExpectedVersion, ScrapeJobId};
    use aetos_listings::{ListingState, NewScraperListing};
    use rust_decimal::Decimal;

    fn listing(brand: &str) -> ProductListing {
        ProductListing::create_from_scraper_match(NewScraperListing {
            product_id: 7,
            marketplace_url: format!("https://marketplace.example/{brand}"),
            title: format!("{brand} camera"),
            asking_price: Decimal::new(500, 0),
            scraper_job_id: ScrapeJobId::new(),
            brand: brand.to_string(),
            model: "X".to_string(),
            confidence_score: Decimal::new(80, 0),
            estimated_profit: Decimal::new(50, 0),
        })
        .unwrap()
    }

    async fn seed(repo: &InMemoryListingRepository) {
        for (i, brand) in ["Sony", "Canon", "sony", "Nikon", "Sony"].iter().enumerate() {
            let mut l = listing(brand);
            if i % 2 == 0 {
                l.transition_to(ListingState::Messaging, "test").unwrap();
            }
            repo.save(&l).await.unwrap();
        }
    }

    #[tokio::test]
    async fn list_by_state_total_matches_an_independent_count() {
        let repo = InMemoryListingRepository::new();
        seed(&repo).await;

        for state in ListingState::ALL {
            let page = repo
                .list(&ListingQuery::default().with_state(state))
                .await
                .unwrap();
            let independent = repo
                .rows()
                .values()
                .filter(|row| row.state == state)
                .count() as u64;

            assert_eq!(page.total, independent);
            assert!(page.listings.iter().all(|l| l.state() == state));
        }
    }

    #[tokio::test]
    async fn brand_filter_is_case_insensitive_and_pages_newest_first() {
        let repo = InMemoryListingRepository::new();
        seed(&repo).await;

        let page = repo
            .list(&ListingQuery {
                limit: 2,
                ..ListingQuery::default().with_brand("SON")
            })
            .await
            .unwrap();

        assert_eq!(page.total, 3);
        assert_eq!(page.listings.len(), 2);
        assert!(page.listings[0].created_at() >= page.listings[1].created_at());
    }

    #[tokio::test]
    async fn stale_save_is_a_conflict() {
        let repo = InMemoryListingRepository::new();
        let mut original = listing("Sony");
        repo.save(&original).await.unwrap();
        original.mark_saved();

        let mut first = repo.get_by_id(original.listing_id()).await.unwrap().unwrap();
        let mut second = repo.get_by_id(original.listing_id()).await.unwrap().unwrap();
        assert_eq!(first.expected_version(), ExpectedVersion::Exact(0));

        first.transition_to(ListingState::Messaging, "a").unwrap();
        repo.save(&first).await.unwrap();

        second.transition_to(ListingState::Cancelled, "b").unwrap();
        let err = repo.save(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let stored = repo.get_by_id(original.listing_id()).await.unwrap().unwrap();
        assert_eq!(stored.state(), ListingState::Messaging);
    }

    #[tokio::test]
    async fn limit_is_clamped() {
        let repo = InMemoryListingRepository::new();
        seed(&repo).await;

        let page = repo
            .list(&ListingQuery {
                limit: 0,
                ..ListingQuery::default()
            })
            .await
            .unwrap();

        assert_eq!(page.listings.len(), 1);
        assert_eq!(page.total, 5);
    }
}
