//! Move a listing through its lifecycle on behalf of an actor.

use serde_json::json;
use tracing::info;

use aetos_core::ListingId;
use aetos_events::EventPublisher;
use aetos_listings::{ListingEvent, ListingState, ProductListing};

use super::UseCaseError;
use crate::history_store::{HistoryMetadata, StateHistoryRepository};
use crate::listing_store::ListingRepository;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    pub listing_id: ListingId,
    pub new_state: ListingState,
    pub triggered_by: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TransitionListing<L, H, P> {
    listings: L,
    history: H,
    publisher: P,
}

impl<L, H, P> TransitionListing<L, H, P>
where
    L: ListingRepository,
    H: StateHistoryRepository,
    P: EventPublisher<ListingEvent>,
{
    pub fn new(listings: L, history: H, publisher: P) -> Self {
        Self {
            listings,
            history,
            publisher,
        }
    }

    /// Returns the listing as saved.
    ///
    /// Events are published only after the listing and its history row are
    /// stored; publishing itself never fails the call.
    pub async fn execute(&self, request: TransitionRequest) -> Result<ProductListing, UseCaseError> {
        let mut listing = self
            .listings
            .get_by_id(request.listing_id)
            .await?
            .ok_or(UseCaseError::NotFound(request.listing_id))?;

        let from_state = listing.state();
        listing.transition_to(request.new_state, request.triggered_by.clone())?;

        self.listings.save(&listing).await?;
        listing.mark_saved();

        let mut metadata = HistoryMetadata::new();
        if let Some(reason) = &request.reason {
            metadata.insert("reason".to_string(), json!(reason));
        }
        self.history
            .save(
                request.listing_id,
                Some(from_state),
                request.new_state,
                &request.triggered_by,
                metadata,
            )
            .await?;

        self.publisher.publish_many(listing.collect_events()).await;

        info!(
            listing_id = %request.listing_id,
            from_state = %from_state,
            to_state = %request.new_state,
            triggered_by = %request.triggered_by,
            "listing transitioned"
        );
        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use aetos_core::ScrapeJobId;
    use aetos_events::InMemoryEventPublisher;
    use aetos_listings::NewScraperListing;
    use rust_decimal::Decimal;

    use crate::history_store::InMemoryStateHistoryRepository;
    use crate::listing_store::InMemoryListingRepository;

    struct Fixture {
        listings: Arc<InMemoryListingRepository>,
        history: Arc<InMemoryStateHistoryRepository>,
        publisher: Arc<InMemoryEventPublisher<ListingEvent>>,
        use_case: TransitionListing<
            Arc<InMemoryListingRepository>,
            Arc<InMemoryStateHistoryRepository>,
            Arc<InMemoryEventPublisher<ListingEvent>>,
        >,
    }

    fn fixture() -> Fixture {
        let listings = Arc::new(InMemoryListingRepository::new());
        let history = Arc::new(InMemoryStateHistoryRepository::new());
        let publisher = Arc::new(InMemoryEventPublisher::new());
        Fixture {
            use_case: TransitionListing::new(listings.clone(), history.clone(), publisher.clone()),
            listings,
            history,
            publisher,
        }
    }

    async fn stored_listing(repo: &InMemoryListingRepository) -> ListingId {
        let listing = ProductListing::create_from_scraper_match(NewScraperListing {
            product_id: 1,
            marketplace_url: "https://m/1".to_string(),
            title: "Leica Q2".to_string(),
            asking_price: Decimal::new(3200, 0),
            scraper_job_id: ScrapeJobId::new(),
            brand: "Leica".to_string(),
            model: "Q2".to_string(),
            confidence_score: Decimal::new(95, 0),
            estimated_profit: Decimal::new(400, 0),
        })
        .unwrap();
        repo.save(&listing).await.unwrap();
        listing.listing_id()
    }

    fn request(listing_id: ListingId, new_state: ListingState) -> TransitionRequest {
        TransitionRequest {
            listing_id,
            new_state,
            triggered_by: "admin_api".to_string(),
            reason: Some("seller replied".to_string()),
        }
    }

    #[tokio::test]
    async fn allowed_transition_saves_records_and_publishes() {
        let f = fixture();
        let id = stored_listing(&f.listings).await;

        let listing = f
            .use_case
            .execute(request(id, ListingState::Messaging))
            .await
            .unwrap();

        assert_eq!(listing.state(), ListingState::Messaging);
        let stored = f.listings.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.state(), ListingState::Messaging);
        assert!(stored.timestamps().messaged_at.is_some());

        let history = f.history.get_history_for_listing(id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from_state, Some(ListingState::Found));
        assert_eq!(history[0].metadata["reason"], "seller replied");

        let published = f.publisher.published();
        assert_eq!(published.len(), 1);
        assert!(matches!(
            &published[0],
            ListingEvent::ListingStateChanged(e) if e.to_state == ListingState::Messaging
        ));
    }

    #[tokio::test]
    async fn unknown_listing_is_not_found() {
        let f = fixture();

        let err = f
            .use_case
            .execute(request(ListingId::new(), ListingState::Messaging))
            .await
            .unwrap_err();

        assert!(matches!(err, UseCaseError::NotFound(_)));
    }

    #[tokio::test]
    async fn disallowed_transition_is_validation_and_changes_nothing() {
        let f = fixture();
        let id = stored_listing(&f.listings).await;

        let err = f
            .use_case
            .execute(request(id, ListingState::Sold))
            .await
            .unwrap_err();

        match err {
            UseCaseError::Validation(e) => {
                assert_eq!(e.from, ListingState::Found);
                assert_eq!(e.to, ListingState::Sold);
                assert_eq!(e.allowed, vec![ListingState::Messaging, ListingState::Cancelled]);
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
        assert_eq!(
            f.listings.get_by_id(id).await.unwrap().unwrap().state(),
            ListingState::Found
        );
        assert!(f.history.all().is_empty());
        assert!(f.publisher.published().is_empty());
    }

    #[tokio::test]
    async fn losing_a_concurrent_transition_is_a_conflict() {
        let f = fixture();
        let id = stored_listing(&f.listings).await;

        // Someone else moves the listing after we would have loaded it.
        let mut racer = f.listings.get_by_id(id).await.unwrap().unwrap();
        let mut ours = f.listings.get_by_id(id).await.unwrap().unwrap();
        racer.transition_to(ListingState::Messaging, "chatterbot").unwrap();
        f.listings.save(&racer).await.unwrap();

        ours.transition_to(ListingState::Cancelled, "admin_api").unwrap();
        let err = f.listings.save(&ours).await.unwrap_err();
        assert!(matches!(UseCaseError::from(err), UseCaseError::Conflict(_)));

        // A fresh request sees the racer's state and proceeds from there.
        let listing = f
            .use_case
            .execute(request(id, ListingState::Negotiating))
            .await
            .unwrap();
        assert_eq!(listing.state(), ListingState::Negotiating);
    }
}
