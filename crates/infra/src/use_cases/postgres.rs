//! Use cases bound to Postgres, one session per call.
//!
//! Each call begins a transaction, builds repositories over it, runs the use
//! case, then commits on success or rolls back on failure. Events the use case
//! emits are staged and only published once the transaction has committed.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use aetos_core::ListingId;
use aetos_events::{BufferedEventPublisher, EventPublisher};
use aetos_listings::{ListingEvent, ProductListing};

use super::{
    GetListingHistory, IngestOutcome, IngestScraperMatches, MatchBatch, MatchIngestor,
    TransitionListing, TransitionRequest, UseCaseError,
};
use crate::db::PgSession;
use crate::history_store::{PostgresStateHistoryRepository, StateHistoryRecord};
use crate::listing_store::{ListingPage, ListingQuery, ListingRepository, PostgresListingRepository};

pub struct PgListingService<P: ?Sized> {
    pool: PgPool,
    publisher: Arc<P>,
}

impl<P: ?Sized> Clone for PgListingService<P> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            publisher: self.publisher.clone(),
        }
    }
}

impl<P> PgListingService<P>
where
    P: EventPublisher<ListingEvent> + ?Sized,
{
    pub fn new(pool: PgPool, publisher: Arc<P>) -> Self {
        Self { pool, publisher }
    }

    async fn open(
        &self,
    ) -> Result<
        (
            Arc<PgSession>,
            PostgresListingRepository,
            PostgresStateHistoryRepository,
        ),
        UseCaseError,
    > {
        let session = Arc::new(PgSession::begin(&self.pool).await?);
        let listings = PostgresListingRepository::new(session.clone());
        let history = PostgresStateHistoryRepository::new(session.clone());
        Ok((session, listings, history))
    }

    pub async fn ingest(&self, batch: MatchBatch) -> Result<IngestOutcome, UseCaseError> {
        let (session, listings, history) = self.open().await?;
        let staged = Arc::new(BufferedEventPublisher::new());
        let outcome = IngestScraperMatches::new(listings, history, staged.clone())
            .execute(batch)
            .await;
        let committed = session.finish(Ok(outcome)).await;
        publish_if_committed(committed, &staged, &*self.publisher).await
    }

    pub async fn transition(&self, request: TransitionRequest) -> Result<ProductListing, UseCaseError> {
        let (session, listings, history) = self.open().await?;
        let staged = Arc::new(BufferedEventPublisher::new());
        let result = TransitionListing::new(listings, history, staged.clone())
            .execute(request)
            .await;
        let committed = session.finish(result).await;
        publish_if_committed(committed, &staged, &*self.publisher).await
    }

    pub async fn history(&self, listing_id: ListingId) -> Result<Vec<StateHistoryRecord>, UseCaseError> {
        let (session, listings, history) = self.open().await?;
        let result = GetListingHistory::new(listings, history).execute(listing_id).await;
        session.finish(result).await
    }

    pub async fn list(&self, query: ListingQuery) -> Result<ListingPage, UseCaseError> {
        let (session, listings, _) = self.open().await?;
        let result = listings.list(&query).await.map_err(UseCaseError::from);
        session.finish(result).await
    }
}

/// Forward staged events only when the unit of work committed; otherwise
/// they describe rows that no longer exist and are dropped.
async fn publish_if_committed<T, P>(
    committed: Result<T, UseCaseError>,
    staged: &BufferedEventPublisher<ListingEvent>,
    publisher: &P,
) -> Result<T, UseCaseError>
where
    P: EventPublisher<ListingEvent> + ?Sized,
{
    let events = staged.take();
    match committed {
        Ok(value) => {
            publisher.publish_many(events).await;
            Ok(value)
        }
        Err(e) => {
            debug!(dropped = events.len(), error = %e, "unit of work not committed; events dropped");
            Err(e)
        }
    }
}

#[async_trait]
impl<P> MatchIngestor for PgListingService<P>
where
    P: EventPublisher<ListingEvent> + ?Sized,
{
    async fn ingest(&self, batch: MatchBatch) -> Result<IngestOutcome, UseCaseError> {
        PgListingService::ingest(self, batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aetos_events::InMemoryEventPublisher;
    use aetos_core::ScrapeJobId;
    use aetos_listings::ScraperJobCreated;

    use crate::db::StoreError;

    async fn staged_change(staged: &BufferedEventPublisher<ListingEvent>) -> ListingEvent {
        let event = ListingEvent::ScraperJobCreated(ScraperJobCreated::new(
            ScrapeJobId::new(),
            "rolex",
            "submariner",
        ));
        staged.publish(event.clone()).await;
        event
    }

    #[tokio::test]
    async fn committed_work_publishes_its_events() {
        let staged = BufferedEventPublisher::new();
        let sink = InMemoryEventPublisher::new();
        let event = staged_change(&staged).await;

        let result = publish_if_committed(Ok(7), &staged, &sink).await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(sink.published(), vec![event]);
    }

    #[tokio::test]
    async fn failed_commit_publishes_nothing() {
        let staged = BufferedEventPublisher::new();
        let sink = InMemoryEventPublisher::new();
        staged_change(&staged).await;

        let result: Result<(), _> = publish_if_committed(
            Err(UseCaseError::Store(StoreError::Database("commit failed".to_string()))),
            &staged,
            &sink,
        )
        .await;

        assert!(matches!(result, Err(UseCaseError::Store(_))));
        assert!(sink.published().is_empty());
        assert!(staged.take().is_empty());
    }
}
