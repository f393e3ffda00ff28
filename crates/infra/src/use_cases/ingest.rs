//! Turn a completed scrape job's matches into `FOUND` listings.

use async_trait::async_trait;
use serde_json::json;
use tracing::{error, info};

use aetos_core::{ListingId, ScrapeJobId};
use aetos_events::EventPublisher;
use aetos_listings::{ListingEvent, ListingState, NewScraperListing, ProductListing};

use super::{MatchIngestor, UseCaseError};
use crate::external::ScrapeMatch;
use crate::history_store::{HistoryMetadata, StateHistoryRepository};
use crate::listing_store::ListingRepository;

/// Matches from one job.
#[derive(Debug, Clone)]
pub struct MatchBatch {
    pub job_id: ScrapeJobId,
    pub brand: String,
    pub matches: Vec<ScrapeMatch>,
    /// Recorded as `triggered_by` on each creation history row.
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub created: Vec<ListingId>,
    pub skipped: usize,
}

/// Creates one listing per match; a failing match is skipped, never fatal.
#[derive(Debug, Clone)]
pub struct IngestScraperMatches<L, H, P> {
    listings: L,
    history: H,
    publisher: P,
}

impl<L, H, P> IngestScraperMatches<L, H, P>
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

    pub async fn execute(&self, batch: MatchBatch) -> IngestOutcome {
        let mut outcome = IngestOutcome::default();

        for m in &batch.matches {
            match self.ingest_one(&batch, m).await {
                Ok(listing_id) => {
                    info!(
                        %listing_id,
                        product_id = m.product_id,
                        brand = %m.brand,
                        model = %m.model,
                        "listing created"
                    );
                    outcome.created.push(listing_id);
                }
                Err(e) => {
                    error!(
                        job_id = %batch.job_id,
                        url = %m.url,
                        product_id = m.product_id,
                        error = %e,
                        "failed to create listing; skipping match"
                    );
                    outcome.skipped += 1;
                }
            }
        }

        info!(
            job_id = %batch.job_id,
            created = outcome.created.len(),
            skipped = outcome.skipped,
            "scrape matches ingested"
        );
        outcome
    }

    async fn ingest_one(&self, batch: &MatchBatch, m: &ScrapeMatch) -> Result<ListingId, UseCaseError> {
        let mut listing = ProductListing::create_from_scraper_match(NewScraperListing {
            product_id: m.product_id,
            marketplace_url: m.url.clone(),
            title: m.title.clone(),
            asking_price: m.price,
            scraper_job_id: batch.job_id,
            brand: m.brand.clone(),
            model: m.model.clone(),
            confidence_score: m.confidence,
            estimated_profit: m.potential_profit,
        })?;

        self.listings.save(&listing).await?;
        listing.mark_saved();

        let mut metadata = HistoryMetadata::new();
        metadata.insert("job_id".to_string(), json!(batch.job_id.to_string()));
        metadata.insert("brand".to_string(), json!(batch.brand));
        self.history
            .save(listing.listing_id(), None, ListingState::Found, &batch.source, metadata)
            .await?;

        self.publisher.publish_many(listing.collect_events()).await;
        Ok(listing.listing_id())
    }
}

#[async_trait]
impl<L, H, P> MatchIngestor for IngestScraperMatches<L, H, P>
where
    L: ListingRepository,
    H: StateHistoryRepository,
    P: EventPublisher<ListingEvent>,
{
    async fn ingest(&self, batch: MatchBatch) -> Result<IngestOutcome, UseCaseError> {
        Ok(self.execute(batch).await)
    }
}
