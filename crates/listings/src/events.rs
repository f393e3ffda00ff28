use std::borrow::Cow;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use aetos_core::{ListingId, ScrapeJobId};
use aetos_events::Event;

use crate::state::ListingState;

/// Event: ListingCreated.
///
/// Emitted once per listing, when the scraper match is first turned into an
/// aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingCreated {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub listing_id: ListingId,
    pub product_id: i64,
    pub scraper_job_id: ScrapeJobId,
    pub brand: String,
    pub model: String,
    pub marketplace_url: String,
    pub asking_price: Decimal,
    pub confidence_score: Decimal,
    pub estimated_profit: Decimal,
}

/// Event: ListingStateChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingStateChanged {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub listing_id: ListingId,
    pub from_state: ListingState,
    pub to_state: ListingState,
    pub triggered_by: String,
}

/// Event: ScraperJobCreated.
///
/// Emitted by the trigger flow rather than by a listing; it lives here so the
/// whole orchestrator shares one event vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScraperJobCreated {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub job_id: ScrapeJobId,
    pub brand: String,
    pub search: String,
}

impl ScraperJobCreated {
    pub fn new(job_id: ScrapeJobId, brand: impl Into<String>, search: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            occurred_at: Utc::now(),
            job_id,
            brand: brand.into(),
            search: search.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ListingEvent {
    ListingCreated(ListingCreated),
    ListingStateChanged(ListingStateChanged),
    ScraperJobCreated(ScraperJobCreated),
}

impl Event for ListingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ListingEvent::ListingCreated(_) => "listing.created",
            ListingEvent::ListingStateChanged(_) => "listing.state_changed",
            ListingEvent::ScraperJobCreated(_) => "scraper.job.created",
        }
    }

    fn routing_key(&self) -> Cow<'static, str> {
        match self {
            ListingEvent::ListingStateChanged(e) => {
                Cow::Owned(format!("listing.state.{}", e.to_state.as_str().to_ascii_lowercase()))
            }
            other => Cow::Borrowed(other.event_type()),
        }
    }

    fn event_id(&self) -> Uuid {
        match self {
            ListingEvent::ListingCreated(e) => e.event_id,
            ListingEvent::ListingStateChanged(e) => e.event_id,
            ListingEvent::ScraperJobCreated(e) => e.event_id,
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ListingEvent::ListingCreated(e) => e.occurred_at,
            ListingEvent::ListingStateChanged(e) => e.occurred_at,
            ListingEvent::ScraperJobCreated(e) => e.occurred_at,
        }
    }
}
