use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use aetos_core::{AggregateRoot, DomainError, ExpectedVersion, ListingId, ScrapeJobId};

use crate::events::{ListingCreated, ListingEvent, ListingStateChanged};
use crate::state::ListingState;
use crate::state_machine::{InvalidStateTransition, LifecycleStateMachine};

/// Input for [`ProductListing::create_from_scraper_match`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewScraperListing {
    pub product_id: i64,
    pub marketplace_url: String,
    pub title: String,
    pub asking_price: Decimal,
    pub scraper_job_id: ScrapeJobId,
    pub brand: String,
    pub model: String,
    pub confidence_score: Decimal,
    pub estimated_profit: Decimal,
}

/// First-entry time of each lifecycle state.
///
/// A timestamp is written once, when its state is first entered, and never
/// cleared or overwritten afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleTimestamps {
    pub found_at: DateTime<Utc>,
    pub messaged_at: Option<DateTime<Utc>>,
    pub negotiating_at: Option<DateTime<Utc>>,
    pub purchased_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub listed_at: Option<DateTime<Utc>>,
    pub sold_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl LifecycleTimestamps {
    fn starting_at(found_at: DateTime<Utc>) -> Self {
        Self {
            found_at,
            messaged_at: None,
            negotiating_at: None,
            purchased_at: None,
            received_at: None,
            listed_at: None,
            sold_at: None,
            cancelled_at: None,
        }
    }

    /// When `state` was first entered, if it ever was.
    pub fn entered_at(&self, state: ListingState) -> Option<DateTime<Utc>> {
        match state {
            ListingState::Found => Some(self.found_at),
            ListingState::Messaging => self.messaged_at,
            ListingState::Negotiating => self.negotiating_at,
            ListingState::Purchased => self.purchased_at,
            ListingState::Received => self.received_at,
            ListingState::Listed => self.listed_at,
            ListingState::Sold => self.sold_at,
            ListingState::Cancelled => self.cancelled_at,
        }
    }

    fn slot_mut(&mut self, state: ListingState) -> Option<&mut Option<DateTime<Utc>>> {
        match state {
            ListingState::Found => None,
            ListingState::Messaging => Some(&mut self.messaged_at),
            ListingState::Negotiating => Some(&mut self.negotiating_at),
            ListingState::Purchased => Some(&mut self.purchased_at),
            ListingState::Received => Some(&mut self.received_at),
            ListingState::Listed => Some(&mut self.listed_at),
            ListingState::Sold => Some(&mut self.sold_at),
            ListingState::Cancelled => Some(&mut self.cancelled_at),
        }
    }

    /// Record first entry into `state`. Existing values are left untouched.
    fn stamp(&mut self, state: ListingState, at: DateTime<Utc>) {
        if let Some(slot) = self.slot_mut(state) {
            if slot.is_none() {
                *slot = Some(at);
            }
        }
    }
}

/// Deal details gathered while messaging/negotiating with the seller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealDetails {
    pub negotiated_price: Option<Decimal>,
    pub seller_messenger_id: Option<String>,
    pub conversation_thread_id: Option<String>,
}

/// Resale listing details, populated once the item is listed/sold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResaleDetails {
    pub resale_listing_id: Option<String>,
    pub resale_asking_price: Option<Decimal>,
    pub resale_sold_price: Option<Decimal>,
}

/// Costs incurred on the way to a sale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub purchase_price: Option<Decimal>,
    pub shipping_cost: Option<Decimal>,
    pub fees: Option<Decimal>,
}

/// Persisted shape of a listing.
///
/// Repositories store and load this; the aggregate is rebuilt from it with no
/// pending events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingSnapshot {
    pub id: ListingId,
    pub product_id: i64,
    pub marketplace_url: String,
    pub title: String,
    pub asking_price: Decimal,
    pub state: ListingState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state_changed_at: DateTime<Utc>,
    pub timestamps: LifecycleTimestamps,
    pub scraper_job_id: ScrapeJobId,
    pub brand: String,
    pub model: String,
    pub confidence_score: Decimal,
    pub estimated_profit: Decimal,
    pub deal: DealDetails,
    pub resale: ResaleDetails,
    pub costs: CostBreakdown,
    pub final_profit: Option<Decimal>,
    pub error_message: Option<String>,
    pub error_occurred_at: Option<DateTime<Utc>>,
    pub version: u64,
}

/// Aggregate root: ProductListing.
///
/// Mutated only through `transition_to`, `record_error` and the detail
/// updates. Events are buffered until `collect_events` drains them; the buffer
/// belongs to this instance alone, so a transition-and-drain sequence needs
/// exclusive (`&mut`) access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductListing {
    snapshot: ListingSnapshot,
    loaded_version: u64,
    pending_events: Vec<ListingEvent>,
}

impl ProductListing {
    /// Create a listing in `FOUND` from a scraper match.
    ///
    /// Buffers exactly one `ListingCreated` event.
    pub fn create_from_scraper_match(input: NewScraperListing) -> Result<Self, DomainError> {
        if input.marketplace_url.trim().is_empty() {
            return Err(DomainError::invalid("marketplace_url", "must not be empty"));
        }
        if input.asking_price.is_sign_negative() {
            return Err(DomainError::invalid("asking_price", "must not be negative"));
        }
        if input.confidence_score < Decimal::ZERO || input.confidence_score > Decimal::ONE_HUNDRED {
            return Err(DomainError::invalid(
                "confidence_score",
                format!("must be within 0..=100, got {}", input.confidence_score),
            ));
        }

        let id = ListingId::new();
        let now = Utc::now();

        let created = ListingCreated {
            event_id: Uuid::now_v7(),
            occurred_at: now,
            listing_id: id,
            product_id: input.product_id,
            scraper_job_id: input.scraper_job_id,
            brand: input.brand.clone(),
            model: input.model.clone(),
            marketplace_url: input.marketplace_url.clone(),
            asking_price: input.asking_price,
            confidence_score: input.confidence_score,
            estimated_profit: input.estimated_profit,
        };

        let snapshot = ListingSnapshot {
            id,
            product_id: input.product_id,
            marketplace_url: input.marketplace_url,
            title: input.title,
            asking_price: input.asking_price,
            state: ListingState::Found,
            created_at: now,
            updated_at: now,
            state_changed_at: now,
            timestamps: LifecycleTimestamps::starting_at(now),
            scraper_job_id: input.scraper_job_id,
            brand: input.brand,
            model: input.model,
            confidence_score: input.confidence_score,
            estimated_profit: input.estimated_profit,
            deal: DealDetails::default(),
            resale: ResaleDetails::default(),
            costs: CostBreakdown::default(),
            final_profit: None,
            error_message: None,
            error_occurred_at: None,
            version: 0,
        };

        Ok(Self {
            snapshot,
            loaded_version: 0,
            pending_events: vec![ListingEvent::ListingCreated(created)],
        })
    }

    /// Rebuild a listing from its persisted shape.
    pub fn from_snapshot(snapshot: ListingSnapshot) -> Self {
        Self {
            loaded_version: snapshot.version,
            snapshot,
            pending_events: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> &ListingSnapshot {
        &self.snapshot
    }

    /// Move to `new_state`, validated against the lifecycle.
    ///
    /// On rejection nothing changes: state, timestamps, version and the event
    /// buffer are exactly as before.
    pub fn transition_to(
        &mut self,
        new_state: ListingState,
        triggered_by: impl Into<String>,
    ) -> Result<(), InvalidStateTransition> {
        let old_state = self.snapshot.state;
        LifecycleStateMachine::new().validate_transition(old_state, new_state)?;

        let now = Utc::now();
        self.snapshot.state = new_state;
        self.snapshot.state_changed_at = now;
        self.snapshot.updated_at = now;
        self.snapshot.timestamps.stamp(new_state, now);
        self.snapshot.version += 1;

        self.pending_events
            .push(ListingEvent::ListingStateChanged(ListingStateChanged {
                event_id: Uuid::now_v7(),
                occurred_at: now,
                listing_id: self.snapshot.id,
                from_state: old_state,
                to_state: new_state,
                triggered_by: triggered_by.into(),
            }));

        Ok(())
    }

    /// Record a processing error. Never changes state and never emits events.
    pub fn record_error(&mut self, message: impl Into<String>) {
        let now = Utc::now();
        self.snapshot.error_message = Some(message.into());
        self.snapshot.error_occurred_at = Some(now);
        self.snapshot.updated_at = now;
        self.snapshot.version += 1;
    }

    pub fn update_deal(&mut self, deal: DealDetails) {
        self.snapshot.deal = deal;
        self.touch();
    }

    pub fn update_resale(&mut self, resale: ResaleDetails) {
        self.snapshot.resale = resale;
        self.recompute_final_profit();
        self.touch();
    }

    pub fn update_costs(&mut self, costs: CostBreakdown) {
        self.snapshot.costs = costs;
        self.recompute_final_profit();
        self.touch();
    }

    /// Drain the buffered events. A second call returns nothing.
    pub fn collect_events(&mut self) -> Vec<ListingEvent> {
        std::mem::take(&mut self.pending_events)
    }

    pub fn pending_events(&self) -> &[ListingEvent] {
        &self.pending_events
    }

    /// Version the stored row must still have for a save to succeed.
    pub fn expected_version(&self) -> ExpectedVersion {
        ExpectedVersion::Exact(self.loaded_version)
    }

    /// Acknowledge a successful save: later saves expect the current version.
    pub fn mark_saved(&mut self) {
        self.loaded_version = self.snapshot.version;
    }

    pub fn listing_id(&self) -> ListingId {
        self.snapshot.id
    }

    pub fn state(&self) -> ListingState {
        self.snapshot.state
    }

    pub fn product_id(&self) -> i64 {
        self.snapshot.product_id
    }

    pub fn marketplace_url(&self) -> &str {
        &self.snapshot.marketplace_url
    }

    pub fn title(&self) -> &str {
        &self.snapshot.title
    }

    pub fn asking_price(&self) -> Decimal {
        self.snapshot.asking_price
    }

    pub fn brand(&self) -> &str {
        &self.snapshot.brand
    }

    pub fn model(&self) -> &str {
        &self.snapshot.model
    }

    pub fn scraper_job_id(&self) -> ScrapeJobId {
        self.snapshot.scraper_job_id
    }

    pub fn confidence_score(&self) -> Decimal {
        self.snapshot.confidence_score
    }

    pub fn estimated_profit(&self) -> Decimal {
        self.snapshot.estimated_profit
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.snapshot.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.snapshot.updated_at
    }

    pub fn state_changed_at(&self) -> DateTime<Utc> {
        self.snapshot.state_changed_at
    }

    pub fn timestamps(&self) -> &LifecycleTimestamps {
        &self.snapshot.timestamps
    }

    pub fn deal(&self) -> &DealDetails {
        &self.snapshot.deal
    }

    pub fn resale(&self) -> &ResaleDetails {
        &self.snapshot.resale
    }

    pub fn costs(&self) -> &CostBreakdown {
        &self.snapshot.costs
    }

    pub fn final_profit(&self) -> Option<Decimal> {
        self.snapshot.final_profit
    }

    pub fn error_message(&self) -> Option<&str> {
        self.snapshot.error_message.as_deref()
    }

    pub fn error_occurred_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot.error_occurred_at
    }

    fn touch(&mut self) {
        self.snapshot.updated_at = Utc::now();
        self.snapshot.version += 1;
    }

    // final = sold - purchase - shipping - fees; unknown until both ends are known.
    fn recompute_final_profit(&mut self) {
        let sold = self.snapshot.resale.resale_sold_price;
        let costs = &self.snapshot.costs;
        self.snapshot.final_profit = match (sold, costs.purchase_price) {
            (Some(sold), Some(purchase)) => Some(
                sold - purchase
                    - costs.shipping_cost.unwrap_or(Decimal::ZERO)
                    - costs.fees.unwrap_or(Decimal::ZERO),
            ),
            _ => None,
        };
    }
}

impl AggregateRoot for ProductListing {
    type Id = ListingId;

    fn id(&self) -> &Self::Id {
        &self.snapshot.id
    }

    fn version(&self) -> u64 {
        self.snapshot.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn new_listing() -> ProductListing {
        ProductListing::create_from_scraper_match(NewScraperListing {
            product_id: 42,
            marketplace_url: "https://marketplace.example/item/1".to_string(),
            title: "Sony A7 III body".to_string(),
            asking_price: Decimal::new(85000, 2),
            scraper_job_id: ScrapeJobId::new(),
            brand: "Sony".to_string(),
            model: "A7 III".to_string(),
            confidence_score: Decimal::new(92, 0),
            estimated_profit: Decimal::new(21050, 2),
        })
        .unwrap()
    }

    fn stamped(listing: &ProductListing) -> Vec<ListingState> {
        ListingState::ALL
            .into_iter()
            .filter(|s| *s != ListingState::Found)
            .filter(|s| listing.timestamps().entered_at(*s).is_some())
            .collect()
    }

    #[test]
    fn create_starts_found_and_buffers_one_created_event() {
        let listing = new_listing();

        assert_eq!(listing.state(), ListingState::Found);
        assert!(stamped(&listing).is_empty());
        assert_eq!(listing.pending_events().len(), 1);

        match &listing.pending_events()[0] {
            ListingEvent::ListingCreated(e) => {
                assert_eq!(e.listing_id, listing.listing_id());
                assert_eq!(e.product_id, 42);
                assert_eq!(e.brand, "Sony");
                assert_eq!(e.asking_price, Decimal::new(85000, 2));
            }
            other => panic!("expected ListingCreated, got {other:?}"),
        }
    }

    #[test]
    fn create_rejects_out_of_range_confidence() {
        let err = ProductListing::create_from_scraper_match(NewScraperListing {
            product_id: 1,
            marketplace_url: "https://marketplace.example/item/2".to_string(),
            title: "Lens".to_string(),
            asking_price: Decimal::new(100, 0),
            scraper_job_id: ScrapeJobId::new(),
            brand: "Canon".to_string(),
            model: "RF 50".to_string(),
            confidence_score: Decimal::new(101, 0),
            estimated_profit: Decimal::ZERO,
        })
        .unwrap_err();

        assert!(matches!(
            err,
            DomainError::Validation { field: "confidence_score", .. }
        ));
    }

    #[test]
    fn transition_sets_exactly_one_timestamp_and_one_event() {
        let mut listing = new_listing();
        listing.collect_events();

        listing.transition_to(ListingState::Messaging, "chatterbot").unwrap();

        assert_eq!(listing.state(), ListingState::Messaging);
        assert_eq!(stamped(&listing), vec![ListingState::Messaging]);
        assert_eq!(listing.state_changed_at(), listing.timestamps().messaged_at.unwrap());
        assert_eq!(listing.version(), 1);

        let events = listing.collect_events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ListingEvent::ListingStateChanged(e) => {
                assert_eq!(e.from_state, ListingState::Found);
                assert_eq!(e.to_state, ListingState::Messaging);
                assert_eq!(e.triggered_by, "chatterbot");
            }
            other => panic!("expected ListingStateChanged, got {other:?}"),
        }
    }

    #[test]
    fn rejected_transition_leaves_aggregate_untouched() {
        let mut listing = new_listing();
        let before = listing.clone();

        let err = listing
            .transition_to(ListingState::Purchased, "admin_api")
            .unwrap_err();

        assert_eq!(err.from, ListingState::Found);
        assert_eq!(err.to, ListingState::Purchased);
        assert_eq!(listing, before);
    }

    #[test]
    fn collect_events_drains_the_buffer() {
        let mut listing = new_listing();

        assert_eq!(listing.collect_events().len(), 1);
        assert!(listing.collect_events().is_empty());
    }

    #[test]
    fn happy_path_to_sold_stamps_every_step_and_then_locks() {
        let mut listing = new_listing();
        let path = [
            ListingState::Messaging,
            ListingState::Negotiating,
            ListingState::Purchased,
            ListingState::Received,
            ListingState::Listed,
            ListingState::Sold,
        ];

        for state in path {
            listing.transition_to(state, "test").unwrap();
        }

        assert_eq!(listing.state(), ListingState::Sold);
        assert_eq!(stamped(&listing), path.to_vec());
        assert!(listing.timestamps().cancelled_at.is_none());
        assert_eq!(listing.collect_events().len(), 1 + path.len());

        for next in ListingState::ALL {
            assert!(listing.transition_to(next, "test").is_err());
        }
    }

    #[test]
    fn cancelling_mid_negotiation_is_terminal() {
        let mut listing = new_listing();
        listing.transition_to(ListingState::Messaging, "test").unwrap();
        listing.transition_to(ListingState::Negotiating, "test").unwrap();
        listing.transition_to(ListingState::Cancelled, "seller_declined").unwrap();

        assert!(listing.timestamps().cancelled_at.is_some());
        assert!(listing.timestamps().purchased_at.is_none());
        assert!(listing.transition_to(ListingState::Purchased, "test").is_err());
    }

    #[test]
    fn record_error_keeps_state_and_events() {
        let mut listing = new_listing();
        let pending_before = listing.pending_events().to_vec();

        listing.record_error("seller unreachable");

        assert_eq!(listing.state(), ListingState::Found);
        assert_eq!(listing.error_message(), Some("seller unreachable"));
        assert!(listing.error_occurred_at().is_some());
        assert_eq!(listing.pending_events(), pending_before.as_slice());
    }

    #[test]
    fn final_profit_needs_sale_and_purchase_price() {
        let mut listing = new_listing();

        listing.update_costs(CostBreakdown {
            purchase_price: Some(Decimal::new(800, 0)),
            shipping_cost: Some(Decimal::new(15, 0)),
            fees: None,
        });
        assert_eq!(listing.final_profit(), None);

        listing.update_resale(ResaleDetails {
            resale_listing_id: Some("ebay-123".to_string()),
            resale_asking_price: Some(Decimal::new(1100, 0)),
            resale_sold_price: Some(Decimal::new(1050, 0)),
        });
        assert_eq!(listing.final_profit(), Some(Decimal::new(235, 0)));
    }

    #[test]
    fn rehydrated_listing_expects_its_stored_version() {
        let mut listing = new_listing();
        listing.transition_to(ListingState::Messaging, "test").unwrap();
        listing.transition_to(ListingState::Negotiating, "test").unwrap();

        let loaded = ProductListing::from_snapshot(listing.snapshot().clone());

        assert_eq!(loaded.version(), 2);
        assert_eq!(loaded.expected_version(), ExpectedVersion::Exact(2));
        assert!(loaded.pending_events().is_empty());
        assert_eq!(loaded.timestamps(), listing.timestamps());
    }

    #[test]
    fn mark_saved_moves_the_expected_version_forward() {
        let mut listing = new_listing();
        listing.transition_to(ListingState::Messaging, "test").unwrap();
        assert_eq!(listing.expected_version(), ExpectedVersion::Exact(0));

        listing.mark_saved();

        assert_eq!(listing.expected_version(), ExpectedVersion::Exact(1));
    }
}
