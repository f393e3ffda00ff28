//! Postgres-backed listing repository.
//!
//! Works inside a [`PgSession`]; every statement runs in its own savepoint so a
//! failed write leaves the surrounding transaction usable for the next one.
//!
//! ## Optimistic Concurrency
//!
//! `save` is a single upsert guarded by
//! `WHERE product_listings.version = <version the aggregate was loaded at>`.
//! Zero affected rows means another writer got there first.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Connection, Row};
use tracing::{Span, instrument};
use uuid::Uuid;

use aetos_core::{AggregateRoot, ExpectedVersion, ListingId, ScrapeJobId};
use aetos_listings::{
    CostBreakdown, DealDetails, LifecycleTimestamps, ListingSnapshot, ListingState,
    ProductListing, ResaleDetails,
};

use super::r#trait::{ListingPage, ListingQuery, ListingRepository};
use crate::db::{PgSession, StoreError, map_sqlx_error};

const SELECT_COLUMNS: &str = r#"
    id, product_id, marketplace_url, title, asking_price, state,
    created_at, updated_at, state_changed_at,
    found_at, messaged_at, negotiating_at, purchased_at, received_at,
    listed_at, sold_at, cancelled_at,
    scraper_job_id, brand, model, confidence_score, estimated_profit,
    negotiated_price, seller_messenger_id, conversation_thread_id,
    resale_listing_id, resale_asking_price, resale_sold_price,
    purchase_price, shipping_cost, fees, final_profit,
    error_message, error_occurred_at, version
"#;

// `$3::text` is the lowercased brand needle; `strpos` keeps `%`/`_` literal.
const FILTER: &str = r#"
    WHERE ($1::text IS NULL OR state = $1)
      AND ($2::text IS NULL OR strpos(lower(brand), $2) > 0)
"#;

/// Listing repository over a shared Postgres session.
#[derive(Debug, Clone)]
pub struct PostgresListingRepository {
    session: Arc<PgSession>,
}

impl PostgresListingRepository {
    pub fn new(session: Arc<PgSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl ListingRepository for PostgresListingRepository {
    #[instrument(
        skip(self, listing),
        fields(
            listing_id = %listing.listing_id(),
            state = %listing.state(),
            version = listing.version(),
            expected_version = ?listing.expected_version()
        ),
        err
    )]
    async fn save(&self, listing: &ProductListing) -> Result<(), StoreError> {
        let row = ListingRow::from_snapshot(listing.snapshot())?;
        let expected = match listing.expected_version() {
            ExpectedVersion::Exact(v) => Some(to_i64(v)?),
            ExpectedVersion::Any => None,
        };

        let mut guard = self.session.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::SessionClosed)?;
        let mut savepoint = Connection::begin(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("begin_savepoint", e))?;

        let result = sqlx::query(
            r#"
            INSERT INTO product_listings (
                id, product_id, marketplace_url, title, asking_price, state,
                created_at, updated_at, state_changed_at,
                found_at, messaged_at, negotiating_at, purchased_at, received_at,
                listed_at, sold_at, cancelled_at,
                scraper_job_id, brand, model, confidence_score, estimated_profit,
                negotiated_price, seller_messenger_id, conversation_thread_id,
                resale_listing_id, resale_asking_price, resale_sold_price,
                purchase_price, shipping_cost, fees, final_profit,
                error_message, error_occurred_at, version
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28,
                $29, $30, $31, $32, $33, $34, $35
            )
            ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                asking_price = EXCLUDED.asking_price,
                state = EXCLUDED.state,
                updated_at = EXCLUDED.updated_at,
                state_changed_at = EXCLUDED.state_changed_at,
                messaged_at = EXCLUDED.messaged_at,
                negotiating_at = EXCLUDED.negotiating_at,
                purchased_at = EXCLUDED.purchased_at,
                received_at = EXCLUDED.received_at,
                listed_at = EXCLUDED.listed_at,
                sold_at = EXCLUDED.sold_at,
                cancelled_at = EXCLUDED.cancelled_at,
                negotiated_price = EXCLUDED.negotiated_price,
                seller_messenger_id = EXCLUDED.seller_messenger_id,
                conversation_thread_id = EXCLUDED.conversation_thread_id,
                resale_listing_id = EXCLUDED.resale_listing_id,
                resale_asking_price = EXCLUDED.resale_asking_price,
                resale_sold_price = EXCLUDED.resale_sold_price,
                purchase_price = EXCLUDED.purchase_price,
                shipping_cost = EXCLUDED.shipping_cost,
                fees = EXCLUDED.fees,
                final_profit = EXCLUDED.final_profit,
                error_message = EXCLUDED.error_message,
                error_occurred_at = EXCLUDED.error_occurred_at,
                version = EXCLUDED.version
            WHERE $36::bigint IS NULL OR product_listings.version = $36
            "#,
        )
        .bind(row.id)
        .bind(row.product_id)
        .bind(&row.marketplace_url)
        .bind(&row.title)
        .bind(row.asking_price)
        .bind(&row.state)
        .bind(row.created_at)
        .bind(row.updated_at)
        .bind(row.state_changed_at)
        .bind(row.found_at)
        .bind(row.messaged_at)
        .bind(row.negotiating_at)
        .bind(row.purchased_at)
        .bind(row.received_at)
        .bind(row.listed_at)
        .bind(row.sold_at)
        .bind(row.cancelled_at)
        .bind(row.scraper_job_id)
        .bind(&row.brand)
        .bind(&row.model)
        .bind(row.confidence_score)
        .bind(row.estimated_profit)
        .bind(row.negotiated_price)
        .bind(&row.seller_messenger_id)
        .bind(&row.conversation_thread_id)
        .bind(&row.resale_listing_id)
        .bind(row.resale_asking_price)
        .bind(row.resale_sold_price)
        .bind(row.purchase_price)
        .bind(row.shipping_cost)
        .bind(row.fees)
        .bind(row.final_profit)
        .bind(&row.error_message)
        .bind(row.error_occurred_at)
        .bind(row.version)
        .bind(expected)
        .execute(&mut *savepoint)
        .await
        .map_err(|e| map_sqlx_error("upsert_listing", e))?;

        if result.rows_affected() == 0 {
            savepoint
                .rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback_savepoint", e))?;
            return Err(StoreError::Conflict(format!(
                "listing {} changed since it was loaded (expected {:?})",
                listing.listing_id(),
                listing.expected_version()
            )));
        }

        savepoint
            .commit()
            .await
            .map_err(|e| map_sqlx_error("release_savepoint", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(listing_id = %id), err)]
    async fn get_by_id(&self, id: ListingId) -> Result<Option<ProductListing>, StoreError> {
        let mut guard = self.session.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::SessionClosed)?;

        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM product_listings WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("get_listing", e))?;

        row.map(|r| {
            let row = ListingRow::from_pg_row(&r)
                .map_err(|e| map_sqlx_error("decode_listing", e))?;
            Ok(ProductListing::from_snapshot(row.into_snapshot()?))
        })
        .transpose()
    }

    #[instrument(
        skip(self),
        fields(state = ?query.state, brand = ?query.brand, returned = tracing::field::Empty),
        err
    )]
    async fn list(&self, query: &ListingQuery) -> Result<ListingPage, StoreError> {
        let state = query.state.map(|s| s.as_str().to_string());
        let brand = query.brand.as_ref().map(|b| b.to_lowercase());

        let mut guard = self.session.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::SessionClosed)?;

        let total: i64 = sqlx::query(&format!("SELECT COUNT(*) AS total FROM product_listings {FILTER}"))
            .bind(&state)
            .bind(&brand)
            .fetch_one(&mut **tx)
            .await
            .and_then(|row| row.try_get("total"))
            .map_err(|e| map_sqlx_error("count_listings", e))?;

        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM product_listings {FILTER} \
             ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4"
        ))
        .bind(&state)
        .bind(&brand)
        .bind(i64::from(query.effective_limit()))
        .bind(i64::from(query.offset))
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("list_listings", e))?;

        let mut listings = Vec::with_capacity(rows.len());
        for r in &rows {
            let row = ListingRow::from_pg_row(r).map_err(|e| map_sqlx_error("decode_listing", e))?;
            listings.push(ProductListing::from_snapshot(row.into_snapshot()?));
        }

        Span::current().record("returned", listings.len());
        Ok(ListingPage {
            listings,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }
}

fn to_i64(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version)
        .map_err(|_| StoreError::Serialization(format!("version {version} exceeds BIGINT")))
}

// SQLx row type

#[derive(Debug, Clone, PartialEq)]
struct ListingRow {
    id: Uuid,
    product_id: i64,
    marketplace_url: String,
    title: String,
    asking_price: Decimal,
    state: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    state_changed_at: DateTime<Utc>,
    found_at: DateTime<Utc>,
    messaged_at: Option<DateTime<Utc>>,
    negotiating_at: Option<DateTime<Utc>>,
    purchased_at: Option<DateTime<Utc>>,
    received_at: Option<DateTime<Utc>>,
    listed_at: Option<DateTime<Utc>>,
    sold_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    scraper_job_id: Uuid,
    brand: String,
    model: String,
    confidence_score: Decimal,
    estimated_profit: Decimal,
    negotiated_price: Option<Decimal>,
    seller_messenger_id: Option<String>,
    conversation_thread_id: Option<String>,
    resale_listing_id: Option<String>,
    resale_asking_price: Option<Decimal>,
    resale_sold_price: Option<Decimal>,
    purchase_price: Option<Decimal>,
    shipping_cost: Option<Decimal>,
    fees: Option<Decimal>,
    final_profit: Option<Decimal>,
    error_message: Option<String>,
    error_occurred_at: Option<DateTime<Utc>>,
    version: i64,
}

impl ListingRow {
    fn from_pg_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ListingRow {
            id: row.try_get("id")?,
            product_id: row.try_get("product_id")?,
            marketplace_url: row.try_get("marketplace_url")?,
            title: row.try_get("title")?,
            asking_price: row.try_get("asking_price")?,
            state: row.try_get("state")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            state_changed_at: row.try_get("state_changed_at")?,
            found_at: row.try_get("found_at")?,
            messaged_at: row.try_get("messaged_at")?,
            negotiating_at: row.try_get("negotiating_at")?,
            purchased_at: row.try_get("purchased_at")?,
            received_at: row.try_get("received_at")?,
            listed_at: row.try_get("listed_at")?,
            sold_at: row.try_get("sold_at")?,
            cancelled_at: row.try_get("cancelled_at")?,
            scraper_job_id: row.try_get("scraper_job_id")?,
            brand: row.try_get("brand")?,
            model: row.try_get("model")?,
            confidence_score: row.try_get("confidence_score")?,
            estimated_profit: row.try_get("estimated_profit")?,
            negotiated_price: row.try_get("negotiated_price")?,
            seller_messenger_id: row.try_get("seller_messenger_id")?,
            conversation_thread_id: row.try_get("conversation_thread_id")?,
            resale_listing_id: row.try_get("resale_listing_id")?,
            resale_asking_price: row.try_get("resale_asking_price")?,
            resale_sold_price: row.try_get("resale_sold_price")?,
            purchase_price: row.try_get("purchase_price")?,
            shipping_cost: row.try_get("shipping_cost")?,
            fees: row.try_get("fees")?,
            final_profit: row.try_get("final_profit")?,
            error_message: row.try_get("error_message")?,
            error_occurred_at: row.try_get("error_occurred_at")?,
            version: row.try_get("version")?,
        })
    }

    fn from_snapshot(s: &ListingSnapshot) -> Result<Self, StoreError> {
        Ok(ListingRow {
            id: *s.id.as_uuid(),
            product_id: s.product_id,
            marketplace_url: s.marketplace_url.clone(),
            title: s.title.clone(),
            asking_price: s.asking_price,
            state: s.state.as_str().to_string(),
            created_at: s.created_at,
            updated_at: s.updated_at,
            state_changed_at: s.state_changed_at,
            found_at: s.timestamps.found_at,
            messaged_at: s.timestamps.messaged_at,
            negotiating_at: s.timestamps.negotiating_at,
            purchased_at: s.timestamps.purchased_at,
            received_at: s.timestamps.received_at,
            listed_at: s.timestamps.listed_at,
            sold_at: s.timestamps.sold_at,
            cancelled_at: s.timestamps.cancelled_at,
            scraper_job_id: *s.scraper_job_id.as_uuid(),
            brand: s.brand.clone(),
            model: s.model.clone(),
            confidence_score: s.confidence_score,
            estimated_profit: s.estimated_profit,
            negotiated_price: s.deal.negotiated_price,
            seller_messenger_id: s.deal.seller_messenger_id.clone(),
            conversation_thread_id: s.deal.conversation_thread_id.clone(),
            resale_listing_id: s.resale.resale_listing_id.clone(),
            resale_asking_price: s.resale.resale_asking_price,
            resale_sold_price: s.resale.resale_sold_price,
            purchase_price: s.costs.purchase_price,
            shipping_cost: s.costs.shipping_cost,
            fees: s.costs.fees,
            final_profit: s.final_profit,
            error_message: s.error_message.clone(),
            error_occurred_at: s.error_occurred_at,
            version: to_i64(s.version)?,
        })
    }

    fn into_snapshot(self) -> Result<ListingSnapshot, StoreError> {
        let state: ListingState = self.state.parse().map_err(|e| {
            StoreError::Serialization(format!("listing {} has bad state: {e}", self.id))
        })?;
        let version = u64::try_from(self.version).map_err(|_| {
            StoreError::Serialization(format!("listing {} has negative version", self.id))
        })?;

        Ok(ListingSnapshot {
            id: ListingId::from_uuid(self.id),
            product_id: self.product_id,
            marketplace_url: self.marketplace_url,
            title: self.title,
            asking_price: self.asking_price,
            state,
            created_at: self.created_at,
            updated_at: self.updated_at,
            state_changed_at: self.state_changed_at,
            timestamps: LifecycleTimestamps {
                found_at: self.found_at,
                messaged_at: self.messaged_at,
                negotiating_at: self.negotiating_at,
                purchased_at: self.purchased_at,
                received_at: self.received_at,
                listed_at: self.listed_at,
                sold_at: self.sold_at,
                cancelled_at: self.cancelled_at,
            },
            scraper_job_id: ScrapeJobId::from_uuid(self.scraper_job_id),
            brand: self.brand,
            model: self.model,
            confidence_score: self.confidence_score,
            estimated_profit: self.estimated_profit,
            deal: DealDetails {
                negotiated_price: self.negotiated_price,
                seller_messenger_id: self.seller_messenger_id,
                conversation_thread_id: self.conversation_thread_id,
            },
            resale: ResaleDetails {
                resale_listing_id: self.resale_listing_id,
                resale_asking_price: self.resale_asking_price,
                resale_sold_price: self.resale_sold_price,
            },
            costs: CostBreakdown {
                purchase_price: self.purchase_price,
                shipping_cost: self.shipping_cost,
                fees: self.fees,
            },
            final_profit: self.final_profit,
            error_message: self.error_message,
            error_occurred_at: self.error_occurred_at,
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aetos_listings::NewScraperListing;

    fn sold_listing() -> ProductListing {
        let mut listing = ProductListing::create_from_scraper_match(NewScraperListing {
            product_id: 3,
            marketplace_url: "https://marketplace.example/item/3".to_string(),
            title: "Fuji X100V".to_string(),
            asking_price: Decimal::new(90000, 2),
            scraper_job_id: ScrapeJobId::new(),
            brand: "Fujifilm".to_string(),
            model: "X100V".to_string(),
            confidence_score: Decimal::new(875, 1),
            estimated_profit: Decimal::new(300, 0),
        })
        .unwrap();
        for state in [
            ListingState::Messaging,
            ListingState::Negotiating,
            ListingState::Purchased,
            ListingState::Received,
            ListingState::Listed,
            ListingState::Sold,
        ] {
            listing.transition_to(state, "test").unwrap();
        }
        listing.update_costs(CostBreakdown {
            purchase_price: Some(Decimal::new(850, 0)),
            shipping_cost: None,
            fees: Some(Decimal::new(40, 0)),
        });
        listing
    }

    #[test]
    fn row_keeps_every_lifecycle_column_and_version() {
        let listing = sold_listing();
        let row = ListingRow::from_snapshot(listing.snapshot()).unwrap();

        assert_eq!(row.state, "SOLD");
        assert_eq!(row.version, 7);
        assert!(row.sold_at.is_some());
        assert!(row.cancelled_at.is_none());
        assert_eq!(row.fees, Some(Decimal::new(40, 0)));
        assert_eq!(&row.into_snapshot().unwrap(), listing.snapshot());
    }

    #[test]
    fn unknown_state_in_row_is_a_serialization_error() {
        let mut row = ListingRow::from_snapshot(sold_listing().snapshot()).unwrap();
        row.state = "ARCHIVED".to_string();

        assert!(matches!(
            row.into_snapshot(),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn negative_version_in_row_is_rejected() {
        let mut row = ListingRow::from_snapshot(sold_listing().snapshot()).unwrap();
        row.version = -1;

        assert!(matches!(
            row.into_snapshot(),
            Err(StoreError::Serialization(_))
        ));
    }
}
