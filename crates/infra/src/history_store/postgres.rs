//! Postgres-backed state history repository (`product_state_history`).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use aetos_core::{HistoryRecordId, ListingId};
use aetos_listings::ListingState;

use super::r#trait::{HistoryMetadata, StateHistoryRecord, StateHistoryRepository};
use crate::db::{PgSession, StoreError, map_sqlx_error};

#[derive(Debug, Clone)]
pub struct PostgresStateHistoryRepository {
    session: Arc<PgSession>,
}

impl PostgresStateHistoryRepository {
    pub fn new(session: Arc<PgSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl StateHistoryRepository for PostgresStateHistoryRepository {
    #[instrument(
        skip(self, metadata),
        fields(listing_id = %listing_id, from_state = ?from_state, to_state = %to_state),
        err
    )]
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

        let mut guard = self.session.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::SessionClosed)?;
        let mut savepoint = Connection::begin(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("begin_savepoint", e))?;

        sqlx::query(
            r#"
            INSERT INTO product_state_history (
                id, listing_id, from_state, to_state, transitioned_at, triggered_by, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.listing_id.as_uuid())
        .bind(record.from_state.map(|s| s.as_str()))
        .bind(record.to_state.as_str())
        .bind(record.transitioned_at)
        .bind(&record.triggered_by)
        .bind(serde_json::Value::Object(record.metadata.clone()))
        .execute(&mut *savepoint)
        .await
        .map_err(|e| map_sqlx_error("insert_history", e))?;

        savepoint
            .commit()
            .await
            .map_err(|e| map_sqlx_error("release_savepoint", e))?;
        Ok(record)
    }

    #[instrument(skip(self), fields(listing_id = %listing_id), err)]
    async fn get_history_for_listing(
        &self,
        listing_id: ListingId,
    ) -> Result<Vec<StateHistoryRecord>, StoreError> {
        let mut guard = self.session.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::SessionClosed)?;

        let rows = sqlx::query(
            r#"
            SELECT id, listing_id, from_state, to_state, transitioned_at, triggered_by, metadata
            FROM product_state_history
            WHERE listing_id = $1
            ORDER BY transitioned_at ASC, id ASC
            "#,
        )
        .bind(listing_id.as_uuid())
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("load_history", e))?;

        let mut history = Vec::with_capacity(rows.len());
        for r in &rows {
            let row = HistoryRow::from_pg_row(r).map_err(|e| map_sqlx_error("decode_history", e))?;
            history.push(row.into_record()?);
        }
        Ok(history)
    }
}

// SQLx row type

#[derive(Debug)]
struct HistoryRow {
    id: Uuid,
    listing_id: Uuid,
    from_state: Option<String>,
    to_state: String,
    transitioned_at: DateTime<Utc>,
    triggered_by: String,
    metadata: serde_json::Value,
}

impl HistoryRow {
    fn from_pg_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(HistoryRow {
            id: row.try_get("id")?,
            listing_id: row.try_get("listing_id")?,
            from_state: row.try_get("from_state")?,
            to_state: row.try_get("to_state")?,
            transitioned_at: row.try_get("transitioned_at")?,
            triggered_by: row.try_get("triggered_by")?,
            metadata: row.try_get("metadata")?,
        })
    }

    fn into_record(self) -> Result<StateHistoryRecord, StoreError> {
        let parse = |raw: &str| -> Result<ListingState, StoreError> {
            raw.parse().map_err(|e| {
                StoreError::Serialization(format!("history row {} has bad state: {e}", self.id))
            })
        };

        let from_state = self.from_state.as_deref().map(parse).transpose()?;
        let to_state = parse(&self.to_state)?;
        let metadata = match self.metadata {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => HistoryMetadata::new(),
            other => {
                return Err(StoreError::Serialization(format!(
                    "history row {} metadata is not an object: {other}",
                    self.id
                )));
            }
        };

        Ok(StateHistoryRecord {
            id: HistoryRecordId::from_uuid(self.id),
            listing_id: ListingId::from_uuid(self.listing_id),
            from_state,
            to_state,
            transitioned_at: self.transitioned_at,
            triggered_by: self.triggered_by,
            metadata,
        })
    }
}
