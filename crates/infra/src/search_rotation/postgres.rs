//! Postgres-backed rotation (`search_rotation`).
//!
//! The row with `last_searched = TRUE` is the current position. Advancing
//! clears it, picks the next enabled row by id (wrapping to the lowest), and
//! flags that one, all in a single transaction.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use tracing::{info, instrument};

use super::r#trait::{RotatedSearch, SearchRotation};
use crate::db::{StoreError, map_sqlx_error};

#[derive(Debug, Clone)]
pub struct PostgresSearchRotation {
    pool: PgPool,
}

impl PostgresSearchRotation {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SearchRotation for PostgresSearchRotation {
    #[instrument(skip(self), err)]
    async fn next_search(&self) -> Result<Option<RotatedSearch>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_rotation", e))?;

        let current: Option<i64> = sqlx::query(
            "UPDATE search_rotation SET last_searched = FALSE, updated_at = NOW() \
             WHERE last_searched RETURNING id",
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("clear_rotation", e))?
        .map(|row| row.try_get("id"))
        .transpose()
        .map_err(|e| map_sqlx_error("decode_rotation", e))?;

        let next = sqlx::query(
            r#"
            SELECT id, brand, search_term
            FROM search_rotation
            WHERE enabled
            ORDER BY (id <= COALESCE($1, -1)), id ASC
            LIMIT 1
            "#,
        )
        .bind(current)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("select_rotation", e))?;

        let Some(row) = next else {
            tx.commit()
                .await
                .map_err(|e| map_sqlx_error("commit_rotation", e))?;
            return Ok(None);
        };

        let id: i64 = row.try_get("id").map_err(|e| map_sqlx_error("decode_rotation", e))?;
        let brand: String = row
            .try_get("brand")
            .map_err(|e| map_sqlx_error("decode_rotation", e))?;
        let search_term: Option<String> = row
            .try_get("search_term")
            .map_err(|e| map_sqlx_error("decode_rotation", e))?;

        sqlx::query(
            "UPDATE search_rotation SET last_searched = TRUE, last_searched_at = $2, updated_at = $2 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("advance_rotation", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_rotation", e))?;

        let rotated = RotatedSearch::new(brand, search_term.as_deref());
        info!(rotation_id = id, brand = %rotated.brand, search = %rotated.search, "rotated search");
        Ok(Some(rotated))
    }
}
