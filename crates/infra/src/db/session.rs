//! Scoped persistence session.
//!
//! One transaction per request-scoped operation: begin, run the work, commit
//! on success, roll back on failure. Dropping an uncommitted session rolls the
//! transaction back (sqlx does this when the `Transaction` is dropped), so
//! every exit path releases the connection.

use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::{StoreError, map_sqlx_error};

/// A transaction shared by the repositories of one unit of work.
#[derive(Debug)]
pub struct PgSession {
    tx: Mutex<Option<Transaction<'static, Postgres>>>,
}

impl PgSession {
    pub async fn begin(pool: &PgPool) -> Result<Self, StoreError> {
        let tx = pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
        })
    }

    pub async fn commit(&self) -> Result<(), StoreError> {
        let tx = self.tx.lock().await.take().ok_or(StoreError::SessionClosed)?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        debug!("session committed");
        Ok(())
    }

    pub async fn rollback(&self) -> Result<(), StoreError> {
        let tx = self.tx.lock().await.take().ok_or(StoreError::SessionClosed)?;
        tx.rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))?;
        debug!("session rolled back");
        Ok(())
    }

    /// Commit when `outcome` is `Ok`, roll back otherwise, then hand `outcome` back.
    ///
    /// A failed commit replaces a successful outcome; a failed rollback is
    /// logged and the original error is kept.
    pub async fn finish<T, E>(&self, outcome: Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        match outcome {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    pub(crate) async fn lock(
        &self,
    ) -> MutexGuard<'_, Option<Transaction<'static, Postgres>>> {
        self.tx.lock().await
    }
}
