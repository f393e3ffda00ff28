//! Database adapters: pool setup, migrations, the scoped session and the
//! error model shared by every repository.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | Any other | `Database` |
//! | PoolClosed | N/A | `Database` |
//! | ColumnDecode / Decode | N/A | `Serialization` |
//! | Other | N/A | `Database` |

pub mod session;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tracing::info;

use crate::config::DatabaseConfig;

pub use session::PgSession;

/// Persistence failure raised by repositories.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The row changed since it was loaded (stale version or duplicate key).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(String),

    /// A stored value could not be mapped onto the domain model.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The session was already committed or rolled back.
    #[error("session already closed")]
    SessionClosed,
}

/// Open the connection pool.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))?;

    info!(max_connections = config.max_connections, "database pool ready");
    Ok(pool)
}

/// Apply the embedded migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Database(format!("migration failed: {e}")))
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code() {
                Some(code) if code.as_ref() == "23505" => StoreError::Conflict(msg),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Database(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::ColumnDecode { index, source } => StoreError::Serialization(format!(
            "failed to decode column {} in {}: {}",
            index, operation, source
        )),
        sqlx::Error::Decode(source) => {
            StoreError::Serialization(format!("decode error in {}: {}", operation, source))
        }
        other => StoreError::Database(format!("{} failed: {}", operation, other)),
    }
}
