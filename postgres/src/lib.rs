//! `PostgreSQL` backend for Queuedesk.
//!
//! This crate implements the storage traits from `queuedesk-core` on top of sqlx:
//!
//! - [`PostgresTicketStore`]: tickets and reception logs, with `FOR UPDATE SKIP LOCKED`
//!   claims and advisory-locked number allocation
//! - [`PostgresCategoryDirectory`] / [`PostgresScheduleDirectory`]: read-only lookups
//! - [`PgChangeFeedConnector`]: `LISTEN` sessions feeding the notifier bridge
//!
//! The migrations under `migrations/` create the schema and the triggers that publish
//! every ticket and schedule mutation on `ticket_changed` / `schedule_changed`.
//!
//! # Example
//!
//! ```ignore
//! use queuedesk_postgres::{PostgresTicketStore, connect, migrate};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = connect("postgres://localhost/queuedesk", 10, Duration::from_secs(5)).await?;
//!     migrate(&pool).await?;
//!     let tickets = PostgresTicketStore::new(pool);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod directories;
mod rows;
mod ticket_store;

pub use change_feed::PgChangeFeedConnector;
pub use directories::{PostgresCategoryDirectory, PostgresScheduleDirectory};
pub use ticket_store::PostgresTicketStore;

use queuedesk_core::error::StoreError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Open a connection pool.
///
/// # Errors
///
/// Returns the sqlx error if no connection can be established.
pub async fn connect(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
}

/// Apply the bundled schema and trigger migrations.
///
/// # Errors
///
/// Returns [`sqlx::migrate::MigrateError`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Map a sqlx error to [`StoreError`], counting it under `operation`.
pub(crate) fn store_error(operation: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| {
        metrics::counter!("store_query_failures_total", "operation" => operation).increment(1);
        tracing::warn!(operation, error = %e, "Store query failed");
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            _ => StoreError::Database(e.to_string()),
        }
    }
}
