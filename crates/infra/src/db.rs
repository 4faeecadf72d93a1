//! Database wiring: connection pool, schema migration, sync-over-async bridge.

use std::future::Future;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::runtime::{Handle, RuntimeFlavor};

/// Schema for the event log, the profile read model and projection cursors.
pub const SCHEMA: &str = include_str!("../../../migrations/0001_event_store.sql");

/// Open a Postgres connection pool.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Apply the schema. Every statement is idempotent (`IF NOT EXISTS`).
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

/// Run a future to completion from synchronous code executing on a tokio worker.
///
/// The storage traits are synchronous; the Postgres adapters bridge into sqlx
/// through this. Requires a multi-threaded runtime (`block_in_place`).
pub(crate) fn block_on<F: Future>(operation: &str, fut: F) -> Result<F::Output, String> {
    let handle = Handle::try_current()
        .map_err(|_| format!("{operation} requires a tokio runtime"))?;
    if handle.runtime_flavor() == RuntimeFlavor::CurrentThread {
        return Err(format!("{operation} requires a multi-threaded tokio runtime"));
    }
    Ok(tokio::task::block_in_place(|| handle.block_on(fut)))
}
