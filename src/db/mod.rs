//! Database module for SQLite persistence
//!
//! Holds users, folders, logical file records, the blob index and the
//! reconciliation ledger.

mod blobs;
mod files;
mod folders;
mod reconciliation;
mod schema;
mod users;

pub use blobs::*;
pub use files::*;
pub use folders::*;
pub use reconciliation::*;
pub use schema::*;
pub use users::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::error::Result;

/// Create a new database connection pool
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(10))
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    // Run migrations
    initialize_schema(&pool).await?;

    Ok(pool)
}

/// Current time in the format stored in every `created_at` column
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
