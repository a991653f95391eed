//! The position store: sole off-chain accounting authority.
//!
//! Every mutation of a position and its derived rows (pending settlement,
//! operation log) happens inside one SQLite transaction. Concurrency
//! control is compare-and-set on position status; the monotone `Settled`
//! sink is enforced here, not by callers.

mod handle;
mod models;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

pub use handle::{payload_digest, SettleOutcome, TransitionOutcome};
pub use models::{
    OperationPhase, OperationRecord, OperationStatus, PendingSettlement, UserRecord,
};

#[derive(Clone)]
pub struct Db {
    pub(crate) pool: SqlitePool,
}

const SCHEMA: &str = include_str!("schema.sql");

impl Db {
    /// Open (creating if missing) and migrate the store.
    pub async fn connect(url: &str) -> Result<Db> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL: {url}"))?
            .create_if_missing(true)
            .foreign_keys(true);
        // A private in-memory database exists per connection; keep the
        // pool at one connection so tests see a single store.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Cannot open the position store")?;
        let db = Db { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("Failed to run store migrations")?;
        Ok(())
    }
}
