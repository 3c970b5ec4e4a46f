pub mod order_repo;
pub mod pending_repo;
pub mod position_repo;
pub mod pyramid_repo;
pub mod trade_repo;

use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

/// Schema for the append-only Source-of-Truth store (`sot.db`).
pub static SOT_MIGRATOR: Migrator = sqlx::migrate!("migrations/sot");

/// Schema for the derived Trade Service store (`ts.db`).
pub static TS_MIGRATOR: Migrator = sqlx::migrate!("migrations/ts");

async fn init_pool(
    url: &str,
    max_connections: u32,
    migrator: &Migrator,
) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await?;

    // Verify connectivity before running migrations.
    sqlx::query("SELECT 1").execute(&pool).await?;
    migrator.run(&pool).await?;

    Ok(pool)
}

/// Open (and migrate) the SOT store.
pub async fn init_sot_pool(url: &str, max_connections: u32) -> anyhow::Result<SqlitePool> {
    init_pool(url, max_connections, &SOT_MIGRATOR).await
}

/// Open (and migrate) the TS store. Kept on a separate pool and database so
/// it can fail and be rebuilt independently of the SOT store.
pub async fn init_ts_pool(url: &str, max_connections: u32) -> anyhow::Result<SqlitePool> {
    init_pool(url, max_connections, &TS_MIGRATOR).await
}
