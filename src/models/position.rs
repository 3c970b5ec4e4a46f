use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use super::row;

/// Database row for the TS `positions` table, keyed by symbol.
///
/// A flat position keeps `quantity = 0` and `avg_entry_price = 0`; the
/// cumulative `realized_pnl` survives across round trips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_entry_price: Decimal,
    pub total_cost: Decimal,
    pub realized_pnl: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn flat(symbol: &str, now: DateTime<Utc>) -> Self {
        Position {
            symbol: symbol.to_string(),
            quantity: Decimal::ZERO,
            avg_entry_price: Decimal::ZERO,
            total_cost: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            updated_at: now,
        }
    }
}

impl FromRow<'_, SqliteRow> for Position {
    fn from_row(r: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Position {
            symbol: r.try_get("symbol")?,
            quantity: row::decimal(r, "quantity")?,
            avg_entry_price: row::decimal(r, "avg_entry_price")?,
            total_cost: row::decimal(r, "total_cost")?,
            realized_pnl: row::decimal(r, "realized_pnl")?,
            updated_at: r.try_get("updated_at")?,
        })
    }
}
