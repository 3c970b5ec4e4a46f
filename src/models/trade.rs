use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use std::fmt;

use super::row;
use super::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Open,
    Partial,
    Closed,
}

impl TradeStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(TradeStatus::Open),
            "PARTIAL" => Some(TradeStatus::Partial),
            "CLOSED" => Some(TradeStatus::Closed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "OPEN",
            TradeStatus::Partial => "PARTIAL",
            TradeStatus::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database row for the TS `trades` table: one entry/exit pair aggregated
/// from SOT fills. Entry fills accumulate while the trade is OPEN; exit
/// fills reduce `current_qty` through PARTIAL to CLOSED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub entry_order_id: i64,
    pub exit_order_id: Option<i64>,
    pub symbol: String,
    pub side: Side,
    pub status: TradeStatus,
    pub entry_qty: Decimal,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_qty: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    pub exit_time: Option<DateTime<Utc>>,
    pub current_qty: Decimal,
    pub strategy_code: Option<String>,
}

impl FromRow<'_, SqliteRow> for Trade {
    fn from_row(r: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Trade {
            id: r.try_get("id")?,
            entry_order_id: r.try_get("entry_order_id")?,
            exit_order_id: r.try_get("exit_order_id")?,
            symbol: r.try_get("symbol")?,
            side: row::parsed(r, "side", Side::parse)?,
            status: row::parsed(r, "status", TradeStatus::parse)?,
            entry_qty: row::decimal(r, "entry_qty")?,
            entry_price: row::decimal(r, "entry_price")?,
            entry_time: r.try_get("entry_time")?,
            exit_qty: row::opt_decimal(r, "exit_qty")?,
            exit_price: row::opt_decimal(r, "exit_price")?,
            exit_time: r.try_get("exit_time")?,
            current_qty: row::decimal(r, "current_qty")?,
            strategy_code: r.try_get("strategy_code")?,
        })
    }
}

/// Derived PnL snapshot per trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradePnl {
    pub trade_id: i64,
    pub gross_pnl: Decimal,
    pub total_fees: Decimal,
    pub net_pnl: Decimal,
    pub return_pct: Decimal,
    pub cost_basis: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub duration_s: Option<i64>,
    pub calculated_at: DateTime<Utc>,
}

impl FromRow<'_, SqliteRow> for TradePnl {
    fn from_row(r: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(TradePnl {
            trade_id: r.try_get("trade_id")?,
            gross_pnl: row::decimal(r, "gross_pnl")?,
            total_fees: row::decimal(r, "total_fees")?,
            net_pnl: row::decimal(r, "net_pnl")?,
            return_pct: row::decimal(r, "return_pct")?,
            cost_basis: row::decimal(r, "cost_basis")?,
            realized_pnl: row::decimal(r, "realized_pnl")?,
            unrealized_pnl: row::decimal(r, "unrealized_pnl")?,
            duration_s: r.try_get("duration_s")?,
            calculated_at: r.try_get("calculated_at")?,
        })
    }
}
