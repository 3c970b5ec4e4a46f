use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use super::row;
use super::{OrderSource, OrderType, PendingStatus, Side};

/// An order intent before it enters the approval queue.
///
/// Exactly one of `qty` / `pips` must be set; pip intents are resolved to a
/// concrete quantity at queue time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub qty: Option<Decimal>,
    pub pips: Option<Decimal>,
    pub price: Decimal,
    pub stop_price: Option<Decimal>,
    pub source: OrderSource,
    pub source_ref: Option<String>,
    pub strategy_name: Option<String>,
    pub confidence: Option<Decimal>,
    pub note: Option<String>,
}

impl OrderIntent {
    pub fn market(symbol: &str, side: Side, qty: Decimal, price: Decimal) -> Self {
        OrderIntent {
            client_order_id: None,
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            qty: Some(qty),
            pips: None,
            price,
            stop_price: None,
            source: OrderSource::Strategy,
            source_ref: None,
            strategy_name: None,
            confidence: None,
            note: None,
        }
    }
}

/// Database row for the `pending_orders` table.
///
/// Owned by the approval queue until it reaches a terminal status
/// (EXECUTED or REJECTED).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOrder {
    pub id: i64,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub pips: Option<Decimal>,
    pub price: Decimal,
    pub stop_price: Option<Decimal>,
    pub source: OrderSource,
    pub source_ref: Option<String>,
    pub strategy_name: Option<String>,
    pub confidence: Option<Decimal>,
    pub status: PendingStatus,
    pub risk_note: Option<String>,
    pub note: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub attempt_count: i64,
    pub created_at: DateTime<Utc>,
}

impl PendingOrder {
    /// Client order id forwarded to the execution engine. Intents without an
    /// explicit id (strategy/pyramid orders) derive a stable one from the
    /// pending row so re-execution stays idempotent.
    pub fn effective_client_order_id(&self) -> String {
        self.client_order_id
            .clone()
            .unwrap_or_else(|| format!("po-{}", self.id))
    }
}

impl FromRow<'_, SqliteRow> for PendingOrder {
    fn from_row(r: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(PendingOrder {
            id: r.try_get("id")?,
            client_order_id: r.try_get("client_order_id")?,
            symbol: r.try_get("symbol")?,
            side: row::parsed(r, "side", Side::parse)?,
            order_type: row::parsed(r, "order_type", OrderType::parse)?,
            quantity: row::decimal(r, "quantity")?,
            pips: row::opt_decimal(r, "pips")?,
            price: row::decimal(r, "price")?,
            stop_price: row::opt_decimal(r, "stop_price")?,
            source: row::parsed(r, "source", OrderSource::parse)?,
            source_ref: r.try_get("source_ref")?,
            strategy_name: r.try_get("strategy_name")?,
            confidence: row::opt_decimal(r, "confidence")?,
            status: row::parsed(r, "status", PendingStatus::parse)?,
            risk_note: r.try_get("risk_note")?,
            note: r.try_get("note")?,
            reviewed_by: r.try_get("reviewed_by")?,
            reviewed_at: r.try_get("reviewed_at")?,
            attempt_count: r.try_get("attempt_count")?,
            created_at: r.try_get("created_at")?,
        })
    }
}
