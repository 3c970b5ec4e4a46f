use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use super::row;
use super::{EventType, Liquidity, OrderSource, OrderStatus, OrderType, Side};

/// Database row for the `orders` table.
///
/// Immutable once appended except `status`, `remaining_qty` and the
/// execution timestamps, which only move forward along the status lattice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub client_order_id: String,
    pub pending_id: Option<i64>,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub qty: Decimal,
    pub remaining_qty: Decimal,
    pub price: Decimal,
    pub stop_price: Option<Decimal>,
    pub status: OrderStatus,
    pub is_maker: bool,
    pub latency_ms: i64,
    pub maker_fee_rate: Decimal,
    pub taker_fee_rate: Decimal,
    pub source: OrderSource,
    pub source_ref: Option<String>,
    pub strategy_name: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn fee_rate(&self) -> Decimal {
        if self.is_maker {
            self.maker_fee_rate
        } else {
            self.taker_fee_rate
        }
    }

    pub fn liquidity(&self) -> Liquidity {
        if self.is_maker {
            Liquidity::Maker
        } else {
            Liquidity::Taker
        }
    }
}

impl FromRow<'_, SqliteRow> for Order {
    fn from_row(r: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Order {
            id: r.try_get("id")?,
            client_order_id: r.try_get("client_order_id")?,
            pending_id: r.try_get("pending_id")?,
            symbol: r.try_get("symbol")?,
            side: row::parsed(r, "side", Side::parse)?,
            order_type: row::parsed(r, "order_type", OrderType::parse)?,
            qty: row::decimal(r, "qty")?,
            remaining_qty: row::decimal(r, "remaining_qty")?,
            price: row::decimal(r, "price")?,
            stop_price: row::opt_decimal(r, "stop_price")?,
            status: row::parsed(r, "status", OrderStatus::parse)?,
            is_maker: r.try_get("is_maker")?,
            latency_ms: r.try_get("latency_ms")?,
            maker_fee_rate: row::decimal(r, "maker_fee_rate")?,
            taker_fee_rate: row::decimal(r, "taker_fee_rate")?,
            source: row::parsed(r, "source", OrderSource::parse)?,
            source_ref: r.try_get("source_ref")?,
            strategy_name: r.try_get("strategy_name")?,
            submitted_at: r.try_get("submitted_at")?,
            executed_at: r.try_get("executed_at")?,
            created_at: r.try_get("created_at")?,
            updated_at: r.try_get("updated_at")?,
        })
    }
}

/// Append-only lifecycle event for an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub id: i64,
    pub order_id: i64,
    pub event_type: EventType,
    pub event_time: DateTime<Utc>,
    pub payload: Option<String>,
}

impl FromRow<'_, SqliteRow> for OrderEvent {
    fn from_row(r: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(OrderEvent {
            id: r.try_get("id")?,
            order_id: r.try_get("order_id")?,
            event_type: row::parsed(r, "event_type", EventType::parse)?,
            event_time: r.try_get("event_time")?,
            payload: r.try_get("payload")?,
        })
    }
}

/// Append-only execution fill.
///
/// `fill_price` is the pre-slippage reference, `effective_price` the price
/// the fill actually settled at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub id: i64,
    pub order_id: i64,
    pub fill_qty: Decimal,
    pub fill_price: Decimal,
    pub effective_price: Decimal,
    pub fees: Decimal,
    pub slippage_amount: Decimal,
    pub liquidity: Liquidity,
    pub filled_at: DateTime<Utc>,
}

impl FromRow<'_, SqliteRow> for Fill {
    fn from_row(r: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Fill {
            id: r.try_get("id")?,
            order_id: r.try_get("order_id")?,
            fill_qty: row::decimal(r, "fill_qty")?,
            fill_price: row::decimal(r, "fill_price")?,
            effective_price: row::decimal(r, "effective_price")?,
            fees: row::decimal(r, "fees")?,
            slippage_amount: row::decimal(r, "slippage_amount")?,
            liquidity: row::parsed(r, "liquidity", Liquidity::parse)?,
            filled_at: r.try_get("filled_at")?,
        })
    }
}

/// Accumulated execution costs per order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCost {
    pub order_id: i64,
    pub total_fees: Decimal,
    pub fee_rate: Decimal,
    pub liquidity: Liquidity,
}

impl FromRow<'_, SqliteRow> for OrderCost {
    fn from_row(r: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(OrderCost {
            order_id: r.try_get("order_id")?,
            total_fees: row::decimal(r, "total_fees")?,
            fee_rate: row::decimal(r, "fee_rate")?,
            liquidity: row::parsed(r, "liquidity", Liquidity::parse)?,
        })
    }
}

/// Realized PnL snapshot per order (SELL orders only carry a non-zero value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPnl {
    pub order_id: i64,
    pub realized_pnl: Decimal,
    pub cost_basis: Decimal,
    pub calculated_at: DateTime<Utc>,
}

impl FromRow<'_, SqliteRow> for OrderPnl {
    fn from_row(r: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(OrderPnl {
            order_id: r.try_get("order_id")?,
            realized_pnl: row::decimal(r, "realized_pnl")?,
            cost_basis: row::decimal(r, "cost_basis")?,
            calculated_at: r.try_get("calculated_at")?,
        })
    }
}
