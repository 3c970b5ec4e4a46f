pub mod order;
pub mod pending;
pub mod position;
pub mod pyramid;
pub mod trade;

pub use order::{Fill, Order, OrderCost, OrderEvent, OrderPnl};
pub use pending::{OrderIntent, PendingOrder};
pub use position::Position;
pub use pyramid::{PyramidSession, PyramidWave};
pub use trade::{Trade, TradePnl};

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Order type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    StopLoss,
}

impl OrderType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "MARKET" => Some(OrderType::Market),
            "LIMIT" => Some(OrderType::Limit),
            "STOP_LOSS" => Some(OrderType::StopLoss),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::StopLoss => "STOP_LOSS",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Order status lattice
// ---------------------------------------------------------------------------

/// Execution-side order status.
///
/// Transitions follow a monotone lattice:
/// NEW → (PENDING →) (TRIGGERED →) PARTIALLY_FILLED* → FILLED, with
/// CANCELLED reachable from any non-terminal state while quantity remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Pending,
    Triggered,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(OrderStatus::New),
            "PENDING" => Some(OrderStatus::Pending),
            "TRIGGERED" => Some(OrderStatus::Triggered),
            "PARTIALLY_FILLED" => Some(OrderStatus::PartiallyFilled),
            "FILLED" => Some(OrderStatus::Filled),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Pending => "PENDING",
            OrderStatus::Triggered => "TRIGGERED",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }

    /// Whether the lattice permits `self → to`.
    pub fn can_transition(&self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, to) {
            (New, Pending) | (New, Triggered) | (New, PartiallyFilled) | (New, Filled) => true,
            (Pending, Triggered) | (Pending, PartiallyFilled) | (Pending, Filled) => true,
            (Triggered, PartiallyFilled) | (Triggered, Filled) => true,
            (PartiallyFilled, PartiallyFilled) | (PartiallyFilled, Filled) => true,
            (New, Cancelled)
            | (Pending, Cancelled)
            | (Triggered, Cancelled)
            | (PartiallyFilled, Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Pending-order status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PendingStatus {
    Pending,
    Approved,
    Rejected,
    Executed,
}

impl PendingStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(PendingStatus::Pending),
            "APPROVED" => Some(PendingStatus::Approved),
            "REJECTED" => Some(PendingStatus::Rejected),
            "EXECUTED" => Some(PendingStatus::Executed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PendingStatus::Pending => "PENDING",
            PendingStatus::Approved => "APPROVED",
            PendingStatus::Rejected => "REJECTED",
            PendingStatus::Executed => "EXECUTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PendingStatus::Rejected | PendingStatus::Executed)
    }
}

impl fmt::Display for PendingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Order source attribution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSource {
    Spreadsheet,
    Strategy,
    Pyramid,
    Backtest,
}

impl OrderSource {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "SPREADSHEET" => Some(OrderSource::Spreadsheet),
            "STRATEGY" => Some(OrderSource::Strategy),
            "PYRAMID" => Some(OrderSource::Pyramid),
            "BACKTEST" => Some(OrderSource::Backtest),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSource::Spreadsheet => "SPREADSHEET",
            OrderSource::Strategy => "STRATEGY",
            OrderSource::Pyramid => "PYRAMID",
            OrderSource::Backtest => "BACKTEST",
        }
    }
}

impl fmt::Display for OrderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Event types & liquidity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Created,
    Submitted,
    Triggered,
    PartialFill,
    Fill,
    Cancelled,
    Error,
    StopScanSkipped,
}

impl EventType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(EventType::Created),
            "SUBMITTED" => Some(EventType::Submitted),
            "TRIGGERED" => Some(EventType::Triggered),
            "PARTIAL_FILL" => Some(EventType::PartialFill),
            "FILL" => Some(EventType::Fill),
            "CANCELLED" => Some(EventType::Cancelled),
            "ERROR" => Some(EventType::Error),
            "STOP_SCAN_SKIPPED" => Some(EventType::StopScanSkipped),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "CREATED",
            EventType::Submitted => "SUBMITTED",
            EventType::Triggered => "TRIGGERED",
            EventType::PartialFill => "PARTIAL_FILL",
            EventType::Fill => "FILL",
            EventType::Cancelled => "CANCELLED",
            EventType::Error => "ERROR",
            EventType::StopScanSkipped => "STOP_SCAN_SKIPPED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Liquidity {
    Maker,
    Taker,
}

impl Liquidity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "MAKER" => Some(Liquidity::Maker),
            "TAKER" => Some(Liquidity::Taker),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Liquidity::Maker => "MAKER",
            Liquidity::Taker => "TAKER",
        }
    }
}

impl fmt::Display for Liquidity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Row decoding helpers
// ---------------------------------------------------------------------------
//
// SQLite has no decimal column type, so monetary fields are stored as TEXT
// holding canonical decimal strings. These helpers parse them (and the TEXT
// enum columns) inside the hand-written `FromRow` impls.

pub(crate) mod row {
    use rust_decimal::Decimal;
    use sqlx::sqlite::SqliteRow;
    use sqlx::Row;
    use std::str::FromStr;

    fn decode_err(col: &str, err: impl std::fmt::Display) -> sqlx::Error {
        sqlx::Error::ColumnDecode {
            index: col.to_string(),
            source: format!("{err}").into(),
        }
    }

    pub fn decimal(row: &SqliteRow, col: &str) -> Result<Decimal, sqlx::Error> {
        let raw: String = row.try_get(col)?;
        Decimal::from_str(&raw).map_err(|e| decode_err(col, e))
    }

    pub fn opt_decimal(row: &SqliteRow, col: &str) -> Result<Option<Decimal>, sqlx::Error> {
        let raw: Option<String> = row.try_get(col)?;
        raw.map(|s| Decimal::from_str(&s).map_err(|e| decode_err(col, e)))
            .transpose()
    }

    pub fn parsed<T>(
        row: &SqliteRow,
        col: &str,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Result<T, sqlx::Error> {
        let raw: String = row.try_get(col)?;
        parse(&raw).ok_or_else(|| decode_err(col, format!("unrecognized value '{raw}'")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_parse_roundtrip() {
        assert_eq!(Side::parse("buy"), Some(Side::Buy));
        assert_eq!(Side::parse("SELL"), Some(Side::Sell));
        assert_eq!(Side::parse("HOLD"), None);
        assert_eq!(Side::parse(Side::Buy.as_str()), Some(Side::Buy));
    }

    #[test]
    fn test_order_status_lattice() {
        use OrderStatus::*;
        assert!(New.can_transition(Pending));
        assert!(New.can_transition(Filled));
        assert!(Pending.can_transition(Cancelled));
        assert!(Triggered.can_transition(PartiallyFilled));
        assert!(PartiallyFilled.can_transition(Filled));
        // Terminal states never leave.
        assert!(!Filled.can_transition(Cancelled));
        assert!(!Cancelled.can_transition(New));
        // No regressions.
        assert!(!Filled.can_transition(PartiallyFilled));
        assert!(!Triggered.can_transition(Pending));
    }

    #[test]
    fn test_pending_status_terminal() {
        assert!(!PendingStatus::Pending.is_terminal());
        assert!(!PendingStatus::Approved.is_terminal());
        assert!(PendingStatus::Rejected.is_terminal());
        assert!(PendingStatus::Executed.is_terminal());
    }
}
