use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use std::fmt;

use super::row;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Pending,
    Active,
    TpTriggered,
    Stopped,
    Timeout,
    Completed,
}

impl SessionStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(SessionStatus::Pending),
            "ACTIVE" => Some(SessionStatus::Active),
            "TP_TRIGGERED" => Some(SessionStatus::TpTriggered),
            "STOPPED" => Some(SessionStatus::Stopped),
            "TIMEOUT" => Some(SessionStatus::Timeout),
            "COMPLETED" => Some(SessionStatus::Completed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "PENDING",
            SessionStatus::Active => "ACTIVE",
            SessionStatus::TpTriggered => "TP_TRIGGERED",
            SessionStatus::Stopped => "STOPPED",
            SessionStatus::Timeout => "TIMEOUT",
            SessionStatus::Completed => "COMPLETED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Stopped | SessionStatus::Timeout | SessionStatus::Completed
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaveStatus {
    Pending,
    Queued,
    Filled,
    Cancelled,
}

impl WaveStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(WaveStatus::Pending),
            "QUEUED" => Some(WaveStatus::Queued),
            "FILLED" => Some(WaveStatus::Filled),
            "CANCELLED" => Some(WaveStatus::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WaveStatus::Pending => "PENDING",
            WaveStatus::Queued => "QUEUED",
            WaveStatus::Filled => "FILLED",
            WaveStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for WaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database row for a pyramid DCA session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PyramidSession {
    pub id: i64,
    pub symbol: String,
    pub entry_price: Decimal,
    pub distance_pct: Decimal,
    pub max_waves: i64,
    pub isolated_fund: Decimal,
    pub tp_pct: Decimal,
    pub timeout_min: i64,
    pub gap_min: i64,
    pub pip_multiplier: Decimal,
    pub status: SessionStatus,
    pub current_wave: i64,
    pub total_filled_qty: Decimal,
    pub total_cost: Decimal,
    pub avg_price: Decimal,
    pub estimated_cost: Decimal,
    pub fund_flagged: bool,
    pub stop_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_fill_at: Option<DateTime<Utc>>,
    pub last_wave_queued_at: Option<DateTime<Utc>>,
}

impl PyramidSession {
    pub fn remaining_fund(&self) -> Decimal {
        (self.isolated_fund - self.total_cost).max(Decimal::ZERO)
    }

    /// TP threshold from the current average fill price; before any fill,
    /// the entry price stands in.
    pub fn tp_threshold(&self) -> Decimal {
        let base = if self.avg_price > Decimal::ZERO {
            self.avg_price
        } else {
            self.entry_price
        };
        base * (Decimal::ONE + self.tp_pct / Decimal::ONE_HUNDRED)
    }
}

impl FromRow<'_, SqliteRow> for PyramidSession {
    fn from_row(r: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(PyramidSession {
            id: r.try_get("id")?,
            symbol: r.try_get("symbol")?,
            entry_price: row::decimal(r, "entry_price")?,
            distance_pct: row::decimal(r, "distance_pct")?,
            max_waves: r.try_get("max_waves")?,
            isolated_fund: row::decimal(r, "isolated_fund")?,
            tp_pct: row::decimal(r, "tp_pct")?,
            timeout_min: r.try_get("timeout_min")?,
            gap_min: r.try_get("gap_min")?,
            pip_multiplier: row::decimal(r, "pip_multiplier")?,
            status: row::parsed(r, "status", SessionStatus::parse)?,
            current_wave: r.try_get("current_wave")?,
            total_filled_qty: row::decimal(r, "total_filled_qty")?,
            total_cost: row::decimal(r, "total_cost")?,
            avg_price: row::decimal(r, "avg_price")?,
            estimated_cost: row::decimal(r, "estimated_cost")?,
            fund_flagged: r.try_get("fund_flagged")?,
            stop_reason: r.try_get("stop_reason")?,
            created_at: r.try_get("created_at")?,
            started_at: r.try_get("started_at")?,
            last_fill_at: r.try_get("last_fill_at")?,
            last_wave_queued_at: r.try_get("last_wave_queued_at")?,
        })
    }
}

/// Database row for a single DCA wave within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PyramidWave {
    pub id: i64,
    pub session_id: i64,
    pub wave_num: i64,
    pub target_qty: Decimal,
    pub target_price: Decimal,
    pub status: WaveStatus,
    pub filled_qty: Decimal,
    pub filled_price: Option<Decimal>,
    pub filled_at: Option<DateTime<Utc>>,
    pub pending_order_id: Option<i64>,
}

impl FromRow<'_, SqliteRow> for PyramidWave {
    fn from_row(r: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(PyramidWave {
            id: r.try_get("id")?,
            session_id: r.try_get("session_id")?,
            wave_num: r.try_get("wave_num")?,
            target_qty: row::decimal(r, "target_qty")?,
            target_price: row::decimal(r, "target_price")?,
            status: row::parsed(r, "status", WaveStatus::parse)?,
            filled_qty: row::decimal(r, "filled_qty")?,
            filled_price: row::opt_decimal(r, "filled_price")?,
            filled_at: r.try_get("filled_at")?,
            pending_order_id: r.try_get("pending_order_id")?,
        })
    }
}
