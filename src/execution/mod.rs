pub mod clock;
pub mod dispatcher;
pub mod engine;
pub mod rng;
pub mod stop_scanner;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{run_latency_dispatcher, PendingProgress};
pub use engine::{ExecutionOutcome, PaperEngine};
pub use rng::{RandomSource, SeededRng, ZeroRng};
pub use stop_scanner::run_stop_scanner;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::{Liquidity, OrderSource, Side};

/// Execution-time tuning, threaded explicitly through the engine instead of
/// living in mutable module state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Upper bound of the uniform slippage draw, as a percentage of price.
    pub slippage_pct: Decimal,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    /// Fraction of the remaining quantity filled per iteration, in (0, 1].
    pub fill_pct: Decimal,
    /// Base simulated latency; zero executes inline.
    pub latency_ms: i64,
    /// Upper bound of the uniform extra latency draw.
    pub random_latency_ms: i64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slippage_pct: dec!(0.0),
            maker_fee: dec!(0.0),
            taker_fee: dec!(0.0),
            fill_pct: dec!(1.0),
            latency_ms: 0,
            random_latency_ms: 0,
        }
    }
}

impl ExecutionConfig {
    pub fn from_core(config: &crate::config::CoreConfig) -> Self {
        Self {
            slippage_pct: config.default_slippage_pct,
            maker_fee: config.default_maker_fee,
            taker_fee: config.default_taker_fee,
            fill_pct: config.default_fill_pct,
            latency_ms: config.default_latency_ms,
            random_latency_ms: config.random_latency_ms,
        }
    }
}

/// Fact emitted after each committed fill; the coordinator fans these out
/// into the TS store, the pyramid manager, and the dashboard channel.
#[derive(Debug, Clone, Serialize)]
pub struct FillEvent {
    pub order_id: i64,
    pub fill_id: i64,
    pub symbol: String,
    pub side: Side,
    pub source: OrderSource,
    pub source_ref: Option<String>,
    pub strategy_name: Option<String>,
    pub fill_qty: Decimal,
    pub fill_price: Decimal,
    pub effective_price: Decimal,
    pub fees: Decimal,
    pub liquidity: Liquidity,
    pub filled_at: DateTime<Utc>,
    /// True when this fill completed the order.
    pub order_filled: bool,
}
