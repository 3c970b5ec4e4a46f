use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::money::round_to_step;
use crate::pricefeed::ExchangeInfo;

/// Configurable risk limits, frozen at queue time.
#[derive(Debug, Clone)]
pub struct RiskLimits {
    /// Max exposure per symbol as % of account equity (default 10%).
    pub max_position_size_pct: Decimal,
    /// Max realized loss per UTC day as % of account equity (default 5%).
    pub max_daily_loss_pct: Decimal,
    /// Account equity the percentages are taken against.
    pub account_equity: Decimal,
    /// 1 pip = pip_multiplier × exchange min_qty.
    pub pip_multiplier: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size_pct: dec!(10.0),
            max_daily_loss_pct: dec!(5.0),
            account_equity: dec!(10000),
            pip_multiplier: dec!(2.0),
        }
    }
}

/// Frozen read view the checks run against. The queue assembles this inside
/// one lookup so every check in a batch sees the same state.
#[derive(Debug, Clone)]
pub struct RiskInputs {
    /// Current notional exposure on the order's symbol.
    pub symbol_exposure: Decimal,
    /// Net realized PnL of trades closed today (negative = loss).
    pub daily_realized_pnl: Decimal,
}

/// Resolve a pip count to an order quantity on the symbol's step grid.
///
/// `qty = pips × pip_multiplier × min_qty`, rounded to the step and clamped
/// to at least the minimum lot so the resolved quantity is always positive.
pub fn resolve_qty(info: &ExchangeInfo, pips: Decimal, pip_multiplier: Decimal) -> Decimal {
    let raw = pips * pip_multiplier * info.min_qty;
    round_to_step(raw, info.step_size).max(info.min_qty)
}

/// Validate a quantity against the exchange lot bounds. A violation is a
/// warning for the approver, not a queue rejection.
pub fn validate_qty(info: &ExchangeInfo, qty: Decimal) -> Option<String> {
    if qty < info.min_qty {
        return Some(format!("quantity {qty} below minimum {}", info.min_qty));
    }
    if qty > info.max_qty {
        return Some(format!("quantity {qty} exceeds maximum {}", info.max_qty));
    }
    None
}

/// Position-size check: `(exposure + qty × price) / equity ≤ max%`.
pub fn check_position_size(
    inputs: &RiskInputs,
    qty: Decimal,
    price: Decimal,
    limits: &RiskLimits,
) -> Option<String> {
    if limits.account_equity <= Decimal::ZERO {
        return None;
    }
    let proposed = inputs.symbol_exposure + qty * price;
    let exposure_pct = proposed / limits.account_equity * Decimal::ONE_HUNDRED;

    if exposure_pct > limits.max_position_size_pct {
        return Some(format!(
            "position {}% exceeds max {}%",
            exposure_pct.round_dp(1),
            limits.max_position_size_pct.round_dp(1)
        ));
    }
    None
}

/// Daily-loss check: `−daily_pnl / equity ≤ max%`.
pub fn check_daily_loss(inputs: &RiskInputs, limits: &RiskLimits) -> Option<String> {
    if limits.account_equity <= Decimal::ZERO {
        return None;
    }
    let loss_pct = -inputs.daily_realized_pnl / limits.account_equity * Decimal::ONE_HUNDRED;

    if loss_pct > limits.max_daily_loss_pct {
        return Some(format!(
            "daily loss {}% exceeds max {}%",
            loss_pct.round_dp(1),
            limits.max_daily_loss_pct.round_dp(1)
        ));
    }
    None
}

/// Run every pre-trade check. Violations do not block queueing — they are
/// collected into the pending order's `risk_note` so the human approver
/// sees the warning and remains the final authority.
pub fn run_checks(
    inputs: &RiskInputs,
    info: &ExchangeInfo,
    qty: Decimal,
    price: Decimal,
    limits: &RiskLimits,
) -> Vec<String> {
    let mut violations = Vec::new();
    if let Some(v) = validate_qty(info, qty) {
        violations.push(v);
    }
    if let Some(v) = check_position_size(inputs, qty, price, limits) {
        violations.push(v);
    }
    if let Some(v) = check_daily_loss(inputs, limits) {
        violations.push(v);
    }
    violations
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
