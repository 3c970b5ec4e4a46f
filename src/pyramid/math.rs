use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::money::round_to_step;
use crate::pricefeed::ExchangeInfo;

/// Deterministic target for one DCA wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveTarget {
    pub wave_num: i64,
    pub qty: Decimal,
    pub price: Decimal,
}

/// 1 pip = pip_multiplier × exchange minimum lot.
pub fn pip_size(info: &ExchangeInfo, pip_multiplier: Decimal) -> Decimal {
    pip_multiplier * info.min_qty
}

/// Wave formulas:
///
/// ```text
/// target_qty(n)   = (n + 1) × pip_size            (on the step grid)
/// target_price(n) = entry × (1 − distance/100)^n  (on the price grid)
/// ```
///
/// The exponentiation runs in f64 — the one place floats are allowed — and
/// the result is quantized to the price step immediately.
pub fn wave_target(
    entry_price: Decimal,
    distance_pct: Decimal,
    pip_multiplier: Decimal,
    wave_num: i64,
    info: &ExchangeInfo,
) -> WaveTarget {
    let raw_qty = Decimal::from(wave_num + 1) * pip_size(info, pip_multiplier);
    let qty = round_to_step(raw_qty, info.step_size).max(info.min_qty);

    let factor = 1.0 - distance_pct.to_f64().unwrap_or(0.0) / 100.0;
    let raw_price = entry_price.to_f64().unwrap_or(0.0) * factor.powi(wave_num as i32);
    let price = round_to_step(
        Decimal::from_f64(raw_price).unwrap_or(entry_price),
        info.price_step,
    );

    WaveTarget {
        wave_num,
        qty,
        price,
    }
}

/// Planned spend across the first `max_waves` waves, for fund planning.
pub fn estimate_total_cost(
    entry_price: Decimal,
    distance_pct: Decimal,
    pip_multiplier: Decimal,
    max_waves: i64,
    info: &ExchangeInfo,
) -> Decimal {
    (0..max_waves)
        .map(|n| {
            let wave = wave_target(entry_price, distance_pct, pip_multiplier, n, info);
            wave.qty * wave.price
        })
        .sum()
}

pub fn wave_source_ref(session_id: i64, wave_num: i64) -> String {
    format!("pyramid:{session_id}:wave:{wave_num}")
}

pub fn tp_source_ref(session_id: i64) -> String {
    format!("pyramid:{session_id}:tp")
}

/// A parsed pyramid source reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PyramidRef {
    Wave { session_id: i64, wave_num: i64 },
    TakeProfit { session_id: i64 },
}

impl PyramidRef {
    pub fn session_id(&self) -> i64 {
        match self {
            PyramidRef::Wave { session_id, .. } | PyramidRef::TakeProfit { session_id } => {
                *session_id
            }
        }
    }
}

/// Parse `pyramid:{id}:wave:{n}` or `pyramid:{id}:tp`. Anything else is not
/// a pyramid order.
pub fn parse_source_ref(source_ref: &str) -> Option<PyramidRef> {
    let mut parts = source_ref.split(':');
    if parts.next()? != "pyramid" {
        return None;
    }
    let session_id: i64 = parts.next()?.parse().ok()?;
    match parts.next()? {
        "tp" => Some(PyramidRef::TakeProfit { session_id }),
        "wave" => {
            let wave_num: i64 = parts.next()?.parse().ok()?;
            Some(PyramidRef::Wave {
                session_id,
                wave_num,
            })
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn btc_info() -> ExchangeInfo {
        ExchangeInfo::default_for("BTC")
    }

    #[test]
    fn test_wave_targets_match_dca_ladder() {
        // entry 50000, distance 2%, pip_multiplier 2, minQty 0.00001
        let info = btc_info();
        let w0 = wave_target(dec!(50000), dec!(2), dec!(2), 0, &info);
        assert_eq!(w0.qty, dec!(0.00002));
        assert_eq!(w0.price, dec!(50000));

        let w1 = wave_target(dec!(50000), dec!(2), dec!(2), 1, &info);
        assert_eq!(w1.qty, dec!(0.00004));
        assert_eq!(w1.price, dec!(49000));

        let w2 = wave_target(dec!(50000), dec!(2), dec!(2), 2, &info);
        assert_eq!(w2.qty, dec!(0.00006));
        assert_eq!(w2.price, dec!(48020));
    }

    #[test]
    fn test_zero_distance_keeps_entry_price() {
        let info = btc_info();
        for n in 0..8 {
            let wave = wave_target(dec!(50000), Decimal::ZERO, dec!(2), n, &info);
            assert_eq!(wave.price, dec!(50000));
        }
    }

    #[test]
    fn test_wave_prices_strictly_decrease() {
        let info = btc_info();
        let mut previous = wave_target(dec!(50000), dec!(0.5), dec!(2), 0, &info).price;
        for n in 1..10 {
            let price = wave_target(dec!(50000), dec!(0.5), dec!(2), n, &info).price;
            assert!(price < previous, "wave {n}: {price} >= {previous}");
            previous = price;
        }
    }

    #[test]
    fn test_estimate_total_cost_sums_waves() {
        let info = btc_info();
        let estimate = estimate_total_cost(dec!(50000), dec!(2), dec!(2), 3, &info);
        // 0.00002×50000 + 0.00004×49000 + 0.00006×48020
        assert_eq!(estimate, dec!(1.0) + dec!(1.96) + dec!(2.8812));
    }

    #[test]
    fn test_source_ref_roundtrip() {
        assert_eq!(
            parse_source_ref(&wave_source_ref(7, 3)),
            Some(PyramidRef::Wave {
                session_id: 7,
                wave_num: 3
            })
        );
        assert_eq!(
            parse_source_ref(&tp_source_ref(7)),
            Some(PyramidRef::TakeProfit { session_id: 7 })
        );
        assert_eq!(parse_source_ref("spreadsheet:1"), None);
        assert_eq!(parse_source_ref("pyramid:x:wave:1"), None);
    }
}
