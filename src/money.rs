use rust_decimal::{Decimal, RoundingStrategy};

/// Quantize `value` to the symbol's step grid.
///
/// Division is banker's-rounded (midpoint to nearest even) so that repeated
/// quantization of sums never drifts in one direction. A non-positive step
/// returns the value unchanged.
pub fn round_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    let units = (value / step).round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
    (units * step).normalize()
}

/// Convert a percentage (e.g. `2.5`) into a fraction (`0.025`).
pub fn pct(p: Decimal) -> Decimal {
    p / Decimal::ONE_HUNDRED
}

/// True when `a` and `b` agree within one step of the symbol's grid.
/// Used at store boundaries where partial-fill rounding may leave dust.
pub fn within_step(a: Decimal, b: Decimal, step: Decimal) -> bool {
    (a - b).abs() <= step
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_to_step_exact_grid() {
        assert_eq!(round_to_step(dec!(0.00004), dec!(0.00001)), dec!(0.00004));
        assert_eq!(round_to_step(dec!(100), dec!(0.01)), dec!(100));
    }

    #[test]
    fn test_round_to_step_snaps_to_grid() {
        assert_eq!(round_to_step(dec!(0.000043), dec!(0.00001)), dec!(0.00004));
        assert_eq!(round_to_step(dec!(0.000047), dec!(0.00001)), dec!(0.00005));
    }

    #[test]
    fn test_round_to_step_midpoint_goes_to_even() {
        // 0.000035 / 0.00001 = 3.5 → rounds to 4 (even)
        assert_eq!(round_to_step(dec!(0.000035), dec!(0.00001)), dec!(0.00004));
        // 0.000045 / 0.00001 = 4.5 → rounds to 4 (even)
        assert_eq!(round_to_step(dec!(0.000045), dec!(0.00001)), dec!(0.00004));
    }

    #[test]
    fn test_round_to_step_zero_step_passthrough() {
        assert_eq!(round_to_step(dec!(1.23456), Decimal::ZERO), dec!(1.23456));
    }

    #[test]
    fn test_pct() {
        assert_eq!(pct(dec!(2.5)), dec!(0.025));
        assert_eq!(pct(dec!(100)), dec!(1));
    }

    #[test]
    fn test_within_step() {
        assert!(within_step(dec!(1.00001), dec!(1.00002), dec!(0.00001)));
        assert!(!within_step(dec!(1.0), dec!(1.001), dec!(0.00001)));
    }
}
