//! Conversion between display units (fractional currency) and the integer
//! base unit the ledger stores.
//!
//! Both directions go through the exact decimal value instead of `f64`
//! arithmetic. `to_base_units` takes the exact value of the float, scales it by
//! 10^9 and rounds half away from zero. `to_display_units` returns the float
//! nearest to the exact quotient. Presentation rounding is left to
//! [`format_display`].

use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};

pub type Lamports = u64;

pub const LAMPORTS_PER_UNIT: u64 = 1_000_000_000; // 1 unit = 1e9 base units
pub const DISPLAY_DECIMALS: usize = 9;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AmountError {
    #[error("amount is not a finite number")]
    NotFinite,
    #[error("amount must not be negative: {0}")]
    Negative(f64),
    /// The rounded amount exceeds `u64::MAX` base units.
    #[error("amount {0} does not fit in base units")]
    Overflow(f64),
}

pub fn to_base_units(display: f64) -> Result<Lamports, AmountError> {
    if !display.is_finite() {
        return Err(AmountError::NotFinite);
    }
    if display < 0.0 {
        return Err(AmountError::Negative(display));
    }
    let exact = Decimal::from_f64_retain(display).ok_or(AmountError::Overflow(display))?;
    exact
        .checked_mul(Decimal::from(LAMPORTS_PER_UNIT))
        .map(|scaled| scaled.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|rounded| rounded.to_u64())
        .ok_or(AmountError::Overflow(display))
}

pub fn to_display_units(base: Lamports) -> f64 {
    // `base as f64 / 1e9` rounds twice; parsing the exact decimal rounds once.
    format_display(base)
        .parse()
        .unwrap_or(base as f64 / LAMPORTS_PER_UNIT as f64)
}

/// Exact decimal rendering of a base-unit amount, trailing zeros trimmed.
pub fn format_display(base: Lamports) -> String {
    let whole = base / LAMPORTS_PER_UNIT;
    let frac = base % LAMPORTS_PER_UNIT;
    if frac == 0 {
        return whole.to_string();
    }
    let digits = format!("{frac:0width$}", width = DISPLAY_DECIMALS);
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::{rngs::StdRng, Rng, SeedableRng};

    // Largest whole number of cents that still fits in base units.
    const MAX_CENTS: u64 = u64::MAX / (LAMPORTS_PER_UNIT / 100);

    #[test]
    fn two_decimal_amounts_roundtrip_exactly() {
        let mut rng = StdRng::seed_from_u64(99);
        let sampled = (0..100_000).map(|_| rng.gen_range(0..=MAX_CENTS));
        let edges = [0, 1, 10, 99, 100_000_000_000, 1_136_375_739_044, MAX_CENTS];
        for cents in (0..=10_000u64).chain(edges).chain(sampled) {
            let x = cents as f64 / 100.0;
            let back = to_display_units(to_base_units(x).unwrap());
            assert_eq!(back, x, "cents={cents}");
        }
    }

    #[test]
    fn arbitrary_precision_loses_at_most_one_base_unit() {
        let mut rng = StdRng::seed_from_u64(1234);
        let max_display = u64::MAX as f64 / LAMPORTS_PER_UNIT as f64;
        for i in 0..100_000 {
            // Alternate uniform and log-uniform draws so every magnitude is hit.
            let x: f64 = if i % 2 == 0 {
                rng.gen_range(0.0..max_display)
            } else {
                10f64.powf(rng.gen_range(-9.0..10.0))
            };
            let back = to_display_units(to_base_units(x).unwrap());
            assert!((back - x).abs() <= 1e-9, "x={x} back={back}");
        }
        for x in [9_009_662.78, 9_007_199.254740991, 16_777_215.999999999] {
            let back = to_display_units(to_base_units(x).unwrap());
            assert!((back - x).abs() <= 1e-9, "x={x} back={back}");
        }
    }

    #[test]
    fn rounds_to_nearest_base_unit() {
        assert_eq!(to_base_units(1.6e-9).unwrap(), 2);
        assert_eq!(to_base_units(1.4e-9).unwrap(), 1);
        assert_eq!(to_base_units(0.75e-9).unwrap(), 1);
        assert_eq!(to_base_units(0.1).unwrap(), 100_000_000);
        assert_eq!(to_base_units(0.29).unwrap(), 290_000_000);
        assert_eq!(to_base_units(10.0).unwrap(), 10 * LAMPORTS_PER_UNIT);
    }

    #[test]
    fn rejects_unrepresentable_amounts() {
        assert_eq!(to_base_units(f64::NAN), Err(AmountError::NotFinite));
        assert_eq!(to_base_units(f64::INFINITY), Err(AmountError::NotFinite));
        assert_eq!(to_base_units(-1.0), Err(AmountError::Negative(-1.0)));
        assert_eq!(
            to_base_units(18_446_744_073.0).unwrap(),
            18_446_744_073 * LAMPORTS_PER_UNIT
        );
        assert_eq!(
            to_base_units(18_446_744_074.0),
            Err(AmountError::Overflow(18_446_744_074.0))
        );
        assert!(matches!(to_base_units(1e12), Err(AmountError::Overflow(_))));
        assert!(matches!(to_base_units(1e40), Err(AmountError::Overflow(_))));
    }

    #[test]
    fn display_units_are_the_nearest_float() {
        assert_eq!(to_display_units(11_363_757_390_440_000_000), 11_363_757_390.44);
        assert_eq!(to_display_units(u64::MAX), 18_446_744_073.709551615);
        assert_eq!(to_display_units(1), 1e-9);
    }

    #[test]
    fn formats_exact_decimals() {
        assert_eq!(format_display(0), "0");
        assert_eq!(format_display(100_000_000), "0.1");
        assert_eq!(format_display(10 * LAMPORTS_PER_UNIT), "10");
        assert_eq!(format_display(1_000_000_001), "1.000000001");
    }
}
