//! Monetary amounts in minor units (cents).
//!
//! Prices are stored as integer cents so that bounds comparisons and audit rows are exact.
//! Multiplicative adjustments go through `f64` and are rounded back to cents exactly once.

use core::fmt;
use core::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

use crate::value_object::ValueObject;

/// Tolerance applied when a scaled amount lands within float noise of a cent boundary.
const CENT_EPSILON: f64 = 1e-6;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Convert a major-unit amount (e.g. `210.5`) to cents, rounding half away from zero.
    pub fn from_major(amount: f64) -> Self {
        Self((amount * 100.0).round() as i64)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub fn as_major(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Multiply by `factor`, rounding to the nearest cent.
    pub fn scale(self, factor: f64) -> Self {
        Self((self.0 as f64 * factor).round() as i64)
    }

    /// Multiply by `factor`, rounding up (used for price floors).
    pub fn scale_ceil(self, factor: f64) -> Self {
        Self((self.0 as f64 * factor - CENT_EPSILON).ceil() as i64)
    }

    /// Multiply by `factor`, rounding down (used for price ceilings).
    pub fn scale_floor(self, factor: f64) -> Self {
        Self((self.0 as f64 * factor + CENT_EPSILON).floor() as i64)
    }

    pub fn clamp_to(self, floor: Money, ceiling: Money) -> Self {
        if self < floor {
            floor
        } else if self > ceiling {
            ceiling
        } else {
            self
        }
    }

    /// Relative change from `self` to `other` in percent. Zero when `self` is zero.
    pub fn percent_change_to(self, other: Money) -> f64 {
        if self.0 == 0 {
            return 0.0;
        }
        (other.0 - self.0) as f64 / self.0 as f64 * 100.0
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl ValueObject for Money {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn occupancy_steps_round_to_expected_cents() {
        let base = Money::from_major(200.0);
        let up = base.scale(1.05);
        assert_eq!(up.cents(), 21_000);
        assert_eq!(up.scale(0.97).cents(), 20_370);
        assert_eq!(up.scale(0.97).to_string(), "203.70");
    }

    #[test]
    fn bounds_scaling_is_exact_on_whole_factors() {
        let base = Money::from_cents(20_000);
        assert_eq!(base.scale_ceil(0.8).cents(), 16_000);
        assert_eq!(base.scale_floor(1.5).cents(), 30_000);
    }

    #[test]
    fn display_handles_negative_amounts() {
        assert_eq!(Money::from_cents(-705).to_string(), "-7.05");
        assert_eq!(Money::ZERO.to_string(), "0.00");
    }

    #[test]
    fn serializes_as_integer_cents() {
        let json = serde_json::to_string(&Money::from_cents(12_345)).unwrap();
        assert_eq!(json, "12345");
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn floor_never_exceeds_ceiling(cents in 1i64..10_000_000, min in 0.01f64..1.0, max in 1.0f64..5.0) {
            let base = Money::from_cents(cents);
            prop_assert!(base.scale_ceil(min) <= base.scale_floor(max));
        }

        #[test]
        fn clamp_stays_within_bounds(value in -1_000_000i64..1_000_000, lo in 0i64..1000, span in 0i64..1000) {
            let floor = Money::from_cents(lo);
            let ceiling = Money::from_cents(lo + span);
            let clamped = Money::from_cents(value).clamp_to(floor, ceiling);
            prop_assert!(clamped >= floor && clamped <= ceiling);
        }
    }
}
