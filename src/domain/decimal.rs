//! Lossless money type backed by rust_decimal.
//!
//! Amounts are stored in SQLite as canonical TEXT and rendered in DTOs the same
//! way, so nothing ever passes through a float.

use rust_decimal::Decimal as RustDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lossless decimal numeric type for ledger arithmetic.
///
/// Deserializes from either a JSON string or a JSON number.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Decimal(RustDecimal);

impl Decimal {
    pub fn new(value: RustDecimal) -> Self {
        Decimal(value)
    }

    /// Parse a Decimal from a string losslessly.
    ///
    /// # Errors
    /// Returns an error if the string is not a valid decimal number.
    pub fn from_str_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s.trim()).map(Decimal)
    }

    /// Format without exponent notation and without trailing zeros.
    pub fn to_canonical_string(&self) -> String {
        let normalized = self.0.normalize();
        format!("{}", normalized)
    }

    pub fn inner(&self) -> RustDecimal {
        self.0
    }

    pub fn zero() -> Self {
        Decimal(RustDecimal::ZERO)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the value is > 0.
    pub fn is_positive(&self) -> bool {
        !self.is_zero() && self.0.is_sign_positive()
    }

    /// Returns true if the value is < 0.
    pub fn is_negative(&self) -> bool {
        !self.is_zero() && self.0.is_sign_negative()
    }

    pub fn abs(&self) -> Self {
        Decimal(self.0.abs())
    }

    pub fn hundred() -> Self {
        Decimal(RustDecimal::ONE_HUNDRED)
    }

    /// `None` when the sum is outside the representable range.
    pub fn checked_add(&self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_add(rhs.0).map(Decimal)
    }

    pub fn checked_sub(&self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_sub(rhs.0).map(Decimal)
    }

    pub fn checked_mul(&self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_mul(rhs.0).map(Decimal)
    }

    /// `None` on overflow or division by zero.
    pub fn checked_div(&self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_div(rhs.0).map(Decimal)
    }

    /// Clamps at the representable bounds instead of overflowing.
    pub fn saturating_add(&self, rhs: Decimal) -> Decimal {
        Decimal(self.0.saturating_add(rhs.0))
    }

    /// Round to two decimal places using banker's rounding.
    pub fn round_money(&self) -> Self {
        Decimal(self.0.round_dp(2))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Decimal {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

impl From<RustDecimal> for Decimal {
    fn from(value: RustDecimal) -> Self {
        Decimal(value)
    }
}

impl From<Decimal> for RustDecimal {
    fn from(value: Decimal) -> Self {
        value.0
    }
}

impl From<i64> for Decimal {
    fn from(value: i64) -> Self {
        Decimal(RustDecimal::from(value))
    }
}

impl std::iter::Sum for Decimal {
    fn sum<I: Iterator<Item = Decimal>>(iter: I) -> Self {
        iter.fold(Decimal::zero(), |acc, d| acc.saturating_add(d))
    }
}

impl std::ops::Add for Decimal {
    type Output = Decimal;

    fn add(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Decimal {
    type Output = Decimal;

    fn sub(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 - rhs.0)
    }
}

impl std::ops::Mul for Decimal {
    type Output = Decimal;

    fn mul(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 * rhs.0)
    }
}

impl std::ops::Div for Decimal {
    type Output = Decimal;

    fn div(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 / rhs.0)
    }
}

impl std::ops::Neg for Decimal {
    type Output = Decimal;

    fn neg(self) -> Decimal {
        Decimal(-self.0)
    }
}
