//! Fixed-point arithmetic and mathematical utilities.
//!
//! All amounts, prices and ratios in the engine are [`FixedPoint`] values
//! with 18 decimals stored in a 256-bit integer. Every operation is
//! checked: overflow, underflow and division by zero surface as errors
//! instead of wrapping or panicking.

use std::fmt;
use std::str::FromStr;

use primitive_types::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::utils::constants::{DECIMALS, NICR_PRECISION, PRECISION};

// ═══════════════════════════════════════════════════════════════════════════════
// FIXED POINT TYPE
// ═══════════════════════════════════════════════════════════════════════════════

/// Fixed-point number with 18 decimal places precision
/// Used for precise calculations without floating-point errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FixedPoint(U256);

impl FixedPoint {
    /// Zero value
    pub const ZERO: Self = Self(U256([0, 0, 0, 0]));

    /// One (1.0)
    pub const ONE: Self = Self(U256([PRECISION as u64, 0, 0, 0]));

    /// Largest representable value, used as the ratio of a debt-free position
    pub const MAX: Self = Self(U256::MAX);

    /// Scale factor: 10^18
    pub fn scale() -> U256 {
        U256::from(PRECISION)
    }

    /// Create a new FixedPoint from raw value
    pub const fn from_raw(raw: U256) -> Self {
        Self(raw)
    }

    /// Create from a raw u128 value
    pub fn from_raw_u128(raw: u128) -> Self {
        Self(U256::from(raw))
    }

    /// Create from an integer (scales up)
    pub fn from_integer(value: u64) -> Self {
        Self(U256::from(value) * Self::scale())
    }

    /// Create from percentage (110 = 1.1)
    pub fn from_percentage(pct: u64) -> Self {
        Self(U256::from(pct) * Self::scale() / U256::from(100u8))
    }

    /// Create from a ratio of two integers, rounding down
    pub fn from_ratio(numerator: u64, denominator: u64) -> Result<Self> {
        let raw = mul_div(
            U256::from(numerator),
            Self::scale(),
            U256::from(denominator),
            "from_ratio",
        )?;
        Ok(Self(raw))
    }

    /// Get the raw underlying value
    pub fn raw(&self) -> U256 {
        self.0
    }

    /// Check if value is zero
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Checked addition
    pub fn checked_add(self, rhs: Self) -> Result<Self> {
        add(self.0, rhs.0, "fixed add").map(Self)
    }

    /// Checked subtraction
    pub fn checked_sub(self, rhs: Self) -> Result<Self> {
        sub(self.0, rhs.0, "fixed sub").map(Self)
    }

    /// Checked multiplication, rounding down
    pub fn checked_mul(self, rhs: Self) -> Result<Self> {
        mul_div(self.0, rhs.0, Self::scale(), "fixed mul").map(Self)
    }

    /// Checked division, rounding down
    pub fn checked_div(self, rhs: Self) -> Result<Self> {
        mul_div(self.0, Self::scale(), rhs.0, "fixed div").map(Self)
    }

    /// `self * numerator / denominator` with a single rounding step
    pub fn mul_div(self, numerator: Self, denominator: Self) -> Result<Self> {
        mul_div(self.0, numerator.0, denominator.0, "fixed mul_div").map(Self)
    }

    /// Divide by an integer
    pub fn div_integer(self, divisor: u64) -> Result<Self> {
        if divisor == 0 {
            return Err(Error::DivisionByZero {
                operation: "fixed div_integer".into(),
            });
        }
        Ok(Self(self.0 / U256::from(divisor)))
    }

    /// Saturating subtraction
    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Minimum of two values
    pub fn min(self, other: Self) -> Self {
        if self <= other { self } else { other }
    }

    /// Maximum of two values
    pub fn max(self, other: Self) -> Self {
        if self >= other { self } else { other }
    }

    /// Absolute difference of two values
    pub fn abs_diff(self, other: Self) -> Self {
        if self >= other {
            Self(self.0 - other.0)
        } else {
            Self(other.0 - self.0)
        }
    }
}

impl fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scale = Self::scale();
        let integer = self.0 / scale;
        let fraction = self.0 % scale;
        if fraction.is_zero() {
            return write!(f, "{}", integer);
        }
        let digits = format!("{:0>width$}", fraction.to_string(), width = DECIMALS as usize);
        write!(f, "{}.{}", integer, digits.trim_end_matches('0'))
    }
}

impl FromStr for FixedPoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidParameter {
            name: "fixed point".into(),
            reason: format!("{:?}: {}", s, reason),
        };

        let s = s.trim();
        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid("empty"));
        }
        if frac_part.len() > DECIMALS as usize {
            return Err(invalid("more than 18 decimals"));
        }
        if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid("not a decimal number"));
        }

        let integer = if int_part.is_empty() {
            U256::zero()
        } else {
            U256::from_dec_str(int_part).map_err(|_| invalid("integer part overflows"))?
        };
        let padded = format!("{:0<width$}", frac_part, width = DECIMALS as usize);
        let fraction = U256::from_dec_str(&padded).map_err(|_| invalid("bad fraction"))?;

        let raw = integer
            .checked_mul(Self::scale())
            .and_then(|v| v.checked_add(fraction))
            .ok_or_else(|| invalid("overflows 256 bits"))?;
        Ok(Self(raw))
    }
}

impl Serialize for FixedPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FixedPoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SAFE ARITHMETIC OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Safe addition with overflow check
pub fn add(a: U256, b: U256, operation: &str) -> Result<U256> {
    a.checked_add(b).ok_or_else(|| Error::Overflow {
        operation: format!("{}: {} + {}", operation, a, b),
    })
}

/// Safe subtraction with underflow check
pub fn sub(a: U256, b: U256, operation: &str) -> Result<U256> {
    a.checked_sub(b).ok_or_else(|| Error::Underflow {
        operation: format!("{}: {} - {}", operation, a, b),
    })
}

/// Safe multiplication with overflow check
pub fn mul(a: U256, b: U256, operation: &str) -> Result<U256> {
    a.checked_mul(b).ok_or_else(|| Error::Overflow {
        operation: format!("{}: {} * {}", operation, a, b),
    })
}

/// Safe division with zero check
pub fn div(a: U256, b: U256, operation: &str) -> Result<U256> {
    if b.is_zero() {
        return Err(Error::DivisionByZero {
            operation: operation.to_string(),
        });
    }
    Ok(a / b)
}

/// Computes (a * b) / c, rounding down
pub fn mul_div(a: U256, b: U256, c: U256, operation: &str) -> Result<U256> {
    div(mul(a, b, operation)?, c, operation)
}

/// Computes (a * b) / c, rounding up
pub fn mul_div_up(a: U256, b: U256, c: U256, operation: &str) -> Result<U256> {
    let numerator = mul(a, b, operation)?;
    let quotient = div(numerator, c, operation)?;
    if (numerator % c).is_zero() {
        Ok(quotient)
    } else {
        add(quotient, U256::one(), operation)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RATIO CALCULATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Collateralization ratio: `coll * price / debt`
///
/// A position without debt has an infinite ratio, represented as
/// [`FixedPoint::MAX`].
pub fn compute_cr(coll: FixedPoint, debt: FixedPoint, price: FixedPoint) -> Result<FixedPoint> {
    if debt.is_zero() {
        return Ok(FixedPoint::MAX);
    }
    coll.mul_div(price, debt)
}

/// Price-independent ratio used to order positions: `coll * 1e20 / debt`
pub fn compute_nominal_cr(coll: FixedPoint, debt: FixedPoint) -> Result<U256> {
    if debt.is_zero() {
        return Ok(U256::MAX);
    }
    mul_div(coll.raw(), U256::from(NICR_PRECISION), debt.raw(), "nominal cr")
}
