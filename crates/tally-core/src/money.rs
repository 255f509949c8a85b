//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                         │
//! │                                                                     │
//! │  In floating point:                                                 │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                       │
//! │                                                                     │
//! │  OUR SOLUTION: Integer Minor Units                                  │
//! │    Every value in the ledger, the orders and the bonus engine is    │
//! │    an i64 count of the smallest currency unit. Discounts use one    │
//! │    shared truncating formula so the settlement and bonus paths      │
//! │    never drift apart by a unit.                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit.
///
/// ## Design Decisions
/// - **i64 (signed)**: balances may legitimately go negative
/// - **Single field tuple struct**: zero-cost abstraction over i64
/// - **Derives**: full serde support for JSON serialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from minor currency units.
    #[inline]
    pub const fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    /// Returns the value in minor currency units.
    #[inline]
    pub const fn minor(&self) -> i64 {
        self.0
    }

    /// Zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies a unit price by a line amount.
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::money::Money;
    ///
    /// let unit_price = Money::from_minor(120);
    /// assert_eq!(unit_price.line_total(20).minor(), 2400);
    /// ```
    #[inline]
    pub const fn line_total(&self, amount: i64) -> Self {
        Money(self.0 * amount)
    }

    /// Applies a percentage discount with integer truncation.
    ///
    /// ## Semantics
    /// `value * (100 - percent) / 100`, truncated toward zero. This is the
    /// single formula shared by order-line pricing and the bonus engine;
    /// both sides must agree on the lost fraction or the ledger drifts by
    /// a unit per settlement.
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::money::Money;
    ///
    /// // 150 at 5% discount: 150 * 95 / 100 = 142 (142.5 truncated)
    /// let price = Money::from_minor(150);
    /// assert_eq!(price.apply_discount_percent(5).minor(), 142);
    ///
    /// // Discount of 0 means full price
    /// assert_eq!(price.apply_discount_percent(0).minor(), 150);
    /// ```
    pub fn apply_discount_percent(&self, percent: i64) -> Money {
        // i128 intermediate prevents overflow on large amounts
        let kept = self.0 as i128 * (100 - percent) as i128 / 100;
        Money(kept as i64)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Display shows the value as major.minor for debugging.
/// Actual UI formatting happens outside this workspace.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, (self.0 / 100).abs(), (self.0 % 100).abs())
    }
}

/// Default money is zero.
impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

/// Multiplication by i64 (for amount calculations).
impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, amount: i64) -> Self {
        Money(self.0 * amount)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
