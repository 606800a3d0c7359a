use crate::error::{Result, SettlementError};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// A monetary value in the settlement currency.
///
/// Wraps `rust_decimal::Decimal` so fee arithmetic never touches floating point.
/// Values produced by the fee rules are always rounded half-up to cents.
/// Deserialized values are bounded by [`Money::LIMIT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

/// A strictly positive amount with at most two decimal places, capped at
/// [`Amount::MAX`].
///
/// Used for every externally supplied price (quote totals, supplements, comparisons).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Money {
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Largest magnitude accepted from callers or produced by checked arithmetic.
    pub const LIMIT: Decimal = dec!(1000000000000.00);

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn bounded(value: Decimal) -> Result<Self> {
        if value.abs() > Self::LIMIT {
            return Err(SettlementError::Validation(format!(
                "Amount must not exceed {}",
                Self::LIMIT
            )));
        }
        Ok(Self(value))
    }

    pub fn checked_add(self, rhs: Self) -> Result<Self> {
        self.0
            .checked_add(rhs.0)
            .ok_or_else(overflow)
            .and_then(Self::bounded)
    }

    pub fn checked_sub(self, rhs: Self) -> Result<Self> {
        self.0
            .checked_sub(rhs.0)
            .ok_or_else(overflow)
            .and_then(Self::bounded)
    }

    /// `percent` of this value rounded to cents, failing instead of overflowing.
    pub fn checked_percent(self, percent: Decimal) -> Result<Self> {
        self.0
            .checked_mul(percent)
            .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
            .ok_or_else(overflow)
            .and_then(Self::bounded)
            .map(Self::round2)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Round half-up (away from zero) to cents.
    pub fn round2(self) -> Self {
        Self(
            self.0
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// `percent` of this value, rounded to cents.
    pub fn percent(self, percent: Decimal) -> Self {
        Self(self.0 * percent / Decimal::ONE_HUNDRED).round2()
    }

    /// Value in minor units (cents), as gateways expect.
    pub fn to_minor_units(self) -> Result<i64> {
        (self.round2().0 * Decimal::ONE_HUNDRED)
            .to_i64()
            .ok_or_else(|| SettlementError::Validation(format!("Amount {} out of range", self)))
    }

    pub fn from_minor_units(units: i64) -> Self {
        Self(Decimal::new(units, 2))
    }
}

fn overflow() -> SettlementError {
    SettlementError::Validation("Amount is too large".to_string())
}

impl TryFrom<Decimal> for Money {
    type Error = SettlementError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::bounded(value)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl Amount {
    pub const MAX: Decimal = dec!(1000000000.00);

    pub fn new(value: Decimal) -> Result<Self> {
        if value <= Decimal::ZERO {
            return Err(SettlementError::Validation(
                "Amount must be positive".to_string(),
            ));
        }
        if value > Self::MAX {
            return Err(SettlementError::Validation(format!(
                "Amount must not exceed {}",
                Self::MAX
            )));
        }
        if value.round_dp(2) != value {
            return Err(SettlementError::Validation(
                "Amount must not have more than two decimal places".to_string(),
            ));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn money(&self) -> Money {
        Money(self.0)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = SettlementError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Money {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}
