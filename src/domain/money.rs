//! Money value types. Prices, payments and caps are [`Amount`]s; totals and
//! resolved earnouts are [`Balance`]s. Totals only grow through
//! [`Balance::checked_add`], so an overflowing sum is an error, never a panic.

use crate::error::DealError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A strictly positive sum of money.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, DealError> {
        if value.is_zero() || value.is_sign_negative() {
            return Err(DealError::ValidationError(format!(
                "Amount must be positive, got {}",
                value.normalize()
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = DealError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.value()
    }
}

/// A running total. May be zero.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Balance(pub Decimal);

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// `self + rhs`, or a `ValidationError` when the total leaves the decimal range.
    pub fn checked_add(self, rhs: Balance) -> Result<Balance, DealError> {
        self.0.checked_add(rhs.0).map(Balance).ok_or_else(|| {
            DealError::ValidationError(format!(
                "Total of {} and {} is out of range",
                self.0.normalize(),
                rhs.0.normalize()
            ))
        })
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Balance(amount.value())
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.normalize(), f)
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.normalize(), f)
    }
}
