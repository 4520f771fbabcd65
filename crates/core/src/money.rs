use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of fractional digits every amount carries.
pub const MONEY_SCALE: u32 = 2;

/// An exact base-10 monetary amount with exactly two fractional digits.
///
/// Construction never rounds: a value that needs more than two significant
/// fractional digits is rejected instead of being quietly altered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("amount {0} has more than two fractional digits")]
    Precision(Decimal),
    #[error("amount out of range")]
    Overflow,
    #[error("not a decimal number: {0}")]
    Syntax(String),
}

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Money(Decimal::new(cents, MONEY_SCALE))
    }

    pub fn to_cents(self) -> Result<i64, MoneyError> {
        self.0
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|cents| cents.to_i64())
            .ok_or(MoneyError::Overflow)
    }

    /// Rejects sub-cent precision and values whose cents do not fit in `i64`.
    pub fn from_decimal(decimal: Decimal) -> Result<Self, MoneyError> {
        let mut value = decimal.normalize();
        if value.scale() > MONEY_SCALE {
            return Err(MoneyError::Precision(decimal));
        }
        value.rescale(MONEY_SCALE);
        let money = Money(value);
        money.to_cents()?;
        Ok(money)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    /// Parses the canonical form (`-1234.56`). Locale-specific text goes
    /// through the importer's amount parser instead.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal = Decimal::from_str(s.trim()).map_err(|_| MoneyError::Syntax(s.to_string()))?;
        Money::from_decimal(decimal)
    }
}

impl TryFrom<Decimal> for Money {
    type Error = MoneyError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Money::from_decimal(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.0
    }
}
