//! Fixed-point currency amounts.
//!
//! Amounts travel over the wire as decimal strings (`"1234.50"`). They are
//! parsed exactly into integer minor units and only turned back into a
//! string at the presentation boundary.

use std::fmt;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

const MINOR_UNITS_PER_MAJOR: i64 = 100;
const MINOR_UNIT_SCALE: u32 = 2;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money {
    minor_units: i64,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("`{0}` is not a decimal amount")]
    Malformed(String),
    #[error("`{0}` has more than two decimal places")]
    SubMinorPrecision(String),
    #[error("`{0}` is outside the supported amount range")]
    OutOfRange(String),
    #[error("amount total overflowed")]
    Overflow,
}

impl Money {
    pub const ZERO: Self = Self { minor_units: 0 };

    pub const fn from_minor_units(minor_units: i64) -> Self {
        Self { minor_units }
    }

    pub const fn minor_units(self) -> i64 {
        self.minor_units
    }

    pub fn parse(raw: &str) -> Result<Self, MoneyError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(MoneyError::Malformed(raw.to_owned()));
        }

        let decimal =
            Decimal::from_str_exact(trimmed).map_err(|_| MoneyError::Malformed(raw.to_owned()))?;
        Self::from_decimal(decimal).map_err(|error| match error {
            MoneyError::SubMinorPrecision(_) => MoneyError::SubMinorPrecision(raw.to_owned()),
            _ => MoneyError::OutOfRange(raw.to_owned()),
        })
    }

    pub fn from_decimal(decimal: Decimal) -> Result<Self, MoneyError> {
        let scaled = decimal
            .checked_mul(Decimal::from(MINOR_UNITS_PER_MAJOR))
            .ok_or_else(|| MoneyError::OutOfRange(decimal.to_string()))?;
        if !scaled.fract().is_zero() {
            return Err(MoneyError::SubMinorPrecision(decimal.to_string()));
        }

        scaled
            .trunc()
            .to_i64()
            .map(Self::from_minor_units)
            .ok_or_else(|| MoneyError::OutOfRange(decimal.to_string()))
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.minor_units, MINOR_UNIT_SCALE)
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.minor_units.checked_add(other.minor_units).map(Self::from_minor_units)
    }

    pub fn is_negative(self) -> bool {
        self.minor_units < 0
    }

    /// Exact sum of `amounts`; `Overflow` instead of wrapping.
    pub fn try_sum<I>(amounts: I) -> Result<Self, MoneyError>
    where
        I: IntoIterator<Item = Self>,
    {
        amounts
            .into_iter()
            .try_fold(Self::ZERO, |total, amount| total.checked_add(amount))
            .ok_or(MoneyError::Overflow)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.minor_units < 0 { "-" } else { "" };
        let magnitude = self.minor_units.unsigned_abs();
        let per_major = MINOR_UNITS_PER_MAJOR.unsigned_abs();
        write!(f, "{sign}{}.{:02}", magnitude / per_major, magnitude % per_major)
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl Serialize for Money {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(MoneyVisitor)
    }
}

struct MoneyVisitor;

impl Visitor<'_> for MoneyVisitor {
    type Value = Money;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a decimal amount with at most two decimal places")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Money::parse(value).map_err(E::custom)
    }

    fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Money::from_decimal(Decimal::from(value)).map_err(E::custom)
    }

    fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Money::from_decimal(Decimal::from(value)).map_err(E::custom)
    }

    // Shortest round-trip repr, so `10.1` arrives as "10.1" rather than its binary expansion.
    fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Money::parse(&value.to_string()).map_err(E::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::{Money, MoneyError};

    #[test]
    fn parses_decimal_strings_into_minor_units() {
        assert_eq!(Money::parse("500.00").expect("parse").minor_units(), 50_000);
        assert_eq!(Money::parse("0.05").expect("parse").minor_units(), 5);
        assert_eq!(Money::parse(" 12 ").expect("parse").minor_units(), 1_200);
        assert_eq!(Money::parse("-3.5").expect("parse").minor_units(), -350);
    }

    #[test]
    fn rejects_sub_cent_precision_and_garbage() {
        assert!(matches!(Money::parse("1.005"), Err(MoneyError::SubMinorPrecision(_))));
        assert!(matches!(Money::parse("ten"), Err(MoneyError::Malformed(_))));
        assert!(matches!(Money::parse(""), Err(MoneyError::Malformed(_))));
        assert_eq!(Money::parse("1.500").expect("trailing zeros are exact").minor_units(), 150);
    }

    #[test]
    fn sums_without_floating_point_drift() {
        let amounts = ["10.10", "0.05", "0.00"]
            .into_iter()
            .map(|raw| Money::parse(raw).expect("parse"))
            .collect::<Vec<_>>();

        let total = Money::try_sum(amounts).expect("sum");
        assert_eq!(total.to_string(), "10.15");
    }

    #[test]
    fn sum_reports_overflow() {
        let result = Money::try_sum([Money::from_minor_units(i64::MAX), Money::from_minor_units(1)]);
        assert_eq!(result, Err(MoneyError::Overflow));
    }

    #[test]
    fn formats_negative_and_small_amounts() {
        assert_eq!(Money::from_minor_units(-7).to_string(), "-0.07");
        assert_eq!(Money::from_minor_units(123_456).to_string(), "1234.56");
        assert_eq!(Money::ZERO.to_string(), "0.00");
    }

    #[test]
    fn serde_accepts_strings_and_numbers() {
        let from_string: Money = serde_json::from_str("\"19.99\"").expect("string");
        let from_int: Money = serde_json::from_str("20").expect("int");
        let from_float: Money = serde_json::from_str("10.1").expect("float");

        assert_eq!(from_string.minor_units(), 1_999);
        assert_eq!(from_int.minor_units(), 2_000);
        assert_eq!(from_float.minor_units(), 1_010);
        assert_eq!(serde_json::to_string(&from_string).expect("serialize"), "\"19.99\"");
    }
}
