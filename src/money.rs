//! Monetary amounts.
//!
//! The API exchanges money as decimal strings (`"49.90"`) and stores integer
//! cents. Parsing goes through `BigDecimal` so values like `"0.1"` never pick
//! up binary floating point error.

use bigdecimal::{BigDecimal, ToPrimitive};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::errors::AppError;

/// Largest accepted amount: ten billion in currency units.
pub const MAX_CENTS: i64 = 1_000_000_000_000;

/// Parses a non-negative decimal string with at most two fractional digits
/// into cents.
pub fn parse_amount(raw: &str) -> Result<i64, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest("Amount cannot be empty".to_string()));
    }
    if trimmed.contains(['e', 'E']) {
        return Err(AppError::BadRequest(format!(
            "Invalid amount '{}': exponent notation is not accepted",
            raw
        )));
    }

    let value = BigDecimal::from_str(trimmed)
        .map_err(|_| AppError::BadRequest(format!("Invalid amount '{}'", raw)))?;

    if value < BigDecimal::from(0) {
        return Err(AppError::BadRequest(format!(
            "Amount cannot be negative: {}",
            raw
        )));
    }

    let (_, scale) = value.as_bigint_and_exponent();
    if scale > 2 {
        return Err(AppError::BadRequest(format!(
            "Amount '{}' has more than two decimal places",
            raw
        )));
    }

    let cents = (value * BigDecimal::from(100))
        .to_i64()
        .filter(|c| *c <= MAX_CENTS)
        .ok_or_else(|| AppError::BadRequest(format!("Amount '{}' is too large", raw)))?;

    Ok(cents)
}

/// Renders cents as a decimal string with exactly two fractional digits.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Cents that travel over the wire as a decimal string and sit in `BIGINT`
/// columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, sqlx::Type)]
#[sqlx(transparent)]
pub struct Money(pub i64);

impl Money {
    pub fn cents(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_cents(self.0))
    }
}

impl FromStr for Money {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_amount(s).map(Money)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_cents(self.0))
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_amount(&raw)
            .map(Money)
            .map_err(|e| serde::de::Error::custom(e.to_string()))
    }
}
