use crate::RoundingError;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Parse a user-supplied number into an exact decimal.
///
/// Accepts plain (`"100.004"`) and scientific (`"1e-3"`) notation.
pub fn parse_decimal(raw: &str) -> Result<Decimal, RoundingError> {
    let trimmed = raw.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| RoundingError::InvalidNumber(raw.to_string()))
}
