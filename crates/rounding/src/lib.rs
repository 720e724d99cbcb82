//! Order price/quantity normalization against venue trading rules.
//!
//! Everything in this crate is pure decimal arithmetic: no I/O, no
//! suspension points, safe to call from any thread.

pub mod input;
pub mod normalize;
pub mod precision;
pub mod rules;

pub use input::*;
pub use normalize::*;
pub use precision::*;
pub use rules::*;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl std::str::FromStr for Side {
    type Err = RoundingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" | "long" | "bid" => Ok(Side::Buy),
            "sell" | "short" | "ask" => Ok(Side::Sell),
            other => Err(RoundingError::InvalidSide(other.to_string())),
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the rounding engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoundingError {
    #[error("Invalid market rules: {0}")]
    InvalidMarketRules(String),
    #[error("Invalid number: {0}")]
    InvalidNumber(String),
    #[error("Invalid side: {0}")]
    InvalidSide(String),
}

/// Direction used when snapping a value onto a step grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepRounding {
    /// Toward negative infinity.
    Floor,
    /// Toward positive infinity.
    Ceiling,
    /// Toward zero, regardless of sign.
    TowardZero,
}

/// Snap `value` onto a multiple of `step`.
///
/// Uses the exact decimal remainder, so the result is always an exact
/// multiple of `step`. `step` must be positive; callers validate that.
pub fn round_to_step(value: Decimal, step: Decimal, rounding: StepRounding) -> Decimal {
    let rem = value % step;
    if rem.is_zero() {
        return value;
    }
    // `rem` carries the sign of `value`, so this truncates toward zero.
    let truncated = value - rem;
    match rounding {
        StepRounding::TowardZero => truncated,
        StepRounding::Floor if value.is_sign_negative() => truncated - step,
        StepRounding::Floor => truncated,
        StepRounding::Ceiling if value.is_sign_negative() => truncated,
        StepRounding::Ceiling => truncated + step,
    }
}
