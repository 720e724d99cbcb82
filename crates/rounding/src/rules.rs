use crate::{Precision, RoundingError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-instrument trading rules. Treated as a read-only snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketRules {
    /// Smallest valid price increment.
    pub price_tick: Decimal,
    /// Smallest valid quantity increment.
    pub lot_size: Decimal,
    pub min_quantity: Decimal,
    pub max_quantity: Option<Decimal>,
    /// Digit counts, computed once from the tick and lot unless the venue
    /// supplied them explicitly.
    pub precision: Precision,
}

impl MarketRules {
    pub fn new(
        price_tick: Decimal,
        lot_size: Decimal,
        min_quantity: Decimal,
        max_quantity: Option<Decimal>,
    ) -> Result<Self, RoundingError> {
        let rules = Self {
            price_tick,
            lot_size,
            min_quantity,
            max_quantity,
            precision: Precision::exact(price_tick, lot_size),
        };
        rules.validate()?;
        Ok(rules)
    }

    /// Replace the derived digit counts with venue-supplied ones.
    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn validate(&self) -> Result<(), RoundingError> {
        if self.price_tick <= Decimal::ZERO {
            return Err(RoundingError::InvalidMarketRules(format!(
                "price tick must be positive, got {}",
                self.price_tick
            )));
        }
        if self.lot_size <= Decimal::ZERO {
            return Err(RoundingError::InvalidMarketRules(format!(
                "lot size must be positive, got {}",
                self.lot_size
            )));
        }
        if self.min_quantity.is_sign_negative() {
            return Err(RoundingError::InvalidMarketRules(format!(
                "minimum quantity must not be negative, got {}",
                self.min_quantity
            )));
        }
        if let Some(max) = self.max_quantity {
            if max < self.min_quantity {
                return Err(RoundingError::InvalidMarketRules(format!(
                    "maximum quantity {} is below minimum {}",
                    max, self.min_quantity
                )));
            }
        }
        Ok(())
    }

    /// Check an already-normalized quantity against the instrument limits.
    ///
    /// The rounding engine never rejects a quantity on its own; the dispatch
    /// layer calls this before sending an order.
    pub fn check_quantity(&self, quantity: Decimal) -> Result<(), QuantityViolation> {
        if quantity.is_zero() {
            return Err(QuantityViolation::ZeroQuantity {
                lot_size: self.lot_size,
            });
        }
        if quantity.is_sign_negative() {
            return Err(QuantityViolation::Negative { quantity });
        }
        if quantity < self.min_quantity {
            return Err(QuantityViolation::BelowMinimum {
                quantity,
                minimum: self.min_quantity,
            });
        }
        match self.max_quantity {
            Some(maximum) if quantity > maximum => {
                Err(QuantityViolation::AboveMaximum { quantity, maximum })
            }
            _ => Ok(()),
        }
    }
}

/// Why a normalized quantity cannot be dispatched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuantityViolation {
    #[error("quantity rounds to zero at lot size {lot_size}")]
    ZeroQuantity { lot_size: Decimal },
    #[error("quantity {quantity} is negative")]
    Negative { quantity: Decimal },
    #[error("quantity {quantity} is below the minimum {minimum}")]
    BelowMinimum { quantity: Decimal, minimum: Decimal },
    #[error("quantity {quantity} is above the maximum {maximum}")]
    AboveMaximum { quantity: Decimal, maximum: Decimal },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_rules_reject_non_positive_steps() {
        assert!(matches!(
            MarketRules::new(dec!(0), dec!(0.001), dec!(0), None),
            Err(RoundingError::InvalidMarketRules(_))
        ));
        assert!(matches!(
            MarketRules::new(dec!(0.01), dec!(-0.001), dec!(0), None),
            Err(RoundingError::InvalidMarketRules(_))
        ));
    }

    #[test]
    fn test_rules_derive_precision() {
        let rules = MarketRules::new(dec!(0.5), dec!(0.001), dec!(0.001), None).unwrap();
        assert_eq!(rules.precision, Precision { price: 1, amount: 3 });
    }

    #[test]
    fn test_check_quantity_limits() {
        let rules =
            MarketRules::new(dec!(0.01), dec!(0.001), dec!(0.01), Some(dec!(100))).unwrap();
        assert!(rules.check_quantity(dec!(1)).is_ok());
        assert!(matches!(
            rules.check_quantity(dec!(0)),
            Err(QuantityViolation::ZeroQuantity { .. })
        ));
        assert!(matches!(
            rules.check_quantity(dec!(0.005)),
            Err(QuantityViolation::BelowMinimum { .. })
        ));
        assert!(matches!(
            rules.check_quantity(dec!(101)),
            Err(QuantityViolation::AboveMaximum { .. })
        ));
    }

    #[test]
    fn test_check_quantity_rejects_negative() {
        let rules = MarketRules::new(dec!(0.01), dec!(0.001), dec!(0.001), None).unwrap();
        assert_eq!(
            rules.check_quantity(dec!(-1.234)),
            Err(QuantityViolation::Negative {
                quantity: dec!(-1.234)
            })
        );
    }
}
