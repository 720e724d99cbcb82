use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Decimal digit counts for an instrument's price and amount.
///
/// Negative digit counts are legal and mean a step coarser than one unit
/// (e.g. `-1` is a step of 10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Precision {
    pub price: i32,
    pub amount: i32,
}

impl Precision {
    /// Derive digit counts exactly from the decimal representation of the
    /// tick and lot.
    pub fn exact(price_tick: Decimal, lot_size: Decimal) -> Self {
        Self {
            price: exact_decimal_places(price_tick),
            amount: exact_decimal_places(lot_size),
        }
    }

    /// Derive digit counts as `trunc(-log10(step))`, the way the venue
    /// adapter historically did. Only exact for power-of-ten steps.
    pub fn legacy_log10(price_tick: Decimal, lot_size: Decimal) -> Self {
        Self {
            price: legacy_decimal_places(price_tick),
            amount: legacy_decimal_places(lot_size),
        }
    }

    /// The price step implied by the digit count (`10^-price`).
    pub fn price_step(&self) -> Decimal {
        step_from_places(self.price)
    }

    /// The amount step implied by the digit count (`10^-amount`).
    pub fn amount_step(&self) -> Decimal {
        step_from_places(self.amount)
    }
}

/// Number of fractional digits needed to write `step` exactly.
///
/// For steps of 10 or more, returns the negated count of trailing zeros of
/// the integer part, so `exact_decimal_places(100) == -2`.
pub fn exact_decimal_places(step: Decimal) -> i32 {
    let normalized = step.normalize();
    let scale = normalized.scale() as i32;
    if scale > 0 {
        return scale;
    }
    let mut mantissa = normalized.mantissa().abs();
    if mantissa == 0 {
        return 0;
    }
    let mut zeros = 0;
    while mantissa % 10 == 0 {
        mantissa /= 10;
        zeros += 1;
    }
    -zeros
}

/// `trunc(-log10(step))` computed in binary floating point.
pub fn legacy_decimal_places(step: Decimal) -> i32 {
    match step.to_f64() {
        Some(value) if value > 0.0 => (-value.log10()).trunc() as i32,
        _ => 0,
    }
}

/// Whether `step` is an integral power of ten (0.01, 1, 100, ...).
pub fn is_power_of_ten(step: Decimal) -> bool {
    if step <= Decimal::ZERO {
        return false;
    }
    let mut mantissa = step.normalize().mantissa();
    while mantissa % 10 == 0 {
        mantissa /= 10;
    }
    mantissa == 1
}

/// A step whose exact and legacy digit derivations disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionDiscrepancy {
    pub step: Decimal,
    pub exact: i32,
    pub legacy: i32,
}

/// Report when the legacy logarithmic derivation would round `step` to a
/// different grid than the step itself.
pub fn precision_discrepancy(step: Decimal) -> Option<PrecisionDiscrepancy> {
    if is_power_of_ten(step) {
        return None;
    }
    Some(PrecisionDiscrepancy {
        step,
        exact: exact_decimal_places(step),
        legacy: legacy_decimal_places(step),
    })
}

fn step_from_places(places: i32) -> Decimal {
    if places >= 0 {
        Decimal::new(1, places.min(28) as u32)
    } else {
        let mut step = Decimal::ONE;
        for _ in 0..(-places).min(28) {
            step *= Decimal::TEN;
        }
        step
    }
}
