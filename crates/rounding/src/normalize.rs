use crate::{round_to_step, MarketRules, RoundingError, Side, StepRounding};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Whether an order opens/extends exposure or only reduces it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPurpose {
    #[default]
    Open,
    /// Reduce-only, take-profit and stop-loss orders.
    Close,
}

/// Which grid prices and quantities are snapped to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepSource {
    /// The instrument's actual tick and lot.
    #[default]
    Tick,
    /// `10^-precision`, as derived in [`MarketRules::precision`]. Coarser
    /// than the tick when the tick is not a power of ten.
    DecimalPlaces,
}

/// A raw order as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderIntent {
    pub side: Side,
    /// `None` for market orders.
    pub raw_price: Option<Decimal>,
    pub raw_quantity: Decimal,
    pub purpose: OrderPurpose,
}

impl OrderIntent {
    pub fn new(side: Side, raw_price: Option<Decimal>, raw_quantity: Decimal) -> Self {
        Self {
            side,
            raw_price,
            raw_quantity,
            purpose: OrderPurpose::Open,
        }
    }

    pub fn closing(mut self) -> Self {
        self.purpose = OrderPurpose::Close;
        self
    }
}

/// Exchange-compliant price and quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedOrder {
    pub price: Option<Decimal>,
    pub quantity: Decimal,
}

/// Rounding direction for a price.
///
/// Opening sells round up and opening buys round down, so the trader never
/// gets a worse limit than requested. A closing buy closes a short and
/// rounds up; a closing sell closes a long and rounds down.
pub fn price_rounding(side: Side, purpose: OrderPurpose) -> StepRounding {
    match (purpose, side) {
        (OrderPurpose::Open, Side::Sell) | (OrderPurpose::Close, Side::Buy) => StepRounding::Ceiling,
        (OrderPurpose::Open, Side::Buy) | (OrderPurpose::Close, Side::Sell) => StepRounding::Floor,
    }
}

/// Normalize an opening order onto the instrument's tick and lot grid.
///
/// Quantity is always rounded toward zero. A quantity that rounds to zero is
/// returned as zero; use [`MarketRules::check_quantity`] before dispatch.
pub fn normalize(
    rules: &MarketRules,
    price: Option<Decimal>,
    quantity: Decimal,
    side: Side,
) -> Result<NormalizedOrder, RoundingError> {
    normalize_intent(rules, &OrderIntent::new(side, price, quantity))
}

pub fn normalize_intent(
    rules: &MarketRules,
    intent: &OrderIntent,
) -> Result<NormalizedOrder, RoundingError> {
    normalize_with(rules, intent, StepSource::Tick)
}

pub fn normalize_with(
    rules: &MarketRules,
    intent: &OrderIntent,
    source: StepSource,
) -> Result<NormalizedOrder, RoundingError> {
    rules.validate()?;

    let (price_step, lot_step) = match source {
        StepSource::Tick => (rules.price_tick, rules.lot_size),
        StepSource::DecimalPlaces => (
            rules.precision.price_step(),
            rules.precision.amount_step(),
        ),
    };

    let price = intent
        .raw_price
        .map(|p| round_to_step(p, price_step, price_rounding(intent.side, intent.purpose)));
    let quantity = round_to_step(intent.raw_quantity, lot_step, StepRounding::TowardZero);

    Ok(NormalizedOrder { price, quantity })
}
