//! Venue records to unified exchange records.

use chrono::Utc;
use ethereal_core::*;
use ethereal_rounding::{precision_discrepancy, RoundingError, StepSource};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

/// Funding intervals per year at one interval per hour.
const HOURS_PER_YEAR: i64 = 24 * 365;

fn raw<T: Serialize>(record: &T) -> serde_json::Value {
    serde_json::to_value(record).unwrap_or(serde_json::Value::Null)
}

/// Build a linear perpetual market from a venue product.
///
/// With [`StepSource::DecimalPlaces`] the rules carry the legacy digit counts
/// so that normalization snaps to `10^-digits`.
pub fn market_from_product(product: &Product, step_source: StepSource) -> Result<Market, RoundingError> {
    let mut rules = MarketRules::new(
        product.tick_size,
        product.lot_size,
        product.min_quantity,
        product.max_quantity,
    )?;

    for step in [product.tick_size, product.lot_size] {
        if let Some(d) = precision_discrepancy(step) {
            warn!(
                ticker = %product.ticker,
                step = %d.step,
                exact = d.exact,
                legacy = d.legacy,
                "Step is not a power of ten; digit-based rounding would use a different grid"
            );
        }
    }
    if step_source == StepSource::DecimalPlaces {
        rules = rules.with_precision(Precision::legacy_log10(product.tick_size, product.lot_size));
    }

    Ok(Market {
        id: product.id,
        symbol: unified_symbol(&product.base_token_name, &product.quote_token_name),
        base: product.base_token_name.clone(),
        quote: product.quote_token_name.clone(),
        settle: product.quote_token_name.clone(),
        market_type: MarketType::Swap,
        linear: true,
        contract_size: Decimal::ONE,
        rules,
        info: raw(product),
    })
}

pub fn ticker(symbol: &str, price: &MarketPrice) -> Ticker {
    Ticker {
        symbol: symbol.to_string(),
        timestamp: Utc::now(),
        bid: price.best_bid_price,
        bid_volume: None,
        ask: price.best_ask_price,
        ask_volume: None,
        last: Some(price.oracle_price),
        high: None,
        low: None,
        base_volume: None,
        quote_volume: None,
        price_24h_ago: price.price_24h_ago,
        info: raw(price),
    }
}

pub fn trade(fill: &Fill, market: Option<&Market>) -> Trade {
    Trade {
        id: fill.id.to_string(),
        order_id: Some(fill.order_id.to_string()),
        timestamp: Some(fill.created_at),
        symbol: market.map(|m| m.symbol.clone()),
        side: fill.side,
        price: fill.price,
        amount: fill.filled,
        cost: fill.price * fill.filled,
        fee: Some(Fee {
            cost: fill.fee_usd,
            currency: market.map(|m| m.settle.clone()).unwrap_or_else(|| "USD".to_string()),
            rate: None,
        }),
        info: raw(fill),
    }
}

pub fn order(venue: &VenueOrder, market: Option<&Market>) -> Order {
    let remaining = (venue.quantity - venue.filled).max(Decimal::ZERO);
    Order {
        id: venue.id.to_string(),
        client_order_id: venue.client_order_id.clone(),
        timestamp: Some(venue.created_at),
        symbol: market.map(|m| m.symbol.clone()),
        order_type: venue.order_type.parse().ok(),
        side: Some(venue.side),
        price: venue.price,
        stop_price: venue.stop_price,
        amount: Some(venue.quantity),
        filled: Some(venue.filled),
        remaining: Some(remaining),
        average: None,
        cost: None,
        status: OrderStatus::from_venue(&venue.status),
        reduce_only: venue.reduce_only,
        fee: None,
        info: raw(venue),
    }
}

/// Context a position needs beyond the venue record.
pub struct PositionContext<'a> {
    pub market: &'a Market,
    pub mark_price: Option<Decimal>,
    pub leverage: Decimal,
    pub margin_mode: MarginMode,
}

pub fn position(venue: &VenuePosition, ctx: &PositionContext<'_>) -> Position {
    let entry_price = venue.entry_price();
    let contracts = venue.size.abs();
    let unrealized_pnl = match (entry_price, ctx.mark_price) {
        (Some(entry), Some(mark)) => Some((mark - entry) * venue.size),
        _ => None,
    };
    Position {
        symbol: ctx.market.symbol.clone(),
        side: PositionSide::from_size(venue.size),
        contracts,
        entry_price,
        mark_price: ctx.mark_price,
        notional: ctx
            .mark_price
            .map(|mark| contracts * mark)
            .unwrap_or(venue.total_increase_notional),
        leverage: ctx.leverage,
        unrealized_pnl,
        realized_pnl: venue.realized_pnl,
        margin_mode: ctx.margin_mode,
        liquidation_price: None,
        info: raw(venue),
    }
}

pub fn balances(records: &[SubaccountBalance]) -> Balances {
    let assets: BTreeMap<String, Balance> = records
        .iter()
        .map(|b| {
            (
                b.token_name.clone(),
                Balance {
                    free: b.available,
                    used: b.total_used,
                    total: b.amount,
                },
            )
        })
        .collect();
    Balances {
        assets,
        info: raw(&records),
    }
}

pub fn funding_rate(symbol: &str, projected: &ProjectedFunding) -> FundingRate {
    let rate = projected.funding_rate_1h;
    FundingRate {
        symbol: symbol.to_string(),
        funding_rate: rate,
        interval: "1h".to_string(),
        annualized: (rate * Decimal::from(HOURS_PER_YEAR)).round_dp(4),
        timestamp: None,
        info: raw(projected),
    }
}

pub fn account(subaccount: &Subaccount) -> Account {
    Account {
        id: subaccount.id,
        name: subaccount.name.clone(),
        info: raw(subaccount),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn product(tick: Decimal, lot: Decimal) -> Product {
        Product {
            id: Uuid::new_v4(),
            ticker: "ETHUSD".to_string(),
            base_token_name: "ETH".to_string(),
            quote_token_name: "USD".to_string(),
            tick_size: tick,
            lot_size: lot,
            min_quantity: lot,
            max_quantity: None,
        }
    }

    #[test]
    fn test_market_from_product() {
        let market = market_from_product(&product(dec!(0.1), dec!(0.001)), StepSource::Tick).unwrap();
        assert_eq!(market.symbol, "ETH/USD:USD");
        assert_eq!(market.settle, "USD");
        assert_eq!(market.precision().price, 1);
        assert_eq!(market.precision().amount, 3);
        assert_eq!(market.market_type, MarketType::Swap);
    }

    #[test]
    fn test_decimal_places_source_uses_legacy_digits() {
        let tick = dec!(0.5);
        let exact = market_from_product(&product(tick, dec!(0.01)), StepSource::Tick).unwrap();
        let legacy = market_from_product(&product(tick, dec!(0.01)), StepSource::DecimalPlaces).unwrap();
        assert_eq!(exact.precision().price, 1);
        assert_eq!(legacy.precision().price, 0);
    }

    #[test]
    fn test_invalid_product_rules() {
        assert!(market_from_product(&product(dec!(0), dec!(0.01)), StepSource::Tick).is_err());
    }

    #[test]
    fn test_funding_annualized() {
        let projected = ProjectedFunding {
            product_id: Uuid::new_v4(),
            funding_rate_1h: dec!(0.0000125),
        };
        let rate = funding_rate("BTC/USD:USD", &projected);
        // 0.0000125 * 8760 = 0.1095
        assert_eq!(rate.annualized, dec!(0.1095));
        assert_eq!(rate.interval, "1h");
    }

    #[test]
    fn test_short_position_pnl() {
        let market = market_from_product(&product(dec!(0.1), dec!(0.001)), StepSource::Tick).unwrap();
        let venue = VenuePosition {
            id: Uuid::new_v4(),
            product_id: market.id,
            size: dec!(-2),
            total_increase_notional: dec!(6400),
            realized_pnl: dec!(0),
            created_at: Utc::now(),
        };
        let ctx = PositionContext {
            market: &market,
            mark_price: Some(dec!(3100)),
            leverage: dec!(10),
            margin_mode: MarginMode::Cross,
        };
        let pos = position(&venue, &ctx);
        assert_eq!(pos.side, PositionSide::Short);
        assert_eq!(pos.contracts, dec!(2));
        assert_eq!(pos.entry_price, Some(dec!(3200)));
        assert_eq!(pos.unrealized_pnl, Some(dec!(200)));
        assert_eq!(pos.notional, dec!(6200));
    }
}
