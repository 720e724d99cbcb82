use chrono::{DateTime, Utc};
use ethereal_rounding::{MarketRules, Precision, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Markets
// ---------------------------------------------------------------------------

/// The kind of contract a market trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    Spot,
    Swap,
    Future,
}

/// A tradable instrument in unified form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    /// Venue product id.
    pub id: Uuid,
    /// Unified symbol, e.g. `BTC/USD:USD`.
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub settle: String,
    pub market_type: MarketType,
    pub linear: bool,
    pub contract_size: Decimal,
    pub rules: MarketRules,
    /// The raw venue record.
    pub info: serde_json::Value,
}

impl Market {
    pub fn precision(&self) -> Precision {
        self.rules.precision
    }
}

/// Unified symbol for a linear perpetual settled in the quote currency.
pub fn unified_symbol(base: &str, quote: &str) -> String {
    format!("{}/{}:{}", base, quote, quote)
}

// ---------------------------------------------------------------------------
// Market Data
// ---------------------------------------------------------------------------

/// Best bid/ask and reference price for a market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub bid: Option<Decimal>,
    pub bid_volume: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub ask_volume: Option<Decimal>,
    /// Oracle price reported by the venue.
    pub last: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub base_volume: Option<Decimal>,
    pub quote_volume: Option<Decimal>,
    pub price_24h_ago: Option<Decimal>,
    pub info: serde_json::Value,
}

impl Ticker {
    /// Midpoint of bid and ask, falling back to the last price.
    pub fn mid(&self) -> Option<Decimal> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => self.last,
        }
    }
}

/// Aggregated book levels as `(price, size)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
    pub timestamp: DateTime<Utc>,
}

/// One OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Funding rate for a perpetual market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRate {
    pub symbol: String,
    pub funding_rate: Decimal,
    /// Funding interval, e.g. `1h`.
    pub interval: String,
    /// Rate scaled to a year (24 * 365 intervals), rounded to 4 places.
    pub annualized: Decimal,
    pub timestamp: Option<DateTime<Utc>>,
    pub info: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Trades & Fees
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fee {
    pub cost: Decimal,
    pub currency: String,
    pub rate: Option<Decimal>,
}

/// Maker/taker fee schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub maker: Decimal,
    pub taker: Decimal,
}

/// One of the account's fills.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub order_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub symbol: Option<String>,
    pub side: Side,
    pub price: Decimal,
    pub amount: Decimal,
    pub cost: Decimal,
    pub fee: Option<Fee>,
    pub info: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    /// Venue spelling (`MARKET` / `LIMIT`).
    pub fn as_venue_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown order type: {0}")]
pub struct UnknownOrderType(pub String);

impl std::str::FromStr for OrderType {
    type Err = UnknownOrderType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "market" => Ok(OrderType::Market),
            "limit" => Ok(OrderType::Limit),
            other => Err(UnknownOrderType(other.to_string())),
        }
    }
}

/// Lifecycle state of an order in unified form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    /// Fully filled.
    Closed,
    Canceled,
    Expired,
    Rejected,
}

impl OrderStatus {
    /// Map a venue status string onto the unified states.
    pub fn from_venue(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "filled" | "closed" => OrderStatus::Closed,
            "canceled" | "cancelled" => OrderStatus::Canceled,
            "expired" => OrderStatus::Expired,
            "rejected" => OrderStatus::Rejected,
            // new, pending, filled_partial, partially_filled, ...
            _ => OrderStatus::Open,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::Open)
    }
}

/// An order in unified form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub client_order_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub symbol: Option<String>,
    pub order_type: Option<OrderType>,
    pub side: Option<Side>,
    pub price: Option<Decimal>,
    /// Trigger price for take-profit / stop-loss orders.
    pub stop_price: Option<Decimal>,
    pub amount: Option<Decimal>,
    pub filled: Option<Decimal>,
    pub remaining: Option<Decimal>,
    pub average: Option<Decimal>,
    pub cost: Option<Decimal>,
    pub status: OrderStatus,
    pub reduce_only: bool,
    pub fee: Option<Fee>,
    pub info: serde_json::Value,
}

impl Order {
    /// A bare record for an order known only by id.
    pub fn with_status(id: impl Into<String>, status: OrderStatus) -> Self {
        Self {
            id: id.into(),
            client_order_id: None,
            timestamp: None,
            symbol: None,
            order_type: None,
            side: None,
            price: None,
            stop_price: None,
            amount: None,
            filled: None,
            remaining: None,
            average: None,
            cost: None,
            status,
            reduce_only: false,
            fee: None,
            info: serde_json::Value::Null,
        }
    }
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Long for positive sizes, short otherwise.
    pub fn from_size(size: Decimal) -> Self {
        if size > Decimal::ZERO {
            PositionSide::Long
        } else {
            PositionSide::Short
        }
    }

    /// The order side that reduces this position.
    pub fn closing_side(&self) -> Side {
        match self {
            PositionSide::Long => Side::Sell,
            PositionSide::Short => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarginMode {
    Cross,
    Isolated,
}

/// An open position in unified form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    /// Absolute position size.
    pub contracts: Decimal,
    pub entry_price: Option<Decimal>,
    pub mark_price: Option<Decimal>,
    pub notional: Decimal,
    pub leverage: Decimal,
    pub unrealized_pnl: Option<Decimal>,
    pub realized_pnl: Decimal,
    pub margin_mode: MarginMode,
    pub liquidation_price: Option<Decimal>,
    pub info: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub free: Decimal,
    pub used: Decimal,
    pub total: Decimal,
}

/// Balances keyed by currency code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Balances {
    pub assets: BTreeMap<String, Balance>,
    pub info: serde_json::Value,
}

impl Balances {
    pub fn get(&self, currency: &str) -> Option<&Balance> {
        self.assets.get(currency)
    }

    pub fn free(&self, currency: &str) -> Decimal {
        self.get(currency).map(|b| b.free).unwrap_or_default()
    }

    pub fn total(&self, currency: &str) -> Decimal {
        self.get(currency).map(|b| b.total).unwrap_or_default()
    }
}

/// A venue subaccount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub info: serde_json::Value,
}

/// What the adapter supports, in exchange-interface terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub spot: bool,
    pub margin: bool,
    pub swap: bool,
    pub future: bool,
    pub option: bool,
    pub fetch_markets: bool,
    pub fetch_ticker: bool,
    pub fetch_tickers: bool,
    pub fetch_order_book: bool,
    pub fetch_ohlcv: bool,
    pub fetch_balance: bool,
    pub fetch_trades: bool,
    pub fetch_my_trades: bool,
    pub create_order: bool,
    pub cancel_order: bool,
    pub cancel_all_orders: bool,
    pub fetch_order: bool,
    pub fetch_orders: bool,
    pub fetch_open_orders: bool,
    pub fetch_closed_orders: bool,
    pub fetch_positions: bool,
    pub fetch_position: bool,
    pub fetch_funding_rate: bool,
    pub fetch_funding_rates: bool,
}
