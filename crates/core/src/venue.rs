//! Venue-native records as the Ethereal API reports them.
//!
//! These are kept close to the wire shape; the facade converts them into the
//! unified records in [`crate::models`].

use chrono::{DateTime, Utc};
use ethereal_rounding::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Products & Prices
// ---------------------------------------------------------------------------

/// A listed perpetual product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    /// Venue ticker, e.g. `BTCUSD`.
    pub ticker: String,
    pub base_token_name: String,
    pub quote_token_name: String,
    /// Minimum price increment.
    pub tick_size: Decimal,
    /// Minimum quantity increment.
    pub lot_size: Decimal,
    pub min_quantity: Decimal,
    pub max_quantity: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketPrice {
    pub product_id: Uuid,
    pub best_bid_price: Option<Decimal>,
    pub best_ask_price: Option<Decimal>,
    pub oracle_price: Decimal,
    pub price_24h_ago: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedFunding {
    pub product_id: Uuid,
    /// Projected rate for the next one-hour funding interval.
    pub funding_rate_1h: Decimal,
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subaccount {
    pub id: Uuid,
    /// Subaccount name (bytes32 hex on the venue).
    pub name: String,
    /// Owning wallet address.
    pub account: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubaccountBalance {
    pub subaccount_id: Uuid,
    pub token_name: String,
    pub amount: Decimal,
    pub available: Decimal,
    pub total_used: Decimal,
}

/// An open position. `size` is signed: negative for shorts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenuePosition {
    pub id: Uuid,
    pub product_id: Uuid,
    pub size: Decimal,
    pub total_increase_notional: Decimal,
    pub realized_pnl: Decimal,
    pub created_at: DateTime<Utc>,
}

impl VenuePosition {
    /// Average entry price, if the position is non-empty.
    pub fn entry_price(&self) -> Option<Decimal> {
        if self.size.is_zero() {
            None
        } else {
            Some(self.total_increase_notional / self.size.abs())
        }
    }
}

// ---------------------------------------------------------------------------
// Fills & Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub side: Side,
    pub price: Decimal,
    pub filled: Decimal,
    pub fee_usd: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueOrder {
    pub id: Uuid,
    pub client_order_id: Option<String>,
    pub product_id: Uuid,
    pub side: Side,
    /// `MARKET` or `LIMIT`.
    pub order_type: String,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub quantity: Decimal,
    pub filled: Decimal,
    pub reduce_only: bool,
    /// Venue status, e.g. `NEW`, `FILLED_PARTIAL`, `FILLED`, `CANCELED`.
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl VenueOrder {
    pub fn is_filled(&self) -> bool {
        self.filled >= self.quantity
    }
}

/// Trigger kind attached to a conditional order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopType {
    TakeProfit,
    StopLoss,
}

impl StopType {
    /// Numeric code the venue expects (0 = take-profit, 1 = stop-loss).
    pub fn code(&self) -> u8 {
        match self {
            StopType::TakeProfit => 0,
            StopType::StopLoss => 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// An order ready to submit. Price and quantity are already on the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSubmission {
    /// Subaccount name.
    pub subaccount: String,
    /// Signing wallet address.
    pub sender: String,
    pub product_id: Uuid,
    pub side: Side,
    /// `MARKET` or `LIMIT`.
    pub order_type: String,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub stop_type: Option<StopType>,
    pub reduce_only: bool,
    pub client_order_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FillQuery {
    pub subaccount_id: Uuid,
    /// Restrict to these products; empty means all.
    pub product_ids: Vec<Uuid>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub subaccount: String,
    pub sender: String,
    pub order_ids: Vec<Uuid>,
}
