use chrono::{DateTime, Utc};
use ethereal_core::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// List responses are wrapped as `{"data": [...]}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub has_next: bool,
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Sides travel as `0` (buy) / `1` (sell).
pub mod side_code {
    use ethereal_core::Side;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(side: &Side, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(match side {
            Side::Buy => 0,
            Side::Sell => 1,
        })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Side, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(Side::Buy),
            1 => Ok(Side::Sell),
            other => Err(serde::de::Error::custom(format!("invalid side {}", other))),
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDto {
    pub id: Uuid,
    pub ticker: String,
    pub base_token_name: String,
    pub quote_token_name: String,
    pub tick_size: Decimal,
    pub lot_size: Decimal,
    pub min_quantity: Decimal,
    #[serde(default)]
    pub max_quantity: Option<Decimal>,
}

impl From<ProductDto> for Product {
    fn from(dto: ProductDto) -> Self {
        Product {
            id: dto.id,
            ticker: dto.ticker,
            base_token_name: dto.base_token_name,
            quote_token_name: dto.quote_token_name,
            tick_size: dto.tick_size,
            lot_size: dto.lot_size,
            min_quantity: dto.min_quantity,
            max_quantity: dto.max_quantity,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketPriceDto {
    pub product_id: Uuid,
    #[serde(default)]
    pub best_bid_price: Option<Decimal>,
    #[serde(default)]
    pub best_ask_price: Option<Decimal>,
    pub oracle_price: Decimal,
    #[serde(default, rename = "price24hAgo")]
    pub price_24h_ago: Option<Decimal>,
}

impl From<MarketPriceDto> for MarketPrice {
    fn from(dto: MarketPriceDto) -> Self {
        MarketPrice {
            product_id: dto.product_id,
            best_bid_price: dto.best_bid_price,
            best_ask_price: dto.best_ask_price,
            oracle_price: dto.oracle_price,
            price_24h_ago: dto.price_24h_ago,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubaccountDto {
    pub id: Uuid,
    pub name: String,
    pub account: String,
}

impl From<SubaccountDto> for Subaccount {
    fn from(dto: SubaccountDto) -> Self {
        Subaccount {
            id: dto.id,
            name: dto.name,
            account: dto.account,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceDto {
    pub subaccount_id: Uuid,
    pub token_name: String,
    pub amount: Decimal,
    pub available: Decimal,
    pub total_used: Decimal,
}

impl From<BalanceDto> for SubaccountBalance {
    fn from(dto: BalanceDto) -> Self {
        SubaccountBalance {
            subaccount_id: dto.subaccount_id,
            token_name: dto.token_name,
            amount: dto.amount,
            available: dto.available,
            total_used: dto.total_used,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionDto {
    pub id: Uuid,
    pub product_id: Uuid,
    pub size: Decimal,
    pub total_increase_notional: Decimal,
    pub realized_pnl: Decimal,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl From<PositionDto> for VenuePosition {
    fn from(dto: PositionDto) -> Self {
        VenuePosition {
            id: dto.id,
            product_id: dto.product_id,
            size: dto.size,
            total_increase_notional: dto.total_increase_notional,
            realized_pnl: dto.realized_pnl,
            created_at: dto.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillDto {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    #[serde(with = "side_code")]
    pub side: Side,
    pub price: Decimal,
    pub filled: Decimal,
    pub fee_usd: Decimal,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl From<FillDto> for Fill {
    fn from(dto: FillDto) -> Self {
        Fill {
            id: dto.id,
            order_id: dto.order_id,
            product_id: dto.product_id,
            side: dto.side,
            price: dto.price,
            filled: dto.filled,
            fee_usd: dto.fee_usd,
            created_at: dto.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDto {
    pub id: Uuid,
    #[serde(default)]
    pub client_order_id: Option<String>,
    pub product_id: Uuid,
    #[serde(with = "side_code")]
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: String,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    pub quantity: Decimal,
    pub filled: Decimal,
    #[serde(default)]
    pub reduce_only: bool,
    pub status: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl From<OrderDto> for VenueOrder {
    fn from(dto: OrderDto) -> Self {
        // Market orders report a zero price.
        let non_zero = |p: Option<Decimal>| p.filter(|p| !p.is_zero());
        VenueOrder {
            id: dto.id,
            client_order_id: dto.client_order_id,
            product_id: dto.product_id,
            side: dto.side,
            order_type: dto.order_type,
            price: non_zero(dto.price),
            stop_price: non_zero(dto.stop_price),
            quantity: dto.quantity,
            filled: dto.filled,
            reduce_only: dto.reduce_only,
            status: dto.status,
            created_at: dto.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectedFundingDto {
    pub product_id: Uuid,
    #[serde(rename = "fundingRate1h")]
    pub funding_rate_1h: Decimal,
}

impl From<ProjectedFundingDto> for ProjectedFunding {
    fn from(dto: ProjectedFundingDto) -> Self {
        ProjectedFunding {
            product_id: dto.product_id,
            funding_rate_1h: dto.funding_rate_1h,
        }
    }
}

/// Acknowledgement for a submitted order.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAckDto {
    pub id: Uuid,
    #[serde(default)]
    pub filled: Decimal,
    pub result: String,
}

/// Per-order outcome of a cancel request.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelAckDto {
    pub id: Uuid,
    pub result: String,
}

impl CancelAckDto {
    pub fn accepted(&self) -> bool {
        self.result.eq_ignore_ascii_case("ok")
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Order body before signing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    pub sender: String,
    pub subaccount: String,
    pub product_id: Uuid,
    #[serde(with = "side_code")]
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: String,
    pub quantity: Decimal,
    /// Zero for market orders.
    pub price: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_type: Option<u8>,
    pub reduce_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<String>,
    pub engine_type: u8,
    pub nonce: String,
    pub signed_at: i64,
}

impl OrderPayload {
    pub fn from_submission(order: &OrderSubmission, nonce: String, signed_at: i64) -> Self {
        Self {
            sender: order.sender.clone(),
            subaccount: order.subaccount.clone(),
            product_id: order.product_id,
            side: order.side,
            order_type: order.order_type.clone(),
            quantity: order.quantity,
            price: order.price.unwrap_or(Decimal::ZERO),
            stop_price: order.stop_price,
            stop_type: order.stop_type.map(|s| s.code()),
            reduce_only: order.reduce_only,
            client_order_id: order.client_order_id.clone(),
            engine_type: 0,
            nonce,
            signed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelPayload {
    pub sender: String,
    pub subaccount: String,
    pub order_ids: Vec<Uuid>,
    pub nonce: String,
}

/// A payload together with its signature.
#[derive(Debug, Clone, Serialize)]
pub struct Signed<T> {
    pub data: T,
    pub signature: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_product_page() {
        let json = r#"{
            "hasNext": false,
            "data": [{
                "id": "bc7d5575-3711-4532-a000-312bfacfb767",
                "ticker": "BTCUSD",
                "baseTokenName": "BTC",
                "quoteTokenName": "USD",
                "tickSize": "1",
                "lotSize": "0.0001",
                "minQuantity": "0.0001",
                "maxQuantity": "1000",
                "makerFee": "0"
            }]
        }"#;
        let page: Page<ProductDto> = serde_json::from_str(json).unwrap();
        let product: Product = page.data.into_iter().next().unwrap().into();
        assert_eq!(product.ticker, "BTCUSD");
        assert_eq!(product.tick_size, dec!(1));
        assert_eq!(product.lot_size, dec!(0.0001));
        assert_eq!(product.max_quantity, Some(dec!(1000)));
    }

    #[test]
    fn test_order_side_and_zero_price() {
        let json = r#"{
            "id": "6f1c2a44-0b7e-4a3c-9a44-1e3f2a1b0c9d",
            "productId": "bc7d5575-3711-4532-a000-312bfacfb767",
            "side": 1,
            "type": "MARKET",
            "price": "0",
            "quantity": "0.5",
            "filled": "0.5",
            "reduceOnly": true,
            "status": "FILLED",
            "createdAt": 1717000000000
        }"#;
        let order: VenueOrder = serde_json::from_str::<OrderDto>(json).unwrap().into();
        assert_eq!(order.side, Side::Sell);
        assert_eq!(order.price, None);
        assert!(order.reduce_only);
        assert!(order.is_filled());
        assert_eq!(order.created_at.timestamp_millis(), 1717000000000);
    }

    #[test]
    fn test_invalid_side_code() {
        let json = r#"{
            "id": "6f1c2a44-0b7e-4a3c-9a44-1e3f2a1b0c9d",
            "orderId": "6f1c2a44-0b7e-4a3c-9a44-1e3f2a1b0c9d",
            "productId": "bc7d5575-3711-4532-a000-312bfacfb767",
            "side": 7,
            "price": "1",
            "filled": "1",
            "feeUsd": "0",
            "createdAt": 0
        }"#;
        assert!(serde_json::from_str::<FillDto>(json).is_err());
    }

    #[test]
    fn test_market_price_24h_field() {
        let json = r#"{
            "productId": "bc7d5575-3711-4532-a000-312bfacfb767",
            "bestBidPrice": "64999",
            "bestAskPrice": "65001",
            "oraclePrice": "65000",
            "price24hAgo": "64000"
        }"#;
        let price: MarketPrice = serde_json::from_str::<MarketPriceDto>(json).unwrap().into();
        assert_eq!(price.price_24h_ago, Some(dec!(64000)));
        assert_eq!(price.best_bid_price, Some(dec!(64999)));
    }

    #[test]
    fn test_market_order_payload_uses_zero_price() {
        let submission = OrderSubmission {
            subaccount: "primary".to_string(),
            sender: "0xabc".to_string(),
            product_id: Uuid::nil(),
            side: Side::Sell,
            order_type: "MARKET".to_string(),
            quantity: dec!(0.25),
            price: None,
            stop_price: Some(dec!(64000)),
            stop_type: Some(StopType::StopLoss),
            reduce_only: true,
            client_order_id: None,
        };
        let payload = OrderPayload::from_submission(&submission, "42".to_string(), 1);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["price"], "0");
        assert_eq!(json["side"], 1);
        assert_eq!(json["stopType"], 1);
        assert_eq!(json["reduceOnly"], true);
        assert!(json.get("clientOrderId").is_none());
    }
}
