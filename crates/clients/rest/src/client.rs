use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethereal_core::*;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::*;

/// Configuration for the REST client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    pub base_url: String,
    /// Per-request timeout.
    pub timeout_ms: u64,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.ethereal.trade".to_string(),
            timeout_ms: 10_000,
        }
    }
}

/// Signs order and cancel payloads on behalf of a wallet.
///
/// Typed-data construction and key handling live with the implementor.
pub trait OrderSigner: Send + Sync {
    /// Address the signatures recover to.
    fn address(&self) -> &str;

    /// Sign `message` as the typed-data `primary_type`, returning a
    /// `0x`-prefixed signature.
    fn sign(&self, primary_type: &str, message: &serde_json::Value) -> Result<String, VenueError>;
}

/// Ethereal REST client.
pub struct RestClient {
    http: Client,
    config: RestConfig,
    signer: Option<Arc<dyn OrderSigner>>,
}

impl RestClient {
    /// A read-only client. Order writes fail with `Unauthorized`.
    pub fn new(config: RestConfig) -> Result<Self, VenueError> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| VenueError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        info!(base_url = %config.base_url, "REST client ready");
        Ok(Self {
            http,
            config,
            signer: None,
        })
    }

    pub fn with_signer(mut self, signer: Arc<dyn OrderSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn signer(&self) -> Result<&Arc<dyn OrderSigner>, VenueError> {
        self.signer
            .as_ref()
            .ok_or_else(|| VenueError::Unauthorized("no order signer configured".to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, VenueError> {
        debug!(path, "GET");
        let response = self
            .http
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(|e| VenueError::Transport(e.to_string()))?;
        decode(response).await
    }

    async fn list<T, U>(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<U>, VenueError>
    where
        T: DeserializeOwned,
        U: From<T>,
    {
        let page: Page<T> = self.get(path, query).await?;
        if page.has_next {
            debug!(path, "More pages available; only the first is returned");
        }
        Ok(unpage(page))
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, VenueError> {
        debug!(path, "POST");
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| VenueError::Transport(e.to_string()))?;
        decode(response).await
    }

    fn sign<T: Serialize>(&self, primary_type: &str, data: T) -> Result<Signed<T>, VenueError> {
        let message = serde_json::to_value(&data).map_err(|e| VenueError::Decode(e.to_string()))?;
        let signature = self.signer()?.sign(primary_type, &message)?;
        Ok(Signed { data, signature })
    }
}

fn nonce() -> String {
    let now = Utc::now();
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros() * 1_000)
        .to_string()
}

fn id_list(ids: &[Uuid]) -> String {
    ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(",")
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, VenueError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| VenueError::Transport(e.to_string()))?;
    decode_body(status, &body)
}

/// Decode a 2xx body as `T`, or map the failure status.
pub fn decode_body<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T, VenueError> {
    if !status.is_success() {
        let err = error_for_status(status, body);
        warn!(status = status.as_u16(), error = %err, "Venue request failed");
        return Err(err);
    }
    serde_json::from_str(body).map_err(|e| VenueError::Decode(format!("{}: {}", e, body)))
}

fn unpage<T, U: From<T>>(page: Page<T>) -> Vec<U> {
    page.data.into_iter().map(U::from).collect()
}

/// The order as placed, from the submission and the venue's acknowledgement.
fn placed_order(
    order: &OrderSubmission,
    ack: OrderAckDto,
    created_at: DateTime<Utc>,
) -> Result<VenueOrder, VenueError> {
    if !ack.result.eq_ignore_ascii_case("ok") {
        return Err(VenueError::Rejected(ack.result));
    }
    let status = if ack.filled >= order.quantity { "FILLED" } else { "NEW" };
    Ok(VenueOrder {
        id: ack.id,
        client_order_id: order.client_order_id.clone(),
        product_id: order.product_id,
        side: order.side,
        order_type: order.order_type.clone(),
        price: order.price,
        stop_price: order.stop_price,
        quantity: order.quantity,
        filled: ack.filled,
        reduce_only: order.reduce_only,
        status: status.to_string(),
        created_at,
    })
}

/// Map a non-2xx status and its body onto a [`VenueError`].
pub fn error_for_status(status: StatusCode, body: &str) -> VenueError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message.or(b.error))
        .unwrap_or_else(|| body.to_string());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => VenueError::Unauthorized(message),
        StatusCode::NOT_FOUND => VenueError::NotFound(message),
        _ if message.to_ascii_lowercase().contains("not found") => VenueError::NotFound(message),
        _ => VenueError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl VenueClient for RestClient {
    fn name(&self) -> &str {
        "rest"
    }

    async fn list_products(&self) -> Result<Vec<Product>, VenueError> {
        self.list::<ProductDto, _>("/v1/product", &[]).await
    }

    async fn list_market_prices(&self, product_ids: &[Uuid]) -> Result<Vec<MarketPrice>, VenueError> {
        self.list::<MarketPriceDto, _>(
            "/v1/product/market-price",
            &[("productIds", id_list(product_ids))],
        )
        .await
    }

    async fn list_subaccounts(&self, sender: &str) -> Result<Vec<Subaccount>, VenueError> {
        self.list::<SubaccountDto, _>("/v1/subaccount", &[("sender", sender.to_string())])
            .await
    }

    async fn get_subaccount_balances(
        &self,
        subaccount_id: Uuid,
    ) -> Result<Vec<SubaccountBalance>, VenueError> {
        self.list::<BalanceDto, _>(
            "/v1/subaccount/balance",
            &[("subaccountId", subaccount_id.to_string())],
        )
        .await
    }

    async fn list_positions(&self, subaccount_id: Uuid) -> Result<Vec<VenuePosition>, VenueError> {
        self.list::<PositionDto, _>(
            "/v1/position",
            &[
                ("subaccountId", subaccount_id.to_string()),
                ("open", "true".to_string()),
            ],
        )
        .await
    }

    async fn list_fills(&self, query: &FillQuery) -> Result<Vec<Fill>, VenueError> {
        let mut params = vec![("subaccountId", query.subaccount_id.to_string())];
        if !query.product_ids.is_empty() {
            params.push(("productIds", id_list(&query.product_ids)));
        }
        if let Some(limit) = query.limit {
            params.push(("limit", limit.to_string()));
        }
        self.list::<FillDto, _>("/v1/order/fill", &params).await
    }

    async fn list_orders(&self, subaccount_id: Uuid) -> Result<Vec<VenueOrder>, VenueError> {
        self.list::<OrderDto, _>("/v1/order", &[("subaccountId", subaccount_id.to_string())])
            .await
    }

    async fn get_order(&self, order_id: Uuid) -> Result<VenueOrder, VenueError> {
        let dto: OrderDto = self.get(&format!("/v1/order/{}", order_id), &[]).await?;
        Ok(dto.into())
    }

    async fn get_projected_funding(
        &self,
        product_ids: &[Uuid],
    ) -> Result<Vec<ProjectedFunding>, VenueError> {
        self.list::<ProjectedFundingDto, _>(
            "/v1/funding/projected",
            &[("productIds", id_list(product_ids))],
        )
        .await
    }

    async fn create_order(&self, order: &OrderSubmission) -> Result<VenueOrder, VenueError> {
        let now = Utc::now();
        let payload = OrderPayload::from_submission(order, nonce(), now.timestamp());
        let signed = self.sign("TradeOrder", payload)?;
        let ack: OrderAckDto = self.post("/v1/order", &signed).await?;
        placed_order(order, ack, now)
    }

    async fn cancel_orders(&self, request: &CancelRequest) -> Result<Vec<Uuid>, VenueError> {
        let payload = CancelPayload {
            sender: request.sender.clone(),
            subaccount: request.subaccount.clone(),
            order_ids: request.order_ids.clone(),
            nonce: nonce(),
        };
        let signed = self.sign("CancelOrder", payload)?;
        let page: Page<CancelAckDto> = self.post("/v1/order/cancel", &signed).await?;
        Ok(page
            .data
            .into_iter()
            .filter(CancelAckDto::accepted)
            .map(|ack| ack.id)
            .collect())
    }
}
