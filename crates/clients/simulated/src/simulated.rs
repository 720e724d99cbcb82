use async_trait::async_trait;
use chrono::Utc;
use ethereal_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Configuration for the simulated venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedVenueConfig {
    /// Wallet address that owns the simulated subaccount.
    pub account: String,
    /// Name of the single simulated subaccount.
    pub subaccount_name: String,
    /// Starting collateral.
    pub initial_balance: Decimal,
    /// Fee charged on every fill, as a fraction of notional.
    pub taker_fee: Decimal,
    /// Margin locked per unit of position notional.
    pub margin_fraction: Decimal,
    /// Artificial delay applied to every call.
    pub latency_ms: Option<u64>,
}

impl Default for SimulatedVenueConfig {
    fn default() -> Self {
        Self {
            account: "0x1111111111111111111111111111111111111111".to_string(),
            subaccount_name: "primary".to_string(),
            initial_balance: dec!(100000),
            taker_fee: dec!(0.0003),
            margin_fraction: dec!(0.1),
            latency_ms: None,
        }
    }
}

/// An in-memory Ethereal venue.
///
/// Market orders fill immediately at the touch, limit orders rest until the
/// mark crosses them, and take-profit / stop-loss orders wait for their
/// trigger. Orders are validated against the product's tick and lot grid the
/// way the real venue does, so callers that skip normalization get rejected.
pub struct SimulatedVenue {
    config: SimulatedVenueConfig,
    subaccount: Subaccount,
    state: Mutex<VenueState>,
}

struct VenueState {
    products: Vec<Product>,
    prices: HashMap<Uuid, MarketPrice>,
    funding: HashMap<Uuid, Decimal>,
    cash: Decimal,
    positions: HashMap<Uuid, VenuePosition>,
    open_orders: Vec<VenueOrder>,
    closed_orders: Vec<VenueOrder>,
    stop_types: HashMap<Uuid, StopType>,
    fills: Vec<Fill>,
    submissions: Vec<OrderSubmission>,
    fail_next: Option<VenueError>,
    closed: bool,
}

const STATUS_NEW: &str = "NEW";
const STATUS_FILLED: &str = "FILLED";
const STATUS_CANCELED: &str = "CANCELED";

impl SimulatedVenue {
    /// A venue with no listed products.
    pub fn new(config: SimulatedVenueConfig) -> Self {
        let subaccount = Subaccount {
            id: Uuid::new_v4(),
            name: config.subaccount_name.clone(),
            account: config.account.clone(),
        };
        let state = VenueState {
            products: Vec::new(),
            prices: HashMap::new(),
            funding: HashMap::new(),
            cash: config.initial_balance,
            positions: HashMap::new(),
            open_orders: Vec::new(),
            closed_orders: Vec::new(),
            stop_types: HashMap::new(),
            fills: Vec::new(),
            submissions: Vec::new(),
            fail_next: None,
            closed: false,
        };
        Self {
            config,
            subaccount,
            state: Mutex::new(state),
        }
    }

    /// A venue seeded with BTC, ETH and SOL perpetuals.
    pub fn with_demo_markets(config: SimulatedVenueConfig) -> Self {
        let venue = Self::new(config);
        venue.add_product(
            demo_product(1, "BTC", dec!(1), dec!(0.0001), dec!(0.0001), Some(dec!(100))),
            dec!(65000),
            dec!(0.0000125),
        );
        venue.add_product(
            demo_product(2, "ETH", dec!(0.1), dec!(0.001), dec!(0.001), Some(dec!(2000))),
            dec!(3200),
            dec!(0.00001),
        );
        venue.add_product(
            demo_product(3, "SOL", dec!(0.01), dec!(0.01), dec!(0.01), None),
            dec!(150),
            dec!(-0.000005),
        );
        venue
    }

    pub fn config(&self) -> &SimulatedVenueConfig {
        &self.config
    }

    pub fn subaccount(&self) -> &Subaccount {
        &self.subaccount
    }

    /// List a product at the given mark price and hourly funding rate.
    pub fn add_product(&self, product: Product, mark_price: Decimal, funding_rate_1h: Decimal) {
        let mut state = self.lock();
        state.funding.insert(product.id, funding_rate_1h);
        state.prices.insert(product.id, quote(&product, mark_price, None));
        info!(ticker = %product.ticker, %mark_price, "Simulated product listed");
        state.products.push(product);
    }

    pub fn product_by_ticker(&self, ticker: &str) -> Option<Product> {
        self.lock().products.iter().find(|p| p.ticker == ticker).cloned()
    }

    /// Move the mark price and match resting orders against it.
    pub fn set_mark_price(&self, product_id: Uuid, price: Decimal) {
        let taker_fee = self.config.taker_fee;
        let mut state = self.lock();
        let Some(product) = state.product(product_id).cloned() else {
            return;
        };
        let previous = state.prices.get(&product_id).and_then(|p| p.price_24h_ago);
        state.prices.insert(product_id, quote(&product, price, previous));

        let resting = std::mem::take(&mut state.open_orders);
        for mut order in resting {
            if order.product_id == product_id && state.try_fill(&mut order, taker_fee) {
                state.closed_orders.push(order);
            } else {
                state.open_orders.push(order);
            }
        }
    }

    /// Make the next call fail with `err`.
    pub fn fail_next(&self, err: VenueError) {
        self.lock().fail_next = Some(err);
    }

    /// Every order accepted so far, in submission order.
    pub fn submissions(&self) -> Vec<OrderSubmission> {
        self.lock().submissions.clone()
    }

    pub fn cash(&self) -> Decimal {
        self.lock().cash
    }

    fn lock(&self) -> MutexGuard<'_, VenueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, op: &'static str) -> Result<(), VenueError> {
        if let Some(ms) = self.config.latency_ms {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        let mut state = self.lock();
        if state.closed {
            return Err(VenueError::Transport("client closed".to_string()));
        }
        if let Some(err) = state.fail_next.take() {
            debug!(op, error = %err, "Injected failure");
            return Err(err);
        }
        Ok(())
    }

    fn check_subaccount_id(&self, subaccount_id: Uuid) -> Result<(), VenueError> {
        if subaccount_id == self.subaccount.id {
            Ok(())
        } else {
            Err(VenueError::NotFound(format!("subaccount {}", subaccount_id)))
        }
    }

    fn check_signer(&self, subaccount: &str, sender: &str) -> Result<(), VenueError> {
        if subaccount == self.subaccount.name && sender.eq_ignore_ascii_case(&self.subaccount.account) {
            Ok(())
        } else {
            Err(VenueError::Unauthorized(format!(
                "{} cannot act for subaccount {}",
                sender, subaccount
            )))
        }
    }
}

impl VenueState {
    fn product(&self, id: Uuid) -> Option<&Product> {
        self.products.iter().find(|p| p.id == id)
    }

    fn position_size(&self, product_id: Uuid) -> Decimal {
        self.positions
            .get(&product_id)
            .map(|p| p.size)
            .unwrap_or(Decimal::ZERO)
    }

    fn touch(&self, product_id: Uuid, side: Side) -> Option<Decimal> {
        let price = self.prices.get(&product_id)?;
        let touch = match side {
            Side::Buy => price.best_ask_price,
            Side::Sell => price.best_bid_price,
        };
        Some(touch.unwrap_or(price.oracle_price))
    }

    /// Fill `order` if its conditions are met. Returns true once it has left
    /// the book.
    fn try_fill(&mut self, order: &mut VenueOrder, taker_fee: Decimal) -> bool {
        let Some(oracle) = self.prices.get(&order.product_id).map(|p| p.oracle_price) else {
            return false;
        };

        if let (Some(stop), Some(stop_type)) = (order.stop_price, self.stop_types.get(&order.id).copied()) {
            let triggered = match (order.side, stop_type) {
                (Side::Sell, StopType::TakeProfit) | (Side::Buy, StopType::StopLoss) => oracle >= stop,
                (Side::Sell, StopType::StopLoss) | (Side::Buy, StopType::TakeProfit) => oracle <= stop,
            };
            if !triggered {
                return false;
            }
            debug!(order_id = %order.id, %stop, %oracle, "Stop triggered");
            self.stop_types.remove(&order.id);
        }

        let Some(touch) = self.touch(order.product_id, order.side) else {
            return false;
        };
        let fill_price = match (order.order_type.as_str(), order.price) {
            ("LIMIT", Some(limit)) => {
                let marketable = match order.side {
                    Side::Buy => touch <= limit,
                    Side::Sell => touch >= limit,
                };
                if !marketable {
                    return false;
                }
                limit
            }
            _ => touch,
        };

        self.execute(order, fill_price, taker_fee);
        true
    }

    fn execute(&mut self, order: &mut VenueOrder, price: Decimal, taker_fee: Decimal) {
        let mut quantity = order.quantity - order.filled;
        if order.reduce_only {
            quantity = quantity.min(self.position_size(order.product_id).abs());
        }
        if quantity > Decimal::ZERO {
            let delta = match order.side {
                Side::Buy => quantity,
                Side::Sell => -quantity,
            };
            let fee = quantity * price * taker_fee;
            let pnl = self.apply_position(order.product_id, delta, price);
            self.cash += pnl - fee;
            self.fills.push(Fill {
                id: Uuid::new_v4(),
                order_id: order.id,
                product_id: order.product_id,
                side: order.side,
                price,
                filled: quantity,
                fee_usd: fee,
                created_at: Utc::now(),
            });
            order.filled += quantity;
        }
        // A reduce-only remainder with nothing left to reduce is cancelled.
        order.status = if order.is_filled() {
            STATUS_FILLED.to_string()
        } else {
            STATUS_CANCELED.to_string()
        };
    }

    /// Apply a signed fill to the position. Returns the realized PnL.
    fn apply_position(&mut self, product_id: Uuid, delta: Decimal, price: Decimal) -> Decimal {
        let position = self.positions.entry(product_id).or_insert_with(|| VenuePosition {
            id: Uuid::new_v4(),
            product_id,
            size: Decimal::ZERO,
            total_increase_notional: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            created_at: Utc::now(),
        });

        let size = position.size;
        let mut pnl = Decimal::ZERO;
        if size.is_zero() || size.is_sign_positive() == delta.is_sign_positive() {
            position.total_increase_notional += delta.abs() * price;
        } else {
            let entry = position.total_increase_notional / size.abs();
            let close_qty = delta.abs().min(size.abs());
            let direction = if size.is_sign_negative() { -Decimal::ONE } else { Decimal::ONE };
            pnl = close_qty * (price - entry) * direction;
            position.total_increase_notional -= entry * close_qty;
            let flipped = delta.abs() - close_qty;
            if flipped > Decimal::ZERO {
                position.total_increase_notional = flipped * price;
            }
        }
        position.size += delta;
        position.realized_pnl += pnl;

        if position.size.is_zero() {
            self.positions.remove(&product_id);
        }
        pnl
    }

    fn used_margin(&self, margin_fraction: Decimal) -> Decimal {
        self.positions
            .values()
            .map(|p| {
                let mark = self
                    .prices
                    .get(&p.product_id)
                    .map(|m| m.oracle_price)
                    .unwrap_or(Decimal::ZERO);
                p.size.abs() * mark * margin_fraction
            })
            .sum()
    }
}

fn demo_product(
    n: u128,
    base: &str,
    tick_size: Decimal,
    lot_size: Decimal,
    min_quantity: Decimal,
    max_quantity: Option<Decimal>,
) -> Product {
    Product {
        id: Uuid::from_u128(n),
        ticker: format!("{}USD", base),
        base_token_name: base.to_string(),
        quote_token_name: "USD".to_string(),
        tick_size,
        lot_size,
        min_quantity,
        max_quantity,
    }
}

/// One tick either side of the mark.
fn quote(product: &Product, mark: Decimal, price_24h_ago: Option<Decimal>) -> MarketPrice {
    MarketPrice {
        product_id: product.id,
        best_bid_price: Some(mark - product.tick_size),
        best_ask_price: Some(mark + product.tick_size),
        oracle_price: mark,
        price_24h_ago: price_24h_ago.or(Some(mark)),
    }
}

fn on_grid(value: Decimal, step: Decimal) -> bool {
    !step.is_zero() && (value % step).is_zero()
}

fn select<T: Clone>(
    items: &HashMap<Uuid, T>,
    ids: &[Uuid],
    all: impl Iterator<Item = Uuid>,
) -> Result<Vec<T>, VenueError> {
    let ids: Vec<Uuid> = if ids.is_empty() { all.collect() } else { ids.to_vec() };
    ids.iter()
        .map(|id| {
            items
                .get(id)
                .cloned()
                .ok_or_else(|| VenueError::NotFound(format!("product {}", id)))
        })
        .collect()
}

#[async_trait]
impl VenueClient for SimulatedVenue {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn list_products(&self) -> Result<Vec<Product>, VenueError> {
        self.enter("list_products").await?;
        Ok(self.lock().products.clone())
    }

    async fn list_market_prices(&self, product_ids: &[Uuid]) -> Result<Vec<MarketPrice>, VenueError> {
        self.enter("list_market_prices").await?;
        let state = self.lock();
        select(&state.prices, product_ids, state.products.iter().map(|p| p.id))
    }

    async fn list_subaccounts(&self, sender: &str) -> Result<Vec<Subaccount>, VenueError> {
        self.enter("list_subaccounts").await?;
        if sender.eq_ignore_ascii_case(&self.subaccount.account) {
            Ok(vec![self.subaccount.clone()])
        } else {
            Ok(Vec::new())
        }
    }

    async fn get_subaccount_balances(
        &self,
        subaccount_id: Uuid,
    ) -> Result<Vec<SubaccountBalance>, VenueError> {
        self.enter("get_subaccount_balances").await?;
        self.check_subaccount_id(subaccount_id)?;
        let state = self.lock();
        let used = state.used_margin(self.config.margin_fraction);
        Ok(vec![SubaccountBalance {
            subaccount_id,
            token_name: "USD".to_string(),
            amount: state.cash,
            available: state.cash - used,
            total_used: used,
        }])
    }

    async fn list_positions(&self, subaccount_id: Uuid) -> Result<Vec<VenuePosition>, VenueError> {
        self.enter("list_positions").await?;
        self.check_subaccount_id(subaccount_id)?;
        let mut positions: Vec<_> = self.lock().positions.values().cloned().collect();
        positions.sort_by_key(|p| p.created_at);
        Ok(positions)
    }

    async fn list_fills(&self, query: &FillQuery) -> Result<Vec<Fill>, VenueError> {
        self.enter("list_fills").await?;
        self.check_subaccount_id(query.subaccount_id)?;
        let state = self.lock();
        let fills = state
            .fills
            .iter()
            .rev()
            .filter(|f| query.product_ids.is_empty() || query.product_ids.contains(&f.product_id))
            .take(query.limit.map(|l| l as usize).unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(fills)
    }

    async fn list_orders(&self, subaccount_id: Uuid) -> Result<Vec<VenueOrder>, VenueError> {
        self.enter("list_orders").await?;
        self.check_subaccount_id(subaccount_id)?;
        let state = self.lock();
        let mut orders: Vec<_> = state
            .closed_orders
            .iter()
            .chain(state.open_orders.iter())
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn get_order(&self, order_id: Uuid) -> Result<VenueOrder, VenueError> {
        self.enter("get_order").await?;
        let state = self.lock();
        state
            .open_orders
            .iter()
            .chain(state.closed_orders.iter())
            .find(|o| o.id == order_id)
            .cloned()
            .ok_or_else(|| VenueError::NotFound("Order not found".to_string()))
    }

    async fn get_projected_funding(
        &self,
        product_ids: &[Uuid],
    ) -> Result<Vec<ProjectedFunding>, VenueError> {
        self.enter("get_projected_funding").await?;
        let state = self.lock();
        let rates = select(&state.funding, product_ids, state.products.iter().map(|p| p.id))?;
        let ids: Vec<Uuid> = if product_ids.is_empty() {
            state.products.iter().map(|p| p.id).collect()
        } else {
            product_ids.to_vec()
        };
        Ok(ids
            .into_iter()
            .zip(rates)
            .map(|(product_id, funding_rate_1h)| ProjectedFunding {
                product_id,
                funding_rate_1h,
            })
            .collect())
    }

    async fn create_order(&self, order: &OrderSubmission) -> Result<VenueOrder, VenueError> {
        self.enter("create_order").await?;
        self.check_signer(&order.subaccount, &order.sender)?;

        let taker_fee = self.config.taker_fee;
        let mut state = self.lock();
        let product = state
            .product(order.product_id)
            .cloned()
            .ok_or_else(|| VenueError::NotFound(format!("product {}", order.product_id)))?;

        if order.quantity <= Decimal::ZERO || !on_grid(order.quantity, product.lot_size) {
            return Err(VenueError::Rejected(format!(
                "quantity {} is not a multiple of lot size {}",
                order.quantity, product.lot_size
            )));
        }
        if order.quantity < product.min_quantity {
            return Err(VenueError::Rejected(format!(
                "quantity {} below minimum {}",
                order.quantity, product.min_quantity
            )));
        }
        if let Some(max) = product.max_quantity.filter(|max| order.quantity > *max) {
            return Err(VenueError::Rejected(format!(
                "quantity {} above maximum {}",
                order.quantity, max
            )));
        }
        for price in [order.price, order.stop_price].into_iter().flatten() {
            if !on_grid(price, product.tick_size) {
                return Err(VenueError::Rejected(format!(
                    "price {} is not a multiple of tick size {}",
                    price, product.tick_size
                )));
            }
        }
        match (order.order_type.as_str(), order.price) {
            ("MARKET", _) | ("LIMIT", Some(_)) => {}
            ("LIMIT", None) => {
                return Err(VenueError::Rejected("limit order without price".to_string()));
            }
            (other, _) => {
                return Err(VenueError::Rejected(format!("unsupported order type {}", other)));
            }
        }
        if order.reduce_only {
            let size = state.position_size(order.product_id);
            let reduces = !size.is_zero() && PositionSide::from_size(size).closing_side() == order.side;
            if !reduces {
                return Err(VenueError::Rejected(
                    "reduce-only order would increase position".to_string(),
                ));
            }
        }

        let mut placed = VenueOrder {
            id: Uuid::new_v4(),
            client_order_id: order.client_order_id.clone(),
            product_id: order.product_id,
            side: order.side,
            order_type: order.order_type.clone(),
            price: order.price,
            stop_price: order.stop_price,
            quantity: order.quantity,
            filled: Decimal::ZERO,
            reduce_only: order.reduce_only,
            status: STATUS_NEW.to_string(),
            created_at: Utc::now(),
        };
        state.submissions.push(order.clone());
        if let (Some(_), Some(stop_type)) = (order.stop_price, order.stop_type) {
            state.stop_types.insert(placed.id, stop_type);
        }

        if state.try_fill(&mut placed, taker_fee) {
            state.closed_orders.push(placed.clone());
        } else {
            state.open_orders.push(placed.clone());
        }
        debug!(
            order_id = %placed.id,
            ticker = %product.ticker,
            side = %placed.side,
            quantity = %placed.quantity,
            status = %placed.status,
            "Simulated order accepted"
        );
        Ok(placed)
    }

    async fn cancel_orders(&self, request: &CancelRequest) -> Result<Vec<Uuid>, VenueError> {
        self.enter("cancel_orders").await?;
        self.check_signer(&request.subaccount, &request.sender)?;
        let mut state = self.lock();
        let mut cancelled = Vec::new();
        for id in &request.order_ids {
            if let Some(pos) = state.open_orders.iter().position(|o| o.id == *id) {
                let mut order = state.open_orders.remove(pos);
                order.status = STATUS_CANCELED.to_string();
                state.stop_types.remove(id);
                state.closed_orders.push(order);
                cancelled.push(*id);
            }
        }
        Ok(cancelled)
    }

    async fn close(&self) -> Result<(), VenueError> {
        self.lock().closed = true;
        Ok(())
    }
}
