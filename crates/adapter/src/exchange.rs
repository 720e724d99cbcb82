use crate::convert::{self, PositionContext};
use crate::{AdapterConfig, ExchangeError};
use ethereal_bridge::{BridgeStats, CallBridge};
use ethereal_core::*;
use ethereal_rest::{OrderSigner, RestClient};
use ethereal_rounding::{normalize_with, NormalizedOrder, OrderIntent};
use futures_util::future::try_join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Optional order parameters.
///
/// A take-profit or stop-loss price turns the order into a reduce-only
/// market trigger order; `side` must then be the side that closes the
/// position.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderParams {
    pub take_profit_price: Option<Decimal>,
    pub stop_loss_price: Option<Decimal>,
    pub reduce_only: bool,
    pub client_order_id: Option<String>,
}

impl OrderParams {
    pub fn take_profit(price: Decimal) -> Self {
        Self {
            take_profit_price: Some(price),
            ..Self::default()
        }
    }

    pub fn stop_loss(price: Decimal) -> Self {
        Self {
            stop_loss_price: Some(price),
            ..Self::default()
        }
    }

    pub fn reduce_only() -> Self {
        Self {
            reduce_only: true,
            ..Self::default()
        }
    }

    fn trigger(&self) -> Option<(Decimal, StopType)> {
        self.take_profit_price
            .map(|p| (p, StopType::TakeProfit))
            .or(self.stop_loss_price.map(|p| (p, StopType::StopLoss)))
    }

    fn purpose(&self) -> OrderPurpose {
        if self.reduce_only || self.trigger().is_some() {
            OrderPurpose::Close
        } else {
            OrderPurpose::Open
        }
    }
}

// ---------------------------------------------------------------------------
// Market cache
// ---------------------------------------------------------------------------

struct MarketCache {
    by_symbol: BTreeMap<String, Market>,
    symbol_by_id: HashMap<Uuid, String>,
}

impl MarketCache {
    fn new(markets: Vec<Market>) -> Self {
        let symbol_by_id = markets.iter().map(|m| (m.id, m.symbol.clone())).collect();
        let by_symbol = markets.into_iter().map(|m| (m.symbol.clone(), m)).collect();
        Self {
            by_symbol,
            symbol_by_id,
        }
    }

    fn get(&self, symbol: &str) -> Result<&Market, ExchangeError> {
        self.by_symbol
            .get(symbol)
            .ok_or_else(|| ExchangeError::BadSymbol(symbol.to_string()))
    }

    fn by_id(&self, id: Uuid) -> Option<&Market> {
        self.symbol_by_id.get(&id).and_then(|s| self.by_symbol.get(s))
    }

    /// The named markets, or all of them.
    fn select(&self, symbols: Option<&[&str]>) -> Result<Vec<&Market>, ExchangeError> {
        match symbols {
            Some(symbols) => symbols.iter().map(|s| self.get(s)).collect(),
            None => Ok(self.by_symbol.values().collect()),
        }
    }
}

// ---------------------------------------------------------------------------
// Facade
// ---------------------------------------------------------------------------

/// Synchronous exchange-interface adapter for Ethereal.
///
/// Every venue operation runs through one [`CallBridge`], so the facade can
/// be called from plain threads, from inside an async runtime, and from
/// many threads at once.
pub struct Ethereal {
    config: AdapterConfig,
    client: Arc<dyn VenueClient>,
    bridge: CallBridge,
    markets: RwLock<Option<Arc<MarketCache>>>,
    account: OnceLock<Subaccount>,
}

impl Ethereal {
    pub fn new(config: AdapterConfig, client: Arc<dyn VenueClient>) -> Result<Self, ExchangeError> {
        let bridge = CallBridge::new(config.bridge.clone());
        bridge.acquire()?;
        info!(
            client = client.name(),
            owned_runtime = ?bridge.owns_runtime(),
            "Ethereal adapter ready"
        );
        Ok(Self {
            config,
            client,
            bridge,
            markets: RwLock::new(None),
            account: OnceLock::new(),
        })
    }

    /// Read-only connection to the REST API.
    pub fn connect(config: AdapterConfig) -> Result<Self, ExchangeError> {
        let client = RestClient::new(config.rest.clone())?;
        Self::new(config, Arc::new(client))
    }

    /// REST connection that can place and cancel orders.
    pub fn connect_with_signer(
        config: AdapterConfig,
        signer: Arc<dyn OrderSigner>,
    ) -> Result<Self, ExchangeError> {
        let client = RestClient::new(config.rest.clone())?.with_signer(signer);
        Self::new(config, Arc::new(client))
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn bridge_stats(&self) -> BridgeStats {
        self.bridge.stats()
    }

    fn call<T, F>(&self, op: &'static str, fut: F) -> Result<T, ExchangeError>
    where
        F: Future<Output = Result<T, VenueError>> + Send + 'static,
        T: Send + 'static,
    {
        debug!(op, "Venue call");
        self.bridge.invoke(fut).map_err(|e| {
            let err = ExchangeError::from(e);
            warn!(op, error = %err, "Venue call failed");
            err
        })
    }

    fn require_signer(&self) -> Result<String, ExchangeError> {
        if self.config.private_key.is_none() {
            return Err(ExchangeError::Authentication("private key required".to_string()));
        }
        self.config
            .wallet_address
            .clone()
            .ok_or_else(|| ExchangeError::Authentication("wallet address required".to_string()))
    }

    fn main_account(&self) -> Result<Subaccount, ExchangeError> {
        if let Some(account) = self.account.get() {
            return Ok(account.clone());
        }
        let owner = self
            .config
            .account_owner()
            .ok_or_else(|| ExchangeError::AccountNotFound("no wallet address configured".to_string()))?
            .to_string();

        let client = self.client.clone();
        let query = owner.clone();
        let subaccounts = self.call("list_subaccounts", async move {
            client.list_subaccounts(&query).await
        })?;
        let Some(first) = subaccounts.into_iter().next() else {
            warn!(%owner, "Wallet has no subaccounts");
            return Err(ExchangeError::AccountNotFound(owner));
        };
        info!(subaccount = %first.name, id = %first.id, "Using main subaccount");
        Ok(self.account.get_or_init(|| first).clone())
    }

    // -----------------------------------------------------------------------
    // Markets
    // -----------------------------------------------------------------------

    /// Fetch every listed market from the venue, bypassing the cache.
    pub fn fetch_markets(&self) -> Result<Vec<Market>, ExchangeError> {
        let client = self.client.clone();
        let products = self.call("list_products", async move { client.list_products().await })?;

        let mut markets = Vec::with_capacity(products.len());
        for product in &products {
            match convert::market_from_product(product, self.config.step_source) {
                Ok(market) => markets.push(market),
                Err(e) => warn!(ticker = %product.ticker, error = %e, "Skipping product with invalid rules"),
            }
        }
        Ok(markets)
    }

    /// Markets from the cache, fetching them on first use or when `reload`.
    pub fn load_markets(&self, reload: bool) -> Result<Vec<Market>, ExchangeError> {
        Ok(self.cache(reload)?.by_symbol.values().cloned().collect())
    }

    fn cache(&self, reload: bool) -> Result<Arc<MarketCache>, ExchangeError> {
        if !reload {
            let cached = self.markets.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cache) = cached.as_ref() {
                return Ok(cache.clone());
            }
        }
        let cache = Arc::new(MarketCache::new(self.fetch_markets()?));
        info!(markets = cache.by_symbol.len(), "Markets loaded");
        *self.markets.write().unwrap_or_else(PoisonError::into_inner) = Some(cache.clone());
        Ok(cache)
    }

    pub fn market(&self, symbol: &str) -> Result<Market, ExchangeError> {
        self.cache(false)?.get(symbol).cloned()
    }

    pub fn market_id(&self, symbol: &str) -> Result<Uuid, ExchangeError> {
        Ok(self.cache(false)?.get(symbol)?.id)
    }

    /// Unified symbol for a venue product id.
    pub fn market_symbol(&self, id: Uuid) -> Result<Option<String>, ExchangeError> {
        Ok(self.cache(false)?.symbol_by_id.get(&id).cloned())
    }

    // -----------------------------------------------------------------------
    // Market data
    // -----------------------------------------------------------------------

    pub fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
        let id = self.market_id(symbol)?;
        let client = self.client.clone();
        let prices = self.call("list_market_prices", async move {
            client.list_market_prices(&[id]).await
        })?;
        let price = prices
            .iter()
            .find(|p| p.product_id == id)
            .ok_or_else(|| ExchangeError::BadSymbol(format!("no price for {}", symbol)))?;
        Ok(convert::ticker(symbol, price))
    }

    /// Tickers for the given symbols (all markets when `None`), fetched
    /// concurrently inside a single bridged call.
    pub fn fetch_tickers(&self, symbols: Option<&[&str]>) -> Result<BTreeMap<String, Ticker>, ExchangeError> {
        let cache = self.cache(false)?;
        let ids: Vec<Uuid> = cache.select(symbols)?.iter().map(|m| m.id).collect();

        let client = self.client.clone();
        let prices = self.call("list_market_prices", async move {
            let requests = ids.iter().map(|id| {
                let client = client.clone();
                let id = *id;
                async move { client.list_market_prices(&[id]).await }
            });
            let pages = try_join_all(requests).await?;
            Ok::<_, VenueError>(pages.into_iter().flatten().collect::<Vec<_>>())
        })?;

        Ok(prices
            .iter()
            .filter_map(|price| {
                let market = cache.by_id(price.product_id)?;
                Some((market.symbol.clone(), convert::ticker(&market.symbol, price)))
            })
            .collect())
    }

    pub fn fetch_order_book(&self, symbol: &str, _limit: Option<u32>) -> Result<OrderBook, ExchangeError> {
        Err(ExchangeError::NotSupported(format!("fetch_order_book({})", symbol)))
    }

    pub fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        _since: Option<i64>,
        _limit: Option<u32>,
    ) -> Result<Vec<Candle>, ExchangeError> {
        Err(ExchangeError::NotSupported(format!(
            "fetch_ohlcv({}, {})",
            symbol, timeframe
        )))
    }

    pub fn fetch_funding_rate(&self, symbol: &str) -> Result<Option<FundingRate>, ExchangeError> {
        let id = self.market_id(symbol)?;
        let client = self.client.clone();
        let projected = self.call("get_projected_funding", async move {
            client.get_projected_funding(&[id]).await
        })?;
        Ok(projected
            .iter()
            .find(|p| p.product_id == id)
            .map(|p| convert::funding_rate(symbol, p)))
    }

    pub fn fetch_funding_rates(
        &self,
        symbols: Option<&[&str]>,
    ) -> Result<BTreeMap<String, FundingRate>, ExchangeError> {
        let cache = self.cache(false)?;
        let ids: Vec<Uuid> = cache.select(symbols)?.iter().map(|m| m.id).collect();
        let client = self.client.clone();
        let projected = self.call("get_projected_funding", async move {
            client.get_projected_funding(&ids).await
        })?;
        Ok(projected
            .iter()
            .filter_map(|p| {
                let market = cache.by_id(p.product_id)?;
                Some((market.symbol.clone(), convert::funding_rate(&market.symbol, p)))
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Account
    // -----------------------------------------------------------------------

    pub fn fetch_accounts(&self) -> Result<Vec<Account>, ExchangeError> {
        let owner = self
            .config
            .account_owner()
            .ok_or_else(|| ExchangeError::AccountNotFound("no wallet address configured".to_string()))?
            .to_string();
        let client = self.client.clone();
        let subaccounts = self.call("list_subaccounts", async move {
            client.list_subaccounts(&owner).await
        })?;
        Ok(subaccounts.iter().map(convert::account).collect())
    }

    pub fn fetch_balance(&self) -> Result<Balances, ExchangeError> {
        let account = self.main_account()?;
        let client = self.client.clone();
        let records = self.call("get_subaccount_balances", async move {
            client.get_subaccount_balances(account.id).await
        })?;
        Ok(convert::balances(&records))
    }

    /// The account's fills, newest first. `limit` defaults to
    /// `AdapterConfig::default_trade_limit`.
    pub fn fetch_trades(&self, symbol: Option<&str>, limit: Option<u32>) -> Result<Vec<Trade>, ExchangeError> {
        let cache = self.cache(false)?;
        let product_ids = match symbol {
            Some(symbol) => vec![cache.get(symbol)?.id],
            None => Vec::new(),
        };
        let account = self.main_account()?;
        let query = FillQuery {
            subaccount_id: account.id,
            product_ids,
            limit: Some(limit.unwrap_or(self.config.default_trade_limit)),
        };
        let client = self.client.clone();
        let fills = self.call("list_fills", async move { client.list_fills(&query).await })?;
        Ok(fills
            .iter()
            .map(|f| convert::trade(f, cache.by_id(f.product_id)))
            .collect())
    }

    pub fn fetch_my_trades(&self, symbol: Option<&str>, limit: Option<u32>) -> Result<Vec<Trade>, ExchangeError> {
        self.fetch_trades(symbol, limit)
    }

    /// Open positions marked at the oracle price.
    pub fn fetch_positions(&self, symbols: Option<&[&str]>) -> Result<Vec<Position>, ExchangeError> {
        let cache = self.cache(false)?;
        if let Some(symbols) = symbols {
            cache.select(Some(symbols))?;
        }
        let account = self.main_account()?;
        let client = self.client.clone();
        let (positions, prices) = self.call("list_positions", async move {
            let positions = client.list_positions(account.id).await?;
            let mut ids: Vec<Uuid> = positions.iter().map(|p| p.product_id).collect();
            ids.sort();
            ids.dedup();
            let prices = if ids.is_empty() {
                Vec::new()
            } else {
                client.list_market_prices(&ids).await?
            };
            Ok::<_, VenueError>((positions, prices))
        })?;

        let mut out = Vec::with_capacity(positions.len());
        for venue in &positions {
            let Some(market) = cache.by_id(venue.product_id) else {
                warn!(product_id = %venue.product_id, "Position in unknown market");
                continue;
            };
            if symbols.is_some_and(|s| !s.contains(&market.symbol.as_str())) {
                continue;
            }
            let ctx = PositionContext {
                market,
                mark_price: prices
                    .iter()
                    .find(|p| p.product_id == venue.product_id)
                    .map(|p| p.oracle_price),
                leverage: self.config.leverage,
                margin_mode: self.config.margin_mode,
            };
            out.push(convert::position(venue, &ctx));
        }
        Ok(out)
    }

    pub fn fetch_position(&self, symbol: &str) -> Result<Option<Position>, ExchangeError> {
        Ok(self.fetch_positions(Some(&[symbol]))?.into_iter().next())
    }

    pub fn fetch_leverage(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        self.market_id(symbol)?;
        Ok(self.config.leverage)
    }

    pub fn fetch_margin_mode(&self, symbol: &str) -> Result<MarginMode, ExchangeError> {
        self.market_id(symbol)?;
        Ok(self.config.margin_mode)
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    /// Snap a price and quantity onto the market's grid.
    pub fn normalize_order(
        &self,
        symbol: &str,
        side: Side,
        price: Option<Decimal>,
        amount: Decimal,
        purpose: OrderPurpose,
    ) -> Result<NormalizedOrder, ExchangeError> {
        let market = self.market(symbol)?;
        let intent = OrderIntent {
            side,
            raw_price: price,
            raw_quantity: amount,
            purpose,
        };
        Ok(normalize_with(&market.rules, &intent, self.config.step_source)?)
    }

    /// Normalize and place an order.
    ///
    /// Quantities that round to zero or fall outside the market's limits are
    /// rejected before anything is sent.
    pub fn create_order(
        &self,
        symbol: &str,
        order_type: OrderType,
        side: Side,
        amount: Decimal,
        price: Option<Decimal>,
        params: &OrderParams,
    ) -> Result<Order, ExchangeError> {
        let sender = self.require_signer()?;
        let market = self.market(symbol)?;
        let trigger = params.trigger();

        if trigger.is_none() && order_type == OrderType::Limit && price.is_none() {
            return Err(ExchangeError::InvalidOrder("limit order requires a price".to_string()));
        }

        let normalized = self.normalize_order(
            symbol,
            side,
            trigger.map(|(p, _)| p).or(price),
            amount,
            params.purpose(),
        )?;
        if let Err(violation) = market.rules.check_quantity(normalized.quantity) {
            warn!(symbol, %amount, error = %violation, "Order rejected before dispatch");
            return Err(ExchangeError::InvalidOrder(violation.to_string()));
        }
        if let Some(p) = normalized.price.filter(|p| *p <= Decimal::ZERO) {
            warn!(symbol, price = %p, "Order rejected before dispatch");
            return Err(ExchangeError::InvalidOrder(format!("price {} must be positive", p)));
        }

        let (dispatch_type, limit_price, stop_price, stop_type) = match trigger {
            Some((_, stop_type)) => (OrderType::Market, None, normalized.price, Some(stop_type)),
            None if order_type == OrderType::Limit => (order_type, normalized.price, None, None),
            None => (order_type, None, None, None),
        };

        let account = self.main_account()?;
        let submission = OrderSubmission {
            subaccount: account.name,
            sender,
            product_id: market.id,
            side,
            order_type: dispatch_type.as_venue_str().to_string(),
            quantity: normalized.quantity,
            price: limit_price,
            stop_price,
            stop_type,
            reduce_only: params.purpose() == OrderPurpose::Close,
            client_order_id: params.client_order_id.clone(),
        };
        info!(
            symbol,
            side = %side,
            order_type = %submission.order_type,
            quantity = %submission.quantity,
            price = ?submission.price,
            stop_price = ?submission.stop_price,
            reduce_only = submission.reduce_only,
            "Placing order"
        );

        let client = self.client.clone();
        let placed = self
            .call("create_order", async move { client.create_order(&submission).await })
            .map_err(rejected_as_invalid)?;

        let mut order = convert::order(&placed, Some(&market));
        order.status = if placed.is_filled() {
            OrderStatus::Closed
        } else {
            OrderStatus::Open
        };
        order.order_type = Some(order_type);
        order.fee = normalized.price.map(|reference| Fee {
            cost: self.config.fees.taker * normalized.quantity * reference,
            currency: market.settle.clone(),
            rate: Some(self.config.fees.taker),
        });
        Ok(order)
    }

    pub fn cancel_order(&self, id: &str) -> Result<Order, ExchangeError> {
        let order_id = parse_order_id(id)?;
        let cancelled = self.cancel_ids(vec![order_id]).map_err(|err| match err {
            ExchangeError::Venue(VenueError::NotFound(_) | VenueError::Rejected(_)) => {
                ExchangeError::OrderNotFound(id.to_string())
            }
            other => other,
        })?;
        if !cancelled.contains(&order_id) {
            warn!(order_id = %id, "Venue did not cancel order");
            return Err(ExchangeError::OrderNotFound(id.to_string()));
        }
        Ok(Order::with_status(id, OrderStatus::Canceled))
    }

    /// Cancel every open order, optionally only in `symbol`.
    pub fn cancel_all_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>, ExchangeError> {
        let ids: Vec<Uuid> = self
            .fetch_orders(symbol)?
            .iter()
            .filter(|o| o.status.is_active())
            .filter_map(|o| Uuid::parse_str(&o.id).ok())
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let cancelled = self.cancel_ids(ids)?;
        info!(count = cancelled.len(), "Orders cancelled");
        Ok(cancelled
            .iter()
            .map(|id| Order::with_status(id.to_string(), OrderStatus::Canceled))
            .collect())
    }

    fn cancel_ids(&self, order_ids: Vec<Uuid>) -> Result<Vec<Uuid>, ExchangeError> {
        let sender = self.require_signer()?;
        let account = self.main_account()?;
        let request = CancelRequest {
            subaccount: account.name,
            sender,
            order_ids,
        };
        let client = self.client.clone();
        self.call("cancel_orders", async move { client.cancel_orders(&request).await })
    }

    pub fn fetch_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>, ExchangeError> {
        let cache = self.cache(false)?;
        if let Some(symbol) = symbol {
            cache.get(symbol)?;
        }
        let account = self.main_account()?;
        let client = self.client.clone();
        let orders = self.call("list_orders", async move { client.list_orders(account.id).await })?;
        Ok(orders
            .iter()
            .map(|o| convert::order(o, cache.by_id(o.product_id)))
            .filter(|o| symbol.is_none() || o.symbol.as_deref() == symbol)
            .collect())
    }

    pub fn fetch_order(&self, id: &str) -> Result<Order, ExchangeError> {
        let order_id = parse_order_id(id)?;
        let cache = self.cache(false)?;
        let client = self.client.clone();
        let venue = self
            .call("get_order", async move { client.get_order(order_id).await })
            .map_err(|err| match err {
                ExchangeError::Venue(VenueError::NotFound(_)) => ExchangeError::OrderNotFound(id.to_string()),
                other => other,
            })?;
        Ok(convert::order(&venue, cache.by_id(venue.product_id)))
    }

    // -----------------------------------------------------------------------
    // Metadata & lifecycle
    // -----------------------------------------------------------------------

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            spot: false,
            margin: false,
            swap: true,
            future: false,
            option: false,
            fetch_markets: true,
            fetch_ticker: true,
            fetch_tickers: true,
            fetch_order_book: false,
            fetch_ohlcv: false,
            fetch_balance: true,
            fetch_trades: true,
            fetch_my_trades: true,
            create_order: true,
            cancel_order: true,
            cancel_all_orders: true,
            fetch_order: true,
            fetch_orders: true,
            fetch_open_orders: false,
            fetch_closed_orders: true,
            fetch_positions: true,
            fetch_position: true,
            fetch_funding_rate: true,
            fetch_funding_rates: true,
        }
    }

    pub fn fees(&self) -> FeeSchedule {
        self.config.fees
    }

    /// Close the venue client and shut the bridge down. Idempotent; later
    /// calls fail with a closed-bridge error.
    pub fn close(&self) -> Result<(), ExchangeError> {
        if self.bridge.is_closed() {
            return Ok(());
        }
        let client = self.client.clone();
        let result = self.call("close", async move { client.close().await });
        self.bridge.close();
        info!("Ethereal adapter closed");
        result
    }
}

fn parse_order_id(id: &str) -> Result<Uuid, ExchangeError> {
    Uuid::parse_str(id).map_err(|_| ExchangeError::OrderNotFound(id.to_string()))
}

fn rejected_as_invalid(err: ExchangeError) -> ExchangeError {
    match err {
        ExchangeError::Venue(VenueError::Rejected(message)) => ExchangeError::InvalidOrder(message),
        ExchangeError::Venue(VenueError::Api { message, .. }) => ExchangeError::InvalidOrder(message),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethereal_bridge::BridgeError;
    use ethereal_rounding::StepSource;
    use ethereal_simulated::{SimulatedVenue, SimulatedVenueConfig};
    use rust_decimal_macros::dec;

    const BTC: &str = "BTC/USD:USD";
    const TEST: &str = "TEST/USD:USD";

    fn setup_with(step_source: StepSource) -> (Ethereal, Arc<SimulatedVenue>) {
        let venue = Arc::new(SimulatedVenue::with_demo_markets(SimulatedVenueConfig::default()));
        venue.add_product(
            Product {
                id: Uuid::from_u128(100),
                ticker: "TESTUSD".to_string(),
                base_token_name: "TEST".to_string(),
                quote_token_name: "USD".to_string(),
                tick_size: dec!(0.01),
                lot_size: dec!(0.001),
                min_quantity: dec!(0.001),
                max_quantity: Some(dec!(1000)),
            },
            dec!(100),
            dec!(0.00002),
        );
        venue.add_product(
            Product {
                id: Uuid::from_u128(101),
                ticker: "HALFUSD".to_string(),
                base_token_name: "HALF".to_string(),
                quote_token_name: "USD".to_string(),
                tick_size: dec!(0.5),
                lot_size: dec!(1),
                min_quantity: dec!(1),
                max_quantity: None,
            },
            dec!(100),
            dec!(0),
        );
        let config = AdapterConfig {
            wallet_address: Some(venue.config().account.clone()),
            private_key: Some("0xkey".to_string()),
            step_source,
            ..AdapterConfig::default()
        };
        let exchange = Ethereal::new(config, venue.clone()).unwrap();
        (exchange, venue)
    }

    fn setup() -> (Ethereal, Arc<SimulatedVenue>) {
        setup_with(StepSource::Tick)
    }

    #[test]
    fn test_load_markets() {
        let (exchange, _venue) = setup();
        let markets = exchange.load_markets(false).unwrap();
        let symbols: Vec<_> = markets.iter().map(|m| m.symbol.as_str()).collect();
        assert!(symbols.contains(&BTC));
        assert!(symbols.contains(&"ETH/USD:USD"));
        assert_eq!(markets.len(), 5);

        let id = exchange.market_id(BTC).unwrap();
        assert_eq!(exchange.market_symbol(id).unwrap().as_deref(), Some(BTC));
        assert_eq!(exchange.market_symbol(Uuid::nil()).unwrap(), None);
    }

    #[test]
    fn test_unknown_symbol() {
        let (exchange, _venue) = setup();
        assert!(matches!(
            exchange.fetch_ticker("DOGE/USD:USD"),
            Err(ExchangeError::BadSymbol(_))
        ));
    }

    #[test]
    fn test_fetch_ticker_and_tickers() {
        let (exchange, _venue) = setup();
        let ticker = exchange.fetch_ticker(BTC).unwrap();
        assert_eq!(ticker.bid, Some(dec!(64999)));
        assert_eq!(ticker.ask, Some(dec!(65001)));
        assert_eq!(ticker.last, Some(dec!(65000)));

        let all = exchange.fetch_tickers(None).unwrap();
        assert_eq!(all.len(), 5);
        let some = exchange.fetch_tickers(Some(&[BTC, TEST])).unwrap();
        assert_eq!(some.keys().collect::<Vec<_>>(), vec![BTC, TEST]);
    }

    #[test]
    fn test_normalize_order_examples() {
        let (exchange, _venue) = setup();
        let sell = exchange
            .normalize_order(TEST, Side::Sell, Some(dec!(100.004)), dec!(1.2345), OrderPurpose::Open)
            .unwrap();
        assert_eq!(sell.price, Some(dec!(100.01)));
        assert_eq!(sell.quantity, dec!(1.234));

        let buy = exchange
            .normalize_order(TEST, Side::Buy, Some(dec!(100.006)), dec!(1.2345), OrderPurpose::Open)
            .unwrap();
        assert_eq!(buy.price, Some(dec!(100.00)));
    }

    #[test]
    fn test_decimal_places_step_source() {
        let (tick, _) = setup_with(StepSource::Tick);
        let (legacy, _) = setup_with(StepSource::DecimalPlaces);
        let symbol = "HALF/USD:USD";

        let on_tick = tick
            .normalize_order(symbol, Side::Sell, Some(dec!(100.2)), dec!(1), OrderPurpose::Open)
            .unwrap();
        let on_digits = legacy
            .normalize_order(symbol, Side::Sell, Some(dec!(100.2)), dec!(1), OrderPurpose::Open)
            .unwrap();
        assert_eq!(on_tick.price, Some(dec!(100.5)));
        assert_eq!(on_digits.price, Some(dec!(101)));
    }

    #[test]
    fn test_limit_order_is_normalized_before_dispatch() {
        let (exchange, venue) = setup();
        let order = exchange
            .create_order(
                TEST,
                OrderType::Limit,
                Side::Sell,
                dec!(1.2345),
                Some(dec!(100.004)),
                &OrderParams::default(),
            )
            .unwrap();
        assert_eq!(order.status, OrderStatus::Open);
        assert_eq!(order.symbol.as_deref(), Some(TEST));

        let sent = venue.submissions();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].price, Some(dec!(100.01)));
        assert_eq!(sent[0].quantity, dec!(1.234));
        assert_eq!(sent[0].order_type, "LIMIT");
        assert!(!sent[0].reduce_only);

        let fee = order.fee.unwrap();
        assert_eq!(fee.cost, dec!(0.0003) * dec!(1.234) * dec!(100.01));
        assert_eq!(fee.currency, "USD");
    }

    #[test]
    fn test_zero_quantity_rejected_before_dispatch() {
        let (exchange, venue) = setup();
        let err = exchange
            .create_order(BTC, OrderType::Market, Side::Buy, dec!(0.00005), None, &OrderParams::default())
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidOrder(_)));
        assert!(venue.submissions().is_empty());
    }

    #[test]
    fn test_non_positive_amount_and_price_rejected_before_dispatch() {
        let (exchange, venue) = setup();
        let err = exchange
            .create_order(BTC, OrderType::Market, Side::Buy, dec!(-1.23456), None, &OrderParams::default())
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidOrder(m) if m.contains("negative")));

        let err = exchange
            .create_order(BTC, OrderType::Limit, Side::Buy, dec!(1), Some(dec!(-5)), &OrderParams::default())
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidOrder(m) if m.contains("positive")));

        // Rounds down to zero on a 0.01 tick.
        let err = exchange
            .create_order(TEST, OrderType::Limit, Side::Buy, dec!(1), Some(dec!(0.004)), &OrderParams::default())
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidOrder(_)));

        let err = exchange
            .create_order(BTC, OrderType::Market, Side::Sell, dec!(1), None, &OrderParams::stop_loss(dec!(0)))
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidOrder(_)));

        assert!(venue.submissions().is_empty());
    }

    #[test]
    fn test_limit_without_price_rejected() {
        let (exchange, venue) = setup();
        let err = exchange
            .create_order(BTC, OrderType::Limit, Side::Buy, dec!(1), None, &OrderParams::default())
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidOrder(_)));
        assert!(venue.submissions().is_empty());
    }

    #[test]
    fn test_market_order_fills_and_opens_position() {
        let (exchange, _venue) = setup();
        let order = exchange
            .create_order(BTC, OrderType::Market, Side::Buy, dec!(0.50004), None, &OrderParams::default())
            .unwrap();
        assert_eq!(order.status, OrderStatus::Closed);
        assert_eq!(order.amount, Some(dec!(0.5)));
        assert_eq!(order.order_type, Some(OrderType::Market));

        let position = exchange.fetch_position(BTC).unwrap().unwrap();
        assert_eq!(position.side, PositionSide::Long);
        assert_eq!(position.contracts, dec!(0.5));
        assert_eq!(position.entry_price, Some(dec!(65001)));
        assert_eq!(position.mark_price, Some(dec!(65000)));
        assert_eq!(position.unrealized_pnl, Some(dec!(-0.5)));
        assert_eq!(position.leverage, dec!(10));
        assert_eq!(position.margin_mode, MarginMode::Cross);

        assert!(exchange.fetch_position("ETH/USD:USD").unwrap().is_none());

        let trades = exchange.fetch_my_trades(Some(BTC), None).unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].cost, dec!(0.5) * dec!(65001));
        assert_eq!(trades[0].symbol.as_deref(), Some(BTC));
    }

    #[test]
    fn test_stop_loss_uses_closing_rounding() {
        let (exchange, venue) = setup();
        exchange
            .create_order(BTC, OrderType::Market, Side::Buy, dec!(1), None, &OrderParams::default())
            .unwrap();

        // Closing a long: sell trigger rounds down.
        let stop = exchange
            .create_order(
                BTC,
                OrderType::Market,
                Side::Sell,
                dec!(1),
                None,
                &OrderParams::stop_loss(dec!(64000.7)),
            )
            .unwrap();
        assert_eq!(stop.status, OrderStatus::Open);

        let sent = venue.submissions().pop().unwrap();
        assert_eq!(sent.order_type, "MARKET");
        assert_eq!(sent.stop_price, Some(dec!(64000)));
        assert_eq!(sent.stop_type, Some(StopType::StopLoss));
        assert_eq!(sent.price, None);
        assert!(sent.reduce_only);

        venue.set_mark_price(exchange.market_id(BTC).unwrap(), dec!(63990));
        assert_eq!(exchange.fetch_order(&stop.id).unwrap().status, OrderStatus::Closed);
        assert!(exchange.fetch_positions(None).unwrap().is_empty());
    }

    #[test]
    fn test_take_profit_on_short_rounds_up() {
        let (exchange, venue) = setup();
        exchange
            .create_order(BTC, OrderType::Market, Side::Sell, dec!(1), None, &OrderParams::default())
            .unwrap();
        exchange
            .create_order(
                BTC,
                OrderType::Market,
                Side::Buy,
                dec!(1),
                None,
                &OrderParams::take_profit(dec!(60000.2)),
            )
            .unwrap();

        let sent = venue.submissions().pop().unwrap();
        assert_eq!(sent.stop_price, Some(dec!(60001)));
        assert_eq!(sent.stop_type, Some(StopType::TakeProfit));
        assert!(sent.reduce_only);
    }

    #[test]
    fn test_reduce_only_without_position_is_invalid_order() {
        let (exchange, _venue) = setup();
        let err = exchange
            .create_order(BTC, OrderType::Market, Side::Sell, dec!(1), None, &OrderParams::reduce_only())
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidOrder(_)));
    }

    #[test]
    fn test_orders_cancel_and_lookup() {
        let (exchange, _venue) = setup();
        let resting = exchange
            .create_order(
                BTC,
                OrderType::Limit,
                Side::Buy,
                dec!(0.1),
                Some(dec!(60000)),
                &OrderParams::default(),
            )
            .unwrap();
        let other = exchange
            .create_order(
                TEST,
                OrderType::Limit,
                Side::Buy,
                dec!(1),
                Some(dec!(90)),
                &OrderParams::default(),
            )
            .unwrap();

        assert_eq!(exchange.fetch_orders(None).unwrap().len(), 2);
        assert_eq!(exchange.fetch_orders(Some(BTC)).unwrap().len(), 1);

        let cancelled = exchange.cancel_order(&resting.id).unwrap();
        assert_eq!(cancelled.status, OrderStatus::Canceled);
        assert_eq!(exchange.fetch_order(&resting.id).unwrap().status, OrderStatus::Canceled);

        // Already cancelled.
        assert!(matches!(
            exchange.cancel_order(&resting.id),
            Err(ExchangeError::OrderNotFound(_))
        ));

        let all = exchange.cancel_all_orders(None).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, other.id);
    }

    #[test]
    fn test_unknown_order_not_found() {
        let (exchange, _venue) = setup();
        let missing = Uuid::new_v4().to_string();
        assert!(matches!(
            exchange.fetch_order(&missing),
            Err(ExchangeError::OrderNotFound(id)) if id == missing
        ));
        assert!(matches!(
            exchange.fetch_order("not-a-uuid"),
            Err(ExchangeError::OrderNotFound(_))
        ));
    }

    #[test]
    fn test_writes_require_credentials() {
        let venue = Arc::new(SimulatedVenue::with_demo_markets(SimulatedVenueConfig::default()));
        let config = AdapterConfig {
            wallet_address: Some(venue.config().account.clone()),
            ..AdapterConfig::default()
        };
        let exchange = Ethereal::new(config, venue.clone()).unwrap();
        let err = exchange
            .create_order(BTC, OrderType::Market, Side::Buy, dec!(1), None, &OrderParams::default())
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Authentication(_)));

        // Reads still work.
        assert!(exchange.fetch_balance().is_ok());
    }

    #[test]
    fn test_missing_subaccount() {
        let venue = Arc::new(SimulatedVenue::with_demo_markets(SimulatedVenueConfig::default()));
        let config = AdapterConfig {
            wallet_address: Some("0x2222222222222222222222222222222222222222".to_string()),
            ..AdapterConfig::default()
        };
        let exchange = Ethereal::new(config, venue).unwrap();
        assert!(matches!(exchange.fetch_balance(), Err(ExchangeError::AccountNotFound(_))));
        assert!(exchange.fetch_accounts().unwrap().is_empty());
    }

    #[test]
    fn test_balance_and_accounts() {
        let (exchange, venue) = setup();
        let balances = exchange.fetch_balance().unwrap();
        assert_eq!(balances.total("USD"), dec!(100000));
        assert_eq!(balances.free("USD"), dec!(100000));

        let accounts = exchange.fetch_accounts().unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].id, venue.subaccount().id);
    }

    #[test]
    fn test_funding_rates() {
        let (exchange, _venue) = setup();
        let rate = exchange.fetch_funding_rate(BTC).unwrap().unwrap();
        assert_eq!(rate.funding_rate, dec!(0.0000125));
        assert_eq!(rate.annualized, dec!(0.1095));

        let rates = exchange.fetch_funding_rates(None).unwrap();
        assert_eq!(rates.len(), 5);
    }

    #[test]
    fn test_unsupported_and_static_operations() {
        let (exchange, _venue) = setup();
        assert!(matches!(
            exchange.fetch_ohlcv(BTC, "1m", None, None),
            Err(ExchangeError::NotSupported(_))
        ));
        assert!(matches!(
            exchange.fetch_order_book(BTC, None),
            Err(ExchangeError::NotSupported(_))
        ));
        assert_eq!(exchange.fetch_leverage(BTC).unwrap(), dec!(10));
        assert_eq!(exchange.fetch_margin_mode(BTC).unwrap(), MarginMode::Cross);
        assert!(matches!(
            exchange.fetch_leverage("NOPE"),
            Err(ExchangeError::BadSymbol(_))
        ));
        assert!(exchange.capabilities().swap);
        assert!(!exchange.capabilities().fetch_ohlcv);
        assert_eq!(exchange.fees().maker, dec!(0.0003));
    }

    #[test]
    fn test_venue_failure_propagates() {
        let (exchange, venue) = setup();
        exchange.load_markets(false).unwrap();
        venue.fail_next(VenueError::Transport("connection reset".to_string()));
        let err = exchange.fetch_ticker(BTC).unwrap_err();
        assert!(matches!(err, ExchangeError::Venue(VenueError::Transport(_))));
        assert!(exchange.fetch_ticker(BTC).is_ok());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (exchange, _venue) = setup();
        exchange.load_markets(false).unwrap();
        exchange.close().unwrap();
        exchange.close().unwrap();
        let err = exchange.fetch_ticker(BTC).unwrap_err();
        assert!(matches!(err, ExchangeError::Bridge(BridgeError::BridgeClosed)));
    }

    #[test]
    fn test_concurrent_callers() {
        let (exchange, _venue) = setup();
        let exchange = Arc::new(exchange);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let exchange = exchange.clone();
                std::thread::spawn(move || exchange.fetch_ticker(BTC).map(|t| t.last))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), Some(dec!(65000)));
        }
        assert_eq!(exchange.bridge_stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_usable_from_async_context() {
        let (exchange, _venue) = setup();
        let ticker = exchange.fetch_ticker(BTC).unwrap();
        assert_eq!(ticker.last, Some(dec!(65000)));
        exchange.close().unwrap();
    }
}
