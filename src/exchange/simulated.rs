use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::exchange::ExchangeGateway;
use crate::helpers::now_ms;
use crate::models::{
    ExchangeOrder, HistoricalPrice, Order, OrderBook, OrderRequest, OrderStatus, OrderType,
    PriceLevel, Side, Ticker, TradeRecord,
};
use crate::{Error, Result};

/// An order resting on the simulated venue
#[derive(Debug, Clone)]
pub struct SimOrder {
    pub request: OrderRequest,
    pub exchange_order: ExchangeOrder,
}

#[derive(Default)]
struct SimState {
    prices: HashMap<String, f64>,
    bars: HashMap<(String, String), Vec<HistoricalPrice>>,
    books: HashMap<String, OrderBook>,
    /// Keyed by venue reference id
    orders: HashMap<String, SimOrder>,
    trades: Vec<TradeRecord>,
    next_ref: u64,
    /// Fixed clock in ms; 0 follows wall time
    clock: i64,
    fail_next: u32,
    reject_next: u32,
    cancel_requests: u32,
}

impl SimState {
    fn now(&self) -> i64 {
        if self.clock > 0 {
            self.clock
        } else {
            now_ms()
        }
    }

    fn take_failure(&mut self) -> Result<()> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(Error::Venue {
                code: -1001,
                message: "Internal error; unable to process your request. Please try again."
                    .to_string(),
            });
        }
        Ok(())
    }

    fn take_rejection(&mut self) -> bool {
        if self.reject_next > 0 {
            self.reject_next -= 1;
            return true;
        }
        false
    }

    fn accept(&mut self, request: &OrderRequest, status: OrderStatus) -> ExchangeOrder {
        self.next_ref += 1;
        let now = self.now();
        let exchange_order = ExchangeOrder {
            ref_id: self.next_ref.to_string(),
            status,
            open_price: request.intent.open_price,
            qty: request.intent.qty,
            commission: 0.0,
            open_time: now,
            update_time: now,
        };
        self.orders.insert(
            exchange_order.ref_id.clone(),
            SimOrder {
                request: request.clone(),
                exchange_order: exchange_order.clone(),
            },
        );
        exchange_order
    }

    fn record_trade(&mut self, ref_id: &str, commission_rate: f64) -> Option<TradeRecord> {
        let now = self.now();
        let order = self.orders.get_mut(ref_id)?;
        let exo = &mut order.exchange_order;
        exo.commission = exo.open_price * exo.qty * commission_rate;
        let trade = TradeRecord {
            ref_id: exo.ref_id.clone(),
            symbol: order.request.intent.symbol.clone(),
            price: exo.open_price,
            qty: exo.qty,
            commission: exo.commission,
            time: now,
        };
        self.trades.push(trade.clone());
        Some(trade)
    }

    fn fill(&mut self, ref_id: &str) -> bool {
        let now = self.now();
        match self.orders.get_mut(ref_id) {
            Some(order) if order.exchange_order.status == OrderStatus::New => {
                order.exchange_order.status = OrderStatus::Filled;
                order.exchange_order.update_time = now;
                true
            }
            _ => false,
        }
    }
}

/// Whether a resting order would execute at `price`
fn crosses(order: &SimOrder, price: f64) -> bool {
    let intent = &order.request.intent;
    match (intent.order_type, intent.side) {
        (OrderType::Limit, Side::Buy) => price <= intent.open_price,
        (OrderType::Limit, Side::Sell) => price >= intent.open_price,
        (t, Side::Buy) if t.is_stop_loss() => price >= intent.stop_price,
        (t, Side::Sell) if t.is_stop_loss() => price <= intent.stop_price,
        (t, Side::Buy) if t.is_take_profit() => price <= intent.stop_price,
        (t, Side::Sell) if t.is_take_profit() => price >= intent.stop_price,
        _ => false,
    }
}

/// Deterministic in-process venue.
///
/// Tests script prices, bars, fills and failures directly. In paper mode a live
/// market-data gateway supplies quotes and resting orders fill as the price
/// crosses them.
pub struct SimulatedExchange {
    name: String,
    commission_rate: f64,
    market_data: Option<Arc<dyn ExchangeGateway>>,
    state: Mutex<SimState>,
}

impl SimulatedExchange {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            commission_rate: 0.0,
            market_data: None,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Paper trading: quotes come from `market_data`, orders never leave the process
    pub fn paper(market_data: Arc<dyn ExchangeGateway>, commission_rate: f64) -> Self {
        Self {
            name: market_data.name().to_string(),
            commission_rate,
            market_data: Some(market_data),
            state: Mutex::new(SimState::default()),
        }
    }

    pub fn with_commission_rate(mut self, rate: f64) -> Self {
        self.commission_rate = rate;
        self
    }

    pub async fn set_price(&self, symbol: &str, price: f64) {
        self.state.lock().await.prices.insert(symbol.to_string(), price);
    }

    /// Pin the venue clock (ms)
    pub async fn set_time(&self, time: i64) {
        self.state.lock().await.clock = time;
    }

    pub async fn set_bars(&self, symbol: &str, timeframe: &str, bars: Vec<HistoricalPrice>) {
        self.state
            .lock()
            .await
            .bars
            .insert((symbol.to_string(), timeframe.to_string()), bars);
    }

    pub async fn set_order_book(&self, symbol: &str, book: OrderBook) {
        self.state.lock().await.books.insert(symbol.to_string(), book);
    }

    /// Fail the next `n` venue calls with a transport-style error
    pub async fn fail_next(&self, n: u32) {
        self.state.lock().await.fail_next = n;
    }

    /// Silently reject the next `n` order submissions
    pub async fn reject_next(&self, n: u32) {
        self.state.lock().await.reject_next = n;
    }

    /// Mark an order filled without publishing its trade yet
    pub async fn fill(&self, ref_id: &str) -> bool {
        self.state.lock().await.fill(ref_id)
    }

    /// Publish the trade of a filled order to the recent trade list
    pub async fn publish_trade(&self, ref_id: &str) -> Option<TradeRecord> {
        let rate = self.commission_rate;
        self.state.lock().await.record_trade(ref_id, rate)
    }

    /// Fill an order and publish its trade
    pub async fn fill_and_trade(&self, ref_id: &str) -> bool {
        let rate = self.commission_rate;
        let mut state = self.state.lock().await;
        if !state.fill(ref_id) {
            return false;
        }
        state.record_trade(ref_id, rate).is_some()
    }

    /// Force a venue-side status change, e.g. an expiry
    pub async fn set_status(&self, ref_id: &str, status: OrderStatus) -> bool {
        let mut state = self.state.lock().await;
        let now = state.now();
        match state.orders.get_mut(ref_id) {
            Some(order) => {
                order.exchange_order.status = status;
                order.exchange_order.update_time = now;
                true
            }
            None => false,
        }
    }

    /// Venue order placed with local id `order_id`
    pub async fn order_by_client_id(&self, order_id: &str) -> Option<SimOrder> {
        let state = self.state.lock().await;
        state
            .orders
            .values()
            .find(|o| o.request.id == order_id)
            .cloned()
    }

    /// Every order ever submitted, in placement order
    pub async fn orders(&self) -> Vec<SimOrder> {
        let state = self.state.lock().await;
        let mut orders: Vec<SimOrder> = state.orders.values().cloned().collect();
        orders.sort_by_key(|o| o.exchange_order.ref_id.parse::<u64>().unwrap_or(u64::MAX));
        orders
    }

    pub async fn cancel_requests(&self) -> u32 {
        self.state.lock().await.cancel_requests
    }

    /// Fill every resting order the price has crossed
    async fn match_resting(&self, symbol: &str, price: f64) {
        let rate = self.commission_rate;
        let mut state = self.state.lock().await;
        let crossed: Vec<String> = state
            .orders
            .values()
            .filter(|o| {
                o.request.intent.symbol == symbol
                    && o.exchange_order.status == OrderStatus::New
                    && crosses(o, price)
            })
            .map(|o| o.exchange_order.ref_id.clone())
            .collect();

        for ref_id in crossed {
            state.fill(&ref_id);
            state.record_trade(&ref_id, rate);
            tracing::debug!(ref_id = %ref_id, price, "Paper order filled");
        }
    }

    async fn current_price(&self, symbol: &str) -> Result<f64> {
        let state = self.state.lock().await;
        state
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| Error::InvalidInput(format!("no price for {}", symbol)))
    }
}

#[async_trait]
impl ExchangeGateway for SimulatedExchange {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        self.state.lock().await.take_failure()?;

        if let Some(feed) = &self.market_data {
            let ticker = feed.get_ticker(symbol).await?;
            self.set_price(symbol, ticker.price).await;
            self.match_resting(symbol, ticker.price).await;
            return Ok(ticker);
        }

        let price = self.current_price(symbol).await?;
        let time = self.state.lock().await.now();
        Ok(Ticker {
            exchange: self.name.clone(),
            symbol: symbol.to_string(),
            price,
            time,
        })
    }

    async fn get_order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook> {
        self.state.lock().await.take_failure()?;

        if let Some(feed) = &self.market_data {
            return feed.get_order_book(symbol, depth).await;
        }
        if let Some(book) = self.state.lock().await.books.get(symbol) {
            return Ok(book.clone());
        }

        // No scripted book: a zero-spread book at the last price
        let price = self.current_price(symbol).await?;
        let level = PriceLevel { price, qty: f64::MAX };
        Ok(OrderBook {
            bids: vec![level],
            asks: vec![level],
        })
    }

    async fn get_historical_prices(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<HistoricalPrice>> {
        self.state.lock().await.take_failure()?;

        if let Some(feed) = &self.market_data {
            return feed.get_historical_prices(symbol, timeframe, limit).await;
        }

        let state = self.state.lock().await;
        let bars = state
            .bars
            .get(&(symbol.to_string(), timeframe.to_string()))
            .cloned()
            .unwrap_or_default();
        let skip = bars.len().saturating_sub(limit);
        Ok(bars.into_iter().skip(skip).collect())
    }

    async fn open_limit_order(&self, request: &OrderRequest) -> Result<Option<ExchangeOrder>> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        if request.intent.order_type != OrderType::Limit || state.take_rejection() {
            return Ok(None);
        }
        Ok(Some(state.accept(request, OrderStatus::New)))
    }

    async fn open_stop_order(&self, request: &OrderRequest) -> Result<Option<ExchangeOrder>> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        if !request.intent.order_type.is_protective() || state.take_rejection() {
            return Ok(None);
        }
        Ok(Some(state.accept(request, OrderStatus::New)))
    }

    async fn open_market_order(&self, request: &OrderRequest) -> Result<Option<ExchangeOrder>> {
        let rate = self.commission_rate;
        let mut state = self.state.lock().await;
        state.take_failure()?;
        if request.intent.order_type != OrderType::Market || state.take_rejection() {
            return Ok(None);
        }

        let price = match state.prices.get(&request.intent.symbol) {
            Some(p) => *p,
            None => request.intent.open_price,
        };
        let mut filled = request.clone();
        filled.intent.open_price = price;

        let ack = state.accept(&filled, OrderStatus::Filled);
        state.record_trade(&ack.ref_id, rate);
        Ok(state.orders.get(&ack.ref_id).map(|o| o.exchange_order.clone()))
    }

    async fn cancel_order(&self, order: &Order) -> Result<Option<ExchangeOrder>> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        state.cancel_requests += 1;
        let now = state.now();

        let resting = state.orders.get_mut(&order.ref_id).ok_or_else(|| Error::Venue {
            code: -2011,
            message: "Unknown order sent.".to_string(),
        })?;
        if resting.exchange_order.status != OrderStatus::New {
            return Ok(None);
        }
        resting.exchange_order.status = OrderStatus::Canceled;
        resting.exchange_order.update_time = now;
        Ok(Some(resting.exchange_order.clone()))
    }

    async fn get_order(&self, order: &Order) -> Result<Option<ExchangeOrder>> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        state
            .orders
            .get(&order.ref_id)
            .map(|o| Some(o.exchange_order.clone()))
            .ok_or_else(|| Error::Venue {
                code: -2013,
                message: "Order does not exist.".to_string(),
            })
    }

    async fn get_commission(&self, symbol: &str, ref_id: &str) -> Result<Option<f64>> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        let fees: Vec<f64> = state
            .trades
            .iter()
            .filter(|t| t.symbol == symbol && t.ref_id == ref_id)
            .map(|t| t.commission)
            .collect();
        if fees.is_empty() {
            return Ok(None);
        }
        Ok(Some(fees.iter().sum()))
    }

    async fn get_trade_list(
        &self,
        symbol: &str,
        limit: usize,
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<TradeRecord>> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        let trades: Vec<TradeRecord> = state
            .trades
            .iter()
            .filter(|t| t.symbol == symbol)
            .filter(|t| start_time <= 0 || t.time >= start_time)
            .filter(|t| end_time <= 0 || t.time <= end_time)
            .cloned()
            .collect();
        let limit = if limit > 0 { limit } else { 10 };
        // Anchored windows read forward from the start, open ones return the latest
        if start_time > 0 {
            return Ok(trades.into_iter().take(limit).collect());
        }
        let skip = trades.len().saturating_sub(limit);
        Ok(trades.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderIntent;
    use tokio_test::{assert_err, assert_ok};

    fn request(id: &str, order_type: OrderType, side: Side, price: f64) -> OrderRequest {
        OrderIntent::entry(1, "SIM", "BTCUSDT", side, order_type, 1.0, price).with_id(id.to_string())
    }

    #[tokio::test]
    async fn test_limit_order_lifecycle() {
        let ex = SimulatedExchange::new("SIM");
        ex.set_time(1_000).await;

        let ack = ex
            .open_limit_order(&request("a", OrderType::Limit, Side::Buy, 100.0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ack.status, OrderStatus::New);
        assert_eq!(ack.open_time, 1_000);

        assert!(ex.fill(&ack.ref_id).await);
        assert!(ex.get_trade_list("BTCUSDT", 5, 0, 0).await.unwrap().is_empty());
        assert!(ex.publish_trade(&ack.ref_id).await.is_some());
        assert_eq!(ex.get_trade_list("BTCUSDT", 5, 0, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_trade_list_window() {
        let ex = SimulatedExchange::new("SIM");
        let mut refs = Vec::new();
        for (i, time) in [1_000, 2_000, 3_000].into_iter().enumerate() {
            ex.set_time(time).await;
            let req = request(&format!("t{}", i), OrderType::Limit, Side::Buy, 100.0);
            let ack = ex.open_limit_order(&req).await.unwrap().unwrap();
            assert!(ex.fill_and_trade(&ack.ref_id).await);
            refs.push(ack.ref_id);
        }

        let latest = ex.get_trade_list("BTCUSDT", 2, 0, 0).await.unwrap();
        assert_eq!(latest[0].ref_id, refs[1]);
        assert_eq!(latest[1].ref_id, refs[2]);

        let anchored = ex.get_trade_list("BTCUSDT", 2, 1_500, 0).await.unwrap();
        assert_eq!(anchored.len(), 2);
        assert_eq!(anchored[0].ref_id, refs[1]);
        assert_eq!(anchored[0].time, 2_000);
    }

    #[tokio::test]
    async fn test_cancel_only_new_orders() {
        let ex = SimulatedExchange::new("SIM");
        let req = request("a", OrderType::Limit, Side::Buy, 100.0);
        let ack = ex.open_limit_order(&req).await.unwrap().unwrap();
        let order = req.confirm(&ack);

        let canceled = ex.cancel_order(&order).await.unwrap().unwrap();
        assert_eq!(canceled.status, OrderStatus::Canceled);
        assert!(ex.cancel_order(&order).await.unwrap().is_none());
        assert_eq!(ex.cancel_requests().await, 2);
    }

    #[tokio::test]
    async fn test_failures_and_rejections() {
        let ex = SimulatedExchange::new("SIM");
        ex.set_price("BTCUSDT", 100.0).await;

        ex.fail_next(1).await;
        assert_err!(ex.get_ticker("BTCUSDT").await);
        assert_ok!(ex.get_ticker("BTCUSDT").await);

        ex.reject_next(1).await;
        let req = request("a", OrderType::Limit, Side::Buy, 100.0);
        assert!(ex.open_limit_order(&req).await.unwrap().is_none());
        assert!(ex.open_limit_order(&req).await.unwrap().is_some());

        // Wrong entry point for the type
        let req = request("b", OrderType::Market, Side::Buy, 100.0);
        assert!(ex.open_limit_order(&req).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_market_order_fills_at_last_price() {
        let ex = SimulatedExchange::new("SIM").with_commission_rate(0.001);
        ex.set_price("BTCUSDT", 250.0).await;

        let ack = ex
            .open_market_order(&request("m", OrderType::Market, Side::Buy, 0.0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Filled);
        assert_eq!(ack.open_price, 250.0);
        assert!((ack.commission - 0.25).abs() < 1e-9);
        assert_eq!(
            ex.get_commission("BTCUSDT", &ack.ref_id).await.unwrap(),
            Some(ack.commission)
        );
    }

    #[tokio::test]
    async fn test_bars_are_tail_limited() {
        let ex = SimulatedExchange::new("SIM");
        let bars: Vec<_> = (0..10)
            .map(|i| HistoricalPrice {
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                time: i,
            })
            .collect();
        ex.set_bars("BTCUSDT", "1h", bars).await;

        let tail = ex.get_historical_prices("BTCUSDT", "1h", 3).await.unwrap();
        assert_eq!(tail.iter().map(|b| b.time).collect::<Vec<_>>(), vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn test_paper_mode_fills_crossed_orders() {
        let feed = Arc::new(SimulatedExchange::new("FEED"));
        feed.set_price("BTCUSDT", 105.0).await;
        let paper = SimulatedExchange::paper(feed.clone(), 0.0);

        let ack = paper
            .open_limit_order(&request("a", OrderType::Limit, Side::Buy, 100.0))
            .await
            .unwrap()
            .unwrap();

        paper.get_ticker("BTCUSDT").await.unwrap();
        let sim = paper.order_by_client_id("a").await.unwrap();
        assert_eq!(sim.exchange_order.status, OrderStatus::New);

        feed.set_price("BTCUSDT", 99.5).await;
        paper.get_ticker("BTCUSDT").await.unwrap();
        let sim = paper.order_by_client_id("a").await.unwrap();
        assert_eq!(sim.exchange_order.status, OrderStatus::Filled);
        assert_eq!(paper.get_trade_list("BTCUSDT", 5, 0, 0).await.unwrap()[0].ref_id, ack.ref_id);
    }
}
