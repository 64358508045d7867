// Trading venue module
// `ExchangeGateway` is everything the strategies and reconciler need from a venue

pub mod binance;
pub mod simulated;

pub use binance::{BinanceConfig, BinanceSpot};
pub use simulated::SimulatedExchange;

use async_trait::async_trait;

use crate::models::{
    ExchangeOrder, HistoricalPrice, Order, OrderBook, OrderRequest, Ticker, TradeRecord,
};
use crate::Result;

/// Trading operations against a venue.
///
/// Order calls return `Ok(None)` when the venue did not accept the request but
/// reported no error. Callers treat that as rejected and do not retry.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Venue name stamped on orders and tickers
    fn name(&self) -> &str;

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker>;

    async fn get_order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook>;

    /// The last `limit` bars of `timeframe`, oldest first. The newest bar is the one
    /// still forming.
    async fn get_historical_prices(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<HistoricalPrice>>;

    async fn open_limit_order(&self, request: &OrderRequest) -> Result<Option<ExchangeOrder>>;

    /// Stop-loss and take-profit orders
    async fn open_stop_order(&self, request: &OrderRequest) -> Result<Option<ExchangeOrder>>;

    /// Market orders are filled on acceptance; the snapshot carries the fill
    async fn open_market_order(&self, request: &OrderRequest) -> Result<Option<ExchangeOrder>>;

    async fn cancel_order(&self, order: &Order) -> Result<Option<ExchangeOrder>>;

    /// Current venue view of a previously placed order
    async fn get_order(&self, order: &Order) -> Result<Option<ExchangeOrder>>;

    /// Commission charged on the fill of `ref_id`, if it appears in recent trades
    async fn get_commission(&self, symbol: &str, ref_id: &str) -> Result<Option<f64>>;

    /// Account trades, oldest first. With `start_time` set the page starts there,
    /// otherwise it holds the latest `limit` trades. Zero times leave the window open.
    async fn get_trade_list(
        &self,
        symbol: &str,
        limit: usize,
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<TradeRecord>>;
}
