// Trading strategy module
// Each variant turns a ticker into a `TradeOrders` batch, or nothing
pub mod common;
pub mod daily;
pub mod grid;
pub mod scalping;
pub mod zones;

pub use daily::DailyStrategy;
pub use grid::GridStrategy;
pub use scalping::ScalpingStrategy;
pub use zones::{grid_range, Zone};

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{BotParams, StrategyKind};
use crate::db::OrderStore;
use crate::exchange::ExchangeGateway;
use crate::models::{Ticker, TradeOrders};
use crate::Result;

/// Base trait for all trading strategies
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum bars of history a decision needs
    fn min_candles_required(&self) -> usize;

    /// Decide this tick's order mutations.
    ///
    /// Errors and short history abandon the tick: the result is `None`, never a
    /// partial batch.
    async fn on_tick(&self, ticker: &Ticker) -> Option<TradeOrders> {
        match self.evaluate(ticker).await {
            Ok(orders) => orders.and_then(TradeOrders::into_option),
            Err(e) => {
                tracing::warn!(strategy = self.name(), error = %e, "Tick abandoned");
                None
            }
        }
    }

    async fn evaluate(&self, ticker: &Ticker) -> Result<Option<TradeOrders>>;
}

/// Build the configured strategy variant
pub fn build_strategy(
    params: &BotParams,
    store: Arc<dyn OrderStore>,
    exchange: Arc<dyn ExchangeGateway>,
) -> Box<dyn Strategy> {
    match params.strategy {
        StrategyKind::Grid => Box::new(GridStrategy::new(params.clone(), store)),
        StrategyKind::Daily => Box::new(DailyStrategy::new(params.clone(), store, exchange)),
        StrategyKind::Scalping => Box::new(ScalpingStrategy::new(params.clone(), store, exchange)),
    }
}

/// Fixtures shared by the strategy tests
#[cfg(test)]
pub(crate) mod testing {
    use crate::config::BotParams;
    use crate::db::OrderStore;
    use crate::models::{
        ExchangeOrder, HistoricalPrice, Order, OrderIntent, OrderStatus, OrderType, Side, Ticker,
    };

    pub fn params() -> BotParams {
        BotParams {
            exchange: "BINANCE".to_string(),
            symbol: "BTCUSDT".to_string(),
            base_qty: 0.01,
            price_digits: 2,
            qty_digits: 4,
            ..Default::default()
        }
    }

    pub fn ticker(price: f64, time: i64) -> Ticker {
        Ticker {
            exchange: "BINANCE".to_string(),
            symbol: "BTCUSDT".to_string(),
            price,
            time,
        }
    }

    /// A filled limit entry opened at `open_time`
    pub fn position(id: &str, side: Side, price: f64, open_time: i64) -> Order {
        let intent =
            OrderIntent::entry(1, "BINANCE", "BTCUSDT", side, OrderType::Limit, 1.0, price);
        intent.with_id(id.to_string()).confirm(&ExchangeOrder {
            ref_id: format!("ref-{}", id),
            status: OrderStatus::Filled,
            open_price: 0.0,
            qty: 0.0,
            commission: 0.0,
            open_time,
            update_time: open_time,
        })
    }

    /// A pending protective order of `parent` triggering at `stop_price`
    pub fn protective(parent: &Order, id: &str, order_type: OrderType, stop_price: f64) -> Order {
        OrderIntent::protective(parent, order_type, stop_price, stop_price)
            .with_id(id.to_string())
            .confirm(&ExchangeOrder {
                ref_id: format!("ref-{}", id),
                status: OrderStatus::New,
                open_price: 0.0,
                qty: 0.0,
                commission: 0.0,
                open_time: parent.open_time,
                update_time: parent.open_time,
            })
    }

    pub async fn save(store: &dyn OrderStore, order: &Order) {
        store.create_order(order).await.unwrap();
    }

    pub fn bar(open: f64, high: f64, low: f64, close: f64, time: i64) -> HistoricalPrice {
        HistoricalPrice {
            open,
            high,
            low,
            close,
            time,
        }
    }

    /// `n` flat bars one hour apart around `price`
    pub fn flat_bars(n: usize, price: f64) -> Vec<HistoricalPrice> {
        (0..n)
            .map(|i| bar(price, price + 1.0, price - 1.0, price, i as i64 * 3_600_000))
            .collect()
    }
}
