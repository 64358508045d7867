use std::sync::Arc;

use crate::execution::reconciler::{ApplyReport, Reconciler, SyncReport};
use crate::exchange::ExchangeGateway;
use crate::helpers::now_ms;
use crate::strategy::Strategy;
use crate::Result;

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickReport {
    pub price: f64,
    /// The strategy produced a non-empty batch
    pub acted: bool,
    pub apply: ApplyReport,
    pub sync: SyncReport,
}

/// One bot on one market: ticker in, strategy, reconcile.
pub struct TickRunner {
    symbol: String,
    exchange: Arc<dyn ExchangeGateway>,
    strategy: Box<dyn Strategy>,
    reconciler: Reconciler,
}

impl TickRunner {
    pub fn new(
        symbol: &str,
        exchange: Arc<dyn ExchangeGateway>,
        strategy: Box<dyn Strategy>,
        reconciler: Reconciler,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            exchange,
            strategy,
            reconciler,
        }
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    pub async fn tick(&self) -> Result<TickReport> {
        self.tick_at(now_ms()).await
    }

    /// Run one tick. Only a failed ticker read is an error; everything after it
    /// logs and carries on so the next tick can retry.
    pub async fn tick_at(&self, now: i64) -> Result<TickReport> {
        let ticker = self.exchange.get_ticker(&self.symbol).await?;
        let mut report = TickReport {
            price: ticker.price,
            ..Default::default()
        };

        if ticker.price > 0.0 {
            if let Some(batch) = self.strategy.on_tick(&ticker).await {
                tracing::debug!(
                    strategy = self.strategy.name(),
                    open = batch.open_orders.len(),
                    close = batch.close_orders.len(),
                    cancel = batch.cancel_orders.len(),
                    "Strategy batch"
                );
                report.acted = true;
                report.apply = self.reconciler.apply_at(batch, ticker.price, now).await;
            }
        } else {
            tracing::warn!(symbol = %self.symbol, price = ticker.price, "Ignoring non-positive price");
        }

        report.sync = self.reconciler.sync_all_at(now).await;

        if !report.apply.is_quiet() || !report.sync.is_quiet() {
            tracing::info!(
                price = report.price,
                opened = report.apply.opened,
                protective = report.apply.protective,
                canceled = report.apply.canceled + report.sync.canceled,
                filled = report.sync.filled,
                closed = report.sync.closed,
                failed = report.apply.failed + report.sync.failed,
                "Tick complete"
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BotParams;
    use crate::db::{MemoryStore, OrderStore};
    use crate::exchange::SimulatedExchange;
    use crate::models::{OrderStatus, View};
    use crate::strategy::build_strategy;
    use tokio_test::{assert_err, assert_ok};

    fn grid_params() -> BotParams {
        BotParams {
            exchange: "BINANCE".to_string(),
            symbol: "BTCUSDT".to_string(),
            base_qty: 1.0,
            price_digits: 2,
            qty_digits: 4,
            view: View::Long,
            lower_price: 500.0,
            upper_price: 800.0,
            grids: 60,
            ..Default::default()
        }
    }

    fn runner(params: BotParams) -> (TickRunner, Arc<SimulatedExchange>, Arc<MemoryStore>) {
        let exchange = Arc::new(SimulatedExchange::new("BINANCE"));
        let store = Arc::new(MemoryStore::new());
        let strategy = build_strategy(&params, store.clone(), exchange.clone());
        let reconciler = Reconciler::new(params.clone(), store.clone(), exchange.clone());
        let runner = TickRunner::new(&params.symbol, exchange.clone(), strategy, reconciler);
        (runner, exchange, store)
    }

    #[tokio::test]
    async fn test_tick_places_and_then_holds() {
        let (runner, exchange, store) = runner(grid_params());
        exchange.set_time(1_000).await;
        exchange.set_price("BTCUSDT", 554.0).await;

        let report = assert_ok!(runner.tick_at(1_000).await);
        assert!(report.acted);
        assert_eq!(report.apply.opened, 1);
        assert_eq!(store.all().await[0].open_price, 550.0);

        // Same zone, nothing new to do
        let report = assert_ok!(runner.tick_at(2_000).await);
        assert!(!report.acted);
        assert_eq!(report.sync.synced, 1);
        assert_eq!(store.all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_tick_syncs_fills() {
        let (runner, exchange, store) = runner(grid_params());
        exchange.set_time(1_000).await;
        exchange.set_price("BTCUSDT", 554.0).await;
        assert_ok!(runner.tick_at(1_000).await);

        let order = store.all().await[0].clone();
        exchange.fill_and_trade(&order.ref_id).await;
        let report = assert_ok!(runner.tick_at(2_000).await);
        assert_eq!(report.sync.filled, 1);

        let order = store.get_order_by_id(&order.id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn test_ticker_failure_skips_tick() {
        let (runner, exchange, store) = runner(grid_params());
        exchange.set_price("BTCUSDT", 554.0).await;
        exchange.fail_next(1).await;

        assert_err!(runner.tick_at(1_000).await);
        assert!(store.all().await.is_empty());
        assert_eq!(runner.strategy_name(), "grid");
    }
}
