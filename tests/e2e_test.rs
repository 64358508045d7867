use std::sync::Arc;

use autotp::config::{BotParams, StrategyKind};
use autotp::db::{MemoryStore, OrderStore};
use autotp::exchange::SimulatedExchange;
use autotp::execution::{Reconciler, TickRunner};
use autotp::strategy::build_strategy;
use autotp::strategy::common::entry_intent;
use autotp::*;

const SYMBOL: &str = "BTCUSDT";

fn base_params() -> BotParams {
    BotParams {
        exchange: "BINANCE".to_string(),
        symbol: SYMBOL.to_string(),
        base_qty: 1.0,
        price_digits: 2,
        qty_digits: 4,
        ..Default::default()
    }
}

fn grid_params() -> BotParams {
    BotParams {
        strategy: StrategyKind::Grid,
        view: View::Long,
        lower_price: 500.0,
        upper_price: 800.0,
        grids: 60,
        grid_sl: 1.0,
        grid_tp: 2.0,
        auto_tp: true,
        ..base_params()
    }
}

struct Harness {
    exchange: Arc<SimulatedExchange>,
    store: Arc<MemoryStore>,
    reconciler: Reconciler,
    runner: TickRunner,
}

async fn harness(params: BotParams) -> Harness {
    let exchange = Arc::new(SimulatedExchange::new("BINANCE"));
    exchange.set_time(1_000).await;
    let store = Arc::new(MemoryStore::new());
    let strategy = build_strategy(&params, store.clone(), exchange.clone());
    let runner = TickRunner::new(
        SYMBOL,
        exchange.clone(),
        strategy,
        Reconciler::new(params.clone(), store.clone(), exchange.clone()),
    );
    Harness {
        reconciler: Reconciler::new(params, store.clone(), exchange.clone()),
        exchange,
        store,
        runner,
    }
}

impl Harness {
    async fn tick(&self, price: f64, now: i64) -> autotp::execution::TickReport {
        self.exchange.set_price(SYMBOL, price).await;
        self.runner.tick_at(now).await.unwrap()
    }

    async fn reload(&self, id: &str) -> Order {
        self.store.get_order_by_id(id).await.unwrap().unwrap()
    }

    /// An entry placed through the reconciler and filled on the venue
    async fn open_position(&self, side: Side, price: f64) -> Order {
        let params = base_params();
        let batch = TradeOrders {
            open_orders: vec![entry_intent(&params, side, price)],
            ..Default::default()
        };
        self.reconciler.apply_at(batch, price, 1_000).await;
        let entry = self.store.all().await.last().unwrap().clone();
        self.exchange.fill_and_trade(&entry.ref_id).await;
        self.reconciler.sync_all_at(2_000).await;
        self.reload(&entry.id).await
    }

    async fn protect(&self, parent: &Order, order_type: OrderType, price: f64) -> Order {
        let batch = TradeOrders {
            close_orders: vec![OrderIntent::protective(parent, order_type, price, price)],
            ..Default::default()
        };
        let report = self.reconciler.apply_at(batch, price, 2_500).await;
        assert_eq!(report.protective, 1);
        self.store.all().await.last().unwrap().clone()
    }
}

#[tokio::test]
async fn test_grid_round_trip() {
    let _ = tracing_subscriber::fmt::try_init();
    let h = harness(grid_params()).await;

    println!("1. Price 554 opens the 550 zone...");
    let report = h.tick(554.0, 1_000).await;
    assert_eq!(report.apply.opened, 1);
    let entry = h.store.all().await[0].clone();
    assert_eq!(entry.open_price, 550.0);
    assert_eq!(entry.zone_price, 550.0);
    assert_eq!(entry.sl_price, 545.0);
    assert_eq!(entry.tp_price, 560.0);

    println!("2. Venue fills the entry, the resync pass records it...");
    h.exchange.fill_and_trade(&entry.ref_id).await;
    let report = h.tick(554.0, 2_000).await;
    assert_eq!(report.sync.filled, 1);
    assert_eq!(h.reload(&entry.id).await.status, OrderStatus::Filled);

    println!("3. Price reaches the target, a take-profit goes out...");
    let report = h.tick(561.0, 3_000).await;
    assert_eq!(report.apply.protective, 1);
    let tp = h
        .store
        .all()
        .await
        .into_iter()
        .find(|o| o.open_order_id.as_deref() == Some(entry.id.as_str()))
        .unwrap();
    assert_eq!(tp.order_type, OrderType::TakeProfit);
    assert_eq!(tp.side, Side::Sell);
    assert_eq!(tp.stop_price, 563.0);
    assert_eq!(tp.open_price, 564.0);

    println!("4. Take-profit fills, the position closes with its P/L...");
    h.exchange.fill_and_trade(&tp.ref_id).await;
    let report = h.tick(561.0, 4_000).await;
    assert_eq!(report.sync.closed, 1);

    let entry = h.reload(&entry.id).await;
    assert!(!entry.is_active());
    assert_eq!(entry.close_order_id.as_deref(), Some(tp.id.as_str()));
    assert_eq!(entry.close_price, 564.0);
    assert_eq!(entry.pl, 14.0);
    assert_eq!(h.reload(&tp.id).await.close_time, 4_000);

    println!("✓ Grid round trip complete");
}

#[tokio::test]
async fn test_resync_is_idempotent() {
    let h = harness(grid_params()).await;
    h.tick(554.0, 1_000).await;
    let entry = h.store.all().await[0].clone();
    h.exchange.fill_and_trade(&entry.ref_id).await;
    h.tick(554.0, 2_000).await;

    let writes = h.store.writes();
    let first = h.reconciler.sync_all_at(3_000).await;
    let second = h.reconciler.sync_all_at(4_000).await;
    assert_eq!(h.store.writes(), writes);
    assert_eq!(first, second);

    // A tick with no price change writes nothing either
    h.tick(554.0, 5_000).await;
    assert_eq!(h.store.writes(), writes);
}

#[tokio::test]
async fn test_pl_sign_for_long_and_short() {
    let h = harness(base_params()).await;

    let long = h.open_position(Side::Buy, 100.0).await;
    let tp = h.protect(&long, OrderType::TakeProfit, 110.0).await;
    let short = h.open_position(Side::Sell, 100.0).await;
    let sl = h.protect(&short, OrderType::StopLoss, 110.0).await;

    h.exchange.fill_and_trade(&tp.ref_id).await;
    h.exchange.fill_and_trade(&sl.ref_id).await;

    let report = h.reconciler.sync_all_at(5_000).await;
    assert_eq!(report.closed, 2);
    assert_eq!(h.reload(&long.id).await.pl, 10.0);
    assert_eq!(h.reload(&short.id).await.pl, -10.0);
}

#[tokio::test]
async fn test_terminal_status_is_monotonic() {
    let h = harness(base_params()).await;
    let position = h.open_position(Side::Buy, 100.0).await;
    assert_eq!(position.status, OrderStatus::Filled);

    for status in [OrderStatus::Canceled, OrderStatus::Expired, OrderStatus::New] {
        h.exchange.set_status(&position.ref_id, status).await;
        h.reconciler.sync_all_at(3_000).await;
        assert_eq!(h.reload(&position.id).await.status, OrderStatus::Filled);
    }

    // A locally cancelled order stays cancelled even if the venue claims a fill
    let pending = {
        let batch = TradeOrders {
            open_orders: vec![entry_intent(&base_params(), Side::Buy, 90.0)],
            ..Default::default()
        };
        h.reconciler.apply_at(batch, 100.0, 3_000).await;
        h.store.all().await.last().unwrap().clone()
    };
    h.exchange.set_status(&pending.ref_id, OrderStatus::Canceled).await;
    h.reconciler.sync_all_at(4_000).await;
    let mut canceled = h.reload(&pending.id).await;
    assert_eq!(canceled.status, OrderStatus::Canceled);

    // Still active locally for the check below
    canceled.close_time = 0;
    h.store.update_order(&canceled).await.unwrap();
    h.exchange.set_status(&pending.ref_id, OrderStatus::Filled).await;
    h.reconciler.sync_all_at(5_000).await;
    assert_eq!(h.reload(&pending.id).await.status, OrderStatus::Canceled);
}

#[tokio::test]
async fn test_pairing_waits_for_trade_list() {
    let h = harness(base_params()).await;
    let position = h.open_position(Side::Buy, 100.0).await;
    let tp = h.protect(&position, OrderType::TakeProfit, 110.0).await;

    h.exchange.fill(&tp.ref_id).await;
    let report = h.reconciler.sync_all_at(3_000).await;
    assert_eq!(report.filled, 1);
    assert_eq!(report.closed, 0);
    assert!(h.reload(&position.id).await.is_active());

    // Nothing changes on the venue, still no pairing
    let report = h.reconciler.sync_all_at(3_500).await;
    assert_eq!(report.closed, 0);

    h.exchange.publish_trade(&tp.ref_id).await;
    let report = h.reconciler.sync_all_at(4_000).await;
    assert_eq!(report.closed, 1);
    assert_eq!(h.reload(&position.id).await.close_time, 4_000);
}

#[tokio::test]
async fn test_fill_confirmed_behind_later_trades() {
    let h = harness(base_params()).await;
    let position = h.open_position(Side::Buy, 100.0).await;
    let tp = h.protect(&position, OrderType::TakeProfit, 110.0).await;

    h.exchange.set_time(2_000).await;
    h.exchange.fill_and_trade(&tp.ref_id).await;

    // More fills land after the take-profit than one trade page holds
    h.exchange.set_time(3_000).await;
    for i in 0..6 {
        let batch = TradeOrders {
            open_orders: vec![entry_intent(&base_params(), Side::Buy, 90.0 - i as f64)],
            ..Default::default()
        };
        let report = h.reconciler.apply_at(batch, 100.0, 3_000).await;
        assert_eq!(report.opened, 1);
        let entry = h.store.all().await.last().unwrap().clone();
        assert!(h.exchange.fill_and_trade(&entry.ref_id).await);
    }

    let report = h.reconciler.sync_all_at(4_000).await;
    assert_eq!(report.closed, 1);
    let position = h.reload(&position.id).await;
    assert!(!position.is_active());
    assert_eq!(position.close_order_id.as_deref(), Some(tp.id.as_str()));
    assert_eq!(position.pl, 10.0);
    assert_eq!(h.reload(&tp.id).await.close_time, 4_000);
}

#[tokio::test]
async fn test_strategies_absent_on_short_history() {
    for strategy in [StrategyKind::Daily, StrategyKind::Scalping] {
        let params = BotParams {
            strategy,
            ..base_params()
        };
        let h = harness(params.clone()).await;
        let bars: Vec<HistoricalPrice> = (0..10)
            .map(|i| HistoricalPrice {
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.5,
                time: i * 60_000,
            })
            .collect();
        h.exchange.set_bars(SYMBOL, &params.ma_timeframe, bars.clone()).await;
        h.exchange.set_bars(SYMBOL, &params.hl_ratio_timeframe, bars).await;

        let report = h.tick(100.0, 1_000).await;
        assert!(!report.acted, "{:?} acted on short history", strategy);
        assert!(h.store.all().await.is_empty());
    }
}

#[tokio::test]
async fn test_stale_pending_order_is_cancelled() {
    let h = harness(BotParams {
        max_pending_secs: 30,
        ..grid_params()
    })
    .await;

    h.tick(554.0, 1_000).await;
    let entry = h.store.all().await[0].clone();

    let report = h.tick(554.0, 20_000).await;
    assert_eq!(report.sync.canceled, 0);

    let report = h.tick(554.0, 40_000).await;
    assert_eq!(report.sync.canceled, 1);
    let entry = h.reload(&entry.id).await;
    assert_eq!(entry.status, OrderStatus::Canceled);
    assert_eq!(entry.close_time, 40_000);
}

#[test]
fn test_invalid_configuration_rejected() {
    let inverted = BotParams {
        lower_price: 800.0,
        upper_price: 500.0,
        ..grid_params()
    };
    assert!(inverted.validate().is_err());

    let no_qty = BotParams {
        base_qty: 0.0,
        quote_qty: 0.0,
        ..grid_params()
    };
    assert!(no_qty.validate().is_err());
    assert!(grid_params().validate().is_ok());
}
