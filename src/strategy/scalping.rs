use std::sync::Arc;

use async_trait::async_trait;

use crate::config::BotParams;
use crate::db::OrderStore;
use crate::exchange::ExchangeGateway;
use crate::indicators::{calculate_wma, hl_ratio};
use crate::models::{HistoricalPrice, PosSide, Side, Ticker, TradeOrders};
use crate::strategy::common;
use crate::strategy::Strategy;
use crate::Result;

/// Bars of the main timeframe pulled per tick
const WINDOW: usize = 50;

/// Bars of the short timeframe behind the high/low ratio
const RATIO_WINDOW: usize = 5;

/// Mean reversion on a short timeframe.
///
/// Buys near the bottom of the last few minutes' range while the smoothed lows
/// rise, and the mirror for shorts. A fresh signal against open positions closes
/// them before anything new is considered.
pub struct ScalpingStrategy {
    params: BotParams,
    store: Arc<dyn OrderStore>,
    exchange: Arc<dyn ExchangeGateway>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Signals {
    atr: f64,
    close_long: bool,
    close_short: bool,
    /// Trend half of the entry conditions; the ratio gate is applied later
    long_setup: bool,
    short_setup: bool,
}

fn signals(bars: &[HistoricalPrice], period: usize, price: f64) -> Option<Signals> {
    let n = bars.len();
    if n < 3 {
        return None;
    }
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let hma = calculate_wma(&highs, period)?;
    let lma = calculate_wma(&lows, period)?;
    if hma.len() < 2 || lma.len() < 2 {
        return None;
    }
    let (hma_0, hma_1) = (hma[hma.len() - 1], hma[hma.len() - 2]);
    let (lma_0, lma_1) = (lma[lma.len() - 1], lma[lma.len() - 2]);

    let (h_0, l_0) = (highs[n - 1], lows[n - 1]);
    let hh = highs[n - 2].max(highs[n - 3]);
    let ll = lows[n - 2].min(lows[n - 3]);

    let close_long = (hma_1 > hma_0 && lma_1 > lma_0) || ll > price;
    let close_short = (hma_1 < hma_0 && lma_1 < lma_0) || hh < price;

    Some(Signals {
        atr: hma_0 - lma_0,
        close_long,
        close_short,
        long_setup: lma_1 < lma_0 && ll < l_0 && !close_long,
        short_setup: hma_1 > hma_0 && hh > h_0 && !close_short,
    })
}

impl ScalpingStrategy {
    pub fn new(
        params: BotParams,
        store: Arc<dyn OrderStore>,
        exchange: Arc<dyn ExchangeGateway>,
    ) -> Self {
        Self {
            params,
            store,
            exchange,
        }
    }

    /// Close the positions of `direction` and withdraw its pending orders
    async fn exit_direction(
        &self,
        direction: PosSide,
        price: f64,
        orders: &mut TradeOrders,
    ) -> Result<()> {
        let store = self.store.as_ref();
        common::close_positions(store, &self.params, direction, price, orders).await?;
        common::cancel_new_entries(store, &self.params, direction, orders).await?;
        common::cancel_new_stops(store, &self.params, direction, orders).await?;
        Ok(())
    }

    /// Manual kill switches: exits only, no new entries
    async fn kill_switches(&self, price: f64) -> Result<TradeOrders> {
        let mut orders = TradeOrders::default();
        if self.params.close_long {
            self.exit_direction(PosSide::Long, price, &mut orders).await?;
        }
        if self.params.close_short {
            self.exit_direction(PosSide::Short, price, &mut orders).await?;
        }
        Ok(orders)
    }
}

#[async_trait]
impl Strategy for ScalpingStrategy {
    fn name(&self) -> &str {
        "scalping"
    }

    fn min_candles_required(&self) -> usize {
        WINDOW
    }

    async fn evaluate(&self, ticker: &Ticker) -> Result<Option<TradeOrders>> {
        let p = &self.params;
        let store = self.store.as_ref();
        let price = ticker.price;

        if p.close_long || p.close_short {
            return Ok(Some(self.kill_switches(price).await?));
        }

        let needed = self.min_candles_required();
        let bars = self
            .exchange
            .get_historical_prices(&p.symbol, &p.ma_timeframe, needed)
            .await?;
        if bars.len() < needed || !bars.iter().all(HistoricalPrice::is_complete) {
            return Ok(None);
        }
        let Some(s) = signals(&bars, p.ma_period, price) else {
            return Ok(None);
        };

        // A signal against open positions wins over everything else this tick
        let mut orders = TradeOrders::default();
        if s.close_long {
            common::close_positions(store, p, PosSide::Long, price, &mut orders).await?;
        }
        if s.close_short {
            common::close_positions(store, p, PosSide::Short, price, &mut orders).await?;
        }
        if !orders.is_empty() {
            for (fired, direction) in [(s.close_long, PosSide::Long), (s.close_short, PosSide::Short)] {
                if fired {
                    common::cancel_new_entries(store, p, direction, &mut orders).await?;
                    common::cancel_new_stops(store, p, direction, &mut orders).await?;
                }
            }
            return Ok(Some(orders));
        }

        if p.auto_sl {
            common::auto_stop_losses(store, p, s.atr, &mut orders).await?;
        }
        if p.auto_tp {
            common::auto_take_profits(store, p, price, s.atr, &mut orders).await?;
        }
        common::time_exits(store, p, price, ticker.time, &mut orders).await?;
        if !orders.is_empty() {
            return Ok(Some(orders));
        }

        let short_bars = self
            .exchange
            .get_historical_prices(&p.symbol, &p.hl_ratio_timeframe, RATIO_WINDOW)
            .await?;
        if short_bars.len() < RATIO_WINDOW || !short_bars.iter().all(HistoricalPrice::is_complete) {
            return Ok(None);
        }
        let Some(ratio) = hl_ratio(&short_bars, price) else {
            return Ok(None);
        };

        let open_long = s.long_setup && ratio < p.hl_band.lower;
        let open_short = s.short_setup && ratio > p.hl_band.upper;
        if open_long && open_short {
            tracing::debug!(ratio, "Ambiguous entry signal, skipping tick");
            return Ok(None);
        }

        let bar_time = bars[bars.len() - 1].time;
        if open_long && p.view.allows_long() {
            common::propose_entry(store, p, Side::Buy, price, bar_time, &mut orders).await?;
        }
        if open_short && p.view.allows_short() {
            common::propose_entry(store, p, Side::Sell, price, bar_time, &mut orders).await?;
        }

        Ok(Some(orders))
    }
}
