use std::sync::Arc;

use async_trait::async_trait;

use crate::config::BotParams;
use crate::db::OrderStore;
use crate::exchange::ExchangeGateway;
use crate::indicators::{calculate_atr, calculate_wma, classify_trend, highest_high, lowest_low, Trend};
use crate::models::{HistoricalPrice, PosSide, Side, Ticker, TradeOrders};
use crate::strategy::common;
use crate::strategy::Strategy;
use crate::Result;

/// Bars pulled per tick
const WINDOW: usize = 50;

/// Bars in the recent high/low envelope
const ENVELOPE: usize = 3;

/// Trend-following on one timeframe: buy pullbacks inside a rising smoothed close,
/// sell rallies inside a falling one, and bail out of positions once the price
/// leaves the recent envelope by half the volatility proxy.
pub struct DailyStrategy {
    params: BotParams,
    store: Arc<dyn OrderStore>,
    exchange: Arc<dyn ExchangeGateway>,
}

/// Indicator snapshot for one tick
#[derive(Debug, Clone, Copy)]
struct Signals {
    cma_0: f64,
    cma_1: f64,
    hma_0: f64,
    lma_0: f64,
    atr: f64,
    hh: f64,
    ll: f64,
    trend: Option<Trend>,
}

impl DailyStrategy {
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

    fn signals(&self, bars: &[HistoricalPrice]) -> Option<Signals> {
        let period = self.params.ma_period;
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
        let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();

        let cma = calculate_wma(&closes, period)?;
        if cma.len() < 2 {
            return None;
        }
        let hma_0 = *calculate_wma(&highs, period)?.last()?;
        let lma_0 = *calculate_wma(&lows, period)?.last()?;
        let envelope = &bars[bars.len() - ENVELOPE..];

        Some(Signals {
            cma_0: cma[cma.len() - 1],
            cma_1: cma[cma.len() - 2],
            hma_0,
            lma_0,
            atr: calculate_atr(bars, period)?,
            hh: highest_high(envelope)?,
            ll: lowest_low(envelope)?,
            trend: classify_trend(&cma, &self.params.trend),
        })
    }
}

/// Entries are vetoed only against a strong opposing trend
fn trend_permits(trend: Option<Trend>, side: Side) -> bool {
    match (trend, side) {
        (Some(Trend::StrongDown), Side::Buy) => false,
        (Some(Trend::StrongUp), Side::Sell) => false,
        _ => true,
    }
}

#[async_trait]
impl Strategy for DailyStrategy {
    fn name(&self) -> &str {
        "daily"
    }

    fn min_candles_required(&self) -> usize {
        WINDOW
    }

    async fn evaluate(&self, ticker: &Ticker) -> Result<Option<TradeOrders>> {
        let p = &self.params;
        let store = self.store.as_ref();
        let price = ticker.price;

        let needed = self.min_candles_required();
        let bars = self
            .exchange
            .get_historical_prices(&p.symbol, &p.ma_timeframe, needed)
            .await?;
        if bars.len() < needed || !bars.iter().all(HistoricalPrice::is_complete) {
            tracing::debug!(bars = bars.len(), "Not enough complete bars");
            return Ok(None);
        }
        let Some(s) = self.signals(&bars) else {
            return Ok(None);
        };
        let p_0 = bars[bars.len() - 1];
        let p_1 = bars[bars.len() - 2];
        let half_atr = s.atr * 0.5;

        let mut orders = TradeOrders::default();

        let close_long = price < s.hh - half_atr;
        if close_long {
            common::cancel_new_entries(store, p, PosSide::Long, &mut orders).await?;
            common::close_positions(store, p, PosSide::Long, price, &mut orders).await?;
        }

        let close_short = price > s.ll + half_atr;
        if close_short {
            common::cancel_new_entries(store, p, PosSide::Short, &mut orders).await?;
            common::close_positions(store, p, PosSide::Short, price, &mut orders).await?;
        }

        let open_long = p.view.allows_long()
            && !close_long
            && trend_permits(s.trend, Side::Buy)
            && p_1.is_bullish()
            && p_1.upper_wick() < p_1.lower_wick()
            && s.cma_0 > s.cma_1
            && price < p_1.close
            && price >= s.hma_0
            && price < s.hma_0 + half_atr;
        if open_long {
            common::propose_entry(store, p, Side::Buy, price, p_0.time, &mut orders).await?;
        }

        let open_short = p.view.allows_short()
            && !close_short
            && trend_permits(s.trend, Side::Sell)
            && p_1.is_bearish()
            && p_1.lower_wick() < p_1.upper_wick()
            && s.cma_0 < s.cma_1
            && price > p_1.close
            && price <= s.lma_0
            && price > s.lma_0 - half_atr;
        if open_short {
            common::propose_entry(store, p, Side::Sell, price, p_0.time, &mut orders).await?;
        }

        if p.auto_sl {
            common::auto_stop_losses(store, p, s.atr, &mut orders).await?;
        }
        if p.auto_tp {
            common::auto_take_profits(store, p, price, s.atr, &mut orders).await?;
        }

        tracing::debug!(
            price,
            atr = s.atr,
            hh = s.hh,
            ll = s.ll,
            trend = ?s.trend,
            close_long,
            close_short,
            open_long,
            open_short,
            "Daily signals"
        );

        Ok(Some(orders))
    }
}
