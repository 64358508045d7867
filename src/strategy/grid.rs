use std::sync::Arc;

use async_trait::async_trait;

use crate::config::BotParams;
use crate::db::OrderStore;
use crate::helpers::normalize;
use crate::models::{PosSide, Side, Ticker, TradeOrders};
use crate::strategy::common::{self, near_market_stop_loss, near_market_take_profit};
use crate::strategy::zones::{grid_range, Zone};
use crate::strategy::Strategy;
use crate::Result;

/// Grid trading: one resting buy at the lower edge and one resting sell at the
/// upper edge of the zone holding the live price.
///
/// Stateless between ticks; the order store is the only memory.
pub struct GridStrategy {
    params: BotParams,
    store: Arc<dyn OrderStore>,
}

impl GridStrategy {
    pub fn new(params: BotParams, store: Arc<dyn OrderStore>) -> Self {
        Self { params, store }
    }

    /// Entry at `price` for `side` unless that zone is already taken
    async fn zone_entry(&self, side: Side, zone: &Zone, orders: &mut TradeOrders) -> Result<()> {
        let p = &self.params;
        let scope = common::scope(p);
        let price = normalize(
            match side {
                Side::Buy => zone.lower,
                Side::Sell => zone.upper,
            },
            p.price_digits,
        );

        if self
            .store
            .get_active_order(&scope, side, price, p.slippage)
            .await?
            .is_some()
        {
            return Ok(());
        }
        if !self.store.is_empty_zone(&scope, side, price).await? {
            return Ok(());
        }

        // Stop/target offsets point away from the side's profit direction
        let sign = match side {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        };
        let mut intent = common::entry_intent(p, side, price);
        intent.open_price = price;
        intent.zone_price = price;
        if p.grid_sl > 0.0 {
            intent.sl_price = normalize(price - sign * zone.width * p.grid_sl, p.price_digits);
        }
        if p.grid_tp > 0.0 {
            intent.tp_price = normalize(price + sign * zone.width * p.grid_tp, p.price_digits);
        }
        orders.open_orders.push(intent);
        Ok(())
    }

    /// Protective orders for filled grid positions whose target the price has reached
    async fn targets(&self, price: f64, orders: &mut TradeOrders) -> Result<()> {
        let p = &self.params;
        let scope = common::scope(p);

        for direction in [PosSide::Long, PosSide::Short] {
            let long = direction == PosSide::Long;
            for position in self.store.get_filled_entries(&scope, direction).await? {
                let tp_hit = position.tp_price > 0.0
                    && if long {
                        price >= position.tp_price
                    } else {
                        price <= position.tp_price
                    };
                let sl_hit = position.sl_price > 0.0
                    && if long {
                        price <= position.sl_price
                    } else {
                        price >= position.sl_price
                    };

                if p.auto_tp && tp_hit && self.store.get_tp_order(&position.id).await?.is_none() {
                    orders.push_close(near_market_take_profit(p, &position, price));
                }
                if p.auto_sl && sl_hit && self.store.get_sl_order(&position.id).await?.is_none() {
                    orders.push_close(near_market_stop_loss(p, &position, price));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Strategy for GridStrategy {
    fn name(&self) -> &str {
        "grid"
    }

    fn min_candles_required(&self) -> usize {
        0
    }

    async fn evaluate(&self, ticker: &Ticker) -> Result<Option<TradeOrders>> {
        let p = &self.params;
        if ticker.price <= 0.0 {
            return Ok(None);
        }

        // Wait for the first entry below the start price
        if p.start_price > 0.0
            && ticker.price > p.start_price
            && self.store.get_active_orders(&common::scope(p)).await?.is_empty()
        {
            return Ok(None);
        }

        let zone = grid_range(ticker.price, p.lower_price, p.upper_price, p.grids);
        let mut orders = TradeOrders::default();

        if p.view.allows_long() {
            self.zone_entry(Side::Buy, &zone, &mut orders).await?;
        }
        if p.view.allows_short() {
            self.zone_entry(Side::Sell, &zone, &mut orders).await?;
        }
        if p.auto_tp || p.auto_sl {
            self.targets(ticker.price, &mut orders).await?;
        }

        Ok(Some(orders))
    }
}
