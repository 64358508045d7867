// Order builders and position checks shared by the strategy variants

use crate::config::BotParams;
use crate::db::{OrderStore, Scope, PRICE_EPSILON};
use crate::helpers::{lower_by, normalize, order_qty, point, sl_stop, tp_stop, upper_by};
use crate::models::{
    Order, OrderIntent, OrderStatus, OrderType, PosSide, Product, Side, TradeOrders,
};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    StopLoss,
    TakeProfit,
}

impl Protection {
    pub fn order_type(self, product: Product) -> OrderType {
        match (self, product) {
            (Protection::StopLoss, Product::Spot) => OrderType::StopLoss,
            (Protection::StopLoss, Product::Futures) => OrderType::FuturesStopLoss,
            (Protection::TakeProfit, Product::Spot) => OrderType::TakeProfit,
            (Protection::TakeProfit, Product::Futures) => OrderType::FuturesTakeProfit,
        }
    }
}

pub fn scope(params: &BotParams) -> Scope {
    Scope::new(params.bot_id, &params.exchange, &params.symbol)
}

pub fn direction(order: &Order) -> PosSide {
    if order.is_long() {
        PosSide::Long
    } else {
        PosSide::Short
    }
}

/// Entry intent for `side` at `open_price`, typed and sized from the bot params
pub fn entry_intent(params: &BotParams, side: Side, open_price: f64) -> OrderIntent {
    let order_type = match params.order_type {
        crate::config::EntryKind::Limit => OrderType::Limit,
        crate::config::EntryKind::Market => OrderType::Market,
    };
    let qty = order_qty(params.base_qty, params.quote_qty, open_price, params.qty_digits);
    let mut intent = OrderIntent::entry(
        params.bot_id,
        &params.exchange,
        &params.symbol,
        side,
        order_type,
        qty,
        normalize(open_price, params.price_digits),
    );
    if params.product == Product::Futures {
        intent.pos_side = Some(match side {
            Side::Buy => PosSide::Long,
            Side::Sell => PosSide::Short,
        });
    }
    intent
}

/// Price move in the position's favour; negative when under water
pub fn unrealized_move(position: &Order, price: f64) -> f64 {
    if position.is_long() {
        price - position.open_price
    } else {
        position.open_price - price
    }
}

/// Stop-loss trailing the live price by the configured stop/limit gaps
pub fn near_market_stop_loss(params: &BotParams, position: &Order, price: f64) -> OrderIntent {
    let close_side = position.side.reverse();
    let digits = params.price_digits;
    OrderIntent::protective(
        position,
        Protection::StopLoss.order_type(params.product),
        sl_stop(close_side, price, params.gap.sl_stop, digits),
        sl_stop(close_side, price, params.gap.sl_limit, digits),
    )
}

/// Take-profit just beyond the live price by the configured stop/limit gaps
pub fn near_market_take_profit(params: &BotParams, position: &Order, price: f64) -> OrderIntent {
    let close_side = position.side.reverse();
    let digits = params.price_digits;
    OrderIntent::protective(
        position,
        Protection::TakeProfit.order_type(params.product),
        tp_stop(close_side, price, params.gap.tp_stop, digits),
        tp_stop(close_side, price, params.gap.tp_limit, digits),
    )
}

/// Stop-loss resting at `trigger`, the limit `gap.sl_limit - gap.sl_stop` points further
pub fn resting_stop_loss(params: &BotParams, position: &Order, trigger: f64) -> OrderIntent {
    let close_side = position.side.reverse();
    let digits = params.price_digits;
    let limit_gap = (params.gap.sl_limit - params.gap.sl_stop).max(0.0);
    let trigger = normalize(trigger, digits);
    OrderIntent::protective(
        position,
        Protection::StopLoss.order_type(params.product),
        trigger,
        sl_stop(close_side, trigger, limit_gap, digits),
    )
}

/// True when any protective order of the position already filled and awaits pairing
async fn is_closing(store: &dyn OrderStore, position: &Order) -> Result<bool> {
    let protective = store.get_protective_orders(&position.id).await?;
    Ok(protective.iter().any(|o| o.status == OrderStatus::Filled))
}

/// Close one filled position at the market: take profit when ahead, stop out otherwise.
///
/// An existing protective order of the chosen kind is kept when its trigger is
/// within the limit gap of the new one, and replaced otherwise.
pub async fn close_position(
    store: &dyn OrderStore,
    params: &BotParams,
    position: &Order,
    price: f64,
    orders: &mut TradeOrders,
) -> Result<()> {
    if is_closing(store, position).await? {
        return Ok(());
    }

    let (intent, existing, tolerance) = if unrealized_move(position, price) > 0.0 {
        (
            near_market_take_profit(params, position, price),
            store.get_tp_order(&position.id).await?,
            params.gap.tp_limit,
        )
    } else {
        (
            near_market_stop_loss(params, position, price),
            store.get_sl_order(&position.id).await?,
            params.gap.sl_limit,
        )
    };

    if let Some(existing) = existing {
        let drift = (existing.stop_price - intent.stop_price).abs();
        if drift <= tolerance * point(params.price_digits) + PRICE_EPSILON {
            return Ok(());
        }
        orders.push_cancel(existing);
    }
    orders.push_close(intent);
    Ok(())
}

/// Close every filled position of `direction`
pub async fn close_positions(
    store: &dyn OrderStore,
    params: &BotParams,
    direction: PosSide,
    price: f64,
    orders: &mut TradeOrders,
) -> Result<()> {
    let scope = scope(params);
    for position in store.get_filled_entries(&scope, direction).await? {
        close_position(store, params, &position, price, orders).await?;
    }
    Ok(())
}

/// Withdraw the pending entries of `direction`
pub async fn cancel_new_entries(
    store: &dyn OrderStore,
    params: &BotParams,
    direction: PosSide,
    orders: &mut TradeOrders,
) -> Result<()> {
    for order in store.get_new_entries(&scope(params), direction).await? {
        orders.push_cancel(order);
    }
    Ok(())
}

/// Withdraw pending protective orders of `direction`, except the ones a close
/// intent in `orders` is relying on
pub async fn cancel_new_stops(
    store: &dyn OrderStore,
    params: &BotParams,
    direction: PosSide,
    orders: &mut TradeOrders,
) -> Result<()> {
    let scope = scope(params);
    let positions = store.get_filled_entries(&scope, direction).await?;
    for order in store.get_new_stops(&scope, direction).await? {
        let parent = order.open_order_id.as_deref();
        let kept = positions.iter().any(|p| Some(p.id.as_str()) == parent)
            && !orders
                .close_orders
                .iter()
                .any(|c| c.open_order_id.as_deref() == parent);
        if !kept {
            orders.push_cancel(order);
        }
    }
    Ok(())
}

/// Resting stop-loss `atr * atr_sl` away from the entry for every unprotected position
pub async fn auto_stop_losses(
    store: &dyn OrderStore,
    params: &BotParams,
    atr: f64,
    orders: &mut TradeOrders,
) -> Result<()> {
    let scope = scope(params);
    for direction in [PosSide::Long, PosSide::Short] {
        for position in store.get_filled_entries(&scope, direction).await? {
            if store.get_sl_order(&position.id).await?.is_some() {
                continue;
            }
            let trigger = match direction {
                PosSide::Long => position.open_price - atr * params.atr_sl,
                PosSide::Short => position.open_price + atr * params.atr_sl,
            };
            if trigger <= 0.0 {
                continue;
            }
            orders.push_close(resting_stop_loss(params, &position, trigger));
        }
    }
    Ok(())
}

/// Near-market take-profit for positions that moved more than `atr * atr_tp` in favour
pub async fn auto_take_profits(
    store: &dyn OrderStore,
    params: &BotParams,
    price: f64,
    atr: f64,
    orders: &mut TradeOrders,
) -> Result<()> {
    let scope = scope(params);
    for direction in [PosSide::Long, PosSide::Short] {
        for position in store.get_filled_entries(&scope, direction).await? {
            if unrealized_move(&position, price) <= atr * params.atr_tp {
                continue;
            }
            if store.get_tp_order(&position.id).await?.is_some() {
                continue;
            }
            orders.push_close(near_market_take_profit(params, &position, price));
        }
    }
    Ok(())
}

/// Close positions held longer than the configured durations: a losing one after
/// `time_sl_secs`, a winning one after `time_tp_secs`
pub async fn time_exits(
    store: &dyn OrderStore,
    params: &BotParams,
    price: f64,
    now: i64,
    orders: &mut TradeOrders,
) -> Result<()> {
    if params.time_sl_secs <= 0 && params.time_tp_secs <= 0 {
        return Ok(());
    }
    let scope = scope(params);
    for direction in [PosSide::Long, PosSide::Short] {
        for position in store.get_filled_entries(&scope, direction).await? {
            let held_secs = (now - position.open_time) / 1000;
            let pnl = unrealized_move(&position, price);

            if params.time_sl_secs > 0 && held_secs >= params.time_sl_secs && pnl < 0.0 {
                if store.get_sl_order(&position.id).await?.is_none() {
                    orders.push_close(near_market_stop_loss(params, &position, price));
                }
            } else if params.time_tp_secs > 0 && held_secs >= params.time_tp_secs && pnl > 0.0 {
                if store.get_tp_order(&position.id).await?.is_none() {
                    orders.push_close(near_market_take_profit(params, &position, price));
                }
            }
        }
    }
    Ok(())
}

/// Outcome of the duplicate-entry guard
#[derive(Debug, Clone, PartialEq)]
pub enum EntryCheck {
    Open,
    /// A stale pending order sits at this level; withdraw it instead
    Cancel(Order),
    Blocked,
}

/// Check the nearest active entry of `side` against a proposed `open_price`.
///
/// An order within `order_gap` blocks the entry. If it is still pending and was
/// placed before the current bar opened at `bar_time`, it gets cancelled instead.
pub async fn check_entry(
    store: &dyn OrderStore,
    params: &BotParams,
    side: Side,
    open_price: f64,
    bar_time: i64,
) -> Result<EntryCheck> {
    let nearest = store.get_nearest_order(&scope(params), side, open_price).await?;
    let Some(nearest) = nearest else {
        return Ok(EntryCheck::Open);
    };

    let distance = (nearest.open_price - open_price).abs();
    if distance >= params.order_gap && distance > PRICE_EPSILON {
        return Ok(EntryCheck::Open);
    }
    if nearest.status == OrderStatus::New && nearest.open_time < bar_time {
        return Ok(EntryCheck::Cancel(nearest));
    }
    Ok(EntryCheck::Blocked)
}

/// Entry price offset from the live price by `gap.open_limit` points, below for
/// buys and above for sells
pub fn entry_price(params: &BotParams, side: Side, price: f64) -> f64 {
    match side {
        Side::Buy => lower_by(price, params.gap.open_limit, params.price_digits),
        Side::Sell => upper_by(price, params.gap.open_limit, params.price_digits),
    }
}

/// Queue an entry after the duplicate guard; returns true when an open intent was added
pub async fn propose_entry(
    store: &dyn OrderStore,
    params: &BotParams,
    side: Side,
    price: f64,
    bar_time: i64,
    orders: &mut TradeOrders,
) -> Result<bool> {
    let open_price = match params.order_type {
        crate::config::EntryKind::Limit => entry_price(params, side, price),
        crate::config::EntryKind::Market => price,
    };
    match check_entry(store, params, side, open_price, bar_time).await? {
        EntryCheck::Open => {
            orders.open_orders.push(entry_intent(params, side, open_price));
            Ok(true)
        }
        EntryCheck::Cancel(stale) => {
            tracing::debug!(order_id = %stale.id, open_price = stale.open_price, "Withdrawing stale entry");
            orders.push_cancel(stale);
            Ok(false)
        }
        EntryCheck::Blocked => Ok(false),
    }
}
