use std::sync::Arc;

use crate::config::BotParams;
use crate::db::{OrderStore, Scope};
use crate::exchange::ExchangeGateway;
use crate::helpers::{gen_id, normalize, now_ms, order_qty};
use crate::models::{Order, OrderIntent, OrderStatus, OrderType, Side, TradeOrders, TradeRecord};
use crate::{Error, Result};

/// Page size of the trade list read for fill confirmation
const TRADE_LIST_LIMIT: usize = 5;

/// Pages scanned forward from an order's fill before giving up for this pass
const MAX_TRADE_PAGES: usize = 20;

/// Order book depth read before a market order
const BOOK_DEPTH: usize = 5;

/// Outcome of applying one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub opened: usize,
    pub protective: usize,
    pub canceled: usize,
    /// Intents dropped by a guard before reaching the venue
    pub skipped: usize,
    /// Accepted by neither side: the venue answered without an order
    pub rejected: usize,
    pub failed: usize,
}

impl ApplyReport {
    pub fn is_quiet(&self) -> bool {
        *self == Self::default()
    }
}

/// Outcome of one status sync pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: usize,
    pub filled: usize,
    pub canceled: usize,
    /// Positions closed by a paired protective order
    pub closed: usize,
    pub anomalies: usize,
    pub failed: usize,
}

impl SyncReport {
    /// Nothing changed beyond the status reads themselves
    pub fn is_quiet(&self) -> bool {
        self.filled == 0
            && self.canceled == 0
            && self.closed == 0
            && self.anomalies == 0
            && self.failed == 0
    }
}

/// Result of syncing one order against the venue
#[derive(Debug, Clone, PartialEq)]
pub struct Synced {
    /// The order as persisted after the sync
    pub order: Order,
    /// Status newly written this call
    pub transition: Option<OrderStatus>,
    /// Filled, still active, and visible in the recent trade list
    pub fill_confirmed: bool,
}

enum Placement {
    Placed,
    Skipped,
    Rejected,
}

enum Pairing {
    Closed,
    Orphaned,
}

/// Realized P/L of `parent` closed by `protective`, net of both commissions
pub fn realized_pl(parent: &Order, protective: &Order, price_digits: u32) -> f64 {
    let close_price = protective.open_price;
    let gross = if parent.is_long() {
        (close_price - parent.open_price) * protective.qty
    } else {
        (parent.open_price - close_price) * protective.qty
    };
    normalize(gross - parent.commission - protective.commission, price_digits)
}

fn log_order(event: &'static str, order: &Order) {
    tracing::info!(
        event,
        order_id = %order.id,
        ref_id = %order.ref_id,
        symbol = %order.symbol,
        side = order.side.as_str(),
        pos_side = order.pos_side.map(|p| p.as_str()),
        order_type = order.order_type.as_str(),
        status = order.status.as_str(),
        qty = order.qty,
        price = order.open_price,
        "{}",
        event
    );
}

/// Applies strategy batches to the venue and keeps the order store in step with it.
///
/// Single-actor: calls are awaited one at a time and no order is touched by two
/// flows at once.
pub struct Reconciler {
    params: BotParams,
    store: Arc<dyn OrderStore>,
    exchange: Arc<dyn ExchangeGateway>,
}

impl Reconciler {
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

    fn scope(&self) -> Scope {
        Scope::new(self.params.bot_id, &self.params.exchange, &self.params.symbol)
    }

    pub async fn apply(&self, batch: TradeOrders, price: f64) -> ApplyReport {
        self.apply_at(batch, price, now_ms()).await
    }

    /// Cancels first, then protective orders, then entries. A failed item is
    /// logged and the batch moves on.
    pub async fn apply_at(&self, batch: TradeOrders, price: f64, now: i64) -> ApplyReport {
        let mut report = ApplyReport::default();

        for order in batch.cancel_orders {
            let order_id = order.id.clone();
            match self.cancel_at(order, now).await {
                Ok(true) => report.canceled += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(order_id = %order_id, error = %e, "Cancel failed");
                }
            }
        }

        for intent in batch.close_orders {
            let parent_id = intent.open_order_id.clone().unwrap_or_default();
            match self.open_protective(intent).await {
                Ok(Placement::Placed) => report.protective += 1,
                Ok(Placement::Skipped) => report.skipped += 1,
                Ok(Placement::Rejected) => report.rejected += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(parent_id = %parent_id, error = %e, "Protective order failed");
                }
            }
        }

        for intent in batch.open_orders {
            let side = intent.side;
            match self.open_entry(intent, price).await {
                Ok(Placement::Placed) => report.opened += 1,
                Ok(Placement::Skipped) => report.skipped += 1,
                Ok(Placement::Rejected) => report.rejected += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(side = side.as_str(), error = %e, "Entry order failed");
                }
            }
        }

        report
    }

    /// Withdraw `order`, re-checking the venue first. Returns true when the order
    /// ended up dead.
    async fn cancel_at(&self, mut order: Order, now: i64) -> Result<bool> {
        let Some(exo) = self.exchange.get_order(&order).await? else {
            tracing::warn!(order_id = %order.id, "Venue has no record of order, cancel skipped");
            return Ok(false);
        };

        if exo.status != OrderStatus::New {
            // Resolved on its own since the strategy looked
            if order.status == OrderStatus::New {
                order.status = exo.status;
                order.update_time = exo.update_time;
                if exo.status == OrderStatus::Filled {
                    self.refresh_commission(&mut order, exo.commission).await?;
                } else {
                    order.close_time = now;
                }
                self.store.update_order(&order).await?;
                let event = if exo.status == OrderStatus::Filled {
                    "order.filled"
                } else {
                    "order.canceled"
                };
                log_order(event, &order);
            }
            return Ok(exo.status.is_dead());
        }

        let Some(ack) = self.exchange.cancel_order(&order).await? else {
            tracing::warn!(order_id = %order.id, ref_id = %order.ref_id, "Cancel not confirmed by venue");
            return Ok(false);
        };
        order.status = if ack.status.is_dead() {
            ack.status
        } else {
            OrderStatus::Canceled
        };
        order.update_time = ack.update_time;
        order.close_time = now;
        self.store.update_order(&order).await?;
        log_order("order.canceled", &order);
        Ok(true)
    }

    async fn open_protective(&self, intent: OrderIntent) -> Result<Placement> {
        let Some(parent_id) = intent.open_order_id.clone() else {
            tracing::warn!(order_type = intent.order_type.as_str(), "Protective intent without a parent");
            return Ok(Placement::Skipped);
        };

        let existing = if intent.order_type.is_stop_loss() {
            self.store.get_sl_order(&parent_id).await?
        } else {
            self.store.get_tp_order(&parent_id).await?
        };
        if let Some(existing) = existing {
            tracing::debug!(parent_id = %parent_id, existing = %existing.id, "Protective order already active");
            return Ok(Placement::Skipped);
        }

        match self.store.get_order_by_id(&parent_id).await? {
            Some(parent) if parent.is_active() => {}
            _ => {
                tracing::warn!(parent_id = %parent_id, "Parent is gone, protective intent dropped");
                return Ok(Placement::Skipped);
            }
        }

        let request = intent.with_id(gen_id());
        let Some(ack) = self.exchange.open_stop_order(&request).await? else {
            tracing::warn!(order_id = %request.id, parent_id = %parent_id, "Protective order rejected");
            return Ok(Placement::Rejected);
        };
        let order = request.confirm(&ack);
        self.store.create_order(&order).await?;
        log_order("order.new", &order);
        Ok(Placement::Placed)
    }

    async fn open_entry(&self, mut intent: OrderIntent, price: f64) -> Result<Placement> {
        let p = &self.params;

        if intent.order_type == OrderType::Market {
            let book = self.exchange.get_order_book(&intent.symbol, BOOK_DEPTH).await?;
            let reference = if intent.zone_price > 0.0 {
                intent.zone_price
            } else {
                intent.open_price
            };
            let touch = match intent.side {
                Side::Buy => book.best_ask().filter(|ask| *ask <= reference),
                Side::Sell => book.best_bid().filter(|bid| *bid >= reference),
            };
            let Some(touch) = touch else {
                tracing::debug!(side = intent.side.as_str(), reference, "Book moved past the entry price");
                return Ok(Placement::Skipped);
            };

            intent.qty = order_qty(p.base_qty, p.quote_qty, touch, p.qty_digits);
            if intent.qty <= 0.0 {
                return Err(Error::InvalidInput("order quantity is zero".to_string()));
            }
            let request = intent.with_id(gen_id());
            let Some(ack) = self.exchange.open_market_order(&request).await? else {
                tracing::warn!(order_id = %request.id, "Market order rejected");
                return Ok(Placement::Rejected);
            };
            let order = request.confirm(&ack);
            self.store.create_order(&order).await?;
            log_order("order.filled", &order);
            return Ok(Placement::Placed);
        }

        intent.qty = order_qty(p.base_qty, p.quote_qty, price, p.qty_digits);
        if intent.qty <= 0.0 {
            return Err(Error::InvalidInput("order quantity is zero".to_string()));
        }
        let request = intent.with_id(gen_id());
        let Some(ack) = self.exchange.open_limit_order(&request).await? else {
            tracing::warn!(order_id = %request.id, price = request.intent.open_price, "Limit order rejected");
            return Ok(Placement::Rejected);
        };
        let order = request.confirm(&ack);
        self.store.create_order(&order).await?;
        log_order("order.new", &order);
        Ok(Placement::Placed)
    }

    /// Venue commission for a filled order, falling back to what the snapshot carried
    async fn refresh_commission(&self, order: &mut Order, snapshot: f64) -> Result<()> {
        match self.exchange.get_commission(&order.symbol, &order.ref_id).await? {
            Some(commission) => order.commission = commission,
            None if snapshot > 0.0 => order.commission = snapshot,
            None => {}
        }
        Ok(())
    }

    pub async fn sync_status(&self, order: Order) -> Result<Synced> {
        self.sync_status_at(order, now_ms()).await
    }

    /// Bring one order in line with the venue.
    ///
    /// Orders pending past `max_pending_secs` are cancelled. A status change is
    /// written once; a terminal local status is never overwritten.
    pub async fn sync_status_at(&self, mut order: Order, now: i64) -> Result<Synced> {
        let Some(exo) = self.exchange.get_order(&order).await? else {
            tracing::warn!(order_id = %order.id, ref_id = %order.ref_id, "Venue has no record of order");
            return Ok(Synced {
                order,
                transition: None,
                fill_confirmed: false,
            });
        };

        if exo.status == OrderStatus::New {
            let max_pending = self.params.max_pending_secs;
            let expired = max_pending > 0
                && order.status == OrderStatus::New
                && (now - order.open_time) / 1000 > max_pending;
            if expired {
                if let Some(ack) = self.exchange.cancel_order(&order).await? {
                    order.status = OrderStatus::Canceled;
                    order.update_time = ack.update_time;
                    order.close_time = now;
                    self.store.update_order(&order).await?;
                    log_order("order.canceled", &order);
                    return Ok(Synced {
                        order,
                        transition: Some(OrderStatus::Canceled),
                        fill_confirmed: false,
                    });
                }
                tracing::warn!(order_id = %order.id, "Pending-too-long cancel not confirmed");
            }
            return Ok(Synced {
                order,
                transition: None,
                fill_confirmed: false,
            });
        }

        let mut transition = None;
        if exo.status != order.status {
            if order.status.is_terminal() {
                tracing::warn!(
                    order_id = %order.id,
                    local = order.status.as_str(),
                    venue = exo.status.as_str(),
                    "Venue disagrees with a terminal status, keeping local"
                );
            } else {
                order.status = exo.status;
                order.update_time = exo.update_time;
                if exo.status.is_dead() {
                    order.close_time = now;
                }
                if exo.status == OrderStatus::Filled {
                    self.refresh_commission(&mut order, exo.commission).await?;
                }
                self.store.update_order(&order).await?;
                let event = if exo.status == OrderStatus::Filled {
                    "order.filled"
                } else {
                    "order.canceled"
                };
                log_order(event, &order);
                transition = Some(exo.status);
            }
        }

        let mut fill_confirmed = false;
        if order.status == OrderStatus::Filled && order.is_active() {
            let matched = self.order_trades(&order).await?;
            fill_confirmed = !matched.is_empty();

            // Commission read before the trade was queryable
            let commission: f64 = matched.iter().map(|t| t.commission).sum();
            if fill_confirmed && order.commission == 0.0 && commission > 0.0 {
                order.commission = commission;
                self.store.update_order(&order).await?;
            }
        }

        Ok(Synced {
            order,
            transition,
            fill_confirmed,
        })
    }

    /// Venue trades of `order`, paging forward from its last update so later
    /// fills on the symbol cannot push it out of view
    async fn order_trades(&self, order: &Order) -> Result<Vec<TradeRecord>> {
        let mut start = if order.update_time > 0 {
            order.update_time
        } else {
            order.open_time
        };
        for _ in 0..MAX_TRADE_PAGES {
            let page = self
                .exchange
                .get_trade_list(&order.symbol, TRADE_LIST_LIMIT, start, 0)
                .await?;
            let matched: Vec<TradeRecord> = page
                .iter()
                .filter(|t| t.ref_id == order.ref_id)
                .cloned()
                .collect();
            if !matched.is_empty() || page.len() < TRADE_LIST_LIMIT {
                return Ok(matched);
            }
            let last = page.last().map_or(start, |t| t.time);
            start = if last > start { last } else { start + 1 };
        }
        tracing::debug!(order_id = %order.id, "Trade not found within scanned pages");
        Ok(Vec::new())
    }

    /// Close the parent of a fill-confirmed protective order and book the P/L
    async fn pair_at(&self, mut protective: Order, now: i64) -> Result<Pairing> {
        let parent = match &protective.open_order_id {
            Some(id) => self.store.get_order_by_id(id).await?,
            None => None,
        };
        let mut parent = match parent {
            Some(parent) if parent.is_active() => parent,
            other => {
                tracing::warn!(
                    order_id = %protective.id,
                    parent_id = protective.open_order_id.as_deref().unwrap_or(""),
                    parent_closed = other.is_some(),
                    "Protective order filled without an open parent"
                );
                protective.close_time = now;
                self.store.update_order(&protective).await?;
                return Ok(Pairing::Orphaned);
            }
        };

        let pl = realized_pl(&parent, &protective, self.params.price_digits);
        parent.close_order_id = Some(protective.id.clone());
        parent.close_price = protective.open_price;
        parent.close_time = now;
        parent.pl = pl;
        self.store.update_order(&parent).await?;

        protective.close_order_id = Some(protective.id.clone());
        protective.close_price = protective.open_price;
        protective.close_time = now;
        self.store.update_order(&protective).await?;

        tracing::info!(
            event = "order.closed",
            order_id = %parent.id,
            close_order_id = %protective.id,
            side = parent.side.as_str(),
            order_type = protective.order_type.as_str(),
            qty = protective.qty,
            open_price = parent.open_price,
            close_price = parent.close_price,
            pl,
            "order.closed"
        );

        // The position is gone; its other protective orders must not fire
        for sibling in self.store.get_protective_orders(&parent.id).await? {
            if sibling.id == protective.id || sibling.status != OrderStatus::New {
                continue;
            }
            let sibling_id = sibling.id.clone();
            if let Err(e) = self.cancel_at(sibling, now).await {
                tracing::error!(order_id = %sibling_id, error = %e, "Sibling cancel failed");
            }
        }

        Ok(Pairing::Closed)
    }

    async fn sync_order_at(&self, order: Order, now: i64, report: &mut SyncReport) -> Result<()> {
        let synced = self.sync_status_at(order, now).await?;
        report.synced += 1;
        match synced.transition {
            Some(OrderStatus::Filled) => report.filled += 1,
            Some(status) if status.is_dead() => report.canceled += 1,
            _ => {}
        }

        if synced.fill_confirmed && synced.order.is_protective() {
            match self.pair_at(synced.order, now).await? {
                Pairing::Closed => report.closed += 1,
                Pairing::Orphaned => report.anomalies += 1,
            }
        }
        Ok(())
    }

    pub async fn sync_all(&self) -> SyncReport {
        self.sync_all_at(now_ms()).await
    }

    /// Re-sync every active order of the bot, not only the ones this tick touched
    pub async fn sync_all_at(&self, now: i64) -> SyncReport {
        let mut report = SyncReport::default();
        let orders = match self.store.get_active_orders(&self.scope()).await {
            Ok(orders) => orders,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load active orders");
                report.failed += 1;
                return report;
            }
        };

        for order in orders {
            // Pairing earlier in the pass may already have closed it
            let current = match self.store.get_order_by_id(&order.id).await {
                Ok(Some(current)) if current.is_active() => current,
                Ok(_) => continue,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(order_id = %order.id, error = %e, "Failed to reload order");
                    continue;
                }
            };
            if let Err(e) = self.sync_order_at(current, now, &mut report).await {
                report.failed += 1;
                tracing::error!(order_id = %order.id, error = %e, "Sync failed");
            }
        }

        report
    }
}
