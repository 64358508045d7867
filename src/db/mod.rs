// Order persistence module
// `OrderStore` is the query/command surface shared by strategies and the reconciler

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;

use crate::models::{Order, OrderStatus, OrderType, PosSide, Side};
use crate::Result;

/// Tolerance for comparing stored prices
pub const PRICE_EPSILON: f64 = 1e-9;

const ENTRY_TYPES: [OrderType; 2] = [OrderType::Limit, OrderType::Market];
const SL_TYPES: [OrderType; 2] = [OrderType::StopLoss, OrderType::FuturesStopLoss];
const TP_TYPES: [OrderType; 2] = [OrderType::TakeProfit, OrderType::FuturesTakeProfit];
const PROTECTIVE_TYPES: [OrderType; 4] = [
    OrderType::StopLoss,
    OrderType::FuturesStopLoss,
    OrderType::TakeProfit,
    OrderType::FuturesTakeProfit,
];

/// The orders of one bot on one market
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub bot_id: i64,
    pub exchange: String,
    pub symbol: String,
}

impl Scope {
    pub fn new(bot_id: i64, exchange: &str, symbol: &str) -> Self {
        Self {
            bot_id,
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    OpenTimeDesc,
}

/// Predicate over stored orders. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderFilter {
    pub scope: Option<Scope>,
    pub side: Option<Side>,
    /// Position direction; see [`Order::is_long`]
    pub direction: Option<PosSide>,
    /// Empty matches every type
    pub types: Vec<OrderType>,
    pub status: Option<OrderStatus>,
    pub not_status: Option<OrderStatus>,
    /// Only orders with `close_time == 0`
    pub active_only: bool,
    pub open_order_id: Option<String>,
    pub zone_price: Option<f64>,
    /// Inclusive open price band
    pub open_price_between: Option<(f64, f64)>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl OrderFilter {
    pub fn scoped(scope: &Scope) -> Self {
        Self {
            scope: Some(scope.clone()),
            ..Default::default()
        }
    }

    pub fn side(mut self, side: Side) -> Self {
        self.side = Some(side);
        self
    }

    pub fn direction(mut self, direction: PosSide) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn types(mut self, types: &[OrderType]) -> Self {
        self.types = types.to_vec();
        self
    }

    pub fn status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn not_status(mut self, status: OrderStatus) -> Self {
        self.not_status = Some(status);
        self
    }

    pub fn active(mut self) -> Self {
        self.active_only = true;
        self
    }

    pub fn parent(mut self, open_order_id: &str) -> Self {
        self.open_order_id = Some(open_order_id.to_string());
        self
    }

    pub fn zone_price(mut self, price: f64) -> Self {
        self.zone_price = Some(price);
        self
    }

    pub fn open_price_between(mut self, lower: f64, upper: f64) -> Self {
        self.open_price_between = Some((lower, upper));
        self
    }

    pub fn order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = Some(order_by);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// In-process evaluation of the predicate (ordering and limit excluded)
    pub fn matches(&self, order: &Order) -> bool {
        if let Some(scope) = &self.scope {
            if order.bot_id != scope.bot_id
                || order.exchange != scope.exchange
                || order.symbol != scope.symbol
            {
                return false;
            }
        }
        if self.side.is_some_and(|s| s != order.side) {
            return false;
        }
        if let Some(direction) = self.direction {
            if order.is_long() != (direction == PosSide::Long) {
                return false;
            }
        }
        if !self.types.is_empty() && !self.types.contains(&order.order_type) {
            return false;
        }
        if self.status.is_some_and(|s| s != order.status) {
            return false;
        }
        if self.not_status.is_some_and(|s| s == order.status) {
            return false;
        }
        if self.active_only && !order.is_active() {
            return false;
        }
        if let Some(id) = &self.open_order_id {
            if order.open_order_id.as_deref() != Some(id.as_str()) {
                return false;
            }
        }
        if let Some(zone) = self.zone_price {
            if (order.zone_price - zone).abs() > PRICE_EPSILON {
                return false;
            }
        }
        if let Some((lower, upper)) = self.open_price_between {
            if order.open_price < lower - PRICE_EPSILON || order.open_price > upper + PRICE_EPSILON {
                return false;
            }
        }
        true
    }
}

/// Sort in place by the filter's ordering
pub fn sort_orders(orders: &mut [Order], order_by: OrderBy) {
    match order_by {
        OrderBy::OpenTimeDesc => orders.sort_by(|a, b| b.open_time.cmp(&a.open_time)),
    }
}

/// Persisted order records.
///
/// Implementors provide the four primitives; the named queries strategies and the
/// reconciler rely on are built on `find_orders`.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create_order(&self, order: &Order) -> Result<()>;

    /// Overwrite every mutable field of the order with the same id
    async fn update_order(&self, order: &Order) -> Result<()>;

    async fn get_order_by_id(&self, id: &str) -> Result<Option<Order>>;

    async fn find_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>>;

    async fn find_order(&self, filter: &OrderFilter) -> Result<Option<Order>> {
        let filter = filter.clone().limit(1);
        Ok(self.find_orders(&filter).await?.into_iter().next())
    }

    /// Every active order of the bot
    async fn get_active_orders(&self, scope: &Scope) -> Result<Vec<Order>> {
        self.find_orders(&OrderFilter::scoped(scope).active().order_by(OrderBy::OpenTimeDesc))
            .await
    }

    /// The active entry order of `side` whose open price sits within `price ± price * slippage`
    async fn get_active_order(
        &self,
        scope: &Scope,
        side: Side,
        price: f64,
        slippage: f64,
    ) -> Result<Option<Order>> {
        let band = price * slippage.max(0.0);
        let filter = OrderFilter::scoped(scope)
            .side(side)
            .types(&ENTRY_TYPES)
            .not_status(OrderStatus::Canceled)
            .active()
            .open_price_between(price - band, price + band);
        self.find_order(&filter).await
    }

    /// True when no active entry order of `side` is anchored at `zone_price`
    async fn is_empty_zone(&self, scope: &Scope, side: Side, zone_price: f64) -> Result<bool> {
        let filter = OrderFilter::scoped(scope)
            .side(side)
            .types(&ENTRY_TYPES)
            .not_status(OrderStatus::Canceled)
            .active()
            .zone_price(zone_price);
        Ok(self.find_order(&filter).await?.is_none())
    }

    /// The active entry order of `side` with the open price closest to `price`
    async fn get_nearest_order(&self, scope: &Scope, side: Side, price: f64) -> Result<Option<Order>> {
        let filter = OrderFilter::scoped(scope)
            .side(side)
            .types(&ENTRY_TYPES)
            .not_status(OrderStatus::Canceled)
            .active();
        let orders = self.find_orders(&filter).await?;
        Ok(orders.into_iter().min_by(|a, b| {
            (a.open_price - price)
                .abs()
                .total_cmp(&(b.open_price - price).abs())
        }))
    }

    /// Active stop-loss protecting `parent_id`
    async fn get_sl_order(&self, parent_id: &str) -> Result<Option<Order>> {
        let filter = OrderFilter::default().parent(parent_id).types(&SL_TYPES).active();
        self.find_order(&filter).await
    }

    /// Active take-profit protecting `parent_id`
    async fn get_tp_order(&self, parent_id: &str) -> Result<Option<Order>> {
        let filter = OrderFilter::default().parent(parent_id).types(&TP_TYPES).active();
        self.find_order(&filter).await
    }

    /// Every active protective order of `parent_id`
    async fn get_protective_orders(&self, parent_id: &str) -> Result<Vec<Order>> {
        let filter = OrderFilter::default()
            .parent(parent_id)
            .types(&PROTECTIVE_TYPES)
            .active();
        self.find_orders(&filter).await
    }

    /// Open positions: filled, still active entry orders, newest first
    async fn get_filled_entries(&self, scope: &Scope, direction: PosSide) -> Result<Vec<Order>> {
        let filter = OrderFilter::scoped(scope)
            .direction(direction)
            .types(&ENTRY_TYPES)
            .status(OrderStatus::Filled)
            .active()
            .order_by(OrderBy::OpenTimeDesc);
        self.find_orders(&filter).await
    }

    /// Pending entry orders, newest first
    async fn get_new_entries(&self, scope: &Scope, direction: PosSide) -> Result<Vec<Order>> {
        let filter = OrderFilter::scoped(scope)
            .direction(direction)
            .types(&ENTRY_TYPES)
            .status(OrderStatus::New)
            .active()
            .order_by(OrderBy::OpenTimeDesc);
        self.find_orders(&filter).await
    }

    /// Pending protective orders of a direction, newest first
    async fn get_new_stops(&self, scope: &Scope, direction: PosSide) -> Result<Vec<Order>> {
        let filter = OrderFilter::scoped(scope)
            .direction(direction)
            .types(&PROTECTIVE_TYPES)
            .status(OrderStatus::New)
            .active()
            .order_by(OrderBy::OpenTimeDesc);
        self.find_orders(&filter).await
    }
}
