use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn reverse(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl FromStr for Side {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(Error::InvalidInput(format!("unknown side {}", other))),
        }
    }
}

/// Futures position side. Spot orders carry none.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum PosSide {
    Long,
    Short,
}

impl PosSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PosSide::Long => "LONG",
            PosSide::Short => "SHORT",
        }
    }
}

impl FromStr for PosSide {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LONG" => Ok(PosSide::Long),
            "SHORT" => Ok(PosSide::Short),
            other => Err(Error::InvalidInput(format!("unknown position side {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    #[serde(rename = "STOP_LOSS_LIMIT")]
    StopLoss,
    #[serde(rename = "TAKE_PROFIT_LIMIT")]
    TakeProfit,
    #[serde(rename = "STOP")]
    FuturesStopLoss,
    #[serde(rename = "TAKE_PROFIT")]
    FuturesTakeProfit,
}

impl OrderType {
    /// Venue type names
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::StopLoss => "STOP_LOSS_LIMIT",
            OrderType::TakeProfit => "TAKE_PROFIT_LIMIT",
            OrderType::FuturesStopLoss => "STOP",
            OrderType::FuturesTakeProfit => "TAKE_PROFIT",
        }
    }

    pub fn is_protective(&self) -> bool {
        self.is_stop_loss() || self.is_take_profit()
    }

    pub fn is_stop_loss(&self) -> bool {
        matches!(self, OrderType::StopLoss | OrderType::FuturesStopLoss)
    }

    pub fn is_take_profit(&self) -> bool {
        matches!(self, OrderType::TakeProfit | OrderType::FuturesTakeProfit)
    }

    /// Entry orders open a position; everything else protects one
    pub fn is_entry(&self) -> bool {
        matches!(self, OrderType::Limit | OrderType::Market)
    }
}

impl FromStr for OrderType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LIMIT" => Ok(OrderType::Limit),
            "MARKET" => Ok(OrderType::Market),
            "STOP_LOSS_LIMIT" => Ok(OrderType::StopLoss),
            "TAKE_PROFIT_LIMIT" => Ok(OrderType::TakeProfit),
            "STOP" => Ok(OrderType::FuturesStopLoss),
            "TAKE_PROFIT" => Ok(OrderType::FuturesTakeProfit),
            other => Err(Error::InvalidInput(format!("unknown order type {}", other))),
        }
    }
}

/// Order lifecycle status. `New` is the only non-terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    New,
    Filled,
    Canceled,
    Expired,
    Rejected,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Expired => "EXPIRED",
            OrderStatus::Rejected => "REJECTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::New)
    }

    /// Terminal without a fill: the order will never become a position
    pub fn is_dead(&self) -> bool {
        matches!(
            self,
            OrderStatus::Canceled | OrderStatus::Expired | OrderStatus::Rejected
        )
    }
}

impl FromStr for OrderStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "FILLED" => Ok(OrderStatus::Filled),
            "CANCELED" => Ok(OrderStatus::Canceled),
            "EXPIRED" => Ok(OrderStatus::Expired),
            "REJECTED" => Ok(OrderStatus::Rejected),
            other => Err(Error::InvalidInput(format!("unknown order status {}", other))),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted order. Only ever built from a venue-confirmed [`OrderRequest`].
///
/// `close_time == 0` means the order is active.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: String,
    pub ref_id: String,
    pub bot_id: i64,
    pub exchange: String,
    pub symbol: String,
    pub side: Side,
    pub pos_side: Option<PosSide>,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub qty: f64,
    pub open_price: f64,
    pub stop_price: f64,
    pub zone_price: f64,
    pub sl_price: f64,
    pub tp_price: f64,
    pub close_price: f64,
    pub commission: f64,
    pub pl: f64,
    pub open_time: i64,
    pub update_time: i64,
    pub close_time: i64,
    /// Parent order protected by this one
    pub open_order_id: Option<String>,
    /// Protective order that closed this one
    pub close_order_id: Option<String>,
}

impl Order {
    pub fn is_active(&self) -> bool {
        self.close_time == 0
    }

    pub fn is_protective(&self) -> bool {
        self.order_type.is_protective()
    }

    /// Whether this order belongs to a long position.
    ///
    /// Entries: a buy (or a futures LONG) opens a long. Protective orders sit on
    /// the opposite side, so a spot sell-side stop protects a long.
    pub fn is_long(&self) -> bool {
        match self.pos_side {
            Some(pos_side) => pos_side == PosSide::Long,
            None if self.is_protective() => self.side == Side::Sell,
            None => self.side == Side::Buy,
        }
    }
}

/// A strategy's proposal for a new order: no identity, status or times yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderIntent {
    pub bot_id: i64,
    pub exchange: String,
    pub symbol: String,
    pub side: Side,
    pub pos_side: Option<PosSide>,
    pub order_type: OrderType,
    pub qty: f64,
    pub open_price: f64,
    pub stop_price: f64,
    pub zone_price: f64,
    pub sl_price: f64,
    pub tp_price: f64,
    pub open_order_id: Option<String>,
}

impl OrderIntent {
    /// Entry intent with every optional price left at zero
    pub fn entry(
        bot_id: i64,
        exchange: &str,
        symbol: &str,
        side: Side,
        order_type: OrderType,
        qty: f64,
        open_price: f64,
    ) -> Self {
        Self {
            bot_id,
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            side,
            pos_side: None,
            order_type,
            qty,
            open_price,
            stop_price: 0.0,
            zone_price: 0.0,
            sl_price: 0.0,
            tp_price: 0.0,
            open_order_id: None,
        }
    }

    /// Protective intent closing `parent` with a stop/limit pair
    pub fn protective(parent: &Order, order_type: OrderType, stop_price: f64, open_price: f64) -> Self {
        Self {
            bot_id: parent.bot_id,
            exchange: parent.exchange.clone(),
            symbol: parent.symbol.clone(),
            side: parent.side.reverse(),
            pos_side: parent.pos_side,
            order_type,
            qty: parent.qty,
            open_price,
            stop_price,
            zone_price: 0.0,
            sl_price: 0.0,
            tp_price: 0.0,
            open_order_id: Some(parent.id.clone()),
        }
    }

    pub fn with_id(self, id: String) -> OrderRequest {
        OrderRequest { id, intent: self }
    }
}

/// An intent that has been given a local id and is about to be submitted
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub id: String,
    pub intent: OrderIntent,
}

impl OrderRequest {
    /// Build the persisted record from the venue's acknowledgement
    pub fn confirm(self, ack: &ExchangeOrder) -> Order {
        let intent = self.intent;
        Order {
            id: self.id,
            ref_id: ack.ref_id.clone(),
            bot_id: intent.bot_id,
            exchange: intent.exchange,
            symbol: intent.symbol,
            side: intent.side,
            pos_side: intent.pos_side,
            order_type: intent.order_type,
            status: ack.status,
            qty: if ack.qty > 0.0 { ack.qty } else { intent.qty },
            open_price: if ack.open_price > 0.0 {
                ack.open_price
            } else {
                intent.open_price
            },
            stop_price: intent.stop_price,
            zone_price: intent.zone_price,
            sl_price: intent.sl_price,
            tp_price: intent.tp_price,
            close_price: 0.0,
            commission: ack.commission,
            pl: 0.0,
            open_time: ack.open_time,
            update_time: ack.update_time,
            close_time: 0,
            open_order_id: intent.open_order_id,
            close_order_id: None,
        }
    }
}

/// The venue's view of an order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExchangeOrder {
    pub ref_id: String,
    pub status: OrderStatus,
    pub open_price: f64,
    pub qty: f64,
    pub commission: f64,
    pub open_time: i64,
    pub update_time: i64,
}

/// A strategy's per-tick output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeOrders {
    pub open_orders: Vec<OrderIntent>,
    /// Protective or exit intents, each tied to a parent
    pub close_orders: Vec<OrderIntent>,
    /// Existing orders to withdraw
    pub cancel_orders: Vec<Order>,
}

impl TradeOrders {
    pub fn is_empty(&self) -> bool {
        self.open_orders.is_empty() && self.close_orders.is_empty() && self.cancel_orders.is_empty()
    }

    /// Queue a protective intent unless one of the same type already targets its parent
    pub fn push_close(&mut self, intent: OrderIntent) {
        let duplicate = self
            .close_orders
            .iter()
            .any(|c| c.open_order_id == intent.open_order_id && c.order_type == intent.order_type);
        if !duplicate {
            self.close_orders.push(intent);
        }
    }

    pub fn push_cancel(&mut self, order: Order) {
        if !self.cancel_orders.iter().any(|c| c.id == order.id) {
            self.cancel_orders.push(order);
        }
    }

    /// `None` when there is nothing to do
    pub fn into_option(self) -> Option<TradeOrders> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(ref_id: &str, status: OrderStatus) -> ExchangeOrder {
        ExchangeOrder {
            ref_id: ref_id.to_string(),
            status,
            open_price: 0.0,
            qty: 0.0,
            commission: 0.0,
            open_time: 1_700_000_000_000,
            update_time: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_confirm_takes_identity_from_venue() {
        let intent = OrderIntent::entry(7, "BINANCE", "BTCUSDT", Side::Buy, OrderType::Limit, 0.5, 100.0);
        let order = intent.with_id("abc".to_string()).confirm(&ack("42", OrderStatus::New));

        assert_eq!(order.id, "abc");
        assert_eq!(order.ref_id, "42");
        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(order.open_price, 100.0);
        assert_eq!(order.qty, 0.5);
        assert!(order.is_active());
    }

    #[test]
    fn test_confirm_prefers_venue_fill_price() {
        let intent = OrderIntent::entry(7, "BINANCE", "BTCUSDT", Side::Buy, OrderType::Market, 0.5, 100.0);
        let mut exo = ack("43", OrderStatus::Filled);
        exo.open_price = 100.4;
        exo.qty = 0.49;
        exo.commission = 0.01;

        let order = intent.with_id("m1".to_string()).confirm(&exo);
        assert_eq!(order.open_price, 100.4);
        assert_eq!(order.qty, 0.49);
        assert_eq!(order.commission, 0.01);
    }

    #[test]
    fn test_protective_reverses_side_and_links_parent() {
        let intent = OrderIntent::entry(1, "BINANCE", "BTCUSDT", Side::Buy, OrderType::Limit, 1.0, 100.0);
        let parent = intent.with_id("p1".to_string()).confirm(&ack("1", OrderStatus::Filled));

        let tp = OrderIntent::protective(&parent, OrderType::TakeProfit, 109.0, 110.0);
        assert_eq!(tp.side, Side::Sell);
        assert_eq!(tp.open_order_id.as_deref(), Some("p1"));
        assert_eq!(tp.qty, 1.0);

        let tp = tp.with_id("t1".to_string()).confirm(&ack("2", OrderStatus::New));
        assert!(parent.is_long());
        assert!(tp.is_long());
    }

    #[test]
    fn test_trade_orders_dedupe() {
        let intent = OrderIntent::entry(1, "BINANCE", "BTCUSDT", Side::Buy, OrderType::Limit, 1.0, 100.0);
        let parent = intent.with_id("p1".to_string()).confirm(&ack("1", OrderStatus::Filled));

        let mut batch = TradeOrders::default();
        assert!(batch.clone().into_option().is_none());

        batch.push_close(OrderIntent::protective(&parent, OrderType::StopLoss, 95.0, 94.0));
        batch.push_close(OrderIntent::protective(&parent, OrderType::StopLoss, 96.0, 95.0));
        batch.push_close(OrderIntent::protective(&parent, OrderType::TakeProfit, 110.0, 111.0));
        assert_eq!(batch.close_orders.len(), 2);
        assert_eq!(batch.close_orders[0].stop_price, 95.0);

        batch.push_cancel(parent.clone());
        batch.push_cancel(parent);
        assert_eq!(batch.cancel_orders.len(), 1);
        assert!(batch.into_option().is_some());
    }

    #[test]
    fn test_status_terminality() {
        assert!(!OrderStatus::New.is_terminal());
        assert!(OrderStatus::Filled.is_terminal());
        assert!(!OrderStatus::Filled.is_dead());
        assert!(OrderStatus::Expired.is_dead());
        assert_eq!("REJECTED".parse::<OrderStatus>().unwrap(), OrderStatus::Rejected);
        assert!("PARTIAL".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_order_type_names_round_trip() {
        for t in [
            OrderType::Limit,
            OrderType::Market,
            OrderType::StopLoss,
            OrderType::TakeProfit,
            OrderType::FuturesStopLoss,
            OrderType::FuturesTakeProfit,
        ] {
            assert_eq!(t.as_str().parse::<OrderType>().unwrap(), t);
        }
        assert!(OrderType::FuturesTakeProfit.is_take_profit());
        assert!(!OrderType::Market.is_protective());
    }
}
