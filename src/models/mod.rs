use serde::{Deserialize, Serialize};

pub mod order;

pub use order::{
    ExchangeOrder, Order, OrderIntent, OrderRequest, OrderStatus, OrderType, PosSide, Side,
    TradeOrders,
};

/// Last traded price of a symbol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticker {
    pub exchange: String,
    pub symbol: String,
    pub price: f64,
    /// Quote time in milliseconds
    pub time: i64,
}

/// One OHLC bar. Series are ordered oldest to newest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct HistoricalPrice {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Bar open time in milliseconds
    pub time: i64,
}

impl HistoricalPrice {
    /// A bar with any zero OHLC field is an incomplete fetch and must not feed a decision
    pub fn is_complete(&self) -> bool {
        self.open != 0.0 && self.high != 0.0 && self.low != 0.0 && self.close != 0.0
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceLevel {
    pub price: f64,
    pub qty: f64,
}

/// Order book snapshot, best level first on both sides
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct OrderBook {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }
}

/// One entry of the venue's recent trade list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub ref_id: String,
    pub symbol: String,
    pub price: f64,
    pub qty: f64,
    pub commission: f64,
    pub time: i64,
}

/// Which directions a strategy may trade
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum View {
    #[serde(alias = "LONG", alias = "L", alias = "l")]
    Long,
    #[serde(alias = "SHORT", alias = "S", alias = "s")]
    Short,
    #[default]
    #[serde(alias = "NEUTRAL", alias = "N", alias = "n")]
    Neutral,
}

impl View {
    pub fn allows_long(&self) -> bool {
        matches!(self, View::Long | View::Neutral)
    }

    pub fn allows_short(&self) -> bool {
        matches!(self, View::Short | View::Neutral)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Product {
    #[default]
    Spot,
    Futures,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_bar() {
        let bar = HistoricalPrice {
            open: 100.0,
            high: 101.0,
            low: 0.0,
            close: 100.5,
            time: 0,
        };
        assert!(!bar.is_complete());
    }

    #[test]
    fn test_candle_anatomy() {
        let bar = HistoricalPrice {
            open: 100.0,
            high: 104.0,
            low: 95.0,
            close: 103.0,
            time: 0,
        };
        assert!(bar.is_bullish());
        assert_eq!(bar.upper_wick(), 1.0);
        assert_eq!(bar.lower_wick(), 5.0);
    }

    #[test]
    fn test_view_aliases() {
        let view: View = serde_json::from_str("\"L\"").unwrap();
        assert_eq!(view, View::Long);
        assert!(view.allows_long());
        assert!(!view.allows_short());

        let view: View = serde_json::from_str("\"neutral\"").unwrap();
        assert!(view.allows_long() && view.allows_short());
    }
}
