// Price arithmetic and identity helpers shared by strategies and execution

use chrono::Utc;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use crate::models::Side;

/// Current Unix time in milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// New local order id: a 32-char lowercase uuid v4, usable as a venue client order id
pub fn gen_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Round `value` to `digits` decimal places, halves away from zero.
///
/// Goes through `Decimal` so that `0.1 + 0.2` rounds to `0.3` rather than
/// keeping binary noise. Non-finite input is returned unchanged.
pub fn normalize(value: f64, digits: u32) -> f64 {
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(digits, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

/// Size of one price point at the given precision (`10^-digits`)
pub fn point(digits: u32) -> f64 {
    10f64.powi(-(digits as i32))
}

/// Trigger price for a stop-loss order on `side`, `gap` points beyond `price`.
///
/// A buy-side stop closes a short and sits above; a sell-side stop closes a long
/// and sits below.
pub fn sl_stop(side: Side, price: f64, gap: f64, digits: u32) -> f64 {
    match side {
        Side::Buy => upper_by(price, gap, digits),
        Side::Sell => lower_by(price, gap, digits),
    }
}

/// Trigger price for a take-profit order on `side`, `gap` points from `price`
pub fn tp_stop(side: Side, price: f64, gap: f64, digits: u32) -> f64 {
    match side {
        Side::Buy => lower_by(price, gap, digits),
        Side::Sell => upper_by(price, gap, digits),
    }
}

pub fn lower_by(price: f64, gap: f64, digits: u32) -> f64 {
    normalize(price - gap * point(digits), digits)
}

pub fn upper_by(price: f64, gap: f64, digits: u32) -> f64 {
    normalize(price + gap * point(digits), digits)
}

/// Order quantity: the configured base quantity, or the quote notional converted at
/// `price` when that is larger
pub fn order_qty(base_qty: f64, quote_qty: f64, price: f64, qty_digits: u32) -> f64 {
    let base = normalize(base_qty, qty_digits);
    if price <= 0.0 || quote_qty <= 0.0 {
        return base;
    }
    let quoted = normalize(quote_qty / price, qty_digits);
    base.max(quoted)
}
