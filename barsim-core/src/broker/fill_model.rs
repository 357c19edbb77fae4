//! Trigger checking: does a bar fill a given order, and at what price?
//!
//! Evaluates the order's condition against the bar's OHLC range and returns
//! the raw fill price before slippage and commission.
//!
//! Gap handling is conservative for stops: when the open already satisfies
//! the stop, a STOP fills at the open (the worse side of the stop), and a
//! STOP_LIMIT triggered on this bar fills at the stop trigger price capped by
//! its limit.

use crate::domain::{Bar, Order, OrderSide, OrderType};
use rust_decimal::Decimal;

/// Result of checking an order against a bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerResult {
    /// Nothing happens on this bar.
    NoTrigger,
    /// The order fills at this raw price.
    Fill { price: Decimal },
    /// STOP_LIMIT: the stop triggered on this bar but the limit was not
    /// reached. The order now waits as a limit order.
    StopTriggeredLimitPending,
}

impl TriggerResult {
    pub fn fill_price(&self) -> Option<Decimal> {
        match *self {
            TriggerResult::Fill { price } => Some(price),
            _ => None,
        }
    }
}

/// Evaluate `order` against `bar`.
///
/// Does not look at acceptance, eligibility, volume or cash; the broker
/// handles those.
pub fn check_trigger(order: &Order, bar: &Bar) -> TriggerResult {
    match order.order_type {
        OrderType::Market if order.on_close => TriggerResult::Fill { price: bar.close },
        OrderType::Market => TriggerResult::Fill { price: bar.open },
        OrderType::Limit { limit_price } => match limit_trigger_price(order.side, limit_price, bar)
        {
            Some(price) => TriggerResult::Fill { price },
            None => TriggerResult::NoTrigger,
        },
        OrderType::Stop { stop_price } => match stop_trigger_price(order.side, stop_price, bar) {
            Some(price) => TriggerResult::Fill { price },
            None => TriggerResult::NoTrigger,
        },
        OrderType::StopLimit {
            stop_price,
            limit_price,
        } => check_stop_limit(order.side, order.stop_hit, stop_price, limit_price, bar),
    }
}

/// Price at which a stop triggers on this bar, if it does.
///
/// Buy stop: high >= stop, price = max(open, stop).
/// Sell stop: low <= stop, price = min(open, stop).
pub fn stop_trigger_price(side: OrderSide, stop: Decimal, bar: &Bar) -> Option<Decimal> {
    match side {
        OrderSide::Buy if bar.high >= stop => Some(bar.open.max(stop)),
        OrderSide::Sell if bar.low <= stop => Some(bar.open.min(stop)),
        _ => None,
    }
}

/// Price at which a limit fills on this bar, if it does.
///
/// Buy limit: low <= limit, price = open if open <= limit else limit.
/// Sell limit: high >= limit, price = open if open >= limit else limit.
pub fn limit_trigger_price(side: OrderSide, limit: Decimal, bar: &Bar) -> Option<Decimal> {
    match side {
        OrderSide::Buy if bar.low <= limit => Some(if bar.open <= limit {
            bar.open
        } else {
            limit
        }),
        OrderSide::Sell if bar.high >= limit => Some(if bar.open >= limit {
            bar.open
        } else {
            limit
        }),
        _ => None,
    }
}

fn check_stop_limit(
    side: OrderSide,
    stop_hit: bool,
    stop: Decimal,
    limit: Decimal,
    bar: &Bar,
) -> TriggerResult {
    // Only evaluate the stop until it has fired once.
    let stop_trigger = if stop_hit {
        None
    } else {
        match stop_trigger_price(side, stop, bar) {
            Some(p) => Some(p),
            None => return TriggerResult::NoTrigger,
        }
    };

    match (limit_trigger_price(side, limit, bar), stop_trigger) {
        (Some(_), Some(trigger)) => {
            // Triggered on this bar: the market only reached the limit side
            // after crossing the stop.
            let price = match side {
                OrderSide::Buy => trigger.min(limit),
                OrderSide::Sell => trigger.max(limit),
            };
            TriggerResult::Fill { price }
        }
        (Some(price), None) => TriggerResult::Fill { price },
        (None, Some(_)) => TriggerResult::StopTriggeredLimitPending,
        (None, None) => TriggerResult::NoTrigger,
    }
}
