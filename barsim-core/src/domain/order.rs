//! Orders: request shape, validated order type, and the lifecycle state machine.
//!
//! ```text
//! Initial ──► Submitted ──► Accepted ──► PartiallyFilled ──► Filled
//!                │             │   └──────────────────────────► Filled
//!                └─────────────┴──────────────┴──────────────► Canceled
//! ```
//!
//! Filled and Canceled are terminal. Every move is checked against
//! [`OrderState::can_transition_to`]; illegal moves are typed errors.

use crate::domain::{Instrument, OrderId, OrderSide, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors from order lifecycle operations (cancel, transitions, fills).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderStateError {
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("order {0} is already filled")]
    OrderAlreadyFilled(OrderId),

    #[error("order {0} is already canceled")]
    OrderAlreadyCanceled(OrderId),

    #[error("invalid transition for order {id}: {from} -> {to}")]
    InvalidTransition {
        id: OrderId,
        from: OrderState,
        to: OrderState,
    },

    #[error("order {id}: fill of {requested} exceeds remaining {remaining}")]
    Overfill {
        id: OrderId,
        requested: u64,
        remaining: u64,
    },
}

/// Order lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Initial,
    Submitted,
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
}

impl OrderState {
    /// The transition table.
    pub fn can_transition_to(self, to: OrderState) -> bool {
        use OrderState::*;
        matches!(
            (self, to),
            (Initial, Submitted)
                | (Submitted, Accepted)
                | (Submitted, Canceled)
                | (Accepted, PartiallyFilled)
                | (Accepted, Filled)
                | (Accepted, Canceled)
                | (PartiallyFilled, PartiallyFilled)
                | (PartiallyFilled, Filled)
                | (PartiallyFilled, Canceled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderState::Filled | OrderState::Canceled)
    }

    /// Submitted, accepted or partially filled.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            OrderState::Submitted | OrderState::Accepted | OrderState::PartiallyFilled
        )
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderState::Initial => "INITIAL",
            OrderState::Submitted => "SUBMITTED",
            OrderState::Accepted => "ACCEPTED",
            OrderState::PartiallyFilled => "PARTIALLY_FILLED",
            OrderState::Filled => "FILLED",
            OrderState::Canceled => "CANCELED",
        };
        f.write_str(s)
    }
}

/// Order type tag as it appears on a request, before prices are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderTypeKind {
    Market,
    Limit,
    Stop,
    StopLimit,
}

/// Validated order type with its required prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit { limit_price: Decimal },
    Stop { stop_price: Decimal },
    StopLimit { stop_price: Decimal, limit_price: Decimal },
}

impl OrderType {
    pub fn kind(&self) -> OrderTypeKind {
        match self {
            OrderType::Market => OrderTypeKind::Market,
            OrderType::Limit { .. } => OrderTypeKind::Limit,
            OrderType::Stop { .. } => OrderTypeKind::Stop,
            OrderType::StopLimit { .. } => OrderTypeKind::StopLimit,
        }
    }

    pub fn limit_price(&self) -> Option<Decimal> {
        match *self {
            OrderType::Limit { limit_price } | OrderType::StopLimit { limit_price, .. } => {
                Some(limit_price)
            }
            _ => None,
        }
    }

    pub fn stop_price(&self) -> Option<Decimal> {
        match *self {
            OrderType::Stop { stop_price } | OrderType::StopLimit { stop_price, .. } => {
                Some(stop_price)
            }
            _ => None,
        }
    }
}

/// What a strategy hands to the broker. Nothing here is trusted until the
/// broker validates it; quantity is signed so a non-positive value can be
/// reported instead of being unrepresentable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub instrument: Instrument,
    pub side: OrderSide,
    pub kind: OrderTypeKind,
    pub quantity: i64,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub all_or_none: bool,
    /// When false the order is a day order and expires once a bar from a
    /// later day than its acceptance arrives.
    #[serde(default = "default_good_till_canceled")]
    pub good_till_canceled: bool,
    /// MARKET only: fill at the bar's close instead of its open.
    #[serde(default)]
    pub on_close: bool,
}

fn default_good_till_canceled() -> bool {
    true
}

impl OrderRequest {
    fn base(instrument: Instrument, side: OrderSide, kind: OrderTypeKind, quantity: i64) -> Self {
        Self {
            instrument,
            side,
            kind,
            quantity,
            limit_price: None,
            stop_price: None,
            all_or_none: false,
            good_till_canceled: true,
            on_close: false,
        }
    }

    pub fn market(instrument: impl Into<Instrument>, side: OrderSide, quantity: i64) -> Self {
        Self::base(instrument.into(), side, OrderTypeKind::Market, quantity)
    }

    pub fn limit(
        instrument: impl Into<Instrument>,
        side: OrderSide,
        quantity: i64,
        limit_price: Decimal,
    ) -> Self {
        Self {
            limit_price: Some(limit_price),
            ..Self::base(instrument.into(), side, OrderTypeKind::Limit, quantity)
        }
    }

    pub fn stop(
        instrument: impl Into<Instrument>,
        side: OrderSide,
        quantity: i64,
        stop_price: Decimal,
    ) -> Self {
        Self {
            stop_price: Some(stop_price),
            ..Self::base(instrument.into(), side, OrderTypeKind::Stop, quantity)
        }
    }

    pub fn stop_limit(
        instrument: impl Into<Instrument>,
        side: OrderSide,
        quantity: i64,
        stop_price: Decimal,
        limit_price: Decimal,
    ) -> Self {
        Self {
            stop_price: Some(stop_price),
            limit_price: Some(limit_price),
            ..Self::base(instrument.into(), side, OrderTypeKind::StopLimit, quantity)
        }
    }

    /// Market-on-close: fills at the close of the first eligible bar.
    pub fn market_on_close(
        instrument: impl Into<Instrument>,
        side: OrderSide,
        quantity: i64,
    ) -> Self {
        Self {
            on_close: true,
            ..Self::market(instrument, side, quantity)
        }
    }

    /// Only fill when the whole remaining quantity is available on one bar.
    pub fn all_or_none(mut self, all_or_none: bool) -> Self {
        self.all_or_none = all_or_none;
        self
    }

    pub fn good_till_canceled(mut self, good_till_canceled: bool) -> Self {
        self.good_till_canceled = good_till_canceled;
        self
    }
}

/// Flags carried from the request onto the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OrderFlags {
    pub all_or_none: bool,
    pub good_till_canceled: bool,
    pub on_close: bool,
}

impl Default for OrderFlags {
    fn default() -> Self {
        Self {
            all_or_none: false,
            good_till_canceled: true,
            on_close: false,
        }
    }
}

impl From<&OrderRequest> for OrderFlags {
    fn from(request: &OrderRequest) -> Self {
        Self {
            all_or_none: request.all_or_none,
            good_till_canceled: request.good_till_canceled,
            on_close: request.on_close,
        }
    }
}

/// An order owned by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub instrument: Instrument,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: u64,
    pub filled_quantity: u64,
    /// Volume-weighted price over all fills so far.
    pub avg_fill_price: Option<Decimal>,
    /// Commission charged over all fills so far.
    pub commission: Decimal,
    pub state: OrderState,
    /// Broker time when submitted; `None` if submitted before the first bar.
    pub submitted_at: Option<Timestamp>,
    pub accepted_at: Option<Timestamp>,
    /// STOP_LIMIT only: the stop condition has been met and the order now
    /// behaves as a limit order.
    pub stop_hit: bool,
    pub all_or_none: bool,
    /// Day orders (false) are canceled as expired on the first bar from a
    /// later day than their acceptance.
    pub good_till_canceled: bool,
    /// Market-on-close.
    pub on_close: bool,
}

impl Order {
    pub(crate) fn new(
        id: OrderId,
        instrument: Instrument,
        side: OrderSide,
        order_type: OrderType,
        quantity: u64,
        flags: OrderFlags,
    ) -> Self {
        Self {
            id,
            instrument,
            side,
            order_type,
            quantity,
            filled_quantity: 0,
            avg_fill_price: None,
            commission: Decimal::ZERO,
            state: OrderState::Initial,
            submitted_at: None,
            accepted_at: None,
            stop_hit: false,
            all_or_none: flags.all_or_none,
            good_till_canceled: flags.good_till_canceled,
            on_close: flags.on_close,
        }
    }

    /// A day order accepted on an earlier day than `at`.
    pub fn is_expired_at(&self, at: Timestamp) -> bool {
        !self.good_till_canceled
            && self
                .accepted_at
                .is_some_and(|accepted| accepted.date_naive() < at.date_naive())
    }

    pub fn remaining(&self) -> u64 {
        self.quantity.saturating_sub(self.filled_quantity)
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_filled(&self) -> bool {
        self.state == OrderState::Filled
    }

    pub fn is_buy(&self) -> bool {
        self.side == OrderSide::Buy
    }

    pub fn limit_price(&self) -> Option<Decimal> {
        self.order_type.limit_price()
    }

    pub fn stop_price(&self) -> Option<Decimal> {
        self.order_type.stop_price()
    }

    /// Move to `to`, returning the previous state.
    pub(crate) fn transition(&mut self, to: OrderState) -> Result<OrderState, OrderStateError> {
        let from = self.state;
        match from {
            OrderState::Filled => return Err(OrderStateError::OrderAlreadyFilled(self.id)),
            OrderState::Canceled => return Err(OrderStateError::OrderAlreadyCanceled(self.id)),
            _ => {}
        }
        if !from.can_transition_to(to) {
            return Err(OrderStateError::InvalidTransition {
                id: self.id,
                from,
                to,
            });
        }
        self.state = to;
        Ok(from)
    }

    /// Book a fill against this order and advance its state. Returns the
    /// new state (PartiallyFilled or Filled).
    pub(crate) fn record_fill(
        &mut self,
        quantity: u64,
        price: Decimal,
        commission: Decimal,
    ) -> Result<OrderState, OrderStateError> {
        let remaining = self.remaining();
        if quantity == 0 || quantity > remaining {
            return Err(OrderStateError::Overfill {
                id: self.id,
                requested: quantity,
                remaining,
            });
        }
        let to = if quantity == remaining {
            OrderState::Filled
        } else {
            OrderState::PartiallyFilled
        };
        self.transition(to)?;

        let prev_qty = Decimal::from(self.filled_quantity);
        let fill_qty = Decimal::from(quantity);
        let prev_notional = self.avg_fill_price.unwrap_or(Decimal::ZERO) * prev_qty;
        self.avg_fill_price = Some((prev_notional + price * fill_qty) / (prev_qty + fill_qty));
        self.filled_quantity += quantity;
        self.commission += commission;
        Ok(to)
    }
}
