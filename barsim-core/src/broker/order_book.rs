//! Order book: order storage, state transitions and audit trail.
//!
//! The book keeps every order the broker ever accepted, keyed by id so that
//! iteration is submission order. Terminal orders stay for audit; a separate
//! index holds the ids still active so per-bar scans stay proportional to
//! open orders. Each state change is recorded as an [`OrderAuditEntry`].
//!
//! The book does not compute fill prices; that is the fill model's job.

use crate::domain::{Instrument, Order, OrderId, OrderState, OrderStateError, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAuditEntry {
    pub order_id: OrderId,
    pub timestamp: Option<Timestamp>,
    pub from: OrderState,
    pub to: OrderState,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct OrderBook {
    orders: BTreeMap<OrderId, Order>,
    active: BTreeSet<OrderId>,
    audit_trail: Vec<OrderAuditEntry>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new order (in `Initial`) and move it to `Submitted`.
    pub fn submit(&mut self, mut order: Order, at: Option<Timestamp>) -> Result<(), OrderStateError> {
        let id = order.id;
        let from = order.transition(OrderState::Submitted)?;
        order.submitted_at = at;
        self.orders.insert(id, order);
        self.active.insert(id);
        self.record(id, at, from, OrderState::Submitted, "submitted");
        Ok(())
    }

    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: OrderId) -> Option<&mut Order> {
        self.orders.get_mut(&id)
    }

    /// Apply a lifecycle transition (accept / cancel) with an audit entry.
    pub fn transition(
        &mut self,
        id: OrderId,
        to: OrderState,
        at: Option<Timestamp>,
        reason: &str,
    ) -> Result<(), OrderStateError> {
        let order = self
            .orders
            .get_mut(&id)
            .ok_or(OrderStateError::OrderNotFound(id))?;
        let from = order.transition(to)?;
        if to == OrderState::Accepted {
            order.accepted_at = at;
        }
        if to.is_terminal() {
            self.active.remove(&id);
        }
        self.record(id, at, from, to, reason);
        Ok(())
    }

    /// Book a fill. Returns the order's new state.
    pub fn record_fill(
        &mut self,
        id: OrderId,
        quantity: u64,
        price: Decimal,
        commission: Decimal,
        at: Timestamp,
    ) -> Result<OrderState, OrderStateError> {
        let order = self
            .orders
            .get_mut(&id)
            .ok_or(OrderStateError::OrderNotFound(id))?;
        let from = order.state;
        let to = order.record_fill(quantity, price, commission)?;
        if to.is_terminal() {
            self.active.remove(&id);
        }
        self.record(id, Some(at), from, to, "fill");
        Ok(to)
    }

    /// Cancel a non-terminal order.
    pub fn cancel(
        &mut self,
        id: OrderId,
        at: Option<Timestamp>,
        reason: &str,
    ) -> Result<(), OrderStateError> {
        self.transition(id, OrderState::Canceled, at, reason)
    }

    /// Ids of active orders, in submission order.
    pub fn active_ids(&self) -> Vec<OrderId> {
        self.active.iter().copied().collect()
    }

    pub fn active_orders(&self) -> impl Iterator<Item = &Order> {
        self.active.iter().filter_map(|id| self.orders.get(id))
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn active_for<'a>(&'a self, instrument: &'a Instrument) -> impl Iterator<Item = &'a Order> {
        self.active_orders()
            .filter(move |o| &o.instrument == instrument)
    }

    /// Every order, terminal ones included, in submission order.
    pub fn all_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    pub fn audit_trail(&self) -> &[OrderAuditEntry] {
        &self.audit_trail
    }

    fn record(
        &mut self,
        order_id: OrderId,
        timestamp: Option<Timestamp>,
        from: OrderState,
        to: OrderState,
        reason: &str,
    ) {
        self.audit_trail.push(OrderAuditEntry {
            order_id,
            timestamp,
            from,
            to,
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderFlags;
    use crate::domain::{OrderSide, OrderType};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn order(id: u64, symbol: &str) -> Order {
        Order::new(
            OrderId(id),
            Instrument::from(symbol),
            OrderSide::Buy,
            OrderType::Market,
            10,
            OrderFlags::default(),
        )
    }

    #[test]
    fn submit_records_audit() {
        let mut book = OrderBook::new();
        book.submit(order(1, "SPY"), None).unwrap();
        assert_eq!(book.get(OrderId(1)).unwrap().state, OrderState::Submitted);
        let trail = book.audit_trail();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].from, OrderState::Initial);
        assert_eq!(trail[0].to, OrderState::Submitted);
    }

    #[test]
    fn accept_then_fill() {
        let mut book = OrderBook::new();
        let now = Utc::now();
        book.submit(order(1, "SPY"), None).unwrap();
        book.transition(OrderId(1), OrderState::Accepted, Some(now), "bar")
            .unwrap();
        assert_eq!(book.get(OrderId(1)).unwrap().accepted_at, Some(now));

        let state = book
            .record_fill(OrderId(1), 4, dec!(10), Decimal::ZERO, now)
            .unwrap();
        assert_eq!(state, OrderState::PartiallyFilled);
        let state = book
            .record_fill(OrderId(1), 6, dec!(10), Decimal::ZERO, now)
            .unwrap();
        assert_eq!(state, OrderState::Filled);
        assert!(book.active_ids().is_empty());
        assert_eq!(book.audit_trail().len(), 4);
    }

    #[test]
    fn cancel_unknown_order() {
        let mut book = OrderBook::new();
        assert_eq!(
            book.cancel(OrderId(9), None, "user"),
            Err(OrderStateError::OrderNotFound(OrderId(9)))
        );
    }

    #[test]
    fn cancel_twice_reports_already_canceled() {
        let mut book = OrderBook::new();
        book.submit(order(1, "SPY"), None).unwrap();
        book.cancel(OrderId(1), None, "user").unwrap();
        assert_eq!(
            book.cancel(OrderId(1), None, "user"),
            Err(OrderStateError::OrderAlreadyCanceled(OrderId(1)))
        );
    }

    #[test]
    fn active_ids_in_submission_order_and_filtered_by_instrument() {
        let mut book = OrderBook::new();
        book.submit(order(3, "SPY"), None).unwrap();
        book.submit(order(1, "QQQ"), None).unwrap();
        book.submit(order(2, "SPY"), None).unwrap();
        assert_eq!(book.active_ids(), vec![OrderId(1), OrderId(2), OrderId(3)]);

        let spy = Instrument::from("SPY");
        let ids: Vec<OrderId> = book.active_for(&spy).map(|o| o.id).collect();
        assert_eq!(ids, vec![OrderId(2), OrderId(3)]);
        assert_eq!(book.all_orders().count(), 3);
    }

    #[test]
    fn terminal_orders_leave_the_active_index() {
        let mut book = OrderBook::new();
        let now = Utc::now();
        for id in 1..=3 {
            book.submit(order(id, "SPY"), None).unwrap();
        }
        book.cancel(OrderId(2), Some(now), "user").unwrap();
        book.transition(OrderId(3), OrderState::Accepted, Some(now), "bar")
            .unwrap();
        book.record_fill(OrderId(3), 10, dec!(10), Decimal::ZERO, now)
            .unwrap();

        assert_eq!(book.active_count(), 1);
        assert_eq!(book.active_ids(), vec![OrderId(1)]);
        assert_eq!(book.all_orders().count(), 3);

        // Partial fills stay active.
        book.transition(OrderId(1), OrderState::Accepted, Some(now), "bar")
            .unwrap();
        book.record_fill(OrderId(1), 4, dec!(10), Decimal::ZERO, now)
            .unwrap();
        assert_eq!(book.active_ids(), vec![OrderId(1)]);
    }
}
