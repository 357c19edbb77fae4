//! Strategy-level positions.
//!
//! A position is one round trip as the strategy sees it: an entry order, at
//! most one active exit order, and the shares those orders moved. It is
//! bookkeeping layered over the broker's order events; the broker's
//! per-instrument [`Position`](crate::domain::Position) stays the source of
//! truth for holdings, and several strategy positions may share an instrument.
//!
//! ```text
//! WaitingEntry ──(entry fill)──► Open ──(exit fills to flat)──► Closed
//!      └──────(entry canceled, nothing filled)────────────────► Closed
//! ```

use crate::broker::{OrderEvent, OrderEventKind, OrderValidationError};
use crate::domain::{Instrument, OrderId, OrderRequest, OrderSide, OrderStateError, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionId(pub u64);

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    WaitingEntry,
    Open,
    Closed,
}

/// Which position hook an order event resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionUpdate {
    EnterOk,
    EnterCanceled,
    ExitOk,
    ExitCanceled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("position {0} not found")]
    NotFound(PositionId),

    #[error("position {0} is already closed")]
    Closed(PositionId),

    #[error("position {0} already has an active exit order")]
    ExitActive(PositionId),

    #[error(transparent)]
    Rejected(#[from] OrderValidationError),

    #[error(transparent)]
    Cancel(#[from] OrderStateError),
}

/// How to leave a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOrder {
    Market,
    MarketOnClose,
    Limit(Decimal),
    Stop(Decimal),
    StopLimit { stop: Decimal, limit: Decimal },
}

impl ExitOrder {
    fn request(self, instrument: Instrument, side: OrderSide, quantity: i64) -> OrderRequest {
        match self {
            ExitOrder::Market => OrderRequest::market(instrument, side, quantity),
            ExitOrder::MarketOnClose => OrderRequest::market_on_close(instrument, side, quantity),
            ExitOrder::Limit(limit) => OrderRequest::limit(instrument, side, quantity, limit),
            ExitOrder::Stop(stop) => OrderRequest::stop(instrument, side, quantity, stop),
            ExitOrder::StopLimit { stop, limit } => {
                OrderRequest::stop_limit(instrument, side, quantity, stop, limit)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyPosition {
    pub id: PositionId,
    pub instrument: Instrument,
    pub side: PositionSide,
    pub status: PositionStatus,
    pub entry_order: OrderId,
    pub exit_order: Option<OrderId>,
    /// Signed shares moved by this position's fills.
    pub shares: i64,
    /// Net cash from entry and exit fills, commissions included.
    pub cash_flow: Decimal,
    pub entry_price: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    /// Inherited by exit orders.
    pub good_till_canceled: bool,
    pub opened_at: Option<Timestamp>,
    pub closed_at: Option<Timestamp>,
    entry_active: bool,
    exit_active: bool,
}

impl StrategyPosition {
    pub fn is_open(&self) -> bool {
        self.status != PositionStatus::Closed
    }

    pub fn entry_active(&self) -> bool {
        self.entry_active
    }

    pub fn exit_active(&self) -> bool {
        self.exit_active
    }

    /// Profit so far with the remaining shares marked at `price`.
    pub fn pnl(&self, price: Decimal) -> Decimal {
        self.cash_flow + Decimal::from(self.shares) * price
    }

    /// The order that takes this position flat, or `None` when it holds no
    /// shares.
    pub(crate) fn exit_request(&self, exit: ExitOrder) -> Option<OrderRequest> {
        let side = match self.shares {
            0 => return None,
            s if s > 0 => OrderSide::Sell,
            _ => OrderSide::Buy,
        };
        let request = exit.request(self.instrument.clone(), side, self.shares.saturating_abs());
        Some(request.good_till_canceled(self.good_till_canceled))
    }
}

/// Every position opened during a run, with an index from live order ids
/// back to their position.
#[derive(Debug, Default)]
pub(crate) struct PositionBook {
    positions: BTreeMap<PositionId, StrategyPosition>,
    by_order: HashMap<OrderId, PositionId>,
    next_id: u64,
}

impl PositionBook {
    pub fn open(&mut self, entry_order: OrderId, request: &OrderRequest) -> PositionId {
        self.next_id += 1;
        let id = PositionId(self.next_id);
        let side = match request.side {
            OrderSide::Buy => PositionSide::Long,
            OrderSide::Sell => PositionSide::Short,
        };
        self.positions.insert(
            id,
            StrategyPosition {
                id,
                instrument: request.instrument.clone(),
                side,
                status: PositionStatus::WaitingEntry,
                entry_order,
                exit_order: None,
                shares: 0,
                cash_flow: Decimal::ZERO,
                entry_price: None,
                exit_price: None,
                good_till_canceled: request.good_till_canceled,
                opened_at: None,
                closed_at: None,
                entry_active: true,
                exit_active: false,
            },
        );
        self.by_order.insert(entry_order, id);
        log::debug!("opened position {id} with entry order {entry_order}");
        id
    }

    pub fn get(&self, id: PositionId) -> Option<&StrategyPosition> {
        self.positions.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StrategyPosition> {
        self.positions.values()
    }

    pub fn set_exit(&mut self, id: PositionId, exit_order: OrderId) {
        if let Some(position) = self.positions.get_mut(&id) {
            position.exit_order = Some(exit_order);
            position.exit_active = true;
            self.by_order.insert(exit_order, id);
        }
    }

    /// Fold an order event into its position, if it belongs to one.
    pub fn on_order_event(&mut self, event: &OrderEvent) -> Option<(PositionId, PositionUpdate)> {
        let order = &event.order;
        let id = *self.by_order.get(&order.id)?;
        let position = self.positions.get_mut(&id)?;
        let is_entry = position.entry_order == order.id;

        if let Some(fill) = &event.fill {
            position.shares += fill.share_delta();
            position.cash_flow += fill.cash_delta();
            if is_entry {
                position.entry_price = order.avg_fill_price;
                position.opened_at.get_or_insert(fill.timestamp);
            } else {
                position.exit_price = order.avg_fill_price;
            }
        }
        if order.is_terminal() {
            self.by_order.remove(&order.id);
            if is_entry {
                position.entry_active = false;
            } else {
                position.exit_active = false;
            }
        }

        let update = match (is_entry, event.kind) {
            (true, OrderEventKind::PartiallyFilled | OrderEventKind::Filled)
                if position.status == PositionStatus::WaitingEntry =>
            {
                position.status = PositionStatus::Open;
                PositionUpdate::EnterOk
            }
            (true, OrderEventKind::Canceled) if position.status == PositionStatus::WaitingEntry => {
                if position.shares == 0 {
                    position.status = PositionStatus::Closed;
                    position.closed_at = event.timestamp;
                    PositionUpdate::EnterCanceled
                } else {
                    position.status = PositionStatus::Open;
                    PositionUpdate::EnterOk
                }
            }
            (false, OrderEventKind::PartiallyFilled | OrderEventKind::Filled)
                if position.shares == 0 =>
            {
                position.status = PositionStatus::Closed;
                position.closed_at = event.timestamp;
                PositionUpdate::ExitOk
            }
            (false, OrderEventKind::Canceled) => PositionUpdate::ExitCanceled,
            _ => return None,
        };
        log::debug!("position {id}: {update:?}");
        Some((id, update))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::domain::{Bar, Bars};
    use crate::Broker;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn round(day: i64, price: Decimal) -> Bars {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(day);
        let mut bars = Bars::new(t);
        bars.push(Bar {
            instrument: Instrument::from("SPY"),
            timestamp: t,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 1_000,
            adj_close: price,
        });
        bars
    }

    fn feed_events(
        book: &mut PositionBook,
        broker: &mut Broker,
    ) -> Vec<(PositionId, PositionUpdate)> {
        broker
            .take_events()
            .iter()
            .filter_map(|e| book.on_order_event(e))
            .collect()
    }

    #[test]
    fn long_round_trip() {
        let mut broker = Broker::new(&BrokerConfig::with_cash(dec!(10000)));
        let mut book = PositionBook::default();

        let request = OrderRequest::market("SPY", OrderSide::Buy, 10);
        let entry = broker.submit_order(request.clone()).unwrap();
        let id = book.open(entry, &request);
        broker.on_bars(&round(0, dec!(100))).unwrap();
        assert_eq!(
            feed_events(&mut book, &mut broker),
            vec![(id, PositionUpdate::EnterOk)]
        );
        let position = book.get(id).unwrap();
        assert_eq!(position.status, PositionStatus::Open);
        assert_eq!(position.shares, 10);
        assert_eq!(position.entry_price, Some(dec!(100)));
        assert!(!position.entry_active());

        let exit = position.exit_request(ExitOrder::Market).unwrap();
        assert_eq!(exit.side, OrderSide::Sell);
        assert_eq!(exit.quantity, 10);
        let exit_id = broker.submit_order(exit).unwrap();
        book.set_exit(id, exit_id);
        broker.on_bars(&round(1, dec!(104))).unwrap();
        assert_eq!(
            feed_events(&mut book, &mut broker),
            vec![(id, PositionUpdate::ExitOk)]
        );

        let position = book.get(id).unwrap();
        assert!(!position.is_open());
        assert_eq!(position.exit_price, Some(dec!(104)));
        assert_eq!(position.pnl(dec!(0)), dec!(40));
    }

    #[test]
    fn canceled_entry_closes_the_position() {
        let mut broker = Broker::new(&BrokerConfig::with_cash(dec!(10000)));
        let mut book = PositionBook::default();
        let request = OrderRequest::limit("SPY", OrderSide::Buy, 10, dec!(50));
        let entry = broker.submit_order(request.clone()).unwrap();
        let id = book.open(entry, &request);

        broker.cancel_order(entry).unwrap();
        assert_eq!(
            feed_events(&mut book, &mut broker),
            vec![(id, PositionUpdate::EnterCanceled)]
        );
        assert_eq!(book.get(id).unwrap().status, PositionStatus::Closed);
        assert!(book.get(id).unwrap().exit_request(ExitOrder::Market).is_none());
    }

    #[test]
    fn short_exit_buys_back() {
        let mut book = PositionBook::default();
        let request = OrderRequest::market("SPY", OrderSide::Sell, 5).good_till_canceled(false);
        let id = book.open(OrderId(1), &request);
        let position = book.positions.get_mut(&id).unwrap();
        position.shares = -5;

        let exit = book
            .get(id)
            .unwrap()
            .exit_request(ExitOrder::Limit(dec!(9)))
            .unwrap();
        assert_eq!(exit.side, OrderSide::Buy);
        assert_eq!(exit.quantity, 5);
        assert_eq!(exit.limit_price, Some(dec!(9)));
        assert!(!exit.good_till_canceled);
        assert_eq!(book.get(id).unwrap().side, PositionSide::Short);
    }

    #[test]
    fn events_for_untracked_orders_are_ignored() {
        let mut broker = Broker::new(&BrokerConfig::with_cash(dec!(10000)));
        let mut book = PositionBook::default();
        broker
            .submit_order(OrderRequest::market("SPY", OrderSide::Buy, 1))
            .unwrap();
        broker.on_bars(&round(0, dec!(10))).unwrap();
        assert!(feed_events(&mut book, &mut broker).is_empty());
        assert_eq!(book.iter().count(), 0);
    }
}
