//! Strategy hook surface.
//!
//! The dispatcher calls into a [`Strategy`] once per round, after the broker
//! has settled the round's fills, so a strategy only ever sees a settled
//! market and broker state. Orders may be submitted or canceled only from
//! inside hooks, through the [`StrategyContext`].
//!
//! Strategies can trade raw orders or go through [`position`] helpers
//! (`enter_long`, `exit_position`, ...) and react to the `on_enter_*` and
//! `on_exit_*` hooks.

pub mod position;

pub use position::{
    ExitOrder, PositionError, PositionId, PositionSide, PositionStatus, PositionUpdate,
    StrategyPosition,
};

use crate::broker::{Broker, OrderEvent, OrderValidationError};
use crate::dispatch::{DispatchError, SimContext};
use crate::domain::{
    Bar, Bars, Instrument, OrderId, OrderRequest, OrderSide, OrderStateError, Timestamp,
};
use crate::feed::BarFeed;
use crate::portfolio::PortfolioView;
use rust_decimal::Decimal;

pub trait Strategy {
    fn name(&self) -> &str {
        "strategy"
    }

    /// Called once before the first round.
    fn on_start(&mut self, _ctx: &mut StrategyContext<'_>) {}

    /// Called once per round with every bar published at that time.
    fn on_bars(&mut self, ctx: &mut StrategyContext<'_>, bars: &Bars);

    /// Called for every order state change, oldest first.
    fn on_order_updated(&mut self, _ctx: &mut StrategyContext<'_>, _event: &OrderEvent) {}

    /// The entry order of a position filled, fully or in part.
    fn on_enter_ok(&mut self, _ctx: &mut StrategyContext<'_>, _position: &StrategyPosition) {}

    /// The entry order was canceled before anything filled; the position
    /// is closed.
    fn on_enter_canceled(&mut self, _ctx: &mut StrategyContext<'_>, _position: &StrategyPosition) {
    }

    /// The exit order took the position flat.
    fn on_exit_ok(&mut self, _ctx: &mut StrategyContext<'_>, _position: &StrategyPosition) {}

    /// The exit order was canceled; the position stays open.
    fn on_exit_canceled(&mut self, _ctx: &mut StrategyContext<'_>, _position: &StrategyPosition) {}

    /// Called once after the last round, including after an early stop.
    fn on_finish(&mut self, _ctx: &mut StrategyContext<'_>) {}
}

impl<S: Strategy + ?Sized> Strategy for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn on_start(&mut self, ctx: &mut StrategyContext<'_>) {
        (**self).on_start(ctx)
    }

    fn on_bars(&mut self, ctx: &mut StrategyContext<'_>, bars: &Bars) {
        (**self).on_bars(ctx, bars)
    }

    fn on_order_updated(&mut self, ctx: &mut StrategyContext<'_>, event: &OrderEvent) {
        (**self).on_order_updated(ctx, event)
    }

    fn on_enter_ok(&mut self, ctx: &mut StrategyContext<'_>, position: &StrategyPosition) {
        (**self).on_enter_ok(ctx, position)
    }

    fn on_enter_canceled(&mut self, ctx: &mut StrategyContext<'_>, position: &StrategyPosition) {
        (**self).on_enter_canceled(ctx, position)
    }

    fn on_exit_ok(&mut self, ctx: &mut StrategyContext<'_>, position: &StrategyPosition) {
        (**self).on_exit_ok(ctx, position)
    }

    fn on_exit_canceled(&mut self, ctx: &mut StrategyContext<'_>, position: &StrategyPosition) {
        (**self).on_exit_canceled(ctx, position)
    }

    fn on_finish(&mut self, ctx: &mut StrategyContext<'_>) {
        (**self).on_finish(ctx)
    }
}

/// What a strategy may see and do during a hook.
pub struct StrategyContext<'a> {
    sim: &'a mut SimContext,
}

impl<'a> StrategyContext<'a> {
    pub(crate) fn new(sim: &'a mut SimContext) -> Self {
        Self { sim }
    }

    // ── Orders ──

    pub fn submit_order(&mut self, request: OrderRequest) -> Result<OrderId, OrderValidationError> {
        let result = self.sim.broker_mut().submit_order(request);
        if let Err(e) = &result {
            log::debug!("order rejected: {e}");
        }
        result
    }

    pub fn cancel_order(&mut self, id: OrderId) -> Result<(), OrderStateError> {
        self.sim.broker_mut().cancel_order(id)
    }

    /// Positive quantity buys, negative sells.
    pub fn market_order(
        &mut self,
        instrument: impl Into<Instrument>,
        quantity: i64,
    ) -> Result<OrderId, OrderValidationError> {
        let (side, qty) = split_quantity(quantity);
        self.submit_order(OrderRequest::market(instrument, side, qty))
    }

    pub fn limit_order(
        &mut self,
        instrument: impl Into<Instrument>,
        quantity: i64,
        limit_price: Decimal,
    ) -> Result<OrderId, OrderValidationError> {
        let (side, qty) = split_quantity(quantity);
        self.submit_order(OrderRequest::limit(instrument, side, qty, limit_price))
    }

    pub fn stop_order(
        &mut self,
        instrument: impl Into<Instrument>,
        quantity: i64,
        stop_price: Decimal,
    ) -> Result<OrderId, OrderValidationError> {
        let (side, qty) = split_quantity(quantity);
        self.submit_order(OrderRequest::stop(instrument, side, qty, stop_price))
    }

    pub fn stop_limit_order(
        &mut self,
        instrument: impl Into<Instrument>,
        quantity: i64,
        stop_price: Decimal,
        limit_price: Decimal,
    ) -> Result<OrderId, OrderValidationError> {
        let (side, qty) = split_quantity(quantity);
        self.submit_order(OrderRequest::stop_limit(
            instrument,
            side,
            qty,
            stop_price,
            limit_price,
        ))
    }

    // ── Positions ──

    /// Submit `request` as the entry order of a new position. A buy opens a
    /// long position, a sell a short one.
    pub fn enter(&mut self, request: OrderRequest) -> Result<PositionId, OrderValidationError> {
        let entry = self.submit_order(request.clone())?;
        Ok(self.sim.positions_mut().open(entry, &request))
    }

    pub fn enter_long(
        &mut self,
        instrument: impl Into<Instrument>,
        quantity: i64,
    ) -> Result<PositionId, OrderValidationError> {
        self.enter(OrderRequest::market(instrument, OrderSide::Buy, quantity))
    }

    pub fn enter_short(
        &mut self,
        instrument: impl Into<Instrument>,
        quantity: i64,
    ) -> Result<PositionId, OrderValidationError> {
        self.enter(OrderRequest::market(instrument, OrderSide::Sell, quantity))
    }

    pub fn enter_long_limit(
        &mut self,
        instrument: impl Into<Instrument>,
        quantity: i64,
        limit_price: Decimal,
    ) -> Result<PositionId, OrderValidationError> {
        self.enter(OrderRequest::limit(
            instrument,
            OrderSide::Buy,
            quantity,
            limit_price,
        ))
    }

    pub fn enter_short_limit(
        &mut self,
        instrument: impl Into<Instrument>,
        quantity: i64,
        limit_price: Decimal,
    ) -> Result<PositionId, OrderValidationError> {
        self.enter(OrderRequest::limit(
            instrument,
            OrderSide::Sell,
            quantity,
            limit_price,
        ))
    }

    pub fn enter_long_stop(
        &mut self,
        instrument: impl Into<Instrument>,
        quantity: i64,
        stop_price: Decimal,
    ) -> Result<PositionId, OrderValidationError> {
        self.enter(OrderRequest::stop(instrument, OrderSide::Buy, quantity, stop_price))
    }

    pub fn enter_short_stop(
        &mut self,
        instrument: impl Into<Instrument>,
        quantity: i64,
        stop_price: Decimal,
    ) -> Result<PositionId, OrderValidationError> {
        self.enter(OrderRequest::stop(instrument, OrderSide::Sell, quantity, stop_price))
    }

    /// Leave a position. A still-active entry order is canceled first; the
    /// exit order covers the shares held now, so `Ok(None)` means nothing
    /// had filled and no exit order was needed.
    pub fn exit_position(
        &mut self,
        id: PositionId,
        exit: ExitOrder,
    ) -> Result<Option<OrderId>, PositionError> {
        let position = self
            .sim
            .positions()
            .get(id)
            .cloned()
            .ok_or(PositionError::NotFound(id))?;
        if !position.is_open() {
            return Err(PositionError::Closed(id));
        }
        if position.exit_active() {
            return Err(PositionError::ExitActive(id));
        }
        if position.entry_active() {
            self.cancel_order(position.entry_order)?;
        }
        let Some(request) = position.exit_request(exit) else {
            return Ok(None);
        };
        let order = self.submit_order(request)?;
        self.sim.positions_mut().set_exit(id, order);
        Ok(Some(order))
    }

    pub fn position(&self, id: PositionId) -> Option<&StrategyPosition> {
        self.sim.positions().get(id)
    }

    /// Positions not yet closed, oldest first.
    pub fn open_positions(&self) -> impl Iterator<Item = &StrategyPosition> {
        self.sim.positions().iter().filter(|p| p.is_open())
    }

    // ── State ──

    pub fn broker(&self) -> &Broker {
        self.sim.broker()
    }

    pub fn portfolio(&self) -> PortfolioView<'_> {
        PortfolioView::new(self.sim.broker())
    }

    /// Signed shares held in `instrument`.
    pub fn shares(&self, instrument: &Instrument) -> i64 {
        self.sim.broker().shares(instrument)
    }

    pub fn current_time(&self) -> Option<Timestamp> {
        self.sim.current_time()
    }

    pub fn last_bar(&self, instrument: &Instrument) -> Option<&Bar> {
        self.sim.last_bar(instrument)
    }

    // ── Control ──

    /// End the run after the current round.
    pub fn stop(&mut self) {
        self.sim.request_stop();
    }

    /// Register another feed; it starts at the next loop iteration.
    ///
    /// A feed that would fire at or before the current time, or that serves
    /// an instrument already served, ends the run with that
    /// [`DispatchError`] after the current round. Returns whether the feed
    /// was queued.
    pub fn add_feed(&mut self, feed: BarFeed) -> bool {
        self.sim.add_feed(feed)
    }

    /// The dispatch error that will end the run, if one was raised.
    pub fn dispatch_fault(&self) -> Option<&DispatchError> {
        self.sim.fault()
    }

    pub(crate) fn take_events(&mut self) -> Vec<OrderEvent> {
        self.sim.broker_mut().take_events()
    }

    pub(crate) fn track_position(
        &mut self,
        event: &OrderEvent,
    ) -> Option<(PositionId, PositionUpdate)> {
        self.sim.positions_mut().on_order_event(event)
    }
}

fn split_quantity(quantity: i64) -> (OrderSide, i64) {
    if quantity < 0 {
        (OrderSide::Sell, quantity.saturating_abs())
    } else {
        (OrderSide::Buy, quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use rust_decimal_macros::dec;

    #[test]
    fn signed_quantity_picks_side() {
        assert_eq!(split_quantity(10), (OrderSide::Buy, 10));
        assert_eq!(split_quantity(-3), (OrderSide::Sell, 3));
        assert_eq!(split_quantity(0), (OrderSide::Buy, 0));
    }

    #[test]
    fn helpers_submit_through_broker() {
        let config = BrokerConfig {
            allow_short: true,
            ..BrokerConfig::with_cash(dec!(10000))
        };
        let mut sim = SimContext::new(Broker::new(&config));
        let mut ctx = StrategyContext::new(&mut sim);

        let buy = ctx.limit_order("SPY", 5, dec!(95)).unwrap();
        let sell = ctx.stop_order("SPY", -2, dec!(90)).unwrap();
        assert!(ctx.market_order("SPY", 0).is_err());

        let broker = ctx.broker();
        assert_eq!(broker.order(buy).unwrap().side, OrderSide::Buy);
        assert_eq!(broker.order(sell).unwrap().side, OrderSide::Sell);
        assert_eq!(broker.order(sell).unwrap().quantity, 2);

        ctx.cancel_order(buy).unwrap();
        assert_eq!(ctx.take_events().len(), 3);
    }

    #[test]
    fn exit_before_entry_fills_cancels_the_entry() {
        let mut sim = SimContext::new(Broker::new(&BrokerConfig::with_cash(dec!(10000))));
        let mut ctx = StrategyContext::new(&mut sim);

        let id = ctx.enter_long_limit("SPY", 5, dec!(90)).unwrap();
        assert_eq!(ctx.position(id).unwrap().side, PositionSide::Long);
        assert_eq!(ctx.exit_position(id, ExitOrder::Market), Ok(None));

        let entry = ctx.position(id).unwrap().entry_order;
        assert!(ctx.broker().order(entry).unwrap().is_terminal());

        let updates: Vec<_> = ctx
            .take_events()
            .iter()
            .filter_map(|e| ctx.track_position(e))
            .collect();
        assert_eq!(updates, vec![(id, PositionUpdate::EnterCanceled)]);
        assert_eq!(ctx.open_positions().count(), 0);
        assert_eq!(
            ctx.exit_position(id, ExitOrder::Market),
            Err(PositionError::Closed(id))
        );
        assert_eq!(
            ctx.exit_position(PositionId(42), ExitOrder::Market),
            Err(PositionError::NotFound(PositionId(42)))
        );
    }

    #[test]
    fn stop_sets_flag() {
        let mut sim = SimContext::new(Broker::new(&BrokerConfig::default()));
        StrategyContext::new(&mut sim).stop();
        assert!(sim.stop_requested());
    }
}
