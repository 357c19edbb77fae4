//! Broker: the execution simulator.
//!
//! The broker is the single owner of cash, positions and orders. It accepts
//! submissions from the strategy, evaluates active orders against each round
//! of bars, books fills and emits order events. Nothing else mutates this
//! state.
//!
//! Per round:
//! 1. Swap in adjusted bars if configured, then record the closes as last
//!    known prices.
//! 2. Snapshot the active order ids (submission order).
//! 3. For each order whose instrument has a bar and whose submission time is
//!    strictly before the bar: accept it if still SUBMITTED, cancel it if it
//!    is a day order from an earlier day, evaluate the fill model, apply
//!    volume limit, slippage (market and stop fills only) and commission,
//!    re-check cash and shares, then book the fill.

pub mod commission;
pub mod fill_model;
pub mod liquidity;
pub mod order_book;
pub mod slippage;
pub mod validation;

pub use commission::{Commission, CommissionConfig, FixedPerTrade, NoCommission, TradePercentage};
pub use fill_model::{check_trigger, TriggerResult};
pub use liquidity::{RemainderPolicy, VolumeLimit};
pub use order_book::{OrderAuditEntry, OrderBook};
pub use slippage::{NoSlippage, Slippage, SlippageConfig, VolumeShareSlippage};
pub use validation::OrderValidationError;

use crate::config::BrokerConfig;
use crate::domain::ids::OrderIdGenerator;
use crate::domain::order::OrderFlags;
use crate::domain::{
    Bar, Bars, Fill, Instrument, Order, OrderId, OrderRequest, OrderSide, OrderState,
    OrderStateError, OrderType, Position, Timestamp,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// What happened to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEventKind {
    Submitted,
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
}

/// Order-updated notification delivered to the strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub kind: OrderEventKind,
    pub timestamp: Option<Timestamp>,
    /// Snapshot of the order right after the change.
    pub order: Order,
    pub fill: Option<Fill>,
}

#[derive(Debug)]
pub struct Broker {
    cash: Decimal,
    initial_equity: Decimal,
    allow_short: bool,
    allow_margin: bool,
    use_adjusted_prices: bool,
    commission: Box<dyn Commission>,
    slippage: Box<dyn Slippage>,
    volume_limit: Option<VolumeLimit>,
    positions: BTreeMap<Instrument, Position>,
    order_book: OrderBook,
    ids: OrderIdGenerator,
    last_prices: HashMap<Instrument, Decimal>,
    current_time: Option<Timestamp>,
    fills: Vec<Fill>,
    events: Vec<OrderEvent>,
    total_commission: Decimal,
}

impl Broker {
    /// Build a broker from configuration. Seeds initial holdings.
    pub fn new(config: &BrokerConfig) -> Self {
        let mut positions = BTreeMap::new();
        let mut holdings_value = Decimal::ZERO;
        for holding in &config.initial_holdings {
            holdings_value += Decimal::from(holding.quantity) * holding.average_cost;
            positions.insert(
                holding.instrument.clone(),
                Position {
                    instrument: holding.instrument.clone(),
                    quantity: holding.quantity,
                    average_cost: holding.average_cost,
                    realized_pnl: Decimal::ZERO,
                },
            );
        }
        Self {
            cash: config.initial_cash,
            initial_equity: config.initial_cash + holdings_value,
            allow_short: config.allow_short,
            allow_margin: config.allow_margin,
            use_adjusted_prices: config.use_adjusted_prices,
            commission: config.commission.build(),
            slippage: config.slippage.build(),
            volume_limit: config.volume_limit,
            positions,
            order_book: OrderBook::new(),
            ids: OrderIdGenerator::new(),
            last_prices: HashMap::new(),
            current_time: None,
            fills: Vec::new(),
            events: Vec::new(),
            total_commission: Decimal::ZERO,
        }
    }

    /// Replace the commission model built from config.
    pub fn with_commission(mut self, commission: Box<dyn Commission>) -> Self {
        self.commission = commission;
        self
    }

    /// Replace the slippage model built from config.
    pub fn with_slippage(mut self, slippage: Box<dyn Slippage>) -> Self {
        self.slippage = slippage;
        self
    }

    // ── Order entry ───────────────────────────────────────────────────

    /// Validate and queue an order. It becomes eligible on the first bar
    /// strictly after the broker's current time.
    pub fn submit_order(&mut self, request: OrderRequest) -> Result<OrderId, OrderValidationError> {
        let (order_type, quantity) = validation::validate_request(&request)?;
        let flags = OrderFlags::from(&request);
        let order = Order::new(
            self.ids.peek(),
            request.instrument,
            request.side,
            order_type,
            quantity,
            flags,
        );

        match order.side {
            OrderSide::Buy if !self.allow_margin => self.check_cash(&order)?,
            OrderSide::Sell if !self.allow_short => self.check_shares(&order)?,
            _ => {}
        }

        let id = self.ids.next_id();
        let at = self.current_time;
        self.order_book
            .submit(order, at)
            .map_err(|e| OrderValidationError::InvalidOrder(e.to_string()))?;
        log::debug!("submitted order {id} at {at:?}");
        self.emit(OrderEventKind::Submitted, id, None);
        Ok(id)
    }

    /// Cancel a non-terminal order.
    pub fn cancel_order(&mut self, id: OrderId) -> Result<(), OrderStateError> {
        self.order_book
            .cancel(id, self.current_time, "canceled by request")?;
        log::debug!("canceled order {id}");
        self.emit(OrderEventKind::Canceled, id, None);
        Ok(())
    }

    fn check_cash(&self, order: &Order) -> Result<(), OrderValidationError> {
        let Some(price) = self.worst_case_price(order) else {
            // No price seen yet; the fill-time check still applies.
            return Ok(());
        };
        let commission = self
            .commission
            .calculate(order, price, order.quantity)
            .max(Decimal::ZERO);
        let required = price * Decimal::from(order.quantity) + commission;
        if required > self.cash {
            return Err(OrderValidationError::InsufficientCash {
                required,
                available: self.cash,
            });
        }
        Ok(())
    }

    fn check_shares(&self, order: &Order) -> Result<(), OrderValidationError> {
        let pending_sells: u64 = self
            .order_book
            .active_for(&order.instrument)
            .filter(|o| o.side == OrderSide::Sell)
            .map(|o| o.remaining())
            .sum();
        let available = self.shares(&order.instrument) - pending_sells as i64;
        if order.quantity as i64 > available {
            return Err(OrderValidationError::InsufficientShares {
                instrument: order.instrument.clone(),
                required: order.quantity,
                available,
            });
        }
        Ok(())
    }

    /// Highest price a buy could plausibly pay, for the submission check.
    fn worst_case_price(&self, order: &Order) -> Option<Decimal> {
        let last = self.last_prices.get(&order.instrument).copied();
        match order.order_type {
            OrderType::Market => last,
            OrderType::Limit { limit_price } | OrderType::StopLimit { limit_price, .. } => {
                Some(limit_price)
            }
            OrderType::Stop { stop_price } => Some(last.map_or(stop_price, |p| p.max(stop_price))),
        }
    }

    // ── Bar processing ────────────────────────────────────────────────

    /// Evaluate every eligible active order against this round's bars.
    ///
    /// Errors here mean the broker's own bookkeeping is inconsistent and are
    /// fatal to the run.
    pub fn on_bars(&mut self, bars: &Bars) -> Result<(), OrderStateError> {
        let adjusted = self.use_adjusted_prices.then(|| bars.adjusted());
        let bars = adjusted.as_ref().unwrap_or(bars);
        let t = bars.timestamp();
        self.current_time = Some(t);
        for bar in bars {
            self.last_prices.insert(bar.instrument.clone(), bar.close);
        }

        let mut volume_used: HashMap<Instrument, u64> = HashMap::new();
        for id in self.order_book.active_ids() {
            let Some(order) = self.order_book.get(id) else {
                continue;
            };
            if !order.is_active() {
                continue;
            }
            let Some(bar) = bars.get(&order.instrument) else {
                continue;
            };
            // Never evaluate an order against the bar it was submitted on.
            if order.submitted_at.is_some_and(|s| bar.timestamp <= s) {
                continue;
            }
            if order.state == OrderState::Submitted {
                self.order_book
                    .transition(id, OrderState::Accepted, Some(t), "accepted on bar")?;
                self.emit(OrderEventKind::Accepted, id, None);
            } else if order.is_expired_at(t) {
                self.order_book.cancel(id, Some(t), "expired")?;
                log::debug!("order {id}: day order expired at {t}");
                self.emit(OrderEventKind::Canceled, id, None);
                continue;
            }
            self.process_order(id, bar, &mut volume_used)?;
        }
        Ok(())
    }

    fn process_order(
        &mut self,
        id: OrderId,
        bar: &Bar,
        volume_used: &mut HashMap<Instrument, u64>,
    ) -> Result<(), OrderStateError> {
        let order = self
            .order_book
            .get(id)
            .cloned()
            .ok_or(OrderStateError::OrderNotFound(id))?;

        let trigger = check_trigger(&order, bar);
        if matches!(order.order_type, OrderType::StopLimit { .. })
            && !order.stop_hit
            && trigger != TriggerResult::NoTrigger
        {
            if let Some(o) = self.order_book.get_mut(id) {
                o.stop_hit = true;
            }
            log::debug!("order {id}: stop hit at {}", bar.timestamp);
        }
        let Some(raw_price) = trigger.fill_price() else {
            return Ok(());
        };

        let remaining = order.remaining();
        let used = volume_used.get(&order.instrument).copied().unwrap_or(0);
        let quantity = match &self.volume_limit {
            Some(limit) => limit.constrain(remaining, bar.volume, used).0,
            None => remaining,
        };
        if quantity == 0 {
            log::debug!("order {id}: no volume left on {}", bar.timestamp);
            return Ok(());
        }
        if order.all_or_none && quantity < remaining {
            log::debug!("order {id}: all-or-none, only {quantity} of {remaining} available");
            return Ok(());
        }

        // Limit prices are a ceiling (buy) or floor (sell); only orders that
        // take liquidity at market pay slippage.
        let price = match order.order_type {
            OrderType::Market | OrderType::Stop { .. } => {
                self.slippage
                    .adjust_price(&order, raw_price, quantity, bar, used)
            }
            OrderType::Limit { .. } | OrderType::StopLimit { .. } => raw_price,
        };
        let commission = self
            .commission
            .calculate(&order, price, quantity)
            .max(Decimal::ZERO);
        let fill = Fill {
            order_id: id,
            instrument: order.instrument.clone(),
            side: order.side,
            price,
            quantity,
            commission,
            timestamp: bar.timestamp,
        };

        let new_cash = self.cash + fill.cash_delta();
        if !self.allow_margin && new_cash < Decimal::ZERO {
            log::debug!("order {id}: not enough cash to fill {quantity} @ {price}");
            return Ok(());
        }
        if !self.allow_short && self.shares(&order.instrument) + fill.share_delta() < 0 {
            log::debug!("order {id}: not enough shares to sell {quantity}");
            return Ok(());
        }

        let state =
            self.order_book
                .record_fill(id, quantity, price, commission, bar.timestamp)?;
        self.cash = new_cash;
        self.total_commission += commission;
        self.positions
            .entry(order.instrument.clone())
            .or_insert_with(|| Position::flat(order.instrument.clone()))
            .apply_fill(order.side, quantity, price);
        *volume_used.entry(order.instrument.clone()).or_insert(0) += quantity;
        self.fills.push(fill.clone());

        log::debug!(
            "filled order {id}: {} {quantity} {} @ {price} (commission {commission})",
            order.side,
            order.instrument
        );
        let kind = if state == OrderState::Filled {
            OrderEventKind::Filled
        } else {
            OrderEventKind::PartiallyFilled
        };
        self.emit(kind, id, Some(fill));

        if state == OrderState::PartiallyFilled
            && self
                .volume_limit
                .is_some_and(|l| l.remainder == RemainderPolicy::Cancel)
        {
            self.order_book.cancel(
                id,
                Some(bar.timestamp),
                "remainder canceled by volume limit",
            )?;
            self.emit(OrderEventKind::Canceled, id, None);
        }
        Ok(())
    }

    fn emit(&mut self, kind: OrderEventKind, id: OrderId, fill: Option<Fill>) {
        if let Some(order) = self.order_book.get(id) {
            self.events.push(OrderEvent {
                kind,
                timestamp: self.current_time,
                order: order.clone(),
                fill,
            });
        }
    }

    /// Drain pending order events, oldest first.
    pub fn take_events(&mut self) -> Vec<OrderEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn has_pending_events(&self) -> bool {
        !self.events.is_empty()
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    /// Cash plus holdings at cost when the broker was built.
    pub fn initial_equity(&self) -> Decimal {
        self.initial_equity
    }

    pub fn allows_short(&self) -> bool {
        self.allow_short
    }

    pub fn allows_margin(&self) -> bool {
        self.allow_margin
    }

    pub fn uses_adjusted_prices(&self) -> bool {
        self.use_adjusted_prices
    }

    pub fn current_time(&self) -> Option<Timestamp> {
        self.current_time
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn position(&self, instrument: &Instrument) -> Option<&Position> {
        self.positions.get(instrument)
    }

    /// Signed share count, zero when no position exists.
    pub fn shares(&self, instrument: &Instrument) -> i64 {
        self.positions.get(instrument).map_or(0, |p| p.quantity)
    }

    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.order_book.get(id)
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.order_book.all_orders()
    }

    pub fn active_orders(&self) -> impl Iterator<Item = &Order> {
        self.order_book.active_orders()
    }

    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    pub fn audit_trail(&self) -> &[OrderAuditEntry] {
        self.order_book.audit_trail()
    }

    pub fn total_commission(&self) -> Decimal {
        self.total_commission
    }

    /// Close of the most recent bar seen for `instrument`.
    pub fn last_price(&self, instrument: &Instrument) -> Option<Decimal> {
        self.last_prices.get(instrument).copied()
    }

    /// Price used to mark a position: last close, or average cost if the
    /// instrument has not traded yet.
    pub fn mark_price(&self, position: &Position) -> Decimal {
        self.last_price(&position.instrument)
            .unwrap_or(position.average_cost)
    }

    /// Mark-to-market value of all positions.
    pub fn market_value(&self) -> Decimal {
        self.positions
            .values()
            .map(|p| p.market_value(self.mark_price(p)))
            .sum()
    }

    /// cash + Σ quantity × mark price
    pub fn equity(&self) -> Decimal {
        self.cash + self.market_value()
    }
}
