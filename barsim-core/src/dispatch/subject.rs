//! Subjects: the closed set of things the dispatcher advances.
//!
//! Feeds produce bars on their own schedule. The broker, the strategy
//! notifier and observers are reactive: they have a pending time only once
//! the feeds have published bars for the current round and they have not
//! handled that round yet.

use super::context::SimContext;
use super::error::RunError;
use crate::domain::{Bars, Timestamp};
use crate::feed::BarFeed;
use crate::strategy::{PositionId, PositionUpdate, Strategy, StrategyContext};

/// Dispatch priority within one timestamp. Lower runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Feed,
    Broker,
    Strategy,
    Observer,
}

pub trait Subject {
    fn name(&self) -> &str;

    fn priority(&self) -> Priority;

    /// Next time this subject wants to be dispatched, if any.
    fn peek_next_time(&mut self, ctx: &SimContext) -> Result<Option<Timestamp>, RunError>;

    fn dispatch(&mut self, t: Timestamp, ctx: &mut SimContext) -> Result<(), RunError>;

    fn is_finished(&self) -> bool;

    /// Release resources. Runs on every termination path.
    fn close(&mut self, _ctx: &mut SimContext) {}
}

/// Time of the current round if bars were published and `last` has not
/// handled it yet.
fn unhandled_round(ctx: &SimContext, last: Option<Timestamp>) -> Option<Timestamp> {
    ctx.round_bars()
        .map(Bars::timestamp)
        .filter(|&t| Some(t) != last)
}

// ── Feed ──

#[derive(Debug)]
pub struct FeedSubject {
    feed: BarFeed,
}

impl FeedSubject {
    pub fn new(feed: BarFeed) -> Self {
        Self { feed }
    }

    pub fn feed(&self) -> &BarFeed {
        &self.feed
    }
}

impl Subject for FeedSubject {
    fn name(&self) -> &str {
        self.feed.name()
    }

    fn priority(&self) -> Priority {
        Priority::Feed
    }

    fn peek_next_time(&mut self, _ctx: &SimContext) -> Result<Option<Timestamp>, RunError> {
        Ok(self.feed.peek_next_time()?)
    }

    fn dispatch(&mut self, t: Timestamp, ctx: &mut SimContext) -> Result<(), RunError> {
        if let Some(bars) = self.feed.next_bars()? {
            debug_assert_eq!(bars.timestamp(), t);
            log::trace!("feed '{}' published {} bars at {t}", self.feed.name(), bars.len());
            ctx.publish(bars);
        }
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.feed.is_finished()
    }

    fn close(&mut self, _ctx: &mut SimContext) {
        self.feed.close();
    }
}

// ── Broker ──

/// Runs the broker's fill pass over each round's bars.
#[derive(Debug, Default)]
pub struct BrokerSubject {
    last: Option<Timestamp>,
}

impl BrokerSubject {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Subject for BrokerSubject {
    fn name(&self) -> &str {
        "broker"
    }

    fn priority(&self) -> Priority {
        Priority::Broker
    }

    fn peek_next_time(&mut self, ctx: &SimContext) -> Result<Option<Timestamp>, RunError> {
        Ok(unhandled_round(ctx, self.last))
    }

    fn dispatch(&mut self, t: Timestamp, ctx: &mut SimContext) -> Result<(), RunError> {
        ctx.settle_round()?;
        self.last = Some(t);
        Ok(())
    }

    fn is_finished(&self) -> bool {
        false
    }
}

// ── Strategy ──

/// Delivers order events and bars to the strategy.
#[derive(Debug)]
pub struct StrategySubject<S> {
    strategy: S,
    last: Option<Timestamp>,
}

impl<S: Strategy> StrategySubject<S> {
    pub fn new(strategy: S) -> Self {
        Self {
            strategy,
            last: None,
        }
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn into_inner(self) -> S {
        self.strategy
    }

    pub(crate) fn start(&mut self, ctx: &mut SimContext) {
        let mut sctx = StrategyContext::new(ctx);
        self.strategy.on_start(&mut sctx);
    }

    pub(crate) fn finish(&mut self, ctx: &mut SimContext) {
        let mut sctx = StrategyContext::new(ctx);
        self.deliver_events(&mut sctx);
        self.strategy.on_finish(&mut sctx);
    }

    fn notify_position(
        &mut self,
        ctx: &mut StrategyContext<'_>,
        id: PositionId,
        update: PositionUpdate,
    ) {
        let Some(position) = ctx.position(id).cloned() else {
            return;
        };
        match update {
            PositionUpdate::EnterOk => self.strategy.on_enter_ok(ctx, &position),
            PositionUpdate::EnterCanceled => self.strategy.on_enter_canceled(ctx, &position),
            PositionUpdate::ExitOk => self.strategy.on_exit_ok(ctx, &position),
            PositionUpdate::ExitCanceled => self.strategy.on_exit_canceled(ctx, &position),
        }
    }

    /// Drain broker events until none are left. Hooks may cause more.
    fn deliver_events(&mut self, ctx: &mut StrategyContext<'_>) {
        loop {
            let events = ctx.take_events();
            if events.is_empty() {
                break;
            }
            for event in &events {
                let update = ctx.track_position(event);
                self.strategy.on_order_updated(ctx, event);
                if let Some((id, update)) = update {
                    self.notify_position(ctx, id, update);
                }
            }
        }
    }
}

impl<S: Strategy> Subject for StrategySubject<S> {
    fn name(&self) -> &str {
        self.strategy.name()
    }

    fn priority(&self) -> Priority {
        Priority::Strategy
    }

    fn peek_next_time(&mut self, ctx: &SimContext) -> Result<Option<Timestamp>, RunError> {
        Ok(unhandled_round(ctx, self.last))
    }

    fn dispatch(&mut self, t: Timestamp, ctx: &mut SimContext) -> Result<(), RunError> {
        self.last = Some(t);
        let Some(bars) = ctx.round_bars().cloned() else {
            return Ok(());
        };
        let mut sctx = StrategyContext::new(ctx);
        self.deliver_events(&mut sctx);
        self.strategy.on_bars(&mut sctx, &bars);
        self.deliver_events(&mut sctx);
        Ok(())
    }

    fn is_finished(&self) -> bool {
        false
    }
}

// ── Observers ──

/// Read-only hook run after the strategy each round. May request a stop.
pub trait Observer {
    fn name(&self) -> &str {
        "observer"
    }

    fn on_round(&mut self, ctx: &mut SimContext, bars: &Bars);

    /// Called when the run ends, however it ends.
    fn on_close(&mut self, _ctx: &SimContext) {}
}

pub struct ObserverSubject {
    observer: Box<dyn Observer>,
    last: Option<Timestamp>,
}

impl ObserverSubject {
    pub fn new(observer: Box<dyn Observer>) -> Self {
        Self {
            observer,
            last: None,
        }
    }
}

impl std::fmt::Debug for ObserverSubject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSubject")
            .field("name", &self.observer.name())
            .field("last", &self.last)
            .finish()
    }
}

impl Subject for ObserverSubject {
    fn name(&self) -> &str {
        self.observer.name()
    }

    fn priority(&self) -> Priority {
        Priority::Observer
    }

    fn peek_next_time(&mut self, ctx: &SimContext) -> Result<Option<Timestamp>, RunError> {
        Ok(unhandled_round(ctx, self.last))
    }

    fn dispatch(&mut self, t: Timestamp, ctx: &mut SimContext) -> Result<(), RunError> {
        self.last = Some(t);
        if let Some(bars) = ctx.round_bars().cloned() {
            self.observer.on_round(ctx, &bars);
        }
        Ok(())
    }

    fn is_finished(&self) -> bool {
        false
    }

    fn close(&mut self, ctx: &mut SimContext) {
        self.observer.on_close(ctx);
    }
}
