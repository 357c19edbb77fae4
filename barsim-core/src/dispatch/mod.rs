//! Dispatcher: the scheduler that drives simulated time.
//!
//! Each loop iteration:
//! 1. Register feeds queued since the last round.
//! 2. `t` = min over non-finished subjects of their next time. None ends the run.
//! 3. Dispatch, in priority order (feeds in registration order, broker,
//!    strategy, observers in registration order), every subject whose next
//!    time is `t`. Reactive subjects only become due once feeds publish.
//! 4. Record equity for the round. A dispatch error raised from a hook ends
//!    the run here; otherwise honor any stop request.
//!
//! Subjects are closed on every exit path, errors included.

pub mod context;
pub mod error;
pub mod subject;

pub use context::SimContext;
pub use error::{DispatchError, RunError};
pub use subject::{
    BrokerSubject, FeedSubject, Observer, ObserverSubject, Priority, StrategySubject, Subject,
};

use crate::broker::Broker;
use crate::config::{ConfigError, EngineConfig};
use crate::domain::Timestamp;
use crate::feed::BarFeed;
use crate::portfolio::EquityCurve;
use crate::report::RunReport;
use crate::strategy::Strategy;

/// Result of a completed run.
#[derive(Debug)]
pub struct RunOutcome<S> {
    pub strategy: S,
    pub report: RunReport,
}

pub struct Dispatcher<S: Strategy> {
    ctx: SimContext,
    feeds: Vec<FeedSubject>,
    broker: BrokerSubject,
    strategy: StrategySubject<S>,
    observers: Vec<ObserverSubject>,
    equity: EquityCurve,
    rounds: u64,
}

impl<S: Strategy> Dispatcher<S> {
    pub fn new(broker: Broker, strategy: S) -> Self {
        let equity = EquityCurve::new(broker.initial_equity());
        Self {
            ctx: SimContext::new(broker),
            feeds: Vec::new(),
            broker: BrokerSubject::new(),
            strategy: StrategySubject::new(strategy),
            observers: Vec::new(),
            equity,
            rounds: 0,
        }
    }

    /// Validate `config` and build a dispatcher around a fresh broker.
    pub fn from_config(config: &EngineConfig, strategy: S) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(Broker::new(&config.broker), strategy))
    }

    /// Register a feed. Feeds added together dispatch in the order added.
    pub fn add_feed(&mut self, feed: BarFeed) -> Result<(), DispatchError> {
        self.ctx.try_add_feed(feed)?;
        self.register_pending();
        Ok(())
    }

    pub fn add_observer(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(ObserverSubject::new(observer));
    }

    pub fn broker(&self) -> &Broker {
        self.ctx.broker()
    }

    pub fn context(&self) -> &SimContext {
        &self.ctx
    }

    /// Drive the run to completion.
    pub fn run(mut self) -> Result<RunOutcome<S>, RunError> {
        log::info!(
            "starting run: strategy '{}', {} feed(s), {} observer(s)",
            self.strategy.name(),
            self.feeds.len(),
            self.observers.len()
        );
        let mut result = self.run_loop();
        if result.is_ok() {
            self.strategy.finish(&mut self.ctx);
            if let Some(e) = self.ctx.take_fault() {
                result = Err(e.into());
            }
        }
        self.close();
        let stopped_early = match result {
            Ok(stopped) => stopped,
            Err(e) => {
                log::error!("run aborted after {} rounds: {e}", self.rounds);
                return Err(e);
            }
        };

        let broker = self.ctx.into_broker();
        let strategy = self.strategy.into_inner();
        let report = RunReport::from_run(
            strategy.name(),
            &broker,
            self.equity,
            self.rounds,
            stopped_early,
        );
        log::info!(
            "run finished: {} rounds, {} fills, final equity {}{}",
            report.rounds,
            report.fills.len(),
            report.final_equity,
            if stopped_early { " (stopped early)" } else { "" }
        );
        Ok(RunOutcome { strategy, report })
    }

    /// Returns whether the run stopped on request.
    fn run_loop(&mut self) -> Result<bool, RunError> {
        self.strategy.start(&mut self.ctx);
        loop {
            if let Some(e) = self.ctx.take_fault() {
                return Err(e.into());
            }
            if self.ctx.stop_requested() {
                return Ok(true);
            }
            self.register_pending();
            let Some(t) = self.next_time()? else {
                return Ok(false);
            };
            log::trace!("round {} at {t}", self.rounds);
            self.ctx.begin_round(t);
            self.dispatch_round(t)?;

            let broker = self.ctx.broker();
            self.equity.record(t, broker.cash(), broker.equity());
            self.rounds += 1;
        }
    }

    fn register_pending(&mut self) {
        for feed in self.ctx.take_pending_feeds() {
            log::debug!("registered feed '{}'", feed.name());
            self.feeds.push(FeedSubject::new(feed));
        }
    }

    fn next_time(&mut self) -> Result<Option<Timestamp>, RunError> {
        let Self {
            ctx,
            feeds,
            broker,
            strategy,
            observers,
            ..
        } = self;
        let mut next: Option<Timestamp> = None;
        for subject in ordered(feeds, broker, strategy, observers) {
            if subject.is_finished() {
                continue;
            }
            if let Some(t) = subject.peek_next_time(ctx)? {
                next = Some(next.map_or(t, |n| n.min(t)));
            }
        }
        Ok(next)
    }

    fn dispatch_round(&mut self, t: Timestamp) -> Result<(), RunError> {
        let Self {
            ctx,
            feeds,
            broker,
            strategy,
            observers,
            ..
        } = self;
        for subject in ordered(feeds, broker, strategy, observers) {
            if subject.is_finished() {
                continue;
            }
            if subject.peek_next_time(ctx)? == Some(t) {
                log::trace!("dispatching {:?} '{}' at {t}", subject.priority(), subject.name());
                subject.dispatch(t, ctx)?;
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        let Self {
            ctx,
            feeds,
            broker,
            strategy,
            observers,
            ..
        } = self;
        for subject in ordered(feeds, broker, strategy, observers) {
            subject.close(ctx);
        }
    }
}

/// Every subject in dispatch priority order.
fn ordered<'s, S: Strategy>(
    feeds: &'s mut [FeedSubject],
    broker: &'s mut BrokerSubject,
    strategy: &'s mut StrategySubject<S>,
    observers: &'s mut [ObserverSubject],
) -> Vec<&'s mut dyn Subject> {
    let mut out: Vec<&'s mut dyn Subject> = Vec::with_capacity(feeds.len() + observers.len() + 2);
    out.extend(feeds.iter_mut().map(|f| f as &mut dyn Subject));
    out.push(broker);
    out.push(strategy);
    out.extend(observers.iter_mut().map(|o| o as &mut dyn Subject));
    out
}

/// Run `strategy` over `feeds` with a broker built from `config`.
pub fn run_backtest<S: Strategy>(
    config: &EngineConfig,
    feeds: Vec<BarFeed>,
    strategy: S,
) -> Result<RunOutcome<S>, RunError> {
    let mut dispatcher = Dispatcher::from_config(config, strategy)?;
    for feed in feeds {
        dispatcher.add_feed(feed)?;
    }
    dispatcher.run()
}
