//! Sample strategies selectable from a backtest config.

use std::collections::{HashMap, HashSet, VecDeque};

use barsim_core::domain::{Bars, Instrument, OrderId};
use barsim_core::{OrderEvent, Strategy, StrategyContext};
use rust_decimal::Decimal;

use crate::config::StrategyConfig;

/// Build the strategy a config names.
pub fn build_strategy(config: &StrategyConfig) -> Box<dyn Strategy> {
    match *config {
        StrategyConfig::BuyAndHold { quantity } => Box::new(BuyAndHold::new(quantity)),
        StrategyConfig::SmaCrossover {
            fast,
            slow,
            quantity,
        } => Box::new(SmaCrossover::new(fast, slow, quantity)),
    }
}

/// Orders a strategy is still waiting on, by instrument.
#[derive(Debug, Default)]
struct PendingOrders {
    by_instrument: HashMap<Instrument, OrderId>,
}

impl PendingOrders {
    fn is_pending(&self, instrument: &Instrument) -> bool {
        self.by_instrument.contains_key(instrument)
    }

    fn insert(&mut self, instrument: Instrument, id: OrderId) {
        self.by_instrument.insert(instrument, id);
    }

    fn update(&mut self, event: &OrderEvent) {
        if event.order.is_terminal()
            && self.by_instrument.get(&event.order.instrument) == Some(&event.order.id)
        {
            self.by_instrument.remove(&event.order.instrument);
        }
    }
}

// ─── Buy and hold ───────────────────────────────────────────────────

#[derive(Debug)]
pub struct BuyAndHold {
    quantity: i64,
    entered: HashSet<Instrument>,
}

impl BuyAndHold {
    pub fn new(quantity: i64) -> Self {
        Self {
            quantity,
            entered: HashSet::new(),
        }
    }
}

impl Strategy for BuyAndHold {
    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn on_bars(&mut self, ctx: &mut StrategyContext<'_>, bars: &Bars) {
        for bar in bars {
            if self.entered.contains(&bar.instrument) {
                continue;
            }
            match ctx.market_order(bar.instrument.clone(), self.quantity) {
                Ok(_) => {
                    self.entered.insert(bar.instrument.clone());
                }
                Err(e) => log::info!("{}: entry rejected: {e}", bar.instrument),
            }
        }
    }
}

// ─── SMA crossover ──────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SmaState {
    closes: VecDeque<Decimal>,
    fast_above: Option<bool>,
}

/// Long when the fast close average is above the slow one, flat otherwise.
/// Acts only on the bar where the relation flips.
#[derive(Debug)]
pub struct SmaCrossover {
    fast: usize,
    slow: usize,
    quantity: i64,
    state: HashMap<Instrument, SmaState>,
    pending: PendingOrders,
}

impl SmaCrossover {
    pub fn new(fast: usize, slow: usize, quantity: i64) -> Self {
        Self {
            fast,
            slow,
            quantity,
            state: HashMap::new(),
            pending: PendingOrders::default(),
        }
    }
}

fn mean(values: impl Iterator<Item = Decimal>, n: usize) -> Decimal {
    values.sum::<Decimal>() / Decimal::from(n as u64)
}

impl Strategy for SmaCrossover {
    fn name(&self) -> &str {
        "sma_crossover"
    }

    fn on_bars(&mut self, ctx: &mut StrategyContext<'_>, bars: &Bars) {
        for bar in bars {
            let state = self.state.entry(bar.instrument.clone()).or_default();
            state.closes.push_back(bar.close);
            if state.closes.len() > self.slow {
                state.closes.pop_front();
            }
            if state.closes.len() < self.slow {
                continue;
            }

            let slow = mean(state.closes.iter().copied(), self.slow);
            let fast = mean(state.closes.iter().rev().take(self.fast).copied(), self.fast);
            let above = fast > slow;
            let crossed = state.fast_above.is_some_and(|was| was != above);
            state.fast_above = Some(above);

            if !crossed || self.pending.is_pending(&bar.instrument) {
                continue;
            }
            let held = ctx.shares(&bar.instrument);
            let quantity = if above && held <= 0 {
                self.quantity - held
            } else if !above && held > 0 {
                -held
            } else {
                0
            };
            if quantity == 0 {
                continue;
            }
            match ctx.market_order(bar.instrument.clone(), quantity) {
                Ok(id) => self.pending.insert(bar.instrument.clone(), id),
                Err(e) => log::info!("{}: crossover order rejected: {e}", bar.instrument),
            }
        }
    }

    fn on_order_updated(&mut self, _ctx: &mut StrategyContext<'_>, event: &OrderEvent) {
        self.pending.update(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barsim_core::domain::{Bar, Timestamp};
    use barsim_core::{run_backtest, BarFeed, BrokerConfig, EngineConfig};
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn ts(day: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(day)
    }

    fn feed(symbol: &str, closes: &[Decimal]) -> BarFeed {
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::new(Instrument::from(symbol), ts(i as i64), c, c, c, c, 1_000_000, c).unwrap())
            .collect();
        let mut feed = BarFeed::new(symbol);
        feed.add_bars(Instrument::from(symbol), bars).unwrap();
        feed
    }

    fn config() -> EngineConfig {
        EngineConfig {
            broker: BrokerConfig::with_cash(dec!(100000)),
        }
    }

    #[test]
    fn buy_and_hold_enters_each_instrument_once() {
        let closes = [dec!(10), dec!(11), dec!(12), dec!(13)];
        let feeds = vec![feed("SPY", &closes), feed("QQQ", &closes[..2])];
        let outcome = run_backtest(&config(), feeds, BuyAndHold::new(5)).unwrap();
        let report = outcome.report;
        assert_eq!(report.fills.len(), 2);
        assert!(report.positions.iter().all(|p| p.quantity == 5));
        assert_eq!(report.strategy, "buy_and_hold");
    }

    #[test]
    fn crossover_enters_and_exits() {
        // Falling, then rising (fast crosses above), then falling again.
        let closes: Vec<Decimal> = [10, 9, 8, 7, 6, 7, 9, 12, 15, 14, 10, 6, 3, 2, 2]
            .iter()
            .map(|&c| Decimal::from(c))
            .collect();
        let outcome = run_backtest(
            &config(),
            vec![feed("SPY", &closes)],
            SmaCrossover::new(2, 4, 10),
        )
        .unwrap();
        let fills = &outcome.report.fills;
        assert_eq!(fills.len(), 2, "{fills:?}");
        assert_eq!(fills[0].side, barsim_core::domain::OrderSide::Buy);
        assert_eq!(fills[1].side, barsim_core::domain::OrderSide::Sell);
        assert!(outcome.report.positions[0].is_flat());
        assert!(outcome.strategy.pending.by_instrument.is_empty());
    }

    #[test]
    fn crossover_waits_for_the_slow_window() {
        let closes = [dec!(1), dec!(2), dec!(3)];
        let outcome = run_backtest(
            &config(),
            vec![feed("SPY", &closes)],
            SmaCrossover::new(2, 5, 10),
        )
        .unwrap();
        assert!(outcome.report.orders.is_empty());
    }

    #[test]
    fn build_strategy_names_match_config() {
        let s = build_strategy(&StrategyConfig::SmaCrossover {
            fast: 2,
            slow: 3,
            quantity: 1,
        });
        assert_eq!(s.name(), "sma_crossover");
        let s = build_strategy(&StrategyConfig::BuyAndHold { quantity: 1 });
        assert_eq!(s.name(), "buy_and_hold");
    }
}
