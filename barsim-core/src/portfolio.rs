//! Read-only accounting over broker state.

use crate::broker::Broker;
use crate::domain::{Instrument, Position, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Borrowed view of the broker's cash and positions.
#[derive(Debug, Clone, Copy)]
pub struct PortfolioView<'a> {
    broker: &'a Broker,
}

impl<'a> PortfolioView<'a> {
    pub fn new(broker: &'a Broker) -> Self {
        Self { broker }
    }

    pub fn cash(&self) -> Decimal {
        self.broker.cash()
    }

    pub fn positions(&self) -> impl Iterator<Item = &'a Position> {
        self.broker.positions()
    }

    pub fn position(&self, instrument: &Instrument) -> Option<&'a Position> {
        self.broker.position(instrument)
    }

    /// Σ quantity × mark price
    pub fn market_value(&self) -> Decimal {
        self.broker.market_value()
    }

    pub fn equity(&self) -> Decimal {
        self.broker.equity()
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.positions().map(|p| p.realized_pnl).sum()
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions()
            .map(|p| p.unrealized_pnl(self.broker.mark_price(p)))
            .sum()
    }

    pub fn total_commission(&self) -> Decimal {
        self.broker.total_commission()
    }

    /// Equity change since the start of the run.
    pub fn total_pnl(&self) -> Decimal {
        self.equity() - self.broker.initial_equity()
    }

    /// Fractional return on initial equity; zero when that is zero.
    pub fn total_return(&self) -> Decimal {
        let initial = self.broker.initial_equity();
        if initial.is_zero() {
            return Decimal::ZERO;
        }
        self.total_pnl() / initial
    }
}

/// Equity sampled at the end of a dispatch round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: Timestamp,
    pub cash: Decimal,
    pub equity: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquityCurve {
    initial_equity: Decimal,
    points: Vec<EquityPoint>,
}

impl EquityCurve {
    pub fn new(initial_equity: Decimal) -> Self {
        Self {
            initial_equity,
            points: Vec::new(),
        }
    }

    pub fn record(&mut self, timestamp: Timestamp, cash: Decimal, equity: Decimal) {
        self.points.push(EquityPoint {
            timestamp,
            cash,
            equity,
        });
    }

    pub fn initial_equity(&self) -> Decimal {
        self.initial_equity
    }

    pub fn points(&self) -> &[EquityPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn final_equity(&self) -> Decimal {
        self.points
            .last()
            .map_or(self.initial_equity, |p| p.equity)
    }

    /// Per-round returns, the first measured against initial equity.
    /// A zero base yields a zero return.
    pub fn returns(&self) -> Vec<Decimal> {
        let mut prev = self.initial_equity;
        self.points
            .iter()
            .map(|p| {
                let r = if prev.is_zero() {
                    Decimal::ZERO
                } else {
                    (p.equity - prev) / prev
                };
                prev = p.equity;
                r
            })
            .collect()
    }

    pub fn cumulative_return(&self) -> Decimal {
        if self.initial_equity.is_zero() {
            return Decimal::ZERO;
        }
        (self.final_equity() - self.initial_equity) / self.initial_equity
    }

    /// Largest peak-to-trough decline as a positive fraction of the peak.
    pub fn max_drawdown(&self) -> Decimal {
        let mut peak = self.initial_equity;
        let mut worst = Decimal::ZERO;
        for p in &self.points {
            peak = peak.max(p.equity);
            if peak > Decimal::ZERO {
                worst = worst.max((peak - p.equity) / peak);
            }
        }
        worst
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrokerConfig, Holding};
    use crate::domain::{Bar, Bars, OrderRequest, OrderSide};
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn ts(day: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::days(day)
    }

    fn flat(day: i64, price: Decimal) -> Bars {
        let mut bars = Bars::new(ts(day));
        bars.push(Bar {
            instrument: Instrument::from("SPY"),
            timestamp: ts(day),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 1_000,
            adj_close: price,
        });
        bars
    }

    #[test]
    fn view_splits_realized_and_unrealized() {
        let mut broker = Broker::new(&BrokerConfig::with_cash(dec!(10000)));
        broker
            .submit_order(OrderRequest::market("SPY", OrderSide::Buy, 10))
            .unwrap();
        broker.on_bars(&flat(0, dec!(100))).unwrap();
        broker
            .submit_order(OrderRequest::market("SPY", OrderSide::Sell, 4))
            .unwrap();
        broker.on_bars(&flat(1, dec!(110))).unwrap();

        let view = PortfolioView::new(&broker);
        assert_eq!(view.realized_pnl(), dec!(40));
        assert_eq!(view.unrealized_pnl(), dec!(60));
        assert_eq!(view.total_pnl(), dec!(100));
        assert_eq!(view.total_return(), dec!(0.01));
        assert_eq!(view.equity(), view.cash() + view.market_value());
    }

    #[test]
    fn unpriced_holdings_value_at_cost() {
        let config = BrokerConfig {
            initial_holdings: vec![Holding {
                instrument: Instrument::from("QQQ"),
                quantity: 5,
                average_cost: dec!(20),
            }],
            ..BrokerConfig::with_cash(dec!(0))
        };
        let broker = Broker::new(&config);
        let view = PortfolioView::new(&broker);
        assert_eq!(view.market_value(), dec!(100));
        assert_eq!(view.unrealized_pnl(), Decimal::ZERO);
    }

    #[test]
    fn curve_returns_and_drawdown() {
        let mut curve = EquityCurve::new(dec!(100));
        curve.record(ts(0), dec!(0), dec!(110));
        curve.record(ts(1), dec!(0), dec!(99));
        curve.record(ts(2), dec!(0), dec!(120));

        let returns = curve.returns();
        assert_eq!(returns.len(), 3);
        assert_eq!(&returns[..2], &[dec!(0.1), dec!(-0.1)]);
        assert!(returns[2] > dec!(0.21));
        assert_eq!(curve.cumulative_return(), dec!(0.2));
        assert_eq!(curve.max_drawdown(), dec!(0.1));
        assert_eq!(curve.final_equity(), dec!(120));
    }

    #[test]
    fn empty_curve() {
        let curve = EquityCurve::new(dec!(100));
        assert!(curve.is_empty());
        assert_eq!(curve.final_equity(), dec!(100));
        assert_eq!(curve.max_drawdown(), Decimal::ZERO);
        assert!(curve.returns().is_empty());
    }
}
