//! Run report: everything a finished run produced, plus a digest for
//! determinism checks.

use crate::broker::{Broker, OrderAuditEntry};
use crate::domain::{Fill, Order, Position};
use crate::portfolio::{EquityCurve, PortfolioView};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub strategy: String,
    pub rounds: u64,
    pub stopped_early: bool,

    // ── Accounting ──
    pub initial_equity: Decimal,
    pub final_cash: Decimal,
    pub final_equity: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub total_commission: Decimal,
    pub total_return: Decimal,
    pub max_drawdown: Decimal,

    // ── Records ──
    pub positions: Vec<Position>,
    pub orders: Vec<Order>,
    pub fills: Vec<Fill>,
    pub audit_trail: Vec<OrderAuditEntry>,
    pub equity_curve: EquityCurve,
}

impl RunReport {
    pub fn from_run(
        strategy: &str,
        broker: &Broker,
        equity_curve: EquityCurve,
        rounds: u64,
        stopped_early: bool,
    ) -> Self {
        let view = PortfolioView::new(broker);
        Self {
            strategy: strategy.to_string(),
            rounds,
            stopped_early,
            initial_equity: broker.initial_equity(),
            final_cash: view.cash(),
            final_equity: view.equity(),
            realized_pnl: view.realized_pnl(),
            unrealized_pnl: view.unrealized_pnl(),
            total_commission: view.total_commission(),
            total_return: view.total_return(),
            max_drawdown: equity_curve.max_drawdown(),
            positions: view.positions().cloned().collect(),
            orders: broker.orders().cloned().collect(),
            fills: broker.fills().to_vec(),
            audit_trail: broker.audit_trail().to_vec(),
            equity_curve,
        }
    }

    pub fn trade_count(&self) -> usize {
        self.fills.len()
    }

    /// BLAKE3 hex digest of the report's canonical JSON.
    ///
    /// Two runs over the same inputs produce the same digest.
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(blake3::hash(&json).to_hex().to_string())
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use rust_decimal_macros::dec;

    fn empty_report() -> RunReport {
        let broker = Broker::new(&BrokerConfig::with_cash(dec!(500)));
        RunReport::from_run("test", &broker, EquityCurve::new(dec!(500)), 0, false)
    }

    #[test]
    fn summary_of_idle_broker() {
        let report = empty_report();
        assert_eq!(report.final_cash, dec!(500));
        assert_eq!(report.final_equity, dec!(500));
        assert_eq!(report.total_return, Decimal::ZERO);
        assert_eq!(report.trade_count(), 0);
    }

    #[test]
    fn digest_is_stable_and_sensitive() {
        let a = empty_report();
        let b = empty_report();
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());
        assert_eq!(a.digest().unwrap().len(), 64);

        let mut c = empty_report();
        c.rounds = 1;
        assert_ne!(a.digest().unwrap(), c.digest().unwrap());
    }

    #[test]
    fn json_round_trip() {
        let report = empty_report();
        let json = report.to_json_pretty().unwrap();
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
