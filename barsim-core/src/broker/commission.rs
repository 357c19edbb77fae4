//! Commission models.
//!
//! A commission is a function of the order being filled, the fill price and
//! the fill quantity. The broker clamps the result at zero and never refunds it.

use crate::domain::Order;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Pluggable commission schedule.
pub trait Commission: Debug + Send + Sync {
    fn calculate(&self, order: &Order, price: Decimal, quantity: u64) -> Decimal;
}

/// Free trading.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCommission;

impl Commission for NoCommission {
    fn calculate(&self, _order: &Order, _price: Decimal, _quantity: u64) -> Decimal {
        Decimal::ZERO
    }
}

/// Flat fee per order, charged on its first fill only.
#[derive(Debug, Clone, Copy)]
pub struct FixedPerTrade {
    pub amount: Decimal,
}

impl Commission for FixedPerTrade {
    fn calculate(&self, order: &Order, _price: Decimal, _quantity: u64) -> Decimal {
        if order.filled_quantity == 0 {
            self.amount
        } else {
            Decimal::ZERO
        }
    }
}

/// Fraction of traded notional. 0.01 means 1%.
#[derive(Debug, Clone, Copy)]
pub struct TradePercentage {
    pub percentage: Decimal,
}

impl Commission for TradePercentage {
    fn calculate(&self, _order: &Order, price: Decimal, quantity: u64) -> Decimal {
        price * Decimal::from(quantity) * self.percentage
    }
}

/// Serializable commission selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum CommissionConfig {
    #[default]
    None,
    FixedPerTrade { amount: Decimal },
    TradePercentage { percentage: Decimal },
}

impl CommissionConfig {
    pub fn build(&self) -> Box<dyn Commission> {
        match *self {
            CommissionConfig::None => Box::new(NoCommission),
            CommissionConfig::FixedPerTrade { amount } => Box::new(FixedPerTrade { amount }),
            CommissionConfig::TradePercentage { percentage } => {
                Box::new(TradePercentage { percentage })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderFlags;
    use crate::domain::{Instrument, OrderId, OrderSide, OrderType};
    use rust_decimal_macros::dec;

    fn order() -> Order {
        Order::new(
            OrderId(1),
            Instrument::from("SPY"),
            OrderSide::Buy,
            OrderType::Market,
            100,
            OrderFlags::default(),
        )
    }

    #[test]
    fn no_commission_is_zero() {
        assert_eq!(NoCommission.calculate(&order(), dec!(10), 5), Decimal::ZERO);
    }

    #[test]
    fn fixed_per_trade_charges_first_fill_only() {
        let c = FixedPerTrade { amount: dec!(1.5) };
        let mut o = order();
        assert_eq!(c.calculate(&o, dec!(10), 50), dec!(1.5));
        o.filled_quantity = 50;
        assert_eq!(c.calculate(&o, dec!(10), 50), Decimal::ZERO);
    }

    #[test]
    fn trade_percentage_scales_with_notional() {
        let c = TradePercentage {
            percentage: dec!(0.001),
        };
        assert_eq!(c.calculate(&order(), dec!(100), 10), dec!(1));
    }

    #[test]
    fn config_builds_model() {
        let cfg = CommissionConfig::FixedPerTrade { amount: dec!(2) };
        assert_eq!(cfg.build().calculate(&order(), dec!(1), 1), dec!(2));
        assert_eq!(
            CommissionConfig::default().build().calculate(&order(), dec!(1), 1),
            Decimal::ZERO
        );
    }
}
