use crate::domain::{Instrument, OrderSide};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Holding in one instrument. Quantity is signed: negative is short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: Instrument,
    pub quantity: i64,
    /// Weighted-average entry price of the open quantity. Zero when flat.
    pub average_cost: Decimal,
    /// PnL booked by reducing or reversing this position.
    pub realized_pnl: Decimal,
}

impl Position {
    pub fn flat(instrument: Instrument) -> Self {
        Self {
            instrument,
            quantity: 0,
            average_cost: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
        }
    }

    pub fn is_long(&self) -> bool {
        self.quantity > 0
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0
    }

    pub fn market_value(&self, price: Decimal) -> Decimal {
        Decimal::from(self.quantity) * price
    }

    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        Decimal::from(self.quantity) * (price - self.average_cost)
    }

    /// Apply a fill and return the PnL it realized.
    ///
    /// Increases (or opening from flat) average the cost in. Decreases realize
    /// PnL on the closed quantity and keep the cost. A fill that crosses zero
    /// closes the old side entirely and opens the rest at the fill price.
    pub fn apply_fill(&mut self, side: OrderSide, quantity: u64, price: Decimal) -> Decimal {
        let delta = side.sign() * quantity as i64;
        let old_qty = self.quantity;
        let new_qty = old_qty + delta;

        let increasing = old_qty == 0 || (old_qty > 0) == (delta > 0);
        if increasing {
            let old_cost = self.average_cost * Decimal::from(old_qty.abs());
            let add_cost = price * Decimal::from(delta.abs());
            self.average_cost = (old_cost + add_cost) / Decimal::from(new_qty.abs());
            self.quantity = new_qty;
            return Decimal::ZERO;
        }

        let closed = delta.abs().min(old_qty.abs());
        let direction = Decimal::from(old_qty.signum());
        let realized = (price - self.average_cost) * Decimal::from(closed) * direction;
        self.realized_pnl += realized;
        self.quantity = new_qty;

        if new_qty == 0 {
            self.average_cost = Decimal::ZERO;
        } else if new_qty.signum() != old_qty.signum() {
            self.average_cost = price;
        }
        realized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pos() -> Position {
        Position::flat(Instrument::from("SPY"))
    }

    #[test]
    fn buys_average_in() {
        let mut p = pos();
        p.apply_fill(OrderSide::Buy, 10, dec!(100));
        p.apply_fill(OrderSide::Buy, 10, dec!(110));
        assert_eq!(p.quantity, 20);
        assert_eq!(p.average_cost, dec!(105));
        assert_eq!(p.realized_pnl, Decimal::ZERO);
    }

    #[test]
    fn partial_sell_realizes_and_keeps_cost() {
        let mut p = pos();
        p.apply_fill(OrderSide::Buy, 10, dec!(100));
        let realized = p.apply_fill(OrderSide::Sell, 4, dec!(110));
        assert_eq!(realized, dec!(40));
        assert_eq!(p.quantity, 6);
        assert_eq!(p.average_cost, dec!(100));
    }

    #[test]
    fn full_close_goes_flat() {
        let mut p = pos();
        p.apply_fill(OrderSide::Buy, 10, dec!(100));
        p.apply_fill(OrderSide::Sell, 10, dec!(90));
        assert!(p.is_flat());
        assert_eq!(p.realized_pnl, dec!(-100));
        assert_eq!(p.average_cost, Decimal::ZERO);
    }

    #[test]
    fn crossing_zero_reopens_at_fill_price() {
        let mut p = pos();
        p.apply_fill(OrderSide::Buy, 10, dec!(100));
        let realized = p.apply_fill(OrderSide::Sell, 15, dec!(120));
        assert_eq!(realized, dec!(200));
        assert_eq!(p.quantity, -5);
        assert!(p.is_short());
        assert_eq!(p.average_cost, dec!(120));
    }

    #[test]
    fn short_cover_realizes_inverse() {
        let mut p = pos();
        p.apply_fill(OrderSide::Sell, 10, dec!(50));
        let realized = p.apply_fill(OrderSide::Buy, 10, dec!(40));
        assert_eq!(realized, dec!(100));
        assert!(p.is_flat());
    }

    #[test]
    fn valuation() {
        let mut p = pos();
        p.apply_fill(OrderSide::Buy, 10, dec!(100));
        assert_eq!(p.market_value(dec!(103)), dec!(1030));
        assert_eq!(p.unrealized_pnl(dec!(103)), dec!(30));
    }
}
