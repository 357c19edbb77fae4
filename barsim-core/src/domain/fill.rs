use crate::domain::{Instrument, OrderId, OrderSide, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Execution record. One per fill event; partial fills produce several
/// fills for the same order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub instrument: Instrument,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: u64,
    pub commission: Decimal,
    pub timestamp: Timestamp,
}

impl Fill {
    /// price * quantity, before commission.
    pub fn gross_amount(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }

    /// Signed cash change: buys pay gross plus commission, sells receive
    /// gross minus commission.
    pub fn cash_delta(&self) -> Decimal {
        match self.side {
            OrderSide::Buy => -self.gross_amount() - self.commission,
            OrderSide::Sell => self.gross_amount() - self.commission,
        }
    }

    /// Signed share change.
    pub fn share_delta(&self) -> i64 {
        self.side.sign() * self.quantity as i64
    }
}
