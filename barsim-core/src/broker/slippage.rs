//! Slippage models. Applied to the raw fill price, always against the order:
//! buyers pay more, sellers receive less.

use crate::domain::{Bar, Order, OrderSide};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

pub trait Slippage: Debug + Send + Sync {
    /// `volume_used` is the quantity already filled on this bar for the
    /// same instrument, before this fill.
    fn adjust_price(
        &self,
        order: &Order,
        price: Decimal,
        quantity: u64,
        bar: &Bar,
        volume_used: u64,
    ) -> Decimal;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoSlippage;

impl Slippage for NoSlippage {
    fn adjust_price(&self, _: &Order, price: Decimal, _: u64, _: &Bar, _: u64) -> Decimal {
        price
    }
}

/// Quadratic price impact in the share of bar volume consumed:
/// `impact = (volume_used + quantity) / bar.volume)^2 * price_impact`.
#[derive(Debug, Clone, Copy)]
pub struct VolumeShareSlippage {
    pub price_impact: Decimal,
}

impl Slippage for VolumeShareSlippage {
    fn adjust_price(
        &self,
        order: &Order,
        price: Decimal,
        quantity: u64,
        bar: &Bar,
        volume_used: u64,
    ) -> Decimal {
        if bar.volume == 0 {
            return price;
        }
        let share = Decimal::from(volume_used + quantity) / Decimal::from(bar.volume);
        let impact = share * share * self.price_impact;
        match order.side {
            OrderSide::Buy => price * (Decimal::ONE + impact),
            OrderSide::Sell => price * (Decimal::ONE - impact),
        }
    }
}

/// Serializable slippage selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum SlippageConfig {
    #[default]
    None,
    VolumeShare { price_impact: Decimal },
}

impl SlippageConfig {
    pub fn build(&self) -> Box<dyn Slippage> {
        match *self {
            SlippageConfig::None => Box::new(NoSlippage),
            SlippageConfig::VolumeShare { price_impact } => {
                Box::new(VolumeShareSlippage { price_impact })
            }
        }
    }
}
