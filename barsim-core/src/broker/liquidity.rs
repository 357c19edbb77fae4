//! Liquidity constraints: participation limits and remainder policies.
//!
//! Optional: when enabled, all orders on one instrument share at most
//! `max_participation` of each bar's volume. Whatever does not fit is either
//! carried to the next bar (the order stays partially filled) or cancelled.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Policy for the unfilled remainder when the volume limit binds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemainderPolicy {
    /// Keep the remainder active for later bars.
    #[default]
    Carry,
    /// Cancel the remainder right after the partial fill.
    Cancel,
}

/// Volume participation limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeLimit {
    /// Fraction of bar volume, in (0, 1]. 0.25 means at most a quarter of
    /// the bar's volume trades through this broker.
    pub max_participation: Decimal,
    #[serde(default)]
    pub remainder: RemainderPolicy,
}

impl VolumeLimit {
    pub fn new(max_participation: Decimal, remainder: RemainderPolicy) -> Self {
        Self {
            max_participation,
            remainder,
        }
    }

    /// Shares available on a bar of `bar_volume`, rounded down.
    pub fn max_fill_qty(&self, bar_volume: u64) -> u64 {
        (Decimal::from(bar_volume) * self.max_participation)
            .floor()
            .to_u64()
            .unwrap_or(0)
    }

    /// Split `desired` into `(fill, remainder)` given the bar volume and the
    /// quantity other orders already took from it.
    pub fn constrain(&self, desired: u64, bar_volume: u64, already_used: u64) -> (u64, u64) {
        let available = self.max_fill_qty(bar_volume).saturating_sub(already_used);
        let fill = desired.min(available);
        (fill, desired - fill)
    }
}
