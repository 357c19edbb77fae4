//! Bar: the fundamental market data unit, plus the per-round `Bars` set.

use crate::domain::{Instrument, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a bar is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BarError {
    #[error("high {high} < low {low}")]
    HighBelowLow { high: Decimal, low: Decimal },

    #[error("open {open} outside [{low}, {high}]")]
    OpenOutOfRange {
        open: Decimal,
        low: Decimal,
        high: Decimal,
    },

    #[error("close {close} outside [{low}, {high}]")]
    CloseOutOfRange {
        close: Decimal,
        low: Decimal,
        high: Decimal,
    },

    #[error("non-positive price {0}")]
    NonPositivePrice(Decimal),
}

/// OHLCV sample for one instrument at one timestamp.
///
/// Immutable once produced by a feed. Field order matches the persisted
/// record layout: timestamp, open, high, low, close, volume, adj_close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub instrument: Instrument,
    pub timestamp: Timestamp,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
    pub adj_close: Decimal,
}

impl Bar {
    /// Build a bar and check its invariants.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instrument: Instrument,
        timestamp: Timestamp,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: u64,
        adj_close: Decimal,
    ) -> Result<Self, BarError> {
        let bar = Self {
            instrument,
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            adj_close,
        };
        bar.validate()?;
        Ok(bar)
    }

    /// OHLC sanity: low <= open, close <= high and every price positive.
    pub fn validate(&self) -> Result<(), BarError> {
        for price in [self.open, self.high, self.low, self.close] {
            if price <= Decimal::ZERO {
                return Err(BarError::NonPositivePrice(price));
            }
        }
        if self.high < self.low {
            return Err(BarError::HighBelowLow {
                high: self.high,
                low: self.low,
            });
        }
        if self.open < self.low || self.open > self.high {
            return Err(BarError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }
        if self.close < self.low || self.close > self.high {
            return Err(BarError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }
        Ok(())
    }

    pub fn is_sane(&self) -> bool {
        self.validate().is_ok()
    }

    /// (high + low + close) / 3
    pub fn typical_price(&self) -> Decimal {
        (self.high + self.low + self.close) / Decimal::from(3)
    }

    /// This bar with open, high and low scaled by `adj_close / close` and the
    /// close replaced by `adj_close`. Unchanged if the ratio is undefined.
    pub fn adjusted(&self) -> Bar {
        let Some(factor) = self.adj_close.checked_div(self.close) else {
            return self.clone();
        };
        Bar {
            open: self.open * factor,
            high: self.high * factor,
            low: self.low * factor,
            close: self.adj_close,
            ..self.clone()
        }
    }
}

/// All bars that share one timestamp, in instrument registration order.
///
/// Instruments without a bar at this time are simply absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bars {
    timestamp: Timestamp,
    bars: Vec<Bar>,
}

impl Bars {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            bars: Vec::new(),
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn get(&self, instrument: &Instrument) -> Option<&Bar> {
        self.bars.iter().find(|b| &b.instrument == instrument)
    }

    pub fn contains(&self, instrument: &Instrument) -> bool {
        self.get(instrument).is_some()
    }

    pub fn instruments(&self) -> impl Iterator<Item = &Instrument> {
        self.bars.iter().map(|b| &b.instrument)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Bar> {
        self.bars.iter()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Append a bar. Callers guarantee the timestamp matches and the
    /// instrument is not already present.
    pub(crate) fn push(&mut self, bar: Bar) {
        debug_assert_eq!(bar.timestamp, self.timestamp);
        debug_assert!(!self.contains(&bar.instrument));
        self.bars.push(bar);
    }

    pub(crate) fn extend(&mut self, other: Bars) {
        for bar in other.bars {
            self.push(bar);
        }
    }

    /// Every bar replaced by [`Bar::adjusted`].
    pub fn adjusted(&self) -> Bars {
        Bars {
            timestamp: self.timestamp,
            bars: self.bars.iter().map(Bar::adjusted).collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Bars {
    type Item = &'a Bar;
    type IntoIter = std::slice::Iter<'a, Bar>;

    fn into_iter(self) -> Self::IntoIter {
        self.bars.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn sample_bar() -> Bar {
        Bar {
            instrument: Instrument::from("SPY"),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            open: dec!(100),
            high: dec!(105),
            low: dec!(98),
            close: dec!(103),
            volume: 50_000,
            adj_close: dec!(103),
        }
    }

    #[test]
    fn bar_is_sane() {
        assert!(sample_bar().is_sane());
    }

    #[test]
    fn bar_detects_high_below_low() {
        let mut bar = sample_bar();
        bar.high = dec!(97);
        assert!(matches!(bar.validate(), Err(BarError::HighBelowLow { .. })));
    }

    #[test]
    fn bar_detects_open_outside_range() {
        let mut bar = sample_bar();
        bar.open = dec!(106);
        bar.high = dec!(105);
        assert!(matches!(
            bar.validate(),
            Err(BarError::OpenOutOfRange { .. })
        ));
    }

    #[test]
    fn bar_detects_close_outside_range() {
        let mut bar = sample_bar();
        bar.close = dec!(97);
        assert!(matches!(
            bar.validate(),
            Err(BarError::CloseOutOfRange { .. })
        ));
    }

    #[test]
    fn bar_rejects_zero_price() {
        let mut bar = sample_bar();
        bar.low = Decimal::ZERO;
        assert_eq!(bar.validate(), Err(BarError::NonPositivePrice(Decimal::ZERO)));
    }

    #[test]
    fn new_validates() {
        let b = sample_bar();
        let err = Bar::new(
            b.instrument,
            b.timestamp,
            dec!(10),
            dec!(9),
            dec!(11),
            dec!(10),
            0,
            dec!(10),
        );
        assert!(err.is_err());
    }

    #[test]
    fn typical_price() {
        assert_eq!(sample_bar().typical_price(), dec!(102));
    }

    #[test]
    fn bars_lookup_preserves_insertion_order() {
        let first = sample_bar();
        let mut second = sample_bar();
        second.instrument = Instrument::from("AAPL");

        let mut bars = Bars::new(first.timestamp);
        bars.push(first);
        bars.push(second);

        let order: Vec<&str> = bars.instruments().map(|i| i.as_str()).collect();
        assert_eq!(order, vec!["SPY", "AAPL"]);
        assert!(bars.contains(&Instrument::from("AAPL")));
        assert!(bars.get(&Instrument::from("QQQ")).is_none());
        assert_eq!(bars.len(), 2);
    }

    #[test]
    fn adjusted_scales_by_adj_close_ratio() {
        let bar = Bar {
            adj_close: dec!(51.5),
            ..sample_bar()
        };
        let adj = bar.adjusted();
        assert_eq!(adj.open, dec!(50));
        assert_eq!(adj.high, dec!(52.5));
        assert_eq!(adj.low, dec!(49));
        assert_eq!(adj.close, dec!(51.5));
        assert_eq!(adj.volume, bar.volume);
        assert!(adj.is_sane());

        assert_eq!(sample_bar().adjusted(), sample_bar());
    }
}
