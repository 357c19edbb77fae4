//! Data provider trait and structured error types.
//!
//! The DataProvider trait abstracts over bar sources (CSV files, synthetic
//! generators, in-memory fixtures) so the feed can consume any of them and
//! tests can inject fixtures.

use crate::domain::{Bar, Instrument, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Structured error types for data operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("instrument not found: {instrument}")]
    InstrumentNotFound { instrument: Instrument },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error at record {record}: {message}")]
    Parse { record: u64, message: String },

    #[error("data error: {0}")]
    Other(String),
}

/// Lazy, single-pass bar sequence.
pub type BarStream = Box<dyn Iterator<Item = Result<Bar, DataError>> + Send>;

/// Inclusive time range. Open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
}

impl DateRange {
    pub fn new(start: Option<Timestamp>, end: Option<Timestamp>) -> Self {
        Self { start, end }
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts <= e)
    }
}

/// Source of bars for one instrument at a time.
pub trait DataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Bars for `instrument` within `range`, strictly increasing in time.
    fn fetch(&self, instrument: &Instrument, range: DateRange) -> Result<BarStream, DataError>;
}

/// Provider over bars held in memory. Used by tests and by callers that have
/// already loaded their data.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    series: HashMap<Instrument, Vec<Bar>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, instrument: Instrument, bars: Vec<Bar>) {
        self.series.insert(instrument, bars);
    }

    pub fn with_series(mut self, instrument: impl Into<Instrument>, bars: Vec<Bar>) -> Self {
        self.insert(instrument.into(), bars);
        self
    }
}

impl DataProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn fetch(&self, instrument: &Instrument, range: DateRange) -> Result<BarStream, DataError> {
        let bars = self
            .series
            .get(instrument)
            .ok_or_else(|| DataError::InstrumentNotFound {
                instrument: instrument.clone(),
            })?;
        let selected: Vec<Bar> = bars
            .iter()
            .filter(|b| range.contains(b.timestamp))
            .cloned()
            .collect();
        Ok(Box::new(selected.into_iter().map(Ok)))
    }
}
