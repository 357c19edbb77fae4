//! Bar feed: merges per-instrument bar sequences into one time-ordered stream.
//!
//! Each instrument sequence is pulled lazily with one bar of lookahead. The
//! feed's next time is the minimum buffered timestamp; advancing yields every
//! buffered bar at that time, in instrument registration order. Bars are
//! validated as they are pulled, and a sequence that goes backwards (or
//! repeats a timestamp) stops the feed with a [`FeedError`].

pub mod provider;

pub use provider::{BarStream, DataError, DataProvider, DateRange, MemoryProvider};

use crate::domain::{Bar, BarError, Bars, Instrument, Timestamp};
use std::collections::HashMap;
use thiserror::Error;

/// Feed-consistency errors. Always fatal to a run.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("{instrument}: non-monotonic bar at {next} (previous {previous})")]
    NonMonotonic {
        instrument: Instrument,
        previous: Timestamp,
        next: Timestamp,
    },

    #[error("{instrument}: malformed bar at {timestamp}: {source}")]
    Malformed {
        instrument: Instrument,
        timestamp: Timestamp,
        #[source]
        source: BarError,
    },

    #[error("sequence for {expected} produced a bar for {found}")]
    InstrumentMismatch {
        expected: Instrument,
        found: Instrument,
    },

    #[error("instrument {0} registered twice")]
    DuplicateInstrument(Instrument),

    #[error("{instrument}: source error: {source}")]
    Source {
        instrument: Instrument,
        #[source]
        source: DataError,
    },
}

/// One instrument's sequence with a single buffered bar.
struct InstrumentStream {
    instrument: Instrument,
    source: BarStream,
    buffered: Option<Bar>,
    /// Timestamp of the most recent bar pulled from `source`.
    last_pulled: Option<Timestamp>,
    exhausted: bool,
}

impl InstrumentStream {
    /// Pull the next bar into the buffer if it is empty.
    fn fill(&mut self) -> Result<(), FeedError> {
        if self.buffered.is_some() || self.exhausted {
            return Ok(());
        }
        match self.source.next() {
            None => {
                self.exhausted = true;
                Ok(())
            }
            Some(Err(source)) => Err(FeedError::Source {
                instrument: self.instrument.clone(),
                source,
            }),
            Some(Ok(bar)) => {
                if bar.instrument != self.instrument {
                    return Err(FeedError::InstrumentMismatch {
                        expected: self.instrument.clone(),
                        found: bar.instrument,
                    });
                }
                bar.validate().map_err(|source| FeedError::Malformed {
                    instrument: self.instrument.clone(),
                    timestamp: bar.timestamp,
                    source,
                })?;
                if let Some(previous) = self.last_pulled {
                    if bar.timestamp <= previous {
                        return Err(FeedError::NonMonotonic {
                            instrument: self.instrument.clone(),
                            previous,
                            next: bar.timestamp,
                        });
                    }
                }
                self.last_pulled = Some(bar.timestamp);
                self.buffered = Some(bar);
                Ok(())
            }
        }
    }
}

/// Time-ordered merge of instrument bar sequences.
pub struct BarFeed {
    name: String,
    streams: Vec<InstrumentStream>,
    current_time: Option<Timestamp>,
    last_bars: HashMap<Instrument, Bar>,
}

impl BarFeed {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            streams: Vec::new(),
            current_time: None,
            last_bars: HashMap::new(),
        }
    }

    /// Build a feed by fetching every instrument from `provider`.
    /// Registration order follows `instruments`.
    pub fn from_provider(
        provider: &dyn DataProvider,
        instruments: &[Instrument],
        range: DateRange,
    ) -> Result<Self, FeedError> {
        let mut feed = Self::new(provider.name());
        for instrument in instruments {
            let stream =
                provider
                    .fetch(instrument, range)
                    .map_err(|source| FeedError::Source {
                        instrument: instrument.clone(),
                        source,
                    })?;
            feed.add_stream(instrument.clone(), stream)?;
        }
        Ok(feed)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register an instrument sequence. Registration order breaks ties
    /// between instruments sharing a timestamp.
    pub fn add_stream(&mut self, instrument: Instrument, source: BarStream) -> Result<(), FeedError> {
        if self.streams.iter().any(|s| s.instrument == instrument) {
            return Err(FeedError::DuplicateInstrument(instrument));
        }
        self.streams.push(InstrumentStream {
            instrument,
            source,
            buffered: None,
            last_pulled: None,
            exhausted: false,
        });
        Ok(())
    }

    /// Register an in-memory sequence.
    pub fn add_bars(&mut self, instrument: Instrument, bars: Vec<Bar>) -> Result<(), FeedError> {
        self.add_stream(instrument, Box::new(bars.into_iter().map(Ok)))
    }

    pub fn instruments(&self) -> impl Iterator<Item = &Instrument> {
        self.streams.iter().map(|s| &s.instrument)
    }

    /// Minimum next timestamp across sequences that are not exhausted.
    ///
    /// Pulls one bar of lookahead from each sequence that needs it, which is
    /// where data errors surface.
    pub fn peek_next_time(&mut self) -> Result<Option<Timestamp>, FeedError> {
        for stream in &mut self.streams {
            stream.fill()?;
        }
        Ok(self.buffered_min())
    }

    fn buffered_min(&self) -> Option<Timestamp> {
        self.streams
            .iter()
            .filter_map(|s| s.buffered.as_ref().map(|b| b.timestamp))
            .min()
    }

    /// Yield every bar at the next timestamp. `None` once all sequences are
    /// exhausted.
    pub fn next_bars(&mut self) -> Result<Option<Bars>, FeedError> {
        let Some(t) = self.peek_next_time()? else {
            return Ok(None);
        };
        let mut bars = Bars::new(t);
        for stream in &mut self.streams {
            if stream.buffered.as_ref().map(|b| b.timestamp) == Some(t) {
                if let Some(bar) = stream.buffered.take() {
                    self.last_bars.insert(bar.instrument.clone(), bar.clone());
                    bars.push(bar);
                }
            }
        }
        self.current_time = Some(t);
        Ok(Some(bars))
    }

    /// True once every sequence is drained. Only meaningful after a peek.
    pub fn is_finished(&self) -> bool {
        self.streams
            .iter()
            .all(|s| s.exhausted && s.buffered.is_none())
    }

    /// Drop every source. The feed reports finished afterwards.
    pub fn close(&mut self) {
        if !self.streams.is_empty() {
            log::debug!("closing feed '{}'", self.name);
        }
        self.streams.clear();
    }

    /// Timestamp of the most recent `next_bars` round.
    pub fn current_time(&self) -> Option<Timestamp> {
        self.current_time
    }

    /// Most recent bar produced for `instrument`.
    pub fn last_bar(&self, instrument: &Instrument) -> Option<&Bar> {
        self.last_bars.get(instrument)
    }
}

impl std::fmt::Debug for BarFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BarFeed")
            .field("name", &self.name)
            .field("instruments", &self.instruments().collect::<Vec<_>>())
            .field("current_time", &self.current_time)
            .finish()
    }
}
