//! Per-run simulation context, passed explicitly to every subject.

use super::error::DispatchError;
use crate::broker::Broker;
use crate::domain::{Bar, Bars, Instrument, OrderStateError, Timestamp};
use crate::feed::BarFeed;
use crate::strategy::position::PositionBook;
use std::collections::{HashMap, HashSet};

#[derive(Debug)]
pub struct SimContext {
    broker: Broker,
    positions: PositionBook,
    current_time: Option<Timestamp>,
    /// Bars published by feeds in the current round.
    round: Option<Bars>,
    last_bars: HashMap<Instrument, Bar>,
    instruments: HashSet<Instrument>,
    pending_feeds: Vec<BarFeed>,
    stop_requested: bool,
    /// First dispatch-protocol violation raised from inside a hook.
    fault: Option<DispatchError>,
}

impl SimContext {
    pub fn new(broker: Broker) -> Self {
        Self {
            broker,
            positions: PositionBook::default(),
            current_time: None,
            round: None,
            last_bars: HashMap::new(),
            instruments: HashSet::new(),
            pending_feeds: Vec::new(),
            stop_requested: false,
            fault: None,
        }
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub(crate) fn broker_mut(&mut self) -> &mut Broker {
        &mut self.broker
    }

    pub(crate) fn positions(&self) -> &PositionBook {
        &self.positions
    }

    pub(crate) fn positions_mut(&mut self) -> &mut PositionBook {
        &mut self.positions
    }

    pub(crate) fn into_broker(self) -> Broker {
        self.broker
    }

    /// Simulated time of the round in progress (or last completed).
    pub fn current_time(&self) -> Option<Timestamp> {
        self.current_time
    }

    /// Bars published so far in the current round.
    pub fn round_bars(&self) -> Option<&Bars> {
        self.round.as_ref()
    }

    pub fn last_bar(&self, instrument: &Instrument) -> Option<&Bar> {
        self.last_bars.get(instrument)
    }

    /// Ask the dispatcher to stop once the current round completes.
    pub fn request_stop(&mut self) {
        if !self.stop_requested {
            log::info!("stop requested at {:?}", self.current_time);
        }
        self.stop_requested = true;
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Queue a feed from inside a hook. It registers at the top of the next
    /// loop iteration.
    ///
    /// A feed that breaks the registration rules is fatal: the error is kept
    /// and the run ends with it once the current round completes. Returns
    /// whether the feed was queued.
    pub fn add_feed(&mut self, feed: BarFeed) -> bool {
        match self.try_add_feed(feed) {
            Ok(()) => true,
            Err(e) => {
                log::error!("rejected feed at {:?}: {e}", self.current_time);
                if self.fault.is_none() {
                    self.fault = Some(e);
                }
                false
            }
        }
    }

    /// The dispatch error that will end the run, if one was raised.
    pub fn fault(&self) -> Option<&DispatchError> {
        self.fault.as_ref()
    }

    pub(crate) fn take_fault(&mut self) -> Option<DispatchError> {
        self.fault.take()
    }

    /// Validate and queue a feed, returning violations to the caller.
    ///
    /// The feed's first bar must lie strictly after the current time and it
    /// must not serve an instrument another feed already serves.
    pub(crate) fn try_add_feed(&mut self, mut feed: BarFeed) -> Result<(), DispatchError> {
        let first = feed
            .peek_next_time()
            .map_err(|source| DispatchError::InvalidFeed {
                feed: feed.name().to_string(),
                source,
            })?;
        if let (Some(first), Some(current)) = (first, self.current_time) {
            if first <= current {
                return Err(DispatchError::BehindCurrentTime {
                    feed: feed.name().to_string(),
                    first,
                    current,
                });
            }
        }
        let queued = self.pending_feeds.iter().flat_map(|f| f.instruments());
        let mut seen: HashSet<&Instrument> = self.instruments.iter().chain(queued).collect();
        for instrument in feed.instruments() {
            if !seen.insert(instrument) {
                return Err(DispatchError::InstrumentAlreadyRegistered {
                    instrument: instrument.clone(),
                    feed: feed.name().to_string(),
                });
            }
        }
        if first.is_none() {
            log::warn!("feed '{}' has no bars", feed.name());
        }
        log::debug!("queued feed '{}' (first bar {first:?})", feed.name());
        self.pending_feeds.push(feed);
        Ok(())
    }

    pub(crate) fn take_pending_feeds(&mut self) -> Vec<BarFeed> {
        let feeds = std::mem::take(&mut self.pending_feeds);
        for feed in &feeds {
            self.instruments.extend(feed.instruments().cloned());
        }
        feeds
    }

    pub(crate) fn begin_round(&mut self, t: Timestamp) {
        self.current_time = Some(t);
        self.round = None;
    }

    /// Merge a feed's bars into the current round.
    pub(crate) fn publish(&mut self, bars: Bars) {
        for bar in &bars {
            self.last_bars.insert(bar.instrument.clone(), bar.clone());
        }
        match &mut self.round {
            Some(round) if round.timestamp() == bars.timestamp() => round.extend(bars),
            slot => *slot = Some(bars),
        }
    }

    /// Let the broker evaluate orders against this round's bars.
    pub(crate) fn settle_round(&mut self) -> Result<(), OrderStateError> {
        match &self.round {
            Some(bars) => self.broker.on_bars(bars),
            None => Ok(()),
        }
    }
}
