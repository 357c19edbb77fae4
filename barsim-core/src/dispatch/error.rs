use crate::config::ConfigError;
use crate::domain::{Instrument, OrderStateError, Timestamp};
use crate::feed::FeedError;
use thiserror::Error;

/// Violations of the dispatch protocol.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("feed '{feed}' would first fire at {first}, not after current time {current}")]
    BehindCurrentTime {
        feed: String,
        first: Timestamp,
        current: Timestamp,
    },

    #[error("instrument {instrument} already served by another feed (adding '{feed}')")]
    InstrumentAlreadyRegistered { instrument: Instrument, feed: String },

    #[error("feed '{feed}' failed while being registered: {source}")]
    InvalidFeed {
        feed: String,
        #[source]
        source: FeedError,
    },
}

/// Anything that ends a run early with an error.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The broker's own bookkeeping went inconsistent.
    #[error("broker state error: {0}")]
    OrderState(#[from] OrderStateError),
}
