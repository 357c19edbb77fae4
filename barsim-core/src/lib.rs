//! barsim core: bars, feed merging, broker simulation, dispatcher and the
//! strategy hook surface.
//!
//! - Domain types (bars, instruments, orders, fills, positions)
//! - Feed: time-ordered merge of per-instrument bar sequences
//! - Broker: order validation, fill model, commission, slippage, volume limits
//! - Dispatcher: subjects advanced in a fixed priority order per timestamp
//! - Portfolio views, equity curve and the run report

pub mod broker;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod feed;
pub mod portfolio;
pub mod report;
pub mod strategy;

pub use broker::{Broker, OrderEvent, OrderEventKind, OrderValidationError};
pub use config::{BrokerConfig, ConfigError, EngineConfig, Holding};
pub use dispatch::{run_backtest, DispatchError, Dispatcher, RunError, RunOutcome, SimContext};
pub use feed::{BarFeed, FeedError};
pub use portfolio::{EquityCurve, EquityPoint, PortfolioView};
pub use report::RunReport;
pub use strategy::{
    ExitOrder, PositionError, PositionId, PositionSide, PositionStatus, PositionUpdate, Strategy,
    StrategyContext, StrategyPosition,
};
