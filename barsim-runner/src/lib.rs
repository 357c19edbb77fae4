//! barsim runner: configured backtests on top of `barsim-core`.
//!
//! - `config`: TOML backtest description (data, strategy, broker)
//! - `data_loader`: CSV and synthetic bar providers
//! - `strategies`: sample strategies selectable from config
//! - `runner`: one configured run end to end
//! - `export`: JSON manifest and CSV artifacts

pub mod config;
pub mod data_loader;
pub mod export;
pub mod runner;
pub mod strategies;

pub use config::{BacktestConfig, ConfigError, DataConfig, DataSource, StrategyConfig};
pub use runner::{run_from_config, BacktestResult, RunnerError, SCHEMA_VERSION};
