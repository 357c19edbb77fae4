//! Backtest runner: turns a `BacktestConfig` into a `BacktestResult`.

use barsim_core::{run_backtest, RunError, RunReport};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{BacktestConfig, ConfigError};
use crate::data_loader::build_feed;
use crate::strategies::build_strategy;

/// Version of the persisted `BacktestResult` layout.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("data error: {0}")]
    Feed(#[from] barsim_core::FeedError),

    #[error("run failed: {0}")]
    Run(#[from] RunError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Everything produced by one configured run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub schema_version: u32,
    /// Content hash of `config`.
    pub run_id: String,
    pub config: BacktestConfig,
    /// Digest of `report`; equal across reruns of the same config and data.
    pub digest: String,
    pub report: RunReport,
    /// True when bars came from the synthetic generator.
    pub has_synthetic: bool,
}

impl BacktestResult {
    /// Leading characters of the run id, for logs and directory names.
    pub fn short_id(&self) -> &str {
        short_id(&self.run_id)
    }
}

/// First 12 characters of `run_id`, or all of it when shorter.
pub fn short_id(run_id: &str) -> &str {
    match run_id.char_indices().nth(12) {
        Some((end, _)) => &run_id[..end],
        None => run_id,
    }
}

/// Load data, build the strategy and run it to completion.
pub fn run_from_config(config: &BacktestConfig) -> Result<BacktestResult, RunnerError> {
    config.validate()?;
    let run_id = config.run_id()?;
    log::info!(
        "run {} : {} on {} instrument(s)",
        short_id(&run_id),
        config.strategy.name(),
        config.data.instruments.len()
    );

    let feed = build_feed(&config.data)?;
    let strategy = build_strategy(&config.strategy);
    let outcome = run_backtest(&config.engine_config(), vec![feed], strategy)?;
    let report = outcome.report;
    let digest = report.digest()?;

    log::info!(
        "run {} finished: {} rounds, {} fills, final equity {}",
        short_id(&run_id),
        report.rounds,
        report.trade_count(),
        report.final_equity
    );

    Ok(BacktestResult {
        schema_version: SCHEMA_VERSION,
        run_id,
        config: config.clone(),
        digest,
        report,
        has_synthetic: config.data.is_synthetic(),
    })
}
