//! Serializable backtest configuration.
//!
//! ```toml
//! [data]
//! instruments = ["SPY", "QQQ"]
//! start = "2023-01-02"
//! end = "2023-12-29"
//!
//! [data.source]
//! type = "synthetic"
//! seed = 7
//!
//! [strategy]
//! type = "sma_crossover"
//! fast = 10
//! slow = 30
//! quantity = 100
//!
//! [broker]
//! initial_cash = 100000
//! ```

use barsim_core::domain::{Instrument, Timestamp};
use barsim_core::feed::DateRange;
use barsim_core::{BrokerConfig, EngineConfig};
use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Engine(#[from] barsim_core::ConfigError),
}

/// Where bars come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataSource {
    /// One `<INSTRUMENT>.csv` per instrument in `dir`.
    Csv { dir: PathBuf },
    /// Seeded random walk on weekdays.
    Synthetic {
        #[serde(default)]
        seed: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    pub instruments: Vec<Instrument>,
    /// First day included (YYYY-MM-DD).
    #[serde(default)]
    pub start: Option<NaiveDate>,
    /// Last day included (YYYY-MM-DD).
    #[serde(default)]
    pub end: Option<NaiveDate>,
    pub source: DataSource,
}

impl DataConfig {
    /// Inclusive range covering whole days from `start` to `end`.
    pub fn range(&self) -> DateRange {
        DateRange::new(self.start.map(day_start), self.end.map(day_end))
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self.source, DataSource::Synthetic { .. })
    }
}

pub(crate) fn day_start(date: NaiveDate) -> Timestamp {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

fn day_end(date: NaiveDate) -> Timestamp {
    day_start(date) + Duration::days(1) - Duration::nanoseconds(1)
}

fn default_quantity() -> i64 {
    100
}

/// Built-in sample strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    /// Buy `quantity` of every instrument on its first bar and hold.
    BuyAndHold {
        #[serde(default = "default_quantity")]
        quantity: i64,
    },
    /// Go long `quantity` when the fast SMA crosses above the slow one,
    /// exit when it crosses back below.
    SmaCrossover {
        fast: usize,
        slow: usize,
        #[serde(default = "default_quantity")]
        quantity: i64,
    },
}

impl StrategyConfig {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyConfig::BuyAndHold { .. } => "buy_and_hold",
            StrategyConfig::SmaCrossover { .. } => "sma_crossover",
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            StrategyConfig::BuyAndHold { quantity } if quantity <= 0 => Err(invalid(format!(
                "buy_and_hold quantity must be positive, got {quantity}"
            ))),
            StrategyConfig::SmaCrossover {
                fast,
                slow,
                quantity,
            } => {
                if fast == 0 || fast >= slow {
                    return Err(invalid(format!(
                        "sma_crossover needs 0 < fast < slow, got fast={fast} slow={slow}"
                    )));
                }
                if quantity <= 0 {
                    return Err(invalid(format!(
                        "sma_crossover quantity must be positive, got {quantity}"
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Complete description of one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub data: DataConfig,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
}

impl BacktestConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data.instruments.is_empty() {
            return Err(invalid("data.instruments must not be empty".into()));
        }
        let mut seen = HashSet::new();
        for instrument in &self.data.instruments {
            if !seen.insert(instrument) {
                return Err(invalid(format!("instrument {instrument} listed twice")));
            }
        }
        if let (Some(start), Some(end)) = (self.data.start, self.data.end) {
            if start > end {
                return Err(invalid(format!("data.start {start} is after data.end {end}")));
            }
        }
        if self.data.is_synthetic() && (self.data.start.is_none() || self.data.end.is_none()) {
            return Err(invalid("synthetic data needs data.start and data.end".into()));
        }
        self.strategy.validate()?;
        self.broker.validate()?;
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            broker: self.broker.clone(),
        }
    }

    /// Content hash of the configuration. Identical configs share an id.
    pub fn run_id(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

fn invalid(msg: String) -> ConfigError {
    ConfigError::Invalid(msg)
}
