//! Engine configuration, loadable from TOML.
//!
//! ```toml
//! [broker]
//! initial_cash = 100000
//! allow_short = false
//! allow_margin = false
//! use_adjusted_prices = false
//!
//! [broker.commission]
//! model = "trade_percentage"
//! percentage = 0.001
//!
//! [broker.volume_limit]
//! max_participation = 0.25
//! remainder = "carry"
//!
//! [[broker.initial_holdings]]
//! instrument = "SPY"
//! quantity = 10
//! average_cost = 400
//! ```

use crate::broker::commission::CommissionConfig;
use crate::broker::liquidity::VolumeLimit;
use crate::broker::slippage::SlippageConfig;
use crate::domain::Instrument;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Shares held before the first bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub instrument: Instrument,
    pub quantity: i64,
    pub average_cost: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub initial_cash: Decimal,
    pub allow_short: bool,
    /// Allow cash to go negative.
    pub allow_margin: bool,
    pub commission: CommissionConfig,
    pub slippage: SlippageConfig,
    pub volume_limit: Option<VolumeLimit>,
    /// Fill and mark against split/dividend adjusted prices.
    pub use_adjusted_prices: bool,
    pub initial_holdings: Vec<Holding>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            initial_cash: Decimal::from(1_000_000),
            allow_short: false,
            allow_margin: false,
            commission: CommissionConfig::None,
            slippage: SlippageConfig::None,
            volume_limit: None,
            use_adjusted_prices: false,
            initial_holdings: Vec::new(),
        }
    }
}

impl BrokerConfig {
    pub fn with_cash(initial_cash: Decimal) -> Self {
        Self {
            initial_cash,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_cash < Decimal::ZERO {
            return invalid(format!("initial_cash must be >= 0, got {}", self.initial_cash));
        }
        match self.commission {
            CommissionConfig::None => {}
            CommissionConfig::FixedPerTrade { amount } if amount < Decimal::ZERO => {
                return invalid(format!("commission amount must be >= 0, got {amount}"));
            }
            CommissionConfig::TradePercentage { percentage }
                if percentage < Decimal::ZERO || percentage >= Decimal::ONE =>
            {
                return invalid(format!(
                    "commission percentage must be in [0, 1), got {percentage}"
                ));
            }
            _ => {}
        }
        if let SlippageConfig::VolumeShare { price_impact } = self.slippage {
            if price_impact < Decimal::ZERO {
                return invalid(format!("price_impact must be >= 0, got {price_impact}"));
            }
        }
        if let Some(limit) = &self.volume_limit {
            let p = limit.max_participation;
            if p <= Decimal::ZERO || p > Decimal::ONE {
                return invalid(format!("max_participation must be in (0, 1], got {p}"));
            }
        }
        let mut seen = HashSet::new();
        for holding in &self.initial_holdings {
            if !seen.insert(&holding.instrument) {
                return invalid(format!("duplicate holding for {}", holding.instrument));
            }
            if holding.quantity < 0 && !self.allow_short {
                return invalid(format!(
                    "short holding for {} requires allow_short",
                    holding.instrument
                ));
            }
            if holding.average_cost <= Decimal::ZERO {
                return invalid(format!(
                    "average_cost for {} must be positive",
                    holding.instrument
                ));
            }
        }
        Ok(())
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub broker: BrokerConfig,
}

impl EngineConfig {
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
        self.broker.validate()
    }
}

fn invalid<T>(msg: String) -> Result<T, ConfigError> {
    Err(ConfigError::Invalid(msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::liquidity::RemainderPolicy;
    use rust_decimal_macros::dec;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.broker.initial_cash, dec!(1000000));
    }

    #[test]
    fn parses_full_broker_table() {
        let toml = r#"
            [broker]
            initial_cash = 50000
            allow_short = true
            use_adjusted_prices = true

            [broker.commission]
            model = "fixed_per_trade"
            amount = 1.25

            [broker.slippage]
            model = "volume_share"
            price_impact = 0.1

            [broker.volume_limit]
            max_participation = 0.25
            remainder = "cancel"

            [[broker.initial_holdings]]
            instrument = "SPY"
            quantity = -10
            average_cost = 400
        "#;
        let config = EngineConfig::from_toml_str(toml).unwrap();
        let broker = &config.broker;
        assert_eq!(broker.initial_cash, dec!(50000));
        assert!(broker.allow_short);
        assert!(broker.use_adjusted_prices);
        assert_eq!(
            broker.commission,
            CommissionConfig::FixedPerTrade { amount: dec!(1.25) }
        );
        assert_eq!(
            broker.slippage,
            SlippageConfig::VolumeShare {
                price_impact: dec!(0.1)
            }
        );
        assert_eq!(
            broker.volume_limit,
            Some(VolumeLimit::new(dec!(0.25), RemainderPolicy::Cancel))
        );
        assert_eq!(broker.initial_holdings[0].quantity, -10);
    }

    #[test]
    fn rejects_percentage_of_one() {
        let toml = r#"
            [broker.commission]
            model = "trade_percentage"
            percentage = 1
        "#;
        assert!(matches!(
            EngineConfig::from_toml_str(toml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_short_holding_without_shorting() {
        let mut config = BrokerConfig::default();
        config.initial_holdings.push(Holding {
            instrument: Instrument::from("SPY"),
            quantity: -1,
            average_cost: dec!(10),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_participation() {
        let config = BrokerConfig {
            volume_limit: Some(VolumeLimit::new(Decimal::ZERO, RemainderPolicy::Carry)),
            ..BrokerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            EngineConfig::from_toml_str("[broker\n"),
            Err(ConfigError::Parse(_))
        ));
    }
}
