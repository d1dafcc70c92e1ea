// 7.0 config.rs: every ledger knob in one place. fees, margin rate, starting balance, monitor cadence.
// 7.1 presets at the bottom map an Environment to a validated config.

use crate::math::{MAINTENANCE_MARGIN_RATE, TAKER_FEE_RATE};
use crate::types::Quote;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    // Balance and total_deposit for a fresh or reset account
    pub default_balance: Decimal,
    // Fraction of notional charged on every open and close
    pub taker_fee_rate: Decimal,
    // Maintenance margin rate folded into the liquidation price
    pub maintenance_margin_rate: Decimal,
    // Highest leverage a caller may request
    pub max_leverage: u32,
    // Position monitor tick when no price update arrives
    pub monitor_interval_ms: u64,
    // Page size for trade history reads
    pub trade_history_limit: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_balance: dec!(10_000),
            taker_fee_rate: TAKER_FEE_RATE,
            maintenance_margin_rate: MAINTENANCE_MARGIN_RATE,
            max_leverage: 125,
            monitor_interval_ms: 1_000,
            trade_history_limit: 100,
        }
    }
}

impl LedgerConfig {
    // Low-leverage preset for onboarding accounts
    pub fn conservative() -> Self {
        Self {
            max_leverage: 20,
            ..Self::default()
        }
    }

    // Larger bankroll for competitions
    pub fn high_balance() -> Self {
        Self {
            default_balance: dec!(100_000),
            ..Self::default()
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_balance <= Decimal::ZERO {
            return Err(ConfigError::InvalidBalance {
                reason: "default balance must be positive".to_string(),
            });
        }

        if self.taker_fee_rate < Decimal::ZERO || self.taker_fee_rate >= dec!(0.01) {
            return Err(ConfigError::InvalidFees {
                reason: "taker fee must be in [0, 1%)".to_string(),
            });
        }

        if self.maintenance_margin_rate <= Decimal::ZERO
            || self.maintenance_margin_rate >= Decimal::ONE
        {
            return Err(ConfigError::InvalidMargin {
                reason: "maintenance margin rate must be between 0 and 1".to_string(),
            });
        }

        if self.max_leverage == 0 {
            return Err(ConfigError::InvalidMargin {
                reason: "max leverage must be at least 1".to_string(),
            });
        }

        if self.monitor_interval_ms == 0 {
            return Err(ConfigError::InvalidMonitor {
                reason: "monitor interval must be positive".to_string(),
            });
        }

        Ok(())
    }

    pub fn starting_balance(&self) -> Quote {
        Quote::new(self.default_balance)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid balance config: {reason}")]
    InvalidBalance { reason: String },
    #[error("invalid fee config: {reason}")]
    InvalidFees { reason: String },
    #[error("invalid margin config: {reason}")]
    InvalidMargin { reason: String },
    #[error("invalid monitor config: {reason}")]
    InvalidMonitor { reason: String },
    #[error("could not parse config: {0}")]
    Parse(String),
}

// Environment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Competition,
    Conservative,
}

impl Environment {
    pub fn config(&self) -> LedgerConfig {
        match self {
            Environment::Development => LedgerConfig::default(),
            Environment::Competition => LedgerConfig::high_balance(),
            Environment::Conservative => LedgerConfig::conservative(),
        }
    }
}
