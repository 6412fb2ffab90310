//! Configuration - type-safe engine config loaded from TOML

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::clock::ClockMode;
use crate::core::error::{Error, Result};
use crate::core::types::RiskLimits;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Clock mode: live, backtest or simulated
    pub mode: ClockMode,

    /// Virtual-time rate for simulated mode (virtual seconds per wall second)
    pub simulation_rate: f64,

    /// Symbols to maintain order books for at startup
    pub symbols: Vec<String>,

    /// Risk limit settings
    pub risk: RiskConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maximum absolute position size per symbol (base units)
    pub max_position_size: f64,

    /// Maximum single order size (base units)
    pub max_order_size: f64,

    /// Maximum daily loss before new orders are rejected
    pub max_daily_loss: f64,

    /// Maximum drawdown limit
    pub max_drawdown: f64,

    /// Order rate limit
    pub max_orders_per_second: u32,

    pub enable_position_limits: bool,
    pub enable_order_limits: bool,
    pub enable_loss_limits: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ClockMode::Live,
            simulation_rate: 1.0,
            symbols: vec!["BTC-USDT".to_string()],
            risk: RiskConfig::default(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        let limits = RiskLimits::default();
        Self {
            max_position_size: 1000.0,
            max_order_size: 100.0,
            max_daily_loss: 10_000.0,
            max_drawdown: 0.0,
            max_orders_per_second: limits.max_orders_per_second,
            enable_position_limits: limits.enable_position_limits,
            enable_order_limits: limits.enable_order_limits,
            enable_loss_limits: limits.enable_loss_limits,
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("failed to read config: {e}")))?;

        toml::from_str(&content).map_err(|e| Error::Config(format!("failed to parse config: {e}")))
    }

    /// Risk limits for the trading core
    pub fn risk_limits(&self) -> RiskLimits {
        let dec = |v: f64| Decimal::try_from(v).unwrap_or(Decimal::ZERO);
        RiskLimits {
            max_position_size: dec(self.risk.max_position_size),
            max_order_size: dec(self.risk.max_order_size),
            max_daily_loss: dec(self.risk.max_daily_loss),
            max_drawdown: dec(self.risk.max_drawdown),
            max_orders_per_second: self.risk.max_orders_per_second,
            enable_position_limits: self.risk.enable_position_limits,
            enable_order_limits: self.risk.enable_order_limits,
            enable_loss_limits: self.risk.enable_loss_limits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_src = r#"
            mode = "backtest"
            simulation_rate = 10.0
            symbols = ["BTC-USDT", "ETH-USDT"]

            [risk]
            max_position_size = 5.0
            max_order_size = 1.0
            max_daily_loss = 500.0
            max_drawdown = 0.2
            max_orders_per_second = 50
            enable_position_limits = true
            enable_order_limits = true
            enable_loss_limits = false
        "#;

        let config: EngineConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(config.mode, ClockMode::Backtest);
        assert_eq!(config.symbols.len(), 2);

        let limits = config.risk_limits();
        assert_eq!(limits.max_order_size, Decimal::from(1));
        assert_eq!(limits.max_daily_loss, Decimal::from(500));
        assert!(!limits.enable_loss_limits);
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.mode, ClockMode::Live);
        let limits = config.risk_limits();
        assert_eq!(limits.max_position_size, Decimal::from(1000));
    }
}
