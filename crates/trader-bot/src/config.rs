//! Application configuration.
//!
//! Loaded from TOML; every section carries serde defaults so a minimal file
//! (one exchange, one trader) runs. Validation happens once at load, not
//! at use.

use crate::error::{AppError, AppResult};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use trader_core::{Exchange, Interval};
use trader_exchange::ExchangeConfig;
use trader_risk::RiskConfig;
use trader_strategy::StrategyKind;

/// Telemetry hub settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_replay_limit")]
    pub replay_limit: usize,
    #[serde(default = "default_heartbeat_seconds")]
    pub heartbeat_seconds: u64,
}

fn default_replay_limit() -> usize {
    256
}

fn default_heartbeat_seconds() -> u64 {
    30
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            replay_limit: default_replay_limit(),
            heartbeat_seconds: default_heartbeat_seconds(),
        }
    }
}

/// Position manager settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionManagerSettings {
    #[serde(default = "default_update_interval_seconds")]
    pub update_interval_seconds: u64,
}

fn default_update_interval_seconds() -> u64 {
    5
}

impl Default for PositionManagerSettings {
    fn default() -> Self {
        Self {
            update_interval_seconds: default_update_interval_seconds(),
        }
    }
}

/// Defaults applied to traders that omit the corresponding fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderDefaults {
    #[serde(default = "default_budget_usd")]
    pub budget_usd: Decimal,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default = "default_stop_loss_percent")]
    pub stop_loss_percent: Decimal,
    #[serde(default = "default_take_profit_percent")]
    pub take_profit_percent: Decimal,
    #[serde(default)]
    pub trailing_stop: bool,
    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,
}

fn default_budget_usd() -> Decimal {
    dec!(10000)
}

fn default_leverage() -> u32 {
    1
}

fn default_stop_loss_percent() -> Decimal {
    dec!(2)
}

fn default_take_profit_percent() -> Decimal {
    dec!(4)
}

fn default_strategy() -> StrategyKind {
    StrategyKind::TrendFollowing
}

impl Default for TraderDefaults {
    fn default() -> Self {
        Self {
            budget_usd: default_budget_usd(),
            leverage: default_leverage(),
            stop_loss_percent: default_stop_loss_percent(),
            take_profit_percent: default_take_profit_percent(),
            trailing_stop: false,
            strategy: default_strategy(),
        }
    }
}

/// One trader. Immutable while the trader runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AITraderConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub exchange: Exchange,
    pub symbol: String,
    /// Paper budget this trader may risk, in quote currency.
    pub virtual_money: Decimal,
    /// Notional per entry.
    pub max_stake_amount: Decimal,
    #[serde(default = "default_max_risk_level")]
    pub max_risk_level: u8,
    /// Stop the trader after this long, when set.
    #[serde(default)]
    pub max_trading_duration_minutes: Option<u64>,
    /// Minimum return target; used to derive the take-profit level when no
    /// explicit percentage is configured.
    #[serde(default = "default_min_return_percent")]
    pub min_return_percent: Decimal,
    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,
    #[serde(default = "default_interval")]
    pub candlestick_interval: Interval,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default)]
    pub stop_loss_percent: Option<Decimal>,
    #[serde(default)]
    pub take_profit_percent: Option<Decimal>,
    #[serde(default)]
    pub trailing_stop: Option<bool>,
    /// Tick period override, mainly for tests; the default is one
    /// candlestick interval.
    #[serde(default)]
    pub tick_seconds: Option<u64>,
}

fn default_max_risk_level() -> u8 {
    5
}

fn default_min_return_percent() -> Decimal {
    dec!(1)
}

fn default_interval() -> Interval {
    Interval::OneHour
}

impl AITraderConfig {
    pub fn validate(&self) -> AppResult<()> {
        if self.id.trim().is_empty() {
            return Err(AppError::Config("trader id must not be empty".into()));
        }
        if !(1..=10).contains(&self.max_risk_level) {
            return Err(AppError::Config(format!(
                "trader {}: max_risk_level {} outside 1..=10",
                self.id, self.max_risk_level
            )));
        }
        if self.virtual_money <= Decimal::ZERO {
            return Err(AppError::Config(format!(
                "trader {}: virtual_money must be positive",
                self.id
            )));
        }
        if self.max_stake_amount <= Decimal::ZERO || self.max_stake_amount > self.virtual_money {
            return Err(AppError::Config(format!(
                "trader {}: max_stake_amount must be in (0, virtual_money]",
                self.id
            )));
        }
        if self.leverage == 0 {
            return Err(AppError::Config(format!(
                "trader {}: leverage must be at least 1",
                self.id
            )));
        }
        Ok(())
    }
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub exchanges: Vec<ExchangeConfig>,
    #[serde(default)]
    pub traders: Vec<AITraderConfig>,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub position_manager: PositionManagerSettings,
    #[serde(default, rename = "trader_defaults")]
    pub defaults: TraderDefaults,
    /// Directory for the trade and pattern journals.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "data".to_string()
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.exchanges.is_empty() {
            return Err(AppError::Config("at least one exchange is required".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for exchange in &self.exchanges {
            if !seen.insert(exchange.exchange) {
                return Err(AppError::Config(format!(
                    "duplicate exchange config for {}",
                    exchange.exchange
                )));
            }
        }
        for trader in &self.traders {
            trader.validate()?;
            if self.exchange_config(trader.exchange).is_none() {
                return Err(AppError::Config(format!(
                    "trader {} references unconfigured exchange {}",
                    trader.id, trader.exchange
                )));
            }
        }
        Ok(())
    }

    pub fn exchange_config(&self, exchange: Exchange) -> Option<&ExchangeConfig> {
        self.exchanges.iter().find(|c| c.exchange == exchange)
    }

    /// Stop-loss percentage for a trader, falling back to the defaults.
    pub fn stop_loss_percent(&self, trader: &AITraderConfig) -> Decimal {
        trader
            .stop_loss_percent
            .unwrap_or(self.defaults.stop_loss_percent)
    }

    /// Take-profit percentage: the trader's own, else max(defaults,
    /// min_return_percent) so the target never undershoots the configured
    /// minimum return.
    pub fn take_profit_percent(&self, trader: &AITraderConfig) -> Decimal {
        trader
            .take_profit_percent
            .unwrap_or_else(|| self.defaults.take_profit_percent.max(trader.min_return_percent))
    }

    pub fn trailing_stop(&self, trader: &AITraderConfig) -> bool {
        trader.trailing_stop.unwrap_or(self.defaults.trailing_stop)
    }
}
