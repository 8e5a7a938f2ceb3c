//! Strategy evaluators.
//!
//! A strategy consumes a processed candle window and emits a
//! [`TradingSignal`]. HOLD is the default whenever data is insufficient or
//! any threshold check fails; evaluation never errors.

pub mod breakout;
pub mod reversion;
pub mod trend;

pub use breakout::Breakout;
pub use reversion::MeanReversion;
pub use trend::TrendFollowing;

use serde::{Deserialize, Serialize};
use std::fmt;
use trader_core::TradingSignal;
use trader_market::{IndicatorSpec, ProcessedData};

/// Configured strategy variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    TrendFollowing,
    MeanReversion,
    Breakout,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrendFollowing => write!(f, "trend_following"),
            Self::MeanReversion => write!(f, "mean_reversion"),
            Self::Breakout => write!(f, "breakout"),
        }
    }
}

/// A strategy instance owned by one trader.
///
/// Breakout keeps per-symbol memory across ticks, so evaluation takes
/// `&mut self`.
#[derive(Debug, Clone)]
pub enum Strategy {
    TrendFollowing(TrendFollowing),
    MeanReversion(MeanReversion),
    Breakout(Breakout),
}

impl Strategy {
    pub fn from_kind(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::TrendFollowing => Self::TrendFollowing(TrendFollowing::default()),
            StrategyKind::MeanReversion => Self::MeanReversion(MeanReversion::default()),
            StrategyKind::Breakout => Self::Breakout(Breakout::default()),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::TrendFollowing(_) => StrategyKind::TrendFollowing,
            Self::MeanReversion(_) => StrategyKind::MeanReversion,
            Self::Breakout(_) => StrategyKind::Breakout,
        }
    }

    /// Indicators the processor must compute for this strategy.
    pub fn required_indicators(&self) -> Vec<IndicatorSpec> {
        match self {
            Self::TrendFollowing(s) => s.required_indicators(),
            Self::MeanReversion(s) => s.required_indicators(),
            Self::Breakout(s) => s.required_indicators(),
        }
    }

    /// Candles the trader should fetch per tick.
    ///
    /// The largest indicator warm-up plus a few candles of slack so one
    /// dropped duplicate does not starve the window.
    pub fn required_data_points(&self) -> usize {
        let base = self
            .required_indicators()
            .iter()
            .map(IndicatorSpec::required_candles)
            .max()
            .unwrap_or(1);
        base + 6
    }

    pub fn evaluate(&mut self, data: &ProcessedData) -> TradingSignal {
        match self {
            Self::TrendFollowing(s) => s.evaluate(data),
            Self::MeanReversion(s) => s.evaluate(data),
            Self::Breakout(s) => s.evaluate(data),
        }
    }
}
