//! Trend-following strategy.
//!
//! BUY when the short SMA is above the long SMA with a bullish MACD and RSI
//! confirming momentum; SELL mirror. The RSI band gates momentum against the
//! signal direction (a BUY needs RSI above the floor, a SELL needs RSI below
//! the ceiling); an overbought/overextended RSI damps confidence instead of
//! blocking, so a strong established trend still signals.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::trace;
use trader_core::{IndicatorId, SignalAction, TradingSignal};
use trader_market::{IndicatorSpec, ProcessedData};

#[derive(Debug, Clone)]
pub struct TrendFollowing {
    pub sma_short_period: usize,
    pub sma_long_period: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    /// BUY requires RSI above this floor; SELL mirrors at `100 - floor`.
    pub rsi_momentum_floor: Decimal,
    /// Beyond this extreme (and its mirror) confidence is damped.
    pub rsi_extreme: Decimal,
    /// Confidence damping factor applied at an RSI extreme.
    pub extreme_damping: f64,
}

impl Default for TrendFollowing {
    fn default() -> Self {
        Self {
            sma_short_period: 10,
            sma_long_period: 30,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            rsi_momentum_floor: dec!(40),
            rsi_extreme: dec!(70),
            extreme_damping: 0.8,
        }
    }
}

impl TrendFollowing {
    pub fn required_indicators(&self) -> Vec<IndicatorSpec> {
        vec![
            IndicatorSpec::SmaShort {
                period: self.sma_short_period,
            },
            IndicatorSpec::SmaLong {
                period: self.sma_long_period,
            },
            IndicatorSpec::Rsi {
                period: self.rsi_period,
            },
            IndicatorSpec::Macd {
                fast: self.macd_fast,
                slow: self.macd_slow,
                signal: self.macd_signal,
            },
        ]
    }

    pub fn evaluate(&self, data: &ProcessedData) -> TradingSignal {
        let indicators = &data.indicators;

        let (Some(sma_short), Some(sma_long), Some(rsi), Some(macd)) = (
            indicators.get(&IndicatorId::SmaShort).and_then(|v| v.as_scalar()),
            indicators.get(&IndicatorId::SmaLong).and_then(|v| v.as_scalar()),
            indicators.get(&IndicatorId::Rsi).and_then(|v| v.as_scalar()),
            indicators.get(&IndicatorId::Macd).and_then(|v| v.as_macd()),
        ) else {
            return TradingSignal::hold("required indicators unavailable", indicators.clone());
        };

        let macd_bullish = macd.macd > macd.signal;
        let macd_bearish = macd.macd < macd.signal;
        let rsi_ceiling = Decimal::from(100) - self.rsi_momentum_floor;

        if sma_short > sma_long && macd_bullish {
            if rsi <= self.rsi_momentum_floor {
                return TradingSignal::hold(
                    format!("uptrend without momentum: RSI {rsi} at or below floor"),
                    indicators.clone(),
                );
            }
            let (confidence, note) = self.confidence(sma_short, sma_long, rsi >= self.rsi_extreme);
            return TradingSignal::new(
                SignalAction::Buy,
                confidence,
                format!("SMA short {sma_short} above long {sma_long}, MACD bullish, RSI {rsi}{note}"),
                indicators.clone(),
            );
        }

        if sma_short < sma_long && macd_bearish {
            if rsi >= rsi_ceiling {
                return TradingSignal::hold(
                    format!("downtrend without momentum: RSI {rsi} at or above ceiling"),
                    indicators.clone(),
                );
            }
            let oversold = rsi <= Decimal::from(100) - self.rsi_extreme;
            let (confidence, note) = self.confidence(sma_long, sma_short, oversold);
            return TradingSignal::new(
                SignalAction::Sell,
                confidence,
                format!("SMA short {sma_short} below long {sma_long}, MACD bearish, RSI {rsi}{note}"),
                indicators.clone(),
            );
        }

        trace!(%sma_short, %sma_long, %rsi, "trend conditions unmet");
        TradingSignal::hold("trend conditions unmet", indicators.clone())
    }

    /// Confidence scales with the SMA gap, bounded to [0, 1].
    fn confidence(&self, larger: Decimal, smaller: Decimal, extreme: bool) -> (f64, &'static str) {
        if smaller.is_zero() {
            return (0.0, "");
        }
        let gap = ((larger - smaller) / smaller).to_f64().unwrap_or(0.0);
        let raw = (gap * 10.0).clamp(0.0, 1.0);
        if extreme {
            (raw * self.extreme_damping, " (extended, damped)")
        } else {
            (raw, "")
        }
    }
}
