//! Indicator requirements declared by strategies.

use rust_decimal::Decimal;
use trader_core::{Candle, IndicatorId, IndicatorValue};
use trader_indicators::{BollingerBands, IndicatorResult, Macd, Rsi, Sma};

/// A required indicator with its parameters.
///
/// Strategies declare these; the processor computes them and keys the
/// output by [`IndicatorId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorSpec {
    SmaShort { period: usize },
    SmaLong { period: usize },
    Rsi { period: usize },
    Macd { fast: usize, slow: usize, signal: usize },
    Bollinger { period: usize, k: u32 },
}

impl IndicatorSpec {
    pub fn id(&self) -> IndicatorId {
        match self {
            Self::SmaShort { .. } => IndicatorId::SmaShort,
            Self::SmaLong { .. } => IndicatorId::SmaLong,
            Self::Rsi { .. } => IndicatorId::Rsi,
            Self::Macd { .. } => IndicatorId::Macd,
            Self::Bollinger { .. } => IndicatorId::Bollinger,
        }
    }

    /// Minimum candles needed for one value.
    pub fn required_candles(&self) -> usize {
        match *self {
            Self::SmaShort { period } | Self::SmaLong { period } => period,
            Self::Rsi { period } => period + 1,
            Self::Macd { slow, signal, .. } => slow + signal - 1,
            Self::Bollinger { period, .. } => period,
        }
    }

    /// Compute this indicator over the validated window.
    pub fn compute(&self, candles: &[Candle]) -> IndicatorResult<IndicatorValue> {
        match *self {
            Self::SmaShort { period } | Self::SmaLong { period } => {
                Ok(IndicatorValue::scalar(Sma::new(period)?.calculate(candles)?))
            }
            Self::Rsi { period } => {
                Ok(IndicatorValue::scalar(Rsi::new(period)?.calculate(candles)?))
            }
            Self::Macd { fast, slow, signal } => Ok(IndicatorValue::Macd(
                Macd::new(fast, slow, signal)?.calculate(candles)?,
            )),
            Self::Bollinger { period, k } => Ok(IndicatorValue::Bollinger(
                BollingerBands::new(period, Decimal::from(k))?.calculate(candles)?,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_candles() {
        assert_eq!(IndicatorSpec::SmaShort { period: 10 }.required_candles(), 10);
        assert_eq!(IndicatorSpec::Rsi { period: 14 }.required_candles(), 15);
        assert_eq!(
            IndicatorSpec::Macd {
                fast: 12,
                slow: 26,
                signal: 9
            }
            .required_candles(),
            34
        );
        assert_eq!(
            IndicatorSpec::Bollinger { period: 20, k: 2 }.required_candles(),
            20
        );
    }

    #[test]
    fn test_spec_ids_are_distinct() {
        let specs = [
            IndicatorSpec::SmaShort { period: 10 },
            IndicatorSpec::SmaLong { period: 30 },
            IndicatorSpec::Rsi { period: 14 },
            IndicatorSpec::Macd {
                fast: 12,
                slow: 26,
                signal: 9,
            },
            IndicatorSpec::Bollinger { period: 20, k: 2 },
        ];
        let ids: std::collections::BTreeSet<_> = specs.iter().map(|s| s.id()).collect();
        assert_eq!(ids.len(), specs.len());
    }
}
