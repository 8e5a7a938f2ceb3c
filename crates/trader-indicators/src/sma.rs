//! Simple moving average.

use crate::{closes, IndicatorError, IndicatorResult};
use rust_decimal::Decimal;
use trader_core::Candle;

/// Arithmetic mean of the last `period` closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sma {
    period: usize,
}

impl Sma {
    pub fn new(period: usize) -> IndicatorResult<Self> {
        if period == 0 {
            return Err(IndicatorError::InvalidPeriod("SMA period must be > 0".into()));
        }
        Ok(Self { period })
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// SMA for the latest position. Requires at least `period` candles.
    pub fn calculate(&self, candles: &[Candle]) -> IndicatorResult<Decimal> {
        if candles.len() < self.period {
            return Err(IndicatorError::InsufficientData {
                required: self.period,
                got: candles.len(),
            });
        }
        let series = closes(candles);
        Ok(mean(&series[series.len() - self.period..]))
    }

    /// One value per candle, `None` while the window is not yet filled.
    pub fn calculate_all(&self, candles: &[Candle]) -> Vec<Option<Decimal>> {
        let series = closes(candles);
        (0..series.len())
            .map(|i| {
                if i + 1 < self.period {
                    None
                } else {
                    Some(mean(&series[i + 1 - self.period..=i]))
                }
            })
            .collect()
    }
}

pub(crate) fn mean(values: &[Decimal]) -> Decimal {
    let sum: Decimal = values.iter().copied().sum();
    sum / Decimal::from(values.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{candles_from_closes, linear};
    use rust_decimal_macros::dec;

    #[test]
    fn test_zero_period_rejected() {
        assert!(Sma::new(0).is_err());
    }

    #[test]
    fn test_sma_equals_mean_of_tail() {
        // closes 1..=10, SMA(3) = mean(8, 9, 10)
        let candles = candles_from_closes(&linear(1, 10, 1));
        let sma = Sma::new(3).unwrap();
        assert_eq!(sma.calculate(&candles).unwrap(), dec!(9));
    }

    #[test]
    fn test_insufficient_data() {
        let candles = candles_from_closes(&linear(1, 4, 1));
        let err = Sma::new(5).unwrap().calculate(&candles).unwrap_err();
        assert_eq!(
            err,
            IndicatorError::InsufficientData {
                required: 5,
                got: 4
            }
        );
    }

    #[test]
    fn test_calculate_all_pads_head() {
        let candles = candles_from_closes(&linear(1, 5, 1));
        let all = Sma::new(3).unwrap().calculate_all(&candles);
        assert_eq!(all.len(), 5);
        assert_eq!(&all[..2], &[None, None]);
        assert_eq!(all[2], Some(dec!(2)));
        assert_eq!(all[4], Some(dec!(4)));
    }
}
