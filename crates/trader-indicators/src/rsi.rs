//! Relative Strength Index with Wilder's smoothing.
//!
//! Seed averages are simple means of the first `period` gains/losses;
//! subsequent values use `avg = (avg * (period - 1) + x) / period`.
//! All-gain windows yield 100, all-loss windows 0, and a window with no
//! movement at all yields the neutral 50.

use crate::{closes, IndicatorError, IndicatorResult};
use rust_decimal::Decimal;
use trader_core::Candle;

pub const DEFAULT_RSI_PERIOD: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rsi {
    period: usize,
}

impl Rsi {
    pub fn new(period: usize) -> IndicatorResult<Self> {
        if period == 0 {
            return Err(IndicatorError::InvalidPeriod("RSI period must be > 0".into()));
        }
        Ok(Self { period })
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Candles needed for one value: `period` deltas require `period + 1`
    /// closes.
    pub fn required_candles(&self) -> usize {
        self.period + 1
    }

    /// RSI for the latest close.
    pub fn calculate(&self, candles: &[Candle]) -> IndicatorResult<Decimal> {
        let series = self.series(candles)?;
        // series is non-empty whenever the length check passed
        Ok(*series.last().unwrap())
    }

    /// One slot per candle; the first `period` slots are `None`.
    pub fn calculate_all(&self, candles: &[Candle]) -> Vec<Option<Decimal>> {
        let mut out = vec![None; candles.len().min(self.period)];
        if let Ok(series) = self.series(candles) {
            out.extend(series.into_iter().map(Some));
        }
        out
    }

    fn series(&self, candles: &[Candle]) -> IndicatorResult<Vec<Decimal>> {
        if candles.len() < self.required_candles() {
            return Err(IndicatorError::InsufficientData {
                required: self.required_candles(),
                got: candles.len(),
            });
        }

        let series = closes(candles);
        let deltas: Vec<Decimal> = series.windows(2).map(|w| w[1] - w[0]).collect();

        let period = Decimal::from(self.period as u64);
        let (mut avg_gain, mut avg_loss) = deltas[..self.period].iter().fold(
            (Decimal::ZERO, Decimal::ZERO),
            |(g, l), &d| {
                if d > Decimal::ZERO {
                    (g + d, l)
                } else {
                    (g, l + d.abs())
                }
            },
        );
        avg_gain /= period;
        avg_loss /= period;

        let mut out = Vec::with_capacity(deltas.len() - self.period + 1);
        out.push(rsi_from_averages(avg_gain, avg_loss));

        let prev_weight = period - Decimal::ONE;
        for &delta in &deltas[self.period..] {
            let gain = delta.max(Decimal::ZERO);
            let loss = (-delta).max(Decimal::ZERO);
            avg_gain = (avg_gain * prev_weight + gain) / period;
            avg_loss = (avg_loss * prev_weight + loss) / period;
            out.push(rsi_from_averages(avg_gain, avg_loss));
        }
        Ok(out)
    }
}

/// RSI in [0, 100] from smoothed averages.
fn rsi_from_averages(avg_gain: Decimal, avg_loss: Decimal) -> Decimal {
    if avg_loss.is_zero() && avg_gain.is_zero() {
        // No movement at all: neutral.
        return Decimal::from(50);
    }
    if avg_loss.is_zero() {
        return Decimal::from(100);
    }
    let rs = avg_gain / avg_loss;
    Decimal::from(100) - Decimal::from(100) / (Decimal::ONE + rs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{candles_from_closes, flat, linear};
    use rust_decimal_macros::dec;

    #[test]
    fn test_insufficient_data() {
        // 14 closes give only 13 deltas.
        let candles = candles_from_closes(&linear(1, 14, 1));
        assert!(Rsi::new(14).unwrap().calculate(&candles).is_err());
    }

    #[test]
    fn test_all_gains_is_100() {
        let candles = candles_from_closes(&linear(1, 30, 1));
        let rsi = Rsi::new(14).unwrap().calculate(&candles).unwrap();
        assert_eq!(rsi, dec!(100));
    }

    #[test]
    fn test_all_losses_is_0() {
        let closes: Vec<_> = linear(1, 30, 1).into_iter().rev().collect();
        let candles = candles_from_closes(&closes);
        let rsi = Rsi::new(14).unwrap().calculate(&candles).unwrap();
        assert_eq!(rsi, dec!(0));
    }

    #[test]
    fn test_flat_series_is_neutral() {
        let candles = candles_from_closes(&flat(100, 30));
        let rsi = Rsi::new(14).unwrap().calculate(&candles).unwrap();
        assert_eq!(rsi, dec!(50));
    }

    #[test]
    fn test_range_bound() {
        let closes = [
            dec!(44.34),
            dec!(44.09),
            dec!(44.15),
            dec!(43.61),
            dec!(44.33),
            dec!(44.83),
            dec!(45.10),
            dec!(45.42),
            dec!(45.84),
            dec!(46.08),
            dec!(45.89),
            dec!(46.03),
            dec!(44.18),
            dec!(44.22),
            dec!(44.57),
            dec!(43.42),
            dec!(42.66),
            dec!(43.13),
        ];
        let candles = candles_from_closes(&closes);
        for v in Rsi::new(14).unwrap().calculate_all(&candles).into_iter().flatten() {
            assert!(v >= dec!(0) && v <= dec!(100), "RSI {v} out of range");
        }
    }

    #[test]
    fn test_calculate_all_head_padding() {
        let candles = candles_from_closes(&linear(1, 20, 1));
        let all = Rsi::new(14).unwrap().calculate_all(&candles);
        assert_eq!(all.len(), 20);
        assert!(all[..14].iter().all(Option::is_none));
        assert!(all[14..].iter().all(Option::is_some));
    }

    #[test]
    fn test_drop_after_flat_is_oversold() {
        // 20 flat closes then one sharp drop: only losses in the window.
        let mut closes = flat(50000, 20);
        closes.push(dec!(47500));
        let candles = candles_from_closes(&closes);
        let rsi = Rsi::new(14).unwrap().calculate(&candles).unwrap();
        assert_eq!(rsi, dec!(0));
    }
}
