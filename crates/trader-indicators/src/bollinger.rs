//! Bollinger Bands.

use crate::sma::mean;
use crate::{closes, IndicatorError, IndicatorResult};
use rust_decimal::{Decimal, MathematicalOps};
use trader_core::{BollingerValue, Candle, Price};

pub const DEFAULT_BOLLINGER_PERIOD: usize = 20;
pub const DEFAULT_BOLLINGER_K: u32 = 2;

/// Middle = SMA(period); upper/lower = middle ± k·σ with population σ over
/// the window. A flat window collapses all three bands onto the middle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BollingerBands {
    period: usize,
    k: Decimal,
}

impl BollingerBands {
    pub fn new(period: usize, k: Decimal) -> IndicatorResult<Self> {
        if period < 2 {
            return Err(IndicatorError::InvalidPeriod(
                "Bollinger period must be >= 2".into(),
            ));
        }
        if k <= Decimal::ZERO {
            return Err(IndicatorError::InvalidPeriod(
                "Bollinger k must be > 0".into(),
            ));
        }
        Ok(Self { period, k })
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Bands for the latest window.
    pub fn calculate(&self, candles: &[Candle]) -> IndicatorResult<BollingerValue> {
        if candles.len() < self.period {
            return Err(IndicatorError::InsufficientData {
                required: self.period,
                got: candles.len(),
            });
        }
        let series = closes(candles);
        Ok(self.window(&series[series.len() - self.period..]))
    }

    /// One slot per candle; the first `period - 1` slots are `None`.
    pub fn calculate_all(&self, candles: &[Candle]) -> Vec<Option<BollingerValue>> {
        let series = closes(candles);
        (0..series.len())
            .map(|i| {
                if i + 1 < self.period {
                    None
                } else {
                    Some(self.window(&series[i + 1 - self.period..=i]))
                }
            })
            .collect()
    }

    fn window(&self, window: &[Decimal]) -> BollingerValue {
        let middle = mean(window);
        let variance = window
            .iter()
            .map(|x| {
                let d = x - middle;
                d * d
            })
            .sum::<Decimal>()
            / Decimal::from(window.len() as u64);
        let sigma = variance.sqrt().unwrap_or(Decimal::ZERO);

        let upper = middle + self.k * sigma;
        let lower = middle - self.k * sigma;
        let bandwidth = if middle.is_zero() {
            Decimal::ZERO
        } else {
            (upper - lower) / middle
        };

        BollingerValue {
            upper: Price::new(upper),
            middle: Price::new(middle),
            lower: Price::new(lower),
            bandwidth,
        }
    }
}

impl Default for BollingerBands {
    fn default() -> Self {
        Self {
            period: DEFAULT_BOLLINGER_PERIOD,
            k: Decimal::from(DEFAULT_BOLLINGER_K),
        }
    }
}
