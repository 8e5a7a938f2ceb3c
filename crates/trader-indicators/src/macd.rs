//! Moving Average Convergence Divergence.

use crate::ema::ema_series;
use crate::{closes, IndicatorError, IndicatorResult};
use trader_core::{Candle, MacdValue};

pub const DEFAULT_MACD_FAST: usize = 12;
pub const DEFAULT_MACD_SLOW: usize = 26;
pub const DEFAULT_MACD_SIGNAL: usize = 9;

/// MACD line = EMA(fast) − EMA(slow); signal = EMA(MACD, signal period);
/// histogram = MACD − signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Macd {
    fast: usize,
    slow: usize,
    signal: usize,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> IndicatorResult<Self> {
        if fast == 0 || slow == 0 || signal == 0 {
            return Err(IndicatorError::InvalidPeriod(
                "MACD periods must be > 0".into(),
            ));
        }
        if fast >= slow {
            return Err(IndicatorError::InvalidPeriod(format!(
                "MACD fast period {fast} must be < slow period {slow}"
            )));
        }
        Ok(Self { fast, slow, signal })
    }

    /// Candles needed for one value.
    pub fn required_candles(&self) -> usize {
        self.slow + self.signal - 1
    }

    /// MACD for the latest close.
    pub fn calculate(&self, candles: &[Candle]) -> IndicatorResult<MacdValue> {
        let series = self.series(candles)?;
        Ok(*series.last().unwrap())
    }

    /// One slot per candle; the first `slow + signal - 2` slots are `None`.
    pub fn calculate_all(&self, candles: &[Candle]) -> Vec<Option<MacdValue>> {
        let head = candles.len().min(self.required_candles() - 1);
        let mut out = vec![None; head];
        if let Ok(series) = self.series(candles) {
            out.extend(series.into_iter().map(Some));
        }
        out
    }

    fn series(&self, candles: &[Candle]) -> IndicatorResult<Vec<MacdValue>> {
        if candles.len() < self.required_candles() {
            return Err(IndicatorError::InsufficientData {
                required: self.required_candles(),
                got: candles.len(),
            });
        }

        let series = closes(candles);
        let ema_fast = ema_series(&series, self.fast);
        let ema_slow = ema_series(&series, self.slow);

        // EMA(fast) starts (slow - fast) positions earlier; align on the
        // slow series.
        let offset = self.slow - self.fast;
        let macd_line: Vec<_> = ema_slow
            .iter()
            .enumerate()
            .map(|(i, &slow)| ema_fast[i + offset] - slow)
            .collect();

        let signal_line = ema_series(&macd_line, self.signal);
        let macd_offset = macd_line.len() - signal_line.len();

        Ok(signal_line
            .iter()
            .enumerate()
            .map(|(i, &signal)| {
                let macd = macd_line[i + macd_offset];
                MacdValue {
                    macd,
                    signal,
                    histogram: macd - signal,
                }
            })
            .collect())
    }
}

impl Default for Macd {
    fn default() -> Self {
        Self {
            fast: DEFAULT_MACD_FAST,
            slow: DEFAULT_MACD_SLOW,
            signal: DEFAULT_MACD_SIGNAL,
        }
    }
}
