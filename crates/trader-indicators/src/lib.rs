//! Technical indicators over candlestick series.
//!
//! Every indicator is a pure, stateless computation over an ordered candle
//! slice. `calculate` yields the value for the latest position; `calculate_all`
//! yields one slot per candle, padded with `None` where the window cannot be
//! filled yet.
//!
//! All arithmetic is exact `Decimal`; closes are money.

pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;

pub use bollinger::BollingerBands;
pub use ema::ema_series;
pub use macd::Macd;
pub use rsi::Rsi;
pub use sma::Sma;

use thiserror::Error;

/// Indicator computation failures.
///
/// `InsufficientData` is expected steady-state during warm-up; strategies
/// translate it into HOLD, it is never escalated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndicatorError {
    #[error("Insufficient data: need {required} candles, got {got}")]
    InsufficientData { required: usize, got: usize },

    #[error("Invalid period: {0}")]
    InvalidPeriod(String),
}

pub type IndicatorResult<T> = Result<T, IndicatorError>;

/// Extract the close series from a candle slice.
pub(crate) fn closes(candles: &[trader_core::Candle]) -> Vec<rust_decimal::Decimal> {
    candles.iter().map(|c| c.close.inner()).collect()
}

#[cfg(test)]
pub(crate) mod testutil {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use trader_core::{Candle, Interval, Price, Qty};

    /// Build a 1h candle series from close prices; open/high/low follow close.
    pub fn candles_from_closes(closes: &[Decimal]) -> Vec<Candle> {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                symbol: "BTCUSDT".to_string(),
                interval: Interval::OneHour,
                open_time: t0 + Duration::hours(i as i64),
                close_time: t0 + Duration::hours(i as i64 + 1),
                open: Price::new(close),
                high: Price::new(close),
                low: Price::new(close),
                close: Price::new(close),
                volume: Qty::new(Decimal::ONE),
                quote_volume: Qty::new(close),
            })
            .collect()
    }

    pub fn linear(start: i64, count: usize, step: i64) -> Vec<Decimal> {
        (0..count as i64)
            .map(|i| Decimal::from(start + i * step))
            .collect()
    }

    pub fn flat(value: i64, count: usize) -> Vec<Decimal> {
        vec![Decimal::from(value); count]
    }
}
