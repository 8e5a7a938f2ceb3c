//! Candle window validation and indicator computation with caching.

use crate::spec::IndicatorSpec;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, trace};
use trader_core::{Candle, IndicatorSet, Price};
use trader_indicators::IndicatorError;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Empty candle window")]
    EmptyWindow,

    #[error("Candles out of order at index {index}")]
    OutOfOrder { index: usize },

    #[error("Mixed intervals in window")]
    MixedIntervals,

    /// A required indicator cannot be computed yet. Strategies map this to
    /// HOLD; it is never escalated.
    #[error("Insufficient data for {indicator}: {source}")]
    Insufficient {
        indicator: String,
        source: IndicatorError,
    },

    #[error("Indicator error: {0}")]
    Indicator(#[from] IndicatorError),
}

pub type ProcessorResult<T> = Result<T, ProcessorError>;

/// Validated window with computed indicators.
#[derive(Debug, Clone)]
pub struct ProcessedData {
    pub candles: Vec<Candle>,
    pub latest_price: Price,
    pub indicators: IndicatorSet,
    pub timestamp: DateTime<Utc>,
}

/// Cache key: identity of the tail window.
///
/// A new candle shifts `last_open_time` (and usually `len`), which
/// invalidates the entry automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CacheKey {
    symbol: String,
    len: usize,
    last_open_time: DateTime<Utc>,
    specs: Vec<IndicatorSpec>,
}

struct CacheEntry {
    key: CacheKey,
    indicators: IndicatorSet,
}

/// Validates candle windows and computes the indicators a strategy requires.
///
/// The latest indicator set is cached keyed by the tail window, so repeated
/// evaluation within one tick (or by the monitoring loop) does not recompute.
pub struct MarketDataProcessor {
    cache: Mutex<Option<CacheEntry>>,
}

impl MarketDataProcessor {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(None),
        }
    }

    /// Validate the window and compute `required` indicators.
    ///
    /// Candles with a duplicated open time are dropped (first occurrence
    /// wins); a decreasing open time is rejected.
    pub fn process(
        &self,
        candles: &[Candle],
        required: &[IndicatorSpec],
    ) -> ProcessorResult<ProcessedData> {
        let window = validate_window(candles)?;
        let last = window.last().ok_or(ProcessorError::EmptyWindow)?;

        let key = CacheKey {
            symbol: last.symbol.clone(),
            len: window.len(),
            last_open_time: last.open_time,
            specs: required.to_vec(),
        };

        if let Some(entry) = self.cache.lock().as_ref() {
            if entry.key == key {
                trace!(symbol = %key.symbol, "indicator cache hit");
                return Ok(ProcessedData {
                    candles: window.clone(),
                    latest_price: last.close,
                    indicators: entry.indicators.clone(),
                    timestamp: Utc::now(),
                });
            }
        }

        let mut indicators = IndicatorSet::new();
        for spec in required {
            let value = spec.compute(&window).map_err(|e| match e {
                IndicatorError::InsufficientData { .. } => ProcessorError::Insufficient {
                    indicator: spec.id().to_string(),
                    source: e,
                },
                other => ProcessorError::Indicator(other),
            })?;
            indicators.insert(spec.id(), value);
        }

        debug!(
            symbol = %key.symbol,
            candles = window.len(),
            indicators = indicators.len(),
            "processed market data window"
        );

        *self.cache.lock() = Some(CacheEntry {
            key,
            indicators: indicators.clone(),
        });

        Ok(ProcessedData {
            latest_price: last.close,
            candles: window,
            indicators,
            timestamp: Utc::now(),
        })
    }

    /// Drop the cached indicator set.
    pub fn clear_cache(&self) {
        *self.cache.lock() = None;
    }
}

impl Default for MarketDataProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Enforce strictly increasing open times, dropping exact duplicates.
fn validate_window(candles: &[Candle]) -> ProcessorResult<Vec<Candle>> {
    if candles.is_empty() {
        return Err(ProcessorError::EmptyWindow);
    }

    let interval = candles[0].interval;
    let mut out: Vec<Candle> = Vec::with_capacity(candles.len());
    for (index, candle) in candles.iter().enumerate() {
        if candle.interval != interval {
            return Err(ProcessorError::MixedIntervals);
        }
        match out.last() {
            Some(prev) if candle.open_time == prev.open_time => {
                trace!(index, open_time = %candle.open_time, "dropping duplicate candle");
                continue;
            }
            Some(prev) if candle.open_time < prev.open_time => {
                return Err(ProcessorError::OutOfOrder { index });
            }
            _ => out.push(candle.clone()),
        }
    }
    Ok(out)
}
