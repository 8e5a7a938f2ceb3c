//! Breakout strategy.
//!
//! BUY when the close clears the upper Bollinger band by a configured margin
//! with a positive MACD histogram and no recent retracement through the
//! middle band; SELL mirror. A breakout whose close falls back through the
//! breakout band within the confirmation window is a false breakout and
//! forces HOLD for a cooldown period.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;
use trader_core::{Candle, IndicatorId, Price, SignalAction, TradeSide, TradingSignal};
use trader_market::{IndicatorSpec, ProcessedData};

/// Memory of the last breakout, pending confirmation or rejection.
#[derive(Debug, Clone)]
struct PendingBreakout {
    direction: TradeSide,
    /// Open time of the breakout candle.
    open_time: DateTime<Utc>,
    /// The band level the close must stay beyond to confirm.
    level: Price,
    /// Candles left before the breakout counts as confirmed.
    candles_left: usize,
}

#[derive(Debug, Clone)]
pub struct Breakout {
    pub bollinger_period: usize,
    pub bollinger_k: u32,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    /// Minimum excursion beyond the band, as a fraction (5‰ default).
    pub breakout_margin: Decimal,
    /// Candles a breakout must hold before it is trusted.
    pub confirmation_candles: usize,
    /// Lookback for the retracement-through-middle check.
    pub retracement_lookback: usize,
    /// Candles to stay flat after a false breakout.
    pub cooldown_candles: usize,

    pending: Option<PendingBreakout>,
    cooldown_until: Option<DateTime<Utc>>,
}

impl Default for Breakout {
    fn default() -> Self {
        Self {
            bollinger_period: 20,
            bollinger_k: 2,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            breakout_margin: dec!(0.005),
            confirmation_candles: 3,
            retracement_lookback: 3,
            cooldown_candles: 3,
            pending: None,
            cooldown_until: None,
        }
    }
}

impl Breakout {
    pub fn required_indicators(&self) -> Vec<IndicatorSpec> {
        vec![
            IndicatorSpec::Bollinger {
                period: self.bollinger_period,
                k: self.bollinger_k,
            },
            IndicatorSpec::Macd {
                fast: self.macd_fast,
                slow: self.macd_slow,
                signal: self.macd_signal,
            },
        ]
    }

    pub fn evaluate(&mut self, data: &ProcessedData) -> TradingSignal {
        let indicators = &data.indicators;

        let (Some(bands), Some(macd)) = (
            indicators.get(&IndicatorId::Bollinger).and_then(|v| v.as_bollinger()),
            indicators.get(&IndicatorId::Macd).and_then(|v| v.as_macd()),
        ) else {
            return TradingSignal::hold("required indicators unavailable", indicators.clone());
        };

        let Some(last) = data.candles.last() else {
            return TradingSignal::hold("empty window", indicators.clone());
        };
        let price = last.close;

        // Resolve a pending breakout against newer candles first.
        if let Some(verdict) = self.resolve_pending(last) {
            return TradingSignal::hold(verdict, indicators.clone());
        }

        if let Some(until) = self.cooldown_until {
            if last.open_time <= until {
                return TradingSignal::hold("false-breakout cooldown", indicators.clone());
            }
            self.cooldown_until = None;
        }

        let upper_trigger = bands.upper.inner() * (Decimal::ONE + self.breakout_margin);
        let lower_trigger = bands.lower.inner() * (Decimal::ONE - self.breakout_margin);

        if price.inner() >= upper_trigger && macd.histogram > Decimal::ZERO {
            if self.recent_retracement(data, TradeSide::Long) {
                return TradingSignal::hold(
                    "upside breakout after retracement through middle",
                    indicators.clone(),
                );
            }
            self.pending = Some(PendingBreakout {
                direction: TradeSide::Long,
                open_time: last.open_time,
                level: bands.upper,
                candles_left: self.confirmation_candles,
            });
            let confidence = breakout_confidence(price, bands.upper, self.breakout_margin);
            return TradingSignal::new(
                SignalAction::Buy,
                confidence,
                format!("close {price} broke above upper band {}", bands.upper),
                indicators.clone(),
            );
        }

        if price.inner() <= lower_trigger && macd.histogram < Decimal::ZERO {
            if self.recent_retracement(data, TradeSide::Short) {
                return TradingSignal::hold(
                    "downside breakout after retracement through middle",
                    indicators.clone(),
                );
            }
            self.pending = Some(PendingBreakout {
                direction: TradeSide::Short,
                open_time: last.open_time,
                level: bands.lower,
                candles_left: self.confirmation_candles,
            });
            let confidence = breakout_confidence(price, bands.lower, self.breakout_margin);
            return TradingSignal::new(
                SignalAction::Sell,
                confidence,
                format!("close {price} broke below lower band {}", bands.lower),
                indicators.clone(),
            );
        }

        TradingSignal::hold("no breakout", indicators.clone())
    }

    /// Check a pending breakout against the newest candle.
    ///
    /// Returns a HOLD reason when the breakout just failed; `None` lets
    /// normal evaluation proceed.
    fn resolve_pending(&mut self, last: &Candle) -> Option<&'static str> {
        let pending = self.pending.as_mut()?;
        if last.open_time <= pending.open_time {
            // Same candle re-evaluated; nothing to resolve yet.
            return None;
        }

        let reverted = match pending.direction {
            TradeSide::Long => last.close < pending.level,
            TradeSide::Short => last.close > pending.level,
        };

        if reverted {
            debug!(
                direction = %pending.direction,
                level = %pending.level,
                close = %last.close,
                "false breakout detected"
            );
            let cooldown = last.interval.duration() * self.cooldown_candles as i32;
            self.cooldown_until = Some(last.open_time + cooldown);
            self.pending = None;
            return Some("false breakout: close reverted through the band");
        }

        pending.candles_left = pending.candles_left.saturating_sub(1);
        pending.open_time = last.open_time;
        if pending.candles_left == 0 {
            self.pending = None;
        }
        None
    }

    /// Whether a pre-breakout close crossed the middle band against the
    /// breakout direction. The middle band is computed over the window
    /// excluding the breakout candle so a long consolidation does not mask
    /// itself.
    fn recent_retracement(&self, data: &ProcessedData, direction: TradeSide) -> bool {
        let candles = &data.candles;
        if candles.len() < self.bollinger_period + 1 {
            return false;
        }
        let prior = &candles[..candles.len() - 1];
        let window = &prior[prior.len() - self.bollinger_period..];
        let middle: Decimal = window.iter().map(|c| c.close.inner()).sum::<Decimal>()
            / Decimal::from(window.len() as u64);

        let lookback = prior.len().saturating_sub(self.retracement_lookback);
        prior[lookback..].iter().any(|c| match direction {
            TradeSide::Long => c.close.inner() < middle,
            TradeSide::Short => c.close.inner() > middle,
        })
    }
}

/// 0.5 at the trigger margin, growing with excursion beyond the band.
fn breakout_confidence(price: Price, band: Price, margin: Decimal) -> f64 {
    let Some(band_value) = (!band.is_zero()).then(|| band.inner()) else {
        return 0.5;
    };
    let excursion = ((price.inner() - band_value).abs() / band_value - margin)
        .to_f64()
        .unwrap_or(0.0)
        .max(0.0);
    (0.5 + excursion * 10.0).min(1.0)
}
