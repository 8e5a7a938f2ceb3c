//! Mean-reversion strategy.
//!
//! BUY when price touches the lower Bollinger band with an oversold RSI;
//! SELL at the upper band with an overbought RSI. HOLD while price stays
//! inside the bands or the bands are squeezed too tight to mean anything.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use trader_core::{IndicatorId, SignalAction, TradingSignal};
use trader_market::{IndicatorSpec, ProcessedData};

#[derive(Debug, Clone)]
pub struct MeanReversion {
    pub bollinger_period: usize,
    pub bollinger_k: u32,
    pub rsi_period: usize,
    pub rsi_oversold: Decimal,
    pub rsi_overbought: Decimal,
    /// Below this bandwidth the window is a squeeze and reversion is
    /// meaningless.
    pub squeeze_bandwidth: Decimal,
}

impl Default for MeanReversion {
    fn default() -> Self {
        Self {
            bollinger_period: 20,
            bollinger_k: 2,
            rsi_period: 14,
            rsi_oversold: dec!(30),
            rsi_overbought: dec!(70),
            squeeze_bandwidth: dec!(0.005),
        }
    }
}

impl MeanReversion {
    pub fn required_indicators(&self) -> Vec<IndicatorSpec> {
        vec![
            IndicatorSpec::Bollinger {
                period: self.bollinger_period,
                k: self.bollinger_k,
            },
            IndicatorSpec::Rsi {
                period: self.rsi_period,
            },
        ]
    }

    pub fn evaluate(&self, data: &ProcessedData) -> TradingSignal {
        let indicators = &data.indicators;

        let (Some(bands), Some(rsi)) = (
            indicators.get(&IndicatorId::Bollinger).and_then(|v| v.as_bollinger()),
            indicators.get(&IndicatorId::Rsi).and_then(|v| v.as_scalar()),
        ) else {
            return TradingSignal::hold("required indicators unavailable", indicators.clone());
        };

        if bands.bandwidth < self.squeeze_bandwidth {
            return TradingSignal::hold(
                format!("band squeeze: bandwidth {}", bands.bandwidth),
                indicators.clone(),
            );
        }

        let price = data.latest_price;
        // Collapsed bands were already rejected by the squeeze check.
        let Some(percent_b) = bands.percent_b(price) else {
            return TradingSignal::hold("collapsed bands", indicators.clone());
        };

        if price <= bands.lower && rsi < self.rsi_oversold {
            let confidence = confidence_from_center(dec!(0) - percent_b);
            return TradingSignal::new(
                SignalAction::Buy,
                confidence,
                format!(
                    "price {price} at or below lower band {} with RSI {rsi} oversold",
                    bands.lower
                ),
                indicators.clone(),
            );
        }

        if price >= bands.upper && rsi > self.rsi_overbought {
            let confidence = confidence_from_center(percent_b - dec!(1));
            return TradingSignal::new(
                SignalAction::Sell,
                confidence,
                format!(
                    "price {price} at or above upper band {} with RSI {rsi} overbought",
                    bands.upper
                ),
                indicators.clone(),
            );
        }

        TradingSignal::hold("price within bands", indicators.clone())
    }
}

/// Confidence proportional to the excursion beyond the touched band:
/// 0.5 at a touch, growing with distance, capped at 1.
fn confidence_from_center(beyond_band: Decimal) -> f64 {
    let beyond = beyond_band.to_f64().unwrap_or(0.0).max(0.0);
    (0.5 + beyond).min(1.0)
}
