//! Trading signals emitted by strategies.

use crate::market::IndicatorSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Strategy recommendation for the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
    Close,
}

impl SignalAction {
    /// Whether the trader should open a position for this action.
    pub fn opens_position(&self) -> bool {
        matches!(self, Self::Buy | Self::Sell)
    }
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
            Self::Close => write!(f, "CLOSE"),
        }
    }
}

/// Signal with the indicator snapshot that produced it.
///
/// `reason` is free text for operators; downstream consumers must not parse
/// it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub action: SignalAction,
    /// Confidence in [0, 1]. HOLD signals carry 0.
    pub confidence: f64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub indicators: IndicatorSet,
}

impl TradingSignal {
    pub fn new(
        action: SignalAction,
        confidence: f64,
        reason: impl Into<String>,
        indicators: IndicatorSet,
    ) -> Self {
        Self {
            action,
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.into(),
            timestamp: Utc::now(),
            indicators,
        }
    }

    /// The default when data is insufficient or thresholds are unmet.
    pub fn hold(reason: impl Into<String>, indicators: IndicatorSet) -> Self {
        Self::new(SignalAction::Hold, 0.0, reason, indicators)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_clamped() {
        let s = TradingSignal::new(SignalAction::Buy, 1.7, "x", IndicatorSet::new());
        assert_eq!(s.confidence, 1.0);
        let s = TradingSignal::new(SignalAction::Sell, -0.2, "x", IndicatorSet::new());
        assert_eq!(s.confidence, 0.0);
    }

    #[test]
    fn test_opens_position() {
        assert!(SignalAction::Buy.opens_position());
        assert!(SignalAction::Sell.opens_position());
        assert!(!SignalAction::Hold.opens_position());
        assert!(!SignalAction::Close.opens_position());
    }

    #[test]
    fn test_hold_has_zero_confidence() {
        let s = TradingSignal::hold("insufficient data", IndicatorSet::new());
        assert_eq!(s.action, SignalAction::Hold);
        assert_eq!(s.confidence, 0.0);
    }
}
