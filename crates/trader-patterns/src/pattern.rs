//! Pattern model with typed condition predicates.
//!
//! Conditions are a tagged variant keyed by predicate, not a stringly map;
//! relevance computation dispatches over the variant.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use trader_core::{Exchange, Interval, Price, TradeSide};

/// Which predicate a condition value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateKey {
    RsiRange,
    Macd,
    MacdRange,
    Bollinger,
    PatternType,
    EntryPrice,
    PriceRange,
}

/// Structural classification of the setup that produced the trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternType {
    OversoldReversal,
    OverboughtReversal,
    TrendFollowing,
    MomentumContinuation,
    Custom,
}

/// One stored predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionValue {
    RsiRange {
        low: Decimal,
        high: Decimal,
    },
    Macd {
        macd: Decimal,
        signal: Decimal,
        histogram: Decimal,
    },
    MacdRange {
        low: Decimal,
        high: Decimal,
    },
    Bollinger {
        upper: Decimal,
        middle: Decimal,
        lower: Decimal,
        bandwidth: Decimal,
    },
    PatternType(PatternType),
    EntryPrice(Price),
    PriceRange {
        low: Price,
        high: Price,
    },
}

/// A persisted trade fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub exchange: Exchange,
    pub symbol: String,
    pub timeframe: Interval,
    pub action: TradeSide,
    pub conditions: BTreeMap<PredicateKey, ConditionValue>,
    /// Extraction-time confidence in [0, 1].
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub usage_count: u32,
    pub success_count: u32,
    pub success_rate: f64,
    pub average_return: Decimal,
    pub active: bool,
}

impl Pattern {
    /// Classify from the indicator values at entry.
    ///
    /// Checked in priority order: extreme RSI first, then trend alignment,
    /// then raw momentum.
    pub fn classify(
        rsi: Option<Decimal>,
        sma_short: Option<Decimal>,
        sma_long: Option<Decimal>,
        macd: Option<Decimal>,
    ) -> PatternType {
        if let Some(rsi) = rsi {
            if rsi <= Decimal::from(30) {
                return PatternType::OversoldReversal;
            }
            if rsi >= Decimal::from(70) {
                return PatternType::OverboughtReversal;
            }
        }
        if let (Some(short), Some(long)) = (sma_short, sma_long) {
            if short > long {
                return PatternType::TrendFollowing;
            }
        }
        if macd.is_some_and(|m| m > Decimal::ZERO) {
            return PatternType::MomentumContinuation;
        }
        PatternType::Custom
    }

    /// Apply one outcome: usage always counts, success updates the rate, and
    /// the average return takes the running mean over all outcomes.
    pub fn record_outcome(&mut self, pnl: Decimal, successful: bool, at: DateTime<Utc>) {
        let previous = Decimal::from(self.usage_count);
        self.usage_count += 1;
        if successful {
            self.success_count += 1;
        }
        self.success_rate = f64::from(self.success_count) / f64::from(self.usage_count);
        self.average_return =
            (self.average_return * previous + pnl) / Decimal::from(self.usage_count);
        self.last_used_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_classification_priority() {
        assert_eq!(
            Pattern::classify(Some(dec!(25)), None, None, None),
            PatternType::OversoldReversal
        );
        assert_eq!(
            Pattern::classify(Some(dec!(75)), None, None, None),
            PatternType::OverboughtReversal
        );
        assert_eq!(
            Pattern::classify(Some(dec!(50)), Some(dec!(105)), Some(dec!(100)), Some(dec!(1))),
            PatternType::TrendFollowing
        );
        assert_eq!(
            Pattern::classify(Some(dec!(50)), Some(dec!(95)), Some(dec!(100)), Some(dec!(1))),
            PatternType::MomentumContinuation
        );
        assert_eq!(
            Pattern::classify(None, None, None, Some(dec!(-1))),
            PatternType::Custom
        );
    }

    #[test]
    fn test_record_outcome_updates_rate_and_mean() {
        let mut pattern = Pattern {
            id: "p1".into(),
            exchange: Exchange::Bitget,
            symbol: "BTCUSDT".into(),
            timeframe: Interval::OneHour,
            action: TradeSide::Long,
            conditions: BTreeMap::new(),
            confidence: 0.7,
            created_at: Utc::now(),
            last_used_at: None,
            usage_count: 0,
            success_count: 0,
            success_rate: 0.0,
            average_return: Decimal::ZERO,
            active: true,
        };

        pattern.record_outcome(dec!(100), true, Utc::now());
        assert_eq!(pattern.usage_count, 1);
        assert_eq!(pattern.success_rate, 1.0);
        assert_eq!(pattern.average_return, dec!(100));

        pattern.record_outcome(dec!(-50), false, Utc::now());
        assert_eq!(pattern.usage_count, 2);
        assert_eq!(pattern.success_count, 1);
        assert_eq!(pattern.success_rate, 0.5);
        assert_eq!(pattern.average_return, dec!(25));
        assert!(pattern.last_used_at.is_some());
    }
}
