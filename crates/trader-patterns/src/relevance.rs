//! Relevance: weighted similarity between current conditions and a pattern.

use crate::pattern::{ConditionValue, Pattern, PredicateKey};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use trader_core::{IndicatorId, IndicatorValue, MarketConditions};

/// Component weights; defaults are indicators 0.4, performance 0.3,
/// recency 0.2, price 0.1.
#[derive(Debug, Clone, Copy)]
pub struct RelevanceWeights {
    pub indicators: f64,
    pub performance: f64,
    pub recency: f64,
    pub price: f64,
}

impl Default for RelevanceWeights {
    fn default() -> Self {
        Self {
            indicators: 0.4,
            performance: 0.3,
            recency: 0.2,
            price: 0.1,
        }
    }
}

/// Relevance in [0, 1]. Exchange or symbol mismatch is incompatible and
/// scores 0 outright.
pub fn relevance(pattern: &Pattern, conditions: &MarketConditions, weights: &RelevanceWeights) -> f64 {
    if pattern.exchange != conditions.exchange || pattern.symbol != conditions.symbol {
        return 0.0;
    }

    let score = weights.indicators * indicator_score(pattern, conditions)
        + weights.performance * performance_score(pattern)
        + weights.recency * recency_score(pattern, conditions.timestamp)
        + weights.price * price_score(pattern, conditions);
    score.clamp(0.0, 1.0)
}

/// Mean similarity over the pattern's indicator predicates.
///
/// A pattern with no indicator predicates has nothing to contradict and
/// scores 1.0; a predicate the current snapshot cannot answer scores the
/// neutral 0.5.
fn indicator_score(pattern: &Pattern, conditions: &MarketConditions) -> f64 {
    let mut total = 0.0;
    let mut count = 0u32;

    for (key, value) in &pattern.conditions {
        let score = match (key, value) {
            (PredicateKey::RsiRange, ConditionValue::RsiRange { low, high }) => {
                Some(match conditions.rsi() {
                    Some(rsi) => rsi_similarity(rsi, *low, *high),
                    None => 0.5,
                })
            }
            (PredicateKey::Macd, ConditionValue::Macd { macd, .. }) => {
                Some(match conditions.macd() {
                    Some(current) => value_similarity(current.macd, *macd),
                    None => 0.5,
                })
            }
            (PredicateKey::MacdRange, ConditionValue::MacdRange { low, high }) => {
                Some(match conditions.macd() {
                    Some(current) => range_similarity(current.macd, *low, *high),
                    None => 0.5,
                })
            }
            (PredicateKey::Bollinger, ConditionValue::Bollinger { bandwidth, .. }) => {
                let current = conditions
                    .indicators
                    .get(&IndicatorId::Bollinger)
                    .and_then(IndicatorValue::as_bollinger);
                Some(match current {
                    Some(bands) => value_similarity(bands.bandwidth, *bandwidth),
                    None => 0.5,
                })
            }
            _ => None,
        };
        if let Some(score) = score {
            total += score;
            count += 1;
        }
    }

    if count == 0 {
        1.0
    } else {
        total / f64::from(count)
    }
}

/// Inside the stored range scores 1.0, decaying linearly to 0 over 20 RSI
/// points outside it.
fn rsi_similarity(rsi: Decimal, low: Decimal, high: Decimal) -> f64 {
    let distance = if rsi < low {
        low - rsi
    } else if rsi > high {
        rsi - high
    } else {
        return 1.0;
    };
    let distance = distance.to_f64().unwrap_or(f64::MAX);
    (1.0 - distance / 20.0).max(0.0)
}

/// Scaled similarity of two values: 1 when equal, decaying with the
/// relative gap.
fn value_similarity(a: Decimal, b: Decimal) -> f64 {
    let (a, b) = (a.to_f64().unwrap_or(0.0), b.to_f64().unwrap_or(0.0));
    let scale = a.abs().max(b.abs());
    if scale == 0.0 {
        return 1.0;
    }
    (1.0 - (a - b).abs() / scale).max(0.0)
}

fn range_similarity(value: Decimal, low: Decimal, high: Decimal) -> f64 {
    if value >= low && value <= high {
        return 1.0;
    }
    let nearest = if value < low { low } else { high };
    value_similarity(value, nearest)
}

/// 0.7·successRate + 0.3·min(usage/10, 1).
fn performance_score(pattern: &Pattern) -> f64 {
    0.7 * pattern.success_rate + 0.3 * (f64::from(pattern.usage_count) / 10.0).min(1.0)
}

/// Piecewise decay on the age of the last use (falling back to creation):
/// ≤1d → 1.0, ≤7d → to 0.7, ≤30d → to 0.3, ≤90d → to 0.1, beyond → 0.1.
fn recency_score(pattern: &Pattern, now: DateTime<Utc>) -> f64 {
    let reference = pattern.last_used_at.unwrap_or(pattern.created_at);
    let age_days = (now - reference).num_seconds().max(0) as f64 / 86_400.0;

    if age_days <= 1.0 {
        1.0
    } else if age_days <= 7.0 {
        1.0 - (age_days - 1.0) / 6.0 * 0.3
    } else if age_days <= 30.0 {
        0.7 - (age_days - 7.0) / 23.0 * 0.4
    } else if age_days <= 90.0 {
        0.3 - (age_days - 30.0) / 60.0 * 0.2
    } else {
        0.1
    }
}

/// Similarity of the current price to the stored entry price predicates.
/// No price predicate means nothing to contradict: 1.0.
fn price_score(pattern: &Pattern, conditions: &MarketConditions) -> f64 {
    let current = conditions.current_price.inner();

    if let Some(ConditionValue::PriceRange { low, high }) =
        pattern.conditions.get(&PredicateKey::PriceRange)
    {
        return range_similarity(current, low.inner(), high.inner());
    }
    if let Some(ConditionValue::EntryPrice(entry)) =
        pattern.conditions.get(&PredicateKey::EntryPrice)
    {
        return value_similarity(current, entry.inner());
    }
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use trader_core::{Exchange, IndicatorSet, Interval, Price, TradeSide};

    fn pattern_with_rsi(low: Decimal, high: Decimal) -> Pattern {
        let mut conditions = BTreeMap::new();
        conditions.insert(PredicateKey::RsiRange, ConditionValue::RsiRange { low, high });
        Pattern {
            id: "p1".into(),
            exchange: Exchange::Bitget,
            symbol: "BTCUSDT".into(),
            timeframe: Interval::OneHour,
            action: TradeSide::Long,
            conditions,
            confidence: 0.8,
            created_at: Utc::now() - Duration::days(30),
            last_used_at: Some(Utc::now() - Duration::days(1)),
            usage_count: 8,
            success_count: 7,
            success_rate: 0.85,
            average_return: dec!(50),
            active: true,
        }
    }

    fn conditions_with_rsi(rsi: Decimal, symbol: &str) -> MarketConditions {
        let mut indicators = IndicatorSet::new();
        indicators.insert(IndicatorId::Rsi, IndicatorValue::scalar(rsi));
        MarketConditions {
            exchange: Exchange::Bitget,
            symbol: symbol.into(),
            current_price: Price::new(dec!(50000)),
            indicators,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_matching_pattern_scores_high() {
        // Stored range (60, 70), success rate 0.85, usage 8, used 1 day ago.
        let pattern = pattern_with_rsi(dec!(60), dec!(70));
        let conditions = conditions_with_rsi(dec!(65), "BTCUSDT");
        let score = relevance(&pattern, &conditions, &RelevanceWeights::default());
        assert!(score >= 0.8, "relevance {score} below expectation");
    }

    #[test]
    fn test_symbol_mismatch_is_incompatible() {
        let pattern = pattern_with_rsi(dec!(60), dec!(70));
        let conditions = conditions_with_rsi(dec!(65), "ETHUSDT");
        assert_eq!(
            relevance(&pattern, &conditions, &RelevanceWeights::default()),
            0.0
        );
    }

    #[test]
    fn test_rsi_similarity_decay() {
        assert_eq!(rsi_similarity(dec!(65), dec!(60), dec!(70)), 1.0);
        // 10 points outside: half way down the 20-point decay.
        let half = rsi_similarity(dec!(80), dec!(60), dec!(70));
        assert!((half - 0.5).abs() < 1e-9);
        // 20+ points outside: floor at zero.
        assert_eq!(rsi_similarity(dec!(95), dec!(60), dec!(70)), 0.0);
    }

    #[test]
    fn test_recency_piecewise_decay() {
        let mut pattern = pattern_with_rsi(dec!(60), dec!(70));
        let now = Utc::now();

        pattern.last_used_at = Some(now - Duration::hours(12));
        assert_eq!(recency_score(&pattern, now), 1.0);

        pattern.last_used_at = Some(now - Duration::days(7));
        assert!((recency_score(&pattern, now) - 0.7).abs() < 1e-6);

        pattern.last_used_at = Some(now - Duration::days(30));
        assert!((recency_score(&pattern, now) - 0.3).abs() < 1e-6);

        pattern.last_used_at = Some(now - Duration::days(90));
        assert!((recency_score(&pattern, now) - 0.1).abs() < 1e-6);

        pattern.last_used_at = Some(now - Duration::days(365));
        assert_eq!(recency_score(&pattern, now), 0.1);
    }

    #[test]
    fn test_performance_score_caps_usage() {
        let mut pattern = pattern_with_rsi(dec!(60), dec!(70));
        pattern.usage_count = 100;
        pattern.success_rate = 1.0;
        assert!((performance_score(&pattern) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_value_similarity() {
        assert_eq!(value_similarity(dec!(10), dec!(10)), 1.0);
        assert_eq!(value_similarity(dec!(0), dec!(0)), 1.0);
        assert!(value_similarity(dec!(10), dec!(5)) < 1.0);
        assert_eq!(value_similarity(dec!(10), dec!(-10)), 0.0);
    }
}
