//! The pattern store: extraction from profitable trades, relevance-ranked
//! lookup, outcome learning, and pruning.

use crate::pattern::{ConditionValue, Pattern, PredicateKey};
use crate::relevance::{relevance, RelevanceWeights};
use crate::repo::PatternRepository;
use crate::PatternResult;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use trader_core::{IndicatorId, IndicatorSet, IndicatorValue, MarketConditions};
use trader_persistence::TradeRecord;
use uuid::Uuid;

/// Width of the stored RSI admission range around the entry reading.
const RSI_RANGE_HALF_WIDTH: Decimal = dec!(2);

/// Pruning predicates; any subset may be set.
#[derive(Debug, Clone, Default)]
pub struct PruneConfig {
    /// Drop patterns older (by last use, then creation) than this.
    pub max_age_days: Option<i64>,
    /// Drop patterns below this success rate once they have been tried.
    pub min_success_rate: Option<f64>,
    /// Usage floor for the success-rate predicate.
    pub min_usage_count: Option<u32>,
    /// Keep only the top N by success rate then usage.
    pub max_patterns: Option<usize>,
}

/// Globally shared store over the repository contract. Writes serialize in
/// the repository.
pub struct PatternStore {
    repo: Arc<dyn PatternRepository>,
    weights: RelevanceWeights,
    /// Realized profit a trade needs before it is worth fingerprinting.
    min_profit: Decimal,
}

impl PatternStore {
    pub fn new(repo: Arc<dyn PatternRepository>) -> Self {
        Self {
            repo,
            weights: RelevanceWeights::default(),
            min_profit: Decimal::ZERO,
        }
    }

    pub fn with_min_profit(mut self, min_profit: Decimal) -> Self {
        self.min_profit = min_profit;
        self
    }

    /// Fingerprint a closed profitable trade.
    ///
    /// Returns the stored pattern id, or `None` when the trade does not
    /// qualify (open, unprofitable, or below the profit threshold).
    pub async fn learn_from_trade(
        &self,
        trade: &TradeRecord,
        entry_indicators: &IndicatorSet,
    ) -> PatternResult<Option<String>> {
        let Some(profit) = trade.profit_loss else {
            return Ok(None);
        };
        if profit <= self.min_profit {
            return Ok(None);
        }

        let rsi = scalar(entry_indicators, IndicatorId::Rsi);
        let sma_short = scalar(entry_indicators, IndicatorId::SmaShort);
        let sma_long = scalar(entry_indicators, IndicatorId::SmaLong);
        let macd = entry_indicators
            .get(&IndicatorId::Macd)
            .and_then(IndicatorValue::as_macd);

        let mut conditions = BTreeMap::new();
        if let Some(rsi) = rsi {
            conditions.insert(
                PredicateKey::RsiRange,
                ConditionValue::RsiRange {
                    low: rsi - RSI_RANGE_HALF_WIDTH,
                    high: rsi + RSI_RANGE_HALF_WIDTH,
                },
            );
        }
        if let Some(macd) = macd {
            conditions.insert(
                PredicateKey::Macd,
                ConditionValue::Macd {
                    macd: macd.macd,
                    signal: macd.signal,
                    histogram: macd.histogram,
                },
            );
        }
        if let Some(bands) = entry_indicators
            .get(&IndicatorId::Bollinger)
            .and_then(IndicatorValue::as_bollinger)
        {
            conditions.insert(
                PredicateKey::Bollinger,
                ConditionValue::Bollinger {
                    upper: bands.upper.inner(),
                    middle: bands.middle.inner(),
                    lower: bands.lower.inner(),
                    bandwidth: bands.bandwidth,
                },
            );
        }
        let pattern_type = Pattern::classify(rsi, sma_short, sma_long, macd.map(|m| m.macd));
        conditions.insert(PredicateKey::PatternType, ConditionValue::PatternType(pattern_type));
        conditions.insert(
            PredicateKey::EntryPrice,
            ConditionValue::EntryPrice(trade.entry_price),
        );

        let pattern = Pattern {
            id: Uuid::new_v4().to_string(),
            exchange: trade.exchange,
            symbol: trade.trading_pair.clone(),
            timeframe: trade.timeframe,
            action: trade.trade_type,
            conditions,
            confidence: initial_confidence(profit, trade.profit_loss_percent),
            created_at: Utc::now(),
            last_used_at: None,
            usage_count: 1,
            success_count: 1,
            success_rate: 1.0,
            average_return: profit,
            active: true,
        };

        info!(
            pattern_id = %pattern.id,
            symbol = %pattern.symbol,
            ?pattern_type,
            %profit,
            "learned pattern from profitable trade"
        );
        let id = self.repo.create(pattern).await?;
        Ok(Some(id))
    }

    /// Active patterns relevant to the given conditions, best first.
    pub async fn find_relevant(
        &self,
        conditions: &MarketConditions,
        min_relevance: f64,
    ) -> PatternResult<Vec<(Pattern, f64)>> {
        let candidates = self.repo.find_by_symbol(&conditions.symbol).await?;

        let mut scored: Vec<(Pattern, f64)> = candidates
            .into_iter()
            .filter(|p| p.active)
            .filter_map(|p| {
                let score = relevance(&p, conditions, &self.weights);
                (score >= min_relevance).then_some((p, score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        debug!(
            symbol = %conditions.symbol,
            matches = scored.len(),
            "pattern relevance ranked"
        );
        Ok(scored)
    }

    /// Feed a trade outcome back into the matched pattern.
    pub async fn record_outcome(
        &self,
        pattern_id: &str,
        pnl: Decimal,
        is_successful: bool,
    ) -> PatternResult<bool> {
        Ok(self.repo.update_statistics(pattern_id, pnl, is_successful).await?)
    }

    /// Apply pruning predicates; returns the number of patterns removed.
    pub async fn prune(&self, config: &PruneConfig) -> PatternResult<usize> {
        let all = self.repo.find_active().await?;
        let now = Utc::now();
        let mut removed = 0usize;

        for pattern in &all {
            let age_reference = pattern.last_used_at.unwrap_or(pattern.created_at);
            let too_old = config
                .max_age_days
                .is_some_and(|days| now - age_reference > Duration::days(days));

            let usage_floor = config.min_usage_count.unwrap_or(1);
            let underperforming = config.min_success_rate.is_some_and(|rate| {
                pattern.usage_count >= usage_floor && pattern.success_rate < rate
            });

            if too_old || underperforming {
                if self.repo.delete(&pattern.id).await? {
                    removed += 1;
                }
            }
        }

        // Cap the survivors at top-N by success rate then usage.
        if let Some(max) = config.max_patterns {
            let survivors = self.repo.find_active().await?;
            if survivors.len() > max {
                let keep: std::collections::HashSet<String> = self
                    .repo
                    .get_top(max, 0)
                    .await?
                    .into_iter()
                    .map(|p| p.id)
                    .collect();
                for pattern in survivors {
                    if !keep.contains(&pattern.id) && self.repo.delete(&pattern.id).await? {
                        removed += 1;
                    }
                }
            }
        }

        if removed > 0 {
            info!(removed, "pruned patterns");
        }
        Ok(removed)
    }

    pub fn repository(&self) -> &Arc<dyn PatternRepository> {
        &self.repo
    }
}

fn scalar(set: &IndicatorSet, id: IndicatorId) -> Option<Decimal> {
    set.get(&id).and_then(IndicatorValue::as_scalar)
}

/// Confidence seeded from how decisively the trade won.
fn initial_confidence(profit: Decimal, profit_percent: Option<Decimal>) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    let pct = profit_percent
        .or(Some(profit))
        .and_then(|p| p.to_f64())
        .unwrap_or(0.0);
    (0.5 + pct / 20.0).clamp(0.5, 0.95)
}
