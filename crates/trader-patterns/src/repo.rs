//! Pattern repository contract and implementations.

use crate::pattern::{ConditionValue, Pattern, PredicateKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;
use trader_core::{Interval, TradeSide};
use trader_persistence::{JsonlJournal, PersistenceResult};

/// Persistence contract for patterns. Writes are serialized by the store.
#[async_trait]
pub trait PatternRepository: Send + Sync {
    async fn create(&self, pattern: Pattern) -> PersistenceResult<String>;

    /// Apply an outcome; false when the pattern is unknown.
    async fn update_statistics(
        &self,
        pattern_id: &str,
        pnl: Decimal,
        is_successful: bool,
    ) -> PersistenceResult<bool>;

    async fn find_by_id(&self, pattern_id: &str) -> PersistenceResult<Option<Pattern>>;

    async fn find_active(&self) -> PersistenceResult<Vec<Pattern>>;

    async fn find_by_symbol(&self, symbol: &str) -> PersistenceResult<Vec<Pattern>>;

    /// Pre-filter for the matcher: active patterns on (symbol, timeframe,
    /// action) whose stored RSI/MACD predicates admit the given readings and
    /// whose confidence clears the floor.
    async fn find_matching(
        &self,
        symbol: &str,
        timeframe: Interval,
        trade_type: TradeSide,
        rsi: Option<Decimal>,
        macd: Option<Decimal>,
        min_confidence: f64,
    ) -> PersistenceResult<Vec<Pattern>>;

    /// Best patterns by success rate then usage, with a usage floor.
    async fn get_top(&self, limit: usize, min_occurrences: u32) -> PersistenceResult<Vec<Pattern>>;

    async fn deactivate(&self, pattern_id: &str) -> PersistenceResult<bool>;

    async fn activate(&self, pattern_id: &str) -> PersistenceResult<bool>;

    async fn delete(&self, pattern_id: &str) -> PersistenceResult<bool>;
}

// ============================================================================
// Shared index
// ============================================================================

#[derive(Default)]
struct PatternIndex {
    rows: BTreeMap<String, Pattern>,
}

impl PatternIndex {
    fn matching(
        &self,
        symbol: &str,
        timeframe: Interval,
        trade_type: TradeSide,
        rsi: Option<Decimal>,
        macd: Option<Decimal>,
        min_confidence: f64,
    ) -> Vec<Pattern> {
        self.rows
            .values()
            .filter(|p| {
                p.active
                    && p.symbol == symbol
                    && p.timeframe == timeframe
                    && p.action == trade_type
                    && p.confidence >= min_confidence
                    && rsi_admits(p, rsi)
                    && macd_admits(p, macd)
            })
            .cloned()
            .collect()
    }

    fn top(&self, limit: usize, min_occurrences: u32) -> Vec<Pattern> {
        let mut rows: Vec<_> = self
            .rows
            .values()
            .filter(|p| p.usage_count >= min_occurrences)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.success_rate
                .partial_cmp(&a.success_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.usage_count.cmp(&a.usage_count))
        });
        rows.truncate(limit);
        rows
    }

    fn set_active(&mut self, id: &str, active: bool) -> bool {
        match self.rows.get_mut(id) {
            Some(pattern) => {
                pattern.active = active;
                true
            }
            None => false,
        }
    }

    fn record_outcome(&mut self, id: &str, pnl: Decimal, success: bool, at: DateTime<Utc>) -> bool {
        match self.rows.get_mut(id) {
            Some(pattern) => {
                pattern.record_outcome(pnl, success, at);
                true
            }
            None => false,
        }
    }
}

/// A stored RSI range predicate admits readings inside or near it; a missing
/// reading is not held against the pattern here (relevance handles it).
fn rsi_admits(pattern: &Pattern, rsi: Option<Decimal>) -> bool {
    let (Some(rsi), Some(ConditionValue::RsiRange { low, high })) =
        (rsi, pattern.conditions.get(&PredicateKey::RsiRange))
    else {
        return true;
    };
    let slack = Decimal::from(20);
    rsi >= *low - slack && rsi <= *high + slack
}

fn macd_admits(pattern: &Pattern, macd: Option<Decimal>) -> bool {
    let (Some(macd), Some(condition)) = (macd, pattern.conditions.get(&PredicateKey::Macd)) else {
        return true;
    };
    match condition {
        // Momentum direction must agree.
        ConditionValue::Macd { macd: stored, .. } => {
            stored.is_zero() || macd.is_zero() || stored.is_sign_positive() == macd.is_sign_positive()
        }
        _ => true,
    }
}

// ============================================================================
// InMemoryPatternRepository
// ============================================================================

#[derive(Default)]
pub struct InMemoryPatternRepository {
    index: Mutex<PatternIndex>,
}

impl InMemoryPatternRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PatternRepository for InMemoryPatternRepository {
    async fn create(&self, pattern: Pattern) -> PersistenceResult<String> {
        let id = pattern.id.clone();
        self.index.lock().rows.insert(id.clone(), pattern);
        Ok(id)
    }

    async fn update_statistics(
        &self,
        pattern_id: &str,
        pnl: Decimal,
        is_successful: bool,
    ) -> PersistenceResult<bool> {
        Ok(self
            .index
            .lock()
            .record_outcome(pattern_id, pnl, is_successful, Utc::now()))
    }

    async fn find_by_id(&self, pattern_id: &str) -> PersistenceResult<Option<Pattern>> {
        Ok(self.index.lock().rows.get(pattern_id).cloned())
    }

    async fn find_active(&self) -> PersistenceResult<Vec<Pattern>> {
        Ok(self
            .index
            .lock()
            .rows
            .values()
            .filter(|p| p.active)
            .cloned()
            .collect())
    }

    async fn find_by_symbol(&self, symbol: &str) -> PersistenceResult<Vec<Pattern>> {
        Ok(self
            .index
            .lock()
            .rows
            .values()
            .filter(|p| p.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn find_matching(
        &self,
        symbol: &str,
        timeframe: Interval,
        trade_type: TradeSide,
        rsi: Option<Decimal>,
        macd: Option<Decimal>,
        min_confidence: f64,
    ) -> PersistenceResult<Vec<Pattern>> {
        Ok(self
            .index
            .lock()
            .matching(symbol, timeframe, trade_type, rsi, macd, min_confidence))
    }

    async fn get_top(&self, limit: usize, min_occurrences: u32) -> PersistenceResult<Vec<Pattern>> {
        Ok(self.index.lock().top(limit, min_occurrences))
    }

    async fn deactivate(&self, pattern_id: &str) -> PersistenceResult<bool> {
        Ok(self.index.lock().set_active(pattern_id, false))
    }

    async fn activate(&self, pattern_id: &str) -> PersistenceResult<bool> {
        Ok(self.index.lock().set_active(pattern_id, true))
    }

    async fn delete(&self, pattern_id: &str) -> PersistenceResult<bool> {
        Ok(self.index.lock().rows.remove(pattern_id).is_some())
    }
}

// ============================================================================
// JournalPatternRepository
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum PatternEvent {
    Created(Pattern),
    Outcome {
        id: String,
        pnl: Decimal,
        success: bool,
        at: DateTime<Utc>,
    },
    Activated {
        id: String,
    },
    Deactivated {
        id: String,
    },
    Deleted {
        id: String,
    },
}

struct JournalState {
    index: PatternIndex,
    journal: JsonlJournal,
}

/// Durable pattern repository over an append-only JSONL journal.
pub struct JournalPatternRepository {
    state: Mutex<JournalState>,
}

impl JournalPatternRepository {
    pub fn open(path: impl AsRef<Path>) -> PersistenceResult<Self> {
        let journal = JsonlJournal::new(path.as_ref());
        let mut index = PatternIndex::default();

        for event in journal.load::<PatternEvent>()? {
            match event {
                PatternEvent::Created(pattern) => {
                    index.rows.insert(pattern.id.clone(), pattern);
                }
                PatternEvent::Outcome {
                    id,
                    pnl,
                    success,
                    at,
                } => {
                    index.record_outcome(&id, pnl, success, at);
                }
                PatternEvent::Activated { id } => {
                    index.set_active(&id, true);
                }
                PatternEvent::Deactivated { id } => {
                    index.set_active(&id, false);
                }
                PatternEvent::Deleted { id } => {
                    index.rows.remove(&id);
                }
            }
        }

        info!(
            path = %path.as_ref().display(),
            patterns = index.rows.len(),
            "pattern journal replayed"
        );

        Ok(Self {
            state: Mutex::new(JournalState { index, journal }),
        })
    }
}

#[async_trait]
impl PatternRepository for JournalPatternRepository {
    async fn create(&self, pattern: Pattern) -> PersistenceResult<String> {
        let mut state = self.state.lock();
        let id = pattern.id.clone();
        state.journal.append(&PatternEvent::Created(pattern.clone()))?;
        state.index.rows.insert(id.clone(), pattern);
        Ok(id)
    }

    async fn update_statistics(
        &self,
        pattern_id: &str,
        pnl: Decimal,
        is_successful: bool,
    ) -> PersistenceResult<bool> {
        let mut state = self.state.lock();
        let at = Utc::now();
        let updated = state.index.record_outcome(pattern_id, pnl, is_successful, at);
        if updated {
            state.journal.append(&PatternEvent::Outcome {
                id: pattern_id.to_string(),
                pnl,
                success: is_successful,
                at,
            })?;
        }
        Ok(updated)
    }

    async fn find_by_id(&self, pattern_id: &str) -> PersistenceResult<Option<Pattern>> {
        Ok(self.state.lock().index.rows.get(pattern_id).cloned())
    }

    async fn find_active(&self) -> PersistenceResult<Vec<Pattern>> {
        Ok(self
            .state
            .lock()
            .index
            .rows
            .values()
            .filter(|p| p.active)
            .cloned()
            .collect())
    }

    async fn find_by_symbol(&self, symbol: &str) -> PersistenceResult<Vec<Pattern>> {
        Ok(self
            .state
            .lock()
            .index
            .rows
            .values()
            .filter(|p| p.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn find_matching(
        &self,
        symbol: &str,
        timeframe: Interval,
        trade_type: TradeSide,
        rsi: Option<Decimal>,
        macd: Option<Decimal>,
        min_confidence: f64,
    ) -> PersistenceResult<Vec<Pattern>> {
        Ok(self
            .state
            .lock()
            .index
            .matching(symbol, timeframe, trade_type, rsi, macd, min_confidence))
    }

    async fn get_top(&self, limit: usize, min_occurrences: u32) -> PersistenceResult<Vec<Pattern>> {
        Ok(self.state.lock().index.top(limit, min_occurrences))
    }

    async fn deactivate(&self, pattern_id: &str) -> PersistenceResult<bool> {
        let mut state = self.state.lock();
        let updated = state.index.set_active(pattern_id, false);
        if updated {
            state.journal.append(&PatternEvent::Deactivated {
                id: pattern_id.to_string(),
            })?;
        }
        Ok(updated)
    }

    async fn activate(&self, pattern_id: &str) -> PersistenceResult<bool> {
        let mut state = self.state.lock();
        let updated = state.index.set_active(pattern_id, true);
        if updated {
            state.journal.append(&PatternEvent::Activated {
                id: pattern_id.to_string(),
            })?;
        }
        Ok(updated)
    }

    async fn delete(&self, pattern_id: &str) -> PersistenceResult<bool> {
        let mut state = self.state.lock();
        let removed = state.index.rows.remove(pattern_id).is_some();
        if removed {
            state.journal.append(&PatternEvent::Deleted {
                id: pattern_id.to_string(),
            })?;
        }
        Ok(removed)
    }
}
