//! Trade repository contract and implementations.

use crate::error::{PersistenceError, PersistenceResult};
use crate::journal::JsonlJournal;
use crate::types::{NewTrade, TradeExit, TradeId, TradeRecord, TradeStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;
use trader_core::Price;

/// Persistence contract consumed by the position manager.
///
/// Error modes are non-retryable by the core; a failed persistence on close
/// is propagated upward and the in-memory position is not removed.
#[async_trait]
pub trait TradeRepository: Send + Sync {
    async fn create(&self, trade: NewTrade) -> PersistenceResult<TradeId>;

    /// Close an open trade; false when the id exists but is already closed.
    async fn close(&self, trade_id: TradeId, exit: TradeExit) -> PersistenceResult<bool>;

    async fn find_by_id(&self, trade_id: TradeId) -> PersistenceResult<Option<TradeRecord>>;

    async fn find_open_trades(&self, trader_id: &str) -> PersistenceResult<Vec<TradeRecord>>;

    async fn find_all_open_trades(&self) -> PersistenceResult<Vec<TradeRecord>>;

    async fn find_closed_trades(
        &self,
        trader_id: &str,
        limit: usize,
    ) -> PersistenceResult<Vec<TradeRecord>>;

    async fn find_closed_trades_by_symbol(
        &self,
        trading_pair: &str,
        limit: usize,
    ) -> PersistenceResult<Vec<TradeRecord>>;

    async fn find_closed_trades_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PersistenceResult<Vec<TradeRecord>>;

    async fn update_stop_loss(
        &self,
        trade_id: TradeId,
        stop_loss: Price,
        trailing: bool,
    ) -> PersistenceResult<bool>;

    async fn update_take_profit(
        &self,
        trade_id: TradeId,
        take_profit: Price,
    ) -> PersistenceResult<bool>;
}

// ============================================================================
// Shared in-memory index
// ============================================================================

/// Index of trade rows; both repository implementations delegate here.
#[derive(Default)]
struct TradeIndex {
    rows: BTreeMap<TradeId, TradeRecord>,
    next_id: TradeId,
}

impl TradeIndex {
    fn insert_new(&mut self, trade: NewTrade) -> TradeId {
        self.next_id += 1;
        let id = self.next_id;
        self.rows.insert(id, TradeRecord::from_new(id, trade));
        id
    }

    fn restore(&mut self, record: TradeRecord) {
        self.next_id = self.next_id.max(record.id);
        self.rows.insert(record.id, record);
    }

    fn close(&mut self, id: TradeId, exit: TradeExit, at: DateTime<Utc>) -> PersistenceResult<bool> {
        let record = self
            .rows
            .get_mut(&id)
            .ok_or(PersistenceError::TradeNotFound(id))?;
        if !record.is_open() {
            return Ok(false);
        }
        record.apply_exit(exit, at);
        Ok(true)
    }

    fn update_stop(&mut self, id: TradeId, stop: Price, trailing: bool) -> PersistenceResult<bool> {
        let record = self
            .rows
            .get_mut(&id)
            .ok_or(PersistenceError::TradeNotFound(id))?;
        if !record.is_open() {
            return Ok(false);
        }
        record.stop_loss_price = Some(stop);
        record.trailing_stop_activated = record.trailing_stop_activated || trailing;
        Ok(true)
    }

    fn update_take_profit(&mut self, id: TradeId, tp: Price) -> PersistenceResult<bool> {
        let record = self
            .rows
            .get_mut(&id)
            .ok_or(PersistenceError::TradeNotFound(id))?;
        if !record.is_open() {
            return Ok(false);
        }
        record.take_profit_price = Some(tp);
        Ok(true)
    }

    fn open_trades(&self, trader_id: Option<&str>) -> Vec<TradeRecord> {
        self.rows
            .values()
            .filter(|r| r.is_open())
            .filter(|r| trader_id.map_or(true, |t| r.trader_id == t))
            .cloned()
            .collect()
    }

    fn closed_trades<F>(&self, filter: F, limit: usize) -> Vec<TradeRecord>
    where
        F: Fn(&TradeRecord) -> bool,
    {
        let mut rows: Vec<_> = self
            .rows
            .values()
            .filter(|r| r.status == TradeStatus::Closed && filter(r))
            .cloned()
            .collect();
        // Most recent exit first.
        rows.sort_by_key(|r| std::cmp::Reverse(r.exit_timestamp));
        rows.truncate(limit);
        rows
    }
}

// ============================================================================
// InMemoryTradeRepository
// ============================================================================

/// Volatile repository for tests and dry runs.
#[derive(Default)]
pub struct InMemoryTradeRepository {
    index: Mutex<TradeIndex>,
}

impl InMemoryTradeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TradeRepository for InMemoryTradeRepository {
    async fn create(&self, trade: NewTrade) -> PersistenceResult<TradeId> {
        Ok(self.index.lock().insert_new(trade))
    }

    async fn close(&self, trade_id: TradeId, exit: TradeExit) -> PersistenceResult<bool> {
        self.index.lock().close(trade_id, exit, Utc::now())
    }

    async fn find_by_id(&self, trade_id: TradeId) -> PersistenceResult<Option<TradeRecord>> {
        Ok(self.index.lock().rows.get(&trade_id).cloned())
    }

    async fn find_open_trades(&self, trader_id: &str) -> PersistenceResult<Vec<TradeRecord>> {
        Ok(self.index.lock().open_trades(Some(trader_id)))
    }

    async fn find_all_open_trades(&self) -> PersistenceResult<Vec<TradeRecord>> {
        Ok(self.index.lock().open_trades(None))
    }

    async fn find_closed_trades(
        &self,
        trader_id: &str,
        limit: usize,
    ) -> PersistenceResult<Vec<TradeRecord>> {
        Ok(self
            .index
            .lock()
            .closed_trades(|r| r.trader_id == trader_id, limit))
    }

    async fn find_closed_trades_by_symbol(
        &self,
        trading_pair: &str,
        limit: usize,
    ) -> PersistenceResult<Vec<TradeRecord>> {
        Ok(self
            .index
            .lock()
            .closed_trades(|r| r.trading_pair == trading_pair, limit))
    }

    async fn find_closed_trades_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PersistenceResult<Vec<TradeRecord>> {
        Ok(self.index.lock().closed_trades(
            |r| r.exit_timestamp.is_some_and(|t| t >= from && t <= to),
            usize::MAX,
        ))
    }

    async fn update_stop_loss(
        &self,
        trade_id: TradeId,
        stop_loss: Price,
        trailing: bool,
    ) -> PersistenceResult<bool> {
        self.index.lock().update_stop(trade_id, stop_loss, trailing)
    }

    async fn update_take_profit(
        &self,
        trade_id: TradeId,
        take_profit: Price,
    ) -> PersistenceResult<bool> {
        self.index.lock().update_take_profit(trade_id, take_profit)
    }
}

// ============================================================================
// JournalTradeRepository
// ============================================================================

/// Journal events; replayed in order to rebuild the index.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum TradeEvent {
    Created(TradeRecord),
    Closed {
        id: TradeId,
        exit: TradeExit,
        at: DateTime<Utc>,
    },
    StopUpdated {
        id: TradeId,
        stop_loss: Price,
        trailing: bool,
    },
    TakeProfitUpdated {
        id: TradeId,
        take_profit: Price,
    },
}

struct JournalState {
    index: TradeIndex,
    journal: JsonlJournal,
}

/// Durable repository: an in-memory index plus an append-only JSONL journal
/// replayed on load.
pub struct JournalTradeRepository {
    state: Mutex<JournalState>,
}

impl JournalTradeRepository {
    /// Open (or create) the journal at `path` and replay it.
    pub fn open(path: impl AsRef<Path>) -> PersistenceResult<Self> {
        let journal = JsonlJournal::new(path.as_ref());
        let mut index = TradeIndex::default();

        for event in journal.load::<TradeEvent>()? {
            match event {
                TradeEvent::Created(record) => index.restore(record),
                TradeEvent::Closed { id, exit, at } => {
                    let _ = index.close(id, exit, at);
                }
                TradeEvent::StopUpdated {
                    id,
                    stop_loss,
                    trailing,
                } => {
                    let _ = index.update_stop(id, stop_loss, trailing);
                }
                TradeEvent::TakeProfitUpdated { id, take_profit } => {
                    let _ = index.update_take_profit(id, take_profit);
                }
            }
        }

        info!(
            path = %path.as_ref().display(),
            trades = index.rows.len(),
            "trade journal replayed"
        );

        Ok(Self {
            state: Mutex::new(JournalState { index, journal }),
        })
    }
}

#[async_trait]
impl TradeRepository for JournalTradeRepository {
    async fn create(&self, trade: NewTrade) -> PersistenceResult<TradeId> {
        let mut state = self.state.lock();
        let id = state.index.insert_new(trade);
        let record = state.index.rows[&id].clone();
        state.journal.append(&TradeEvent::Created(record))?;
        Ok(id)
    }

    async fn close(&self, trade_id: TradeId, exit: TradeExit) -> PersistenceResult<bool> {
        let mut state = self.state.lock();
        let at = Utc::now();
        let closed = state.index.close(trade_id, exit.clone(), at)?;
        if closed {
            state.journal.append(&TradeEvent::Closed {
                id: trade_id,
                exit,
                at,
            })?;
        }
        Ok(closed)
    }

    async fn find_by_id(&self, trade_id: TradeId) -> PersistenceResult<Option<TradeRecord>> {
        Ok(self.state.lock().index.rows.get(&trade_id).cloned())
    }

    async fn find_open_trades(&self, trader_id: &str) -> PersistenceResult<Vec<TradeRecord>> {
        Ok(self.state.lock().index.open_trades(Some(trader_id)))
    }

    async fn find_all_open_trades(&self) -> PersistenceResult<Vec<TradeRecord>> {
        Ok(self.state.lock().index.open_trades(None))
    }

    async fn find_closed_trades(
        &self,
        trader_id: &str,
        limit: usize,
    ) -> PersistenceResult<Vec<TradeRecord>> {
        Ok(self
            .state
            .lock()
            .index
            .closed_trades(|r| r.trader_id == trader_id, limit))
    }

    async fn find_closed_trades_by_symbol(
        &self,
        trading_pair: &str,
        limit: usize,
    ) -> PersistenceResult<Vec<TradeRecord>> {
        Ok(self
            .state
            .lock()
            .index
            .closed_trades(|r| r.trading_pair == trading_pair, limit))
    }

    async fn find_closed_trades_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PersistenceResult<Vec<TradeRecord>> {
        Ok(self.state.lock().index.closed_trades(
            |r| r.exit_timestamp.is_some_and(|t| t >= from && t <= to),
            usize::MAX,
        ))
    }

    async fn update_stop_loss(
        &self,
        trade_id: TradeId,
        stop_loss: Price,
        trailing: bool,
    ) -> PersistenceResult<bool> {
        let mut state = self.state.lock();
        let updated = state.index.update_stop(trade_id, stop_loss, trailing)?;
        if updated {
            state.journal.append(&TradeEvent::StopUpdated {
                id: trade_id,
                stop_loss,
                trailing,
            })?;
        }
        Ok(updated)
    }

    async fn update_take_profit(
        &self,
        trade_id: TradeId,
        take_profit: Price,
    ) -> PersistenceResult<bool> {
        let mut state = self.state.lock();
        let updated = state.index.update_take_profit(trade_id, take_profit)?;
        if updated {
            state.journal.append(&TradeEvent::TakeProfitUpdated {
                id: trade_id,
                take_profit,
            })?;
        }
        Ok(updated)
    }
}
