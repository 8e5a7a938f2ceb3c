//! The position manager: open, update, close, refresh, recover.
//!
//! Locking discipline: the `active` map mutex is never held across I/O.
//! Prices are fetched and orders submitted first; the lock is re-acquired
//! only to commit the resulting state.

use crate::error::{PositionError, PositionResult};
use crate::managed::{ManagedPosition, PositionId};
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use trader_core::{
    IndicatorId, IndicatorSet, IndicatorValue, Interval, Order, OrderRequest, OrderStatus,
    Position, Price, Qty, TradeSide, TradingSignal,
};
use trader_exchange::ExchangeConnector;
use trader_patterns::PatternStore;
use trader_persistence::{
    ExitReason, IndicatorSnapshot, NewTrade, TradeExit, TradeRepository,
};
use trader_risk::{RiskDecision, RiskManager};
use trader_telemetry::{metrics, Channel, TelemetryHub};

/// Position manager tunables.
#[derive(Debug, Clone)]
pub struct PositionManagerConfig {
    /// Monitoring loop cadence.
    pub update_interval: Duration,
    /// Profit threshold for pattern extraction.
    pub pattern_min_profit: Decimal,
}

impl Default for PositionManagerConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(5),
            pattern_min_profit: Decimal::ZERO,
        }
    }
}

/// Everything needed to open one position.
#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub trader_id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: Qty,
    pub leverage: u32,
    pub interval: Interval,
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
    pub signal: TradingSignal,
    pub pattern_id: Option<String>,
}

/// Telemetry payload for position lifecycle events.
#[derive(Debug, Serialize)]
struct PositionEvent<'a> {
    event: &'static str,
    position_id: PositionId,
    trader_id: &'a str,
    symbol: &'a str,
    side: TradeSide,
    quantity: Qty,
    entry_price: Price,
    current_price: Price,
    unrealized_pnl: Decimal,
    stop_loss: Option<Price>,
    take_profit: Option<Price>,
    realized_pnl: Option<Decimal>,
    exit_reason: Option<String>,
}

impl<'a> PositionEvent<'a> {
    fn from_position(event: &'static str, position: &'a ManagedPosition) -> Self {
        Self {
            event,
            position_id: position.id,
            trader_id: &position.trader_id,
            symbol: position.symbol(),
            side: position.side(),
            quantity: position.position.quantity,
            entry_price: position.position.entry_price,
            current_price: position.position.current_price,
            unrealized_pnl: position.position.unrealized_pnl(),
            stop_loss: position.stop_loss,
            take_profit: position.take_profit,
            realized_pnl: None,
            exit_reason: None,
        }
    }
}

/// Owns all live positions for one exchange connector.
pub struct PositionManager {
    connector: Arc<dyn ExchangeConnector>,
    risk: Arc<RiskManager>,
    trades: Arc<dyn TradeRepository>,
    patterns: Option<Arc<PatternStore>>,
    telemetry: Arc<TelemetryHub>,
    config: PositionManagerConfig,
    /// All mutations of `active` are serialized here; never held across I/O.
    active: Mutex<HashMap<PositionId, ManagedPosition>>,
    /// Close-in-flight guard; also parks positions whose close persistence
    /// failed, pending operator action.
    closing: Mutex<HashSet<PositionId>>,
    /// Closed positions, in close order.
    history: Mutex<Vec<ManagedPosition>>,
}

impl PositionManager {
    pub fn new(
        connector: Arc<dyn ExchangeConnector>,
        risk: Arc<RiskManager>,
        trades: Arc<dyn TradeRepository>,
        patterns: Option<Arc<PatternStore>>,
        telemetry: Arc<TelemetryHub>,
        config: PositionManagerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            connector,
            risk,
            trades,
            patterns,
            telemetry,
            config,
            active: Mutex::new(HashMap::new()),
            closing: Mutex::new(HashSet::new()),
            history: Mutex::new(Vec::new()),
        })
    }

    pub fn update_interval(&self) -> Duration {
        self.config.update_interval
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get(&self, id: PositionId) -> Option<ManagedPosition> {
        self.active.lock().get(&id).cloned()
    }

    pub fn active_ids(&self) -> Vec<PositionId> {
        self.active.lock().keys().copied().collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// The open position for (trader, symbol), if any.
    pub fn find_by_symbol(&self, trader_id: &str, symbol: &str) -> Option<ManagedPosition> {
        self.active
            .lock()
            .values()
            .find(|p| p.trader_id == trader_id && p.symbol() == symbol)
            .cloned()
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    // ========================================================================
    // Open
    // ========================================================================

    /// Open a position per the signal: risk gate, market order, persist,
    /// commit.
    pub async fn open_position(&self, request: OpenOrder) -> PositionResult<ManagedPosition> {
        // Price estimate for the notional, outside any lock.
        let ticker = self.connector.get_ticker(&request.symbol).await?;
        let notional = request.quantity.notional(ticker.last_price);

        match self.risk.can_open_position(
            &request.trader_id,
            &request.symbol,
            notional,
            request.leverage,
        ) {
            RiskDecision::Allowed => {}
            RiskDecision::Denied { rule, reason } => {
                return Err(PositionError::RiskDenied { rule, reason });
            }
        }

        let order_request = OrderRequest::market(&request.symbol, request.side, request.quantity);
        let order = self.connector.place_order(&order_request).await?;
        metrics::ORDERS_TOTAL
            .with_label_values(&[
                &self.connector.exchange().to_string(),
                &format!("{:?}", order.status),
            ])
            .inc();

        if !order.status.has_fill() {
            return Err(PositionError::OrderNotFilled {
                status: order.status,
            });
        }

        // A partial fill is a real position at the filled quantity; cancel
        // the working remainder best-effort.
        let filled_quantity = if order.filled_quantity.is_positive() {
            order.filled_quantity
        } else {
            order.quantity
        };
        if order.status == OrderStatus::PartiallyFilled {
            if let Err(e) = self.connector.cancel_order(&request.symbol, &order.id).await {
                warn!(order_id = %order.id, error = %e, "failed to cancel unfilled remainder");
            }
        }

        let entry_price = order.average_price.unwrap_or(ticker.last_price);
        let mut position = Position::new(
            request.symbol.clone(),
            request.side,
            filled_quantity,
            entry_price,
            request.leverage,
        );
        position.current_price = ticker.last_price;

        let mut managed = ManagedPosition::new(
            &request.trader_id,
            position,
            request.stop_loss,
            request.take_profit,
            request.signal.indicators.clone(),
        );
        managed.pattern_id = request.pattern_id.clone();

        // Commit before persistence so the monitor protects the position
        // even if the repository write fails below.
        self.active.lock().insert(managed.id, managed.clone());
        self.risk.register_open(
            &request.trader_id,
            &request.symbol,
            filled_quantity.notional(entry_price),
        );
        metrics::ACTIVE_POSITIONS.set(self.active_count() as i64);

        let new_trade = NewTrade {
            trader_id: request.trader_id.clone(),
            trade_type: request.side,
            exchange: self.connector.exchange(),
            trading_pair: request.symbol.clone(),
            timeframe: request.interval,
            leverage: request.leverage,
            entry_price,
            entry_amount: filled_quantity,
            entry_timestamp: Utc::now(),
            entry_order_id: Some(order.id.clone()),
            stop_loss_price: request.stop_loss,
            take_profit_price: request.take_profit,
            fees: order.fee.unwrap_or(Decimal::ZERO),
            indicators: Some(snapshot_from_set(&request.signal.indicators)),
            pattern_id: request.pattern_id,
        };

        match self.trades.create(new_trade).await {
            Ok(trade_id) => {
                let mut active = self.active.lock();
                if let Some(live) = active.get_mut(&managed.id) {
                    live.trade_id = Some(trade_id);
                }
                managed.trade_id = Some(trade_id);
            }
            Err(e) => {
                // The fill is real; the position stays tracked without a
                // persistence handle, pending operator attention.
                error!(position_id = %managed.id, error = %e, "trade persistence failed after fill");
                self.publish(PositionEvent::from_position("open-unpersisted", &managed));
                return Err(PositionError::Persistence(e));
            }
        }

        info!(
            position_id = %managed.id,
            trader_id = %request.trader_id,
            symbol = %request.symbol,
            side = %request.side,
            quantity = %filled_quantity,
            entry = %entry_price,
            "position opened"
        );
        self.publish(PositionEvent::from_position("opened", &managed));
        Ok(managed)
    }

    // ========================================================================
    // Update
    // ========================================================================

    /// Refresh mark price (fetched when not supplied), recompute P&L, and
    /// advance the trailing stop.
    pub async fn update_position(
        &self,
        id: PositionId,
        price: Option<Price>,
    ) -> PositionResult<ManagedPosition> {
        let symbol = self
            .get(id)
            .ok_or(PositionError::NotFound(id))?
            .symbol()
            .to_string();

        let price = match price {
            Some(p) => p,
            None => self.connector.get_ticker(&symbol).await?.last_price,
        };

        // Commit under the lock, persist the stop improvement outside it.
        let (snapshot, improved_stop) = {
            let mut active = self.active.lock();
            let position = active.get_mut(&id).ok_or(PositionError::NotFound(id))?;
            position.update_price(price);
            let improved = position.apply_trailing(price);
            (position.clone(), improved)
        };

        if let (Some(new_stop), Some(trade_id)) = (improved_stop, snapshot.trade_id) {
            debug!(position_id = %id, stop = %new_stop, "trailing stop advanced");
            self.trades.update_stop_loss(trade_id, new_stop, true).await?;
        }

        self.publish(PositionEvent::from_position("updated", &snapshot));
        Ok(snapshot)
    }

    /// Reconcile quantity and entry drift against the exchange.
    pub async fn refresh_position(&self, id: PositionId) -> PositionResult<ManagedPosition> {
        let symbol = self
            .get(id)
            .ok_or(PositionError::NotFound(id))?
            .symbol()
            .to_string();

        let remote = self.connector.get_position(&symbol).await?;

        let mut active = self.active.lock();
        let position = active.get_mut(&id).ok_or(PositionError::NotFound(id))?;
        if let Some(remote) = remote {
            if remote.quantity != position.position.quantity {
                warn!(
                    position_id = %id,
                    local = %position.position.quantity,
                    remote = %remote.quantity,
                    "quantity drift corrected"
                );
                position.position.quantity = remote.quantity;
            }
            if remote.entry_price != position.position.entry_price {
                position.position.entry_price = remote.entry_price;
            }
            position.position.current_price = remote.current_price;
            position.last_updated = Utc::now();
        }
        Ok(position.clone())
    }

    // ========================================================================
    // Protective levels
    // ========================================================================

    /// Move the stop-loss; optionally arm trailing from it.
    pub async fn update_stop_loss(
        &self,
        id: PositionId,
        new_stop: Price,
        trailing: bool,
    ) -> PositionResult<()> {
        let trade_id = {
            let mut active = self.active.lock();
            let position = active.get_mut(&id).ok_or(PositionError::NotFound(id))?;
            position.stop_loss = Some(new_stop);
            if trailing {
                position.arm_trailing(None)?;
            }
            position.trade_id
        };

        if let Some(trade_id) = trade_id {
            self.trades.update_stop_loss(trade_id, new_stop, trailing).await?;
        }
        Ok(())
    }

    pub async fn update_take_profit(&self, id: PositionId, new_tp: Price) -> PositionResult<()> {
        let trade_id = {
            let mut active = self.active.lock();
            let position = active.get_mut(&id).ok_or(PositionError::NotFound(id))?;
            position.take_profit = Some(new_tp);
            position.trade_id
        };

        if let Some(trade_id) = trade_id {
            self.trades.update_take_profit(trade_id, new_tp).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Close
    // ========================================================================

    /// Close the full position with an opposite market order.
    ///
    /// Re-entry safe: a second close for the same id fails fast. A failed
    /// persistence leaves the position in `active` (and parked in the
    /// closing set) for the operator.
    pub async fn close_position(
        &self,
        id: PositionId,
        reason: ExitReason,
    ) -> PositionResult<Decimal> {
        {
            let mut closing = self.closing.lock();
            if !closing.insert(id) {
                return Err(PositionError::AlreadyClosing(id));
            }
        }

        let result = self.close_inner(id, reason).await;
        match &result {
            // Keep the guard on persistence failure: the exchange position
            // is gone and a retry would double-close.
            Err(PositionError::Persistence(_)) => {}
            _ => {
                self.closing.lock().remove(&id);
            }
        }
        result
    }

    async fn close_inner(&self, id: PositionId, reason: ExitReason) -> PositionResult<Decimal> {
        let snapshot = self.get(id).ok_or(PositionError::NotFound(id))?;

        let close_request = OrderRequest::market_close(
            snapshot.symbol(),
            snapshot.side(),
            snapshot.position.quantity,
        );
        let order: Order = self.connector.place_order(&close_request).await?;
        if !order.status.has_fill() {
            return Err(PositionError::OrderNotFilled {
                status: order.status,
            });
        }

        let exit_price = match order.average_price {
            Some(p) => p,
            None => self.connector.get_ticker(snapshot.symbol()).await?.last_price,
        };
        let realized = trader_core::pnl(
            snapshot.side(),
            snapshot.position.entry_price,
            exit_price,
            snapshot.position.quantity,
            snapshot.position.leverage,
        );

        if let Some(trade_id) = snapshot.trade_id {
            self.trades
                .close(
                    trade_id,
                    TradeExit {
                        exit_price,
                        exit_amount: snapshot.position.quantity,
                        reason,
                        exit_order_id: Some(order.id.clone()),
                        fees: order.fee.unwrap_or(Decimal::ZERO),
                    },
                )
                .await?;
        }

        // Persistence succeeded (or there was no handle); commit removal.
        let mut closed = {
            let mut active = self.active.lock();
            active.remove(&id).ok_or(PositionError::NotFound(id))?
        };
        closed.update_price(exit_price);
        self.risk
            .register_close(&closed.trader_id, closed.symbol(), realized);
        metrics::ACTIVE_POSITIONS.set(self.active_count() as i64);
        metrics::POSITIONS_CLOSED_TOTAL
            .with_label_values(&[&reason.to_string()])
            .inc();

        info!(
            position_id = %id,
            symbol = %closed.symbol(),
            %reason,
            %exit_price,
            %realized,
            "position closed"
        );

        let mut event = PositionEvent::from_position("closed", &closed);
        event.realized_pnl = Some(realized);
        event.exit_reason = Some(reason.to_string());
        self.publish(event);

        self.feed_pattern_store(&closed, realized).await;
        self.history.lock().push(closed);
        Ok(realized)
    }

    /// Learning is best-effort; failures are logged and swallowed.
    async fn feed_pattern_store(&self, closed: &ManagedPosition, realized: Decimal) {
        let Some(patterns) = &self.patterns else {
            return;
        };

        if let Some(pattern_id) = &closed.pattern_id {
            if let Err(e) = patterns
                .record_outcome(pattern_id, realized, realized > Decimal::ZERO)
                .await
            {
                warn!(pattern_id, error = %e, "pattern outcome update failed");
            }
        } else if realized > self.config.pattern_min_profit {
            let Some(trade_id) = closed.trade_id else {
                return;
            };
            match self.trades.find_by_id(trade_id).await {
                Ok(Some(record)) => {
                    if let Err(e) = patterns
                        .learn_from_trade(&record, &closed.entry_indicators)
                        .await
                    {
                        warn!(error = %e, "pattern extraction failed");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "closed trade lookup failed"),
            }
        }
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    /// Rebuild `active` from persisted OPEN trades after a restart.
    ///
    /// A trade whose symbol still has a position on the exchange is
    /// reconstructed (fresh position id, persisted trade id); one without
    /// is closed as ORPHANED at its entry price, best-effort accounting.
    /// Idempotent: trades already tracked are skipped.
    pub async fn recover_positions(&self) -> PositionResult<usize> {
        let open_trades = self.trades.find_all_open_trades().await?;
        let mut recovered = 0usize;

        for trade in open_trades {
            let already_tracked = {
                let active = self.active.lock();
                active.values().any(|p| p.trade_id == Some(trade.id))
            };
            if already_tracked {
                continue;
            }

            match self.connector.get_position(&trade.trading_pair).await {
                Ok(Some(remote)) => {
                    let mut position = Position::new(
                        trade.trading_pair.clone(),
                        trade.trade_type,
                        remote.quantity,
                        trade.entry_price,
                        trade.leverage,
                    );
                    position.current_price = remote.current_price;
                    position.opened_at = trade.entry_timestamp;

                    let mut managed = ManagedPosition::new(
                        &trade.trader_id,
                        position,
                        trade.stop_loss_price,
                        trade.take_profit_price,
                        IndicatorSet::new(),
                    );
                    managed.trade_id = Some(trade.id);
                    managed.pattern_id = trade.pattern_id.clone();
                    if trade.trailing_stop_activated {
                        // Keep the persisted stop; re-anchor the reference
                        // to the live price when it is more favorable than
                        // the entry, so the ratchet resumes from reality.
                        if managed.arm_trailing(None).is_ok() {
                            let live = remote.current_price;
                            let improves = match managed.side() {
                                TradeSide::Long => live > managed.position.entry_price,
                                TradeSide::Short => live < managed.position.entry_price,
                            };
                            if improves {
                                managed.trailing_reference = Some(live);
                            }
                        }
                    }

                    info!(
                        trade_id = trade.id,
                        symbol = %trade.trading_pair,
                        "recovered open position"
                    );
                    self.risk.register_open(
                        &trade.trader_id,
                        &trade.trading_pair,
                        trade.entry_amount.notional(trade.entry_price),
                    );
                    self.publish(PositionEvent::from_position("recovered", &managed));
                    self.active.lock().insert(managed.id, managed);
                    recovered += 1;
                }
                Ok(None) => {
                    warn!(
                        trade_id = trade.id,
                        symbol = %trade.trading_pair,
                        "open trade has no exchange position; closing as orphaned"
                    );
                    self.trades
                        .close(
                            trade.id,
                            TradeExit {
                                exit_price: trade.entry_price,
                                exit_amount: trade.entry_amount,
                                reason: ExitReason::Orphaned,
                                exit_order_id: None,
                                fees: Decimal::ZERO,
                            },
                        )
                        .await?;
                }
                Err(e) => {
                    // Leave the trade open; the next recovery pass retries.
                    warn!(trade_id = trade.id, error = %e, "recovery lookup failed");
                }
            }
        }

        metrics::ACTIVE_POSITIONS.set(self.active_count() as i64);
        Ok(recovered)
    }

    fn publish(&self, event: PositionEvent<'_>) {
        self.telemetry.publish_json(Channel::TraderPosition, &event);
    }
}

fn snapshot_from_set(set: &IndicatorSet) -> IndicatorSnapshot {
    IndicatorSnapshot {
        rsi: set.get(&IndicatorId::Rsi).and_then(IndicatorValue::as_scalar),
        macd: set
            .get(&IndicatorId::Macd)
            .and_then(IndicatorValue::as_macd)
            .map(|m| m.macd),
        sma_short: set
            .get(&IndicatorId::SmaShort)
            .and_then(IndicatorValue::as_scalar),
        sma_long: set
            .get(&IndicatorId::SmaLong)
            .and_then(IndicatorValue::as_scalar),
    }
}
