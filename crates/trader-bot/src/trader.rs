//! The AI trader: lifecycle state machine, tick loop, metrics.
//!
//! State transitions are validated by an explicit table behind a mutex;
//! illegal edges are rejected rather than raced. The tick loop runs as one
//! tokio task owned by the trader, cancelled at the next suspension point
//! on `stop()` and bounded by a shutdown timeout.

use crate::config::AITraderConfig;
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use trader_core::{Price, Qty, SignalAction, TradeSide};
use trader_exchange::ExchangeConnector;
use trader_market::{MarketDataProcessor, ProcessorError};
use trader_patterns::PatternStore;
use trader_persistence::ExitReason;
use trader_position::{OpenOrder, PositionError, PositionManager};
use trader_risk::RiskManager;
use trader_strategy::Strategy;
use trader_telemetry::{metrics, Channel, TelemetryHub};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Relevance floor for tagging an open with a known pattern.
const PATTERN_TAG_RELEVANCE: f64 = 0.7;

/// Lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TraderState {
    Idle,
    Starting,
    Running,
    Paused,
    Stopping,
    Stopped,
    Error,
}

impl TraderState {
    /// The legal edges of the lifecycle graph. Any state may enter Error.
    pub fn can_transition_to(self, next: TraderState) -> bool {
        use TraderState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Stopped, Starting)
                | (Starting, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Stopping)
                | (Paused, Stopping)
                | (Stopping, Stopped)
                | (_, Error)
        )
    }
}

/// Performance counters, reset on every start.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TraderMetrics {
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub total_profit: Decimal,
    pub total_loss: Decimal,
    pub signals_executed: u64,
    pub close_signals_executed: u64,
    pub start_time: Option<DateTime<Utc>>,
}

impl TraderMetrics {
    pub fn net_profit(&self) -> Decimal {
        self.total_profit - self.total_loss
    }

    pub fn win_rate(&self) -> f64 {
        let closed = self.winning_trades + self.losing_trades;
        if closed == 0 {
            return 0.0;
        }
        self.winning_trades as f64 / closed as f64
    }

    pub fn uptime(&self) -> Duration {
        self.start_time
            .map(|t| (Utc::now() - t).to_std().unwrap_or_default())
            .unwrap_or_default()
    }

    fn record_close(&mut self, realized: Decimal) {
        if realized >= Decimal::ZERO {
            self.winning_trades += 1;
            self.total_profit += realized;
        } else {
            self.losing_trades += 1;
            self.total_loss += -realized;
        }
    }
}

/// Telemetry sample published every tick.
#[derive(Debug, Serialize)]
struct StatusSample<'a> {
    trader_id: &'a str,
    name: &'a str,
    state: TraderState,
    symbol: &'a str,
    metrics: &'a TraderMetrics,
    net_profit: Decimal,
    win_rate: f64,
    uptime_seconds: u64,
}

struct TickTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// One configured trader and its tick loop.
pub struct AITrader {
    config: Mutex<AITraderConfig>,
    state: Mutex<TraderState>,
    connector: Arc<dyn ExchangeConnector>,
    positions: Arc<PositionManager>,
    risk: Arc<RiskManager>,
    patterns: Option<Arc<PatternStore>>,
    telemetry: Arc<TelemetryHub>,
    processor: MarketDataProcessor,
    strategy: Mutex<Strategy>,
    metrics: Mutex<TraderMetrics>,
    stop_loss_percent: Decimal,
    take_profit_percent: Decimal,
    trailing_stop: bool,
    tick_task: Mutex<Option<TickTask>>,
}

impl AITrader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AITraderConfig,
        connector: Arc<dyn ExchangeConnector>,
        positions: Arc<PositionManager>,
        risk: Arc<RiskManager>,
        patterns: Option<Arc<PatternStore>>,
        telemetry: Arc<TelemetryHub>,
        stop_loss_percent: Decimal,
        take_profit_percent: Decimal,
        trailing_stop: bool,
    ) -> Arc<Self> {
        let strategy = Strategy::from_kind(config.strategy);
        Arc::new(Self {
            config: Mutex::new(config),
            state: Mutex::new(TraderState::Idle),
            connector,
            positions,
            risk,
            patterns,
            telemetry,
            processor: MarketDataProcessor::new(),
            strategy: Mutex::new(strategy),
            metrics: Mutex::new(TraderMetrics::default()),
            stop_loss_percent,
            take_profit_percent,
            trailing_stop,
            tick_task: Mutex::new(None),
        })
    }

    pub fn id(&self) -> String {
        self.config.lock().id.clone()
    }

    pub fn state(&self) -> TraderState {
        *self.state.lock()
    }

    pub fn metrics(&self) -> TraderMetrics {
        self.metrics.lock().clone()
    }

    fn transition(&self, to: TraderState) -> AppResult<()> {
        // Config is read before the state lock; every path takes the locks
        // in that order.
        let id = self.config.lock().id.clone();
        let mut state = self.state.lock();
        if !state.can_transition_to(to) {
            return Err(AppError::IllegalTransition { from: *state, to });
        }
        debug!(trader_id = %id, from = ?*state, ?to, "state transition");
        metrics::TRADER_STATE
            .with_label_values(&[&id, &format!("{:?}", *state)])
            .set(0);
        metrics::TRADER_STATE
            .with_label_values(&[&id, &format!("{to:?}")])
            .set(1);
        *state = to;
        Ok(())
    }

    fn enter_error(&self) {
        let mut state = self.state.lock();
        *state = TraderState::Error;
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the tick loop.
    ///
    /// Fails idempotently when already running (the illegal transition is
    /// reported, state is unchanged). A connector that cannot be reached
    /// is a fatal startup error and the trader lands in Error.
    pub async fn start(self: &Arc<Self>) -> AppResult<()> {
        self.transition(TraderState::Starting)?;

        let (id, virtual_money) = {
            let config = self.config.lock();
            (config.id.clone(), config.virtual_money)
        };

        if !self.connector.is_connected() {
            if let Err(e) = self.connector.connect().await {
                error!(trader_id = %id, error = %e, "startup connection failed");
                self.enter_error();
                return Err(AppError::FatalStartup(e.to_string()));
            }
        }

        self.risk.register_trader(&id, virtual_money);

        // Metrics reset on each start.
        *self.metrics.lock() = TraderMetrics {
            start_time: Some(Utc::now()),
            ..Default::default()
        };
        self.processor.clear_cache();

        self.transition(TraderState::Running)?;

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let trader = Arc::clone(self);
        let handle = tokio::spawn(async move {
            trader.run_tick_loop(task_cancel).await;
        });
        *self.tick_task.lock() = Some(TickTask { cancel, handle });

        info!(trader_id = %id, "trader started");
        self.publish_status();
        Ok(())
    }

    pub fn pause(&self) -> AppResult<()> {
        self.transition(TraderState::Paused)?;
        info!(trader_id = %self.id(), "trader paused");
        self.publish_status();
        Ok(())
    }

    pub fn resume(&self) -> AppResult<()> {
        self.transition(TraderState::Running)?;
        info!(trader_id = %self.id(), "trader resumed");
        self.publish_status();
        Ok(())
    }

    /// Stop: cancel the loop at its next suspension point, wait for the
    /// in-flight tick bounded by the shutdown timeout.
    pub async fn stop(&self) -> AppResult<()> {
        self.transition(TraderState::Stopping)?;

        let task = self.tick_task.lock().take();
        if let Some(task) = task {
            task.cancel.cancel();
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, task.handle).await.is_err() {
                warn!(trader_id = %self.id(), "tick loop did not finish within the shutdown timeout");
            }
        }

        self.transition(TraderState::Stopped)?;
        info!(trader_id = %self.id(), "trader stopped");
        self.publish_status();
        Ok(())
    }

    /// Replace the configuration. Only legal while Stopped or Idle; the id
    /// is immutable.
    pub fn update_config(&self, new_config: AITraderConfig) -> AppResult<()> {
        let state = self.state();
        if !matches!(state, TraderState::Stopped | TraderState::Idle) {
            return Err(AppError::ConfigLocked(state));
        }
        let mut config = self.config.lock();
        if new_config.id != config.id {
            return Err(AppError::ConfigIdChange);
        }
        new_config.validate()?;
        *self.strategy.lock() = Strategy::from_kind(new_config.strategy);
        *config = new_config;
        Ok(())
    }

    // ========================================================================
    // Tick loop
    // ========================================================================

    fn tick_period(&self) -> Duration {
        let config = self.config.lock();
        match config.tick_seconds {
            Some(secs) => Duration::from_secs(secs.max(1)),
            None => Duration::from_secs(config.candlestick_interval.as_secs()),
        }
    }

    async fn run_tick_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick_period());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(trader_id = %self.id(), "tick loop cancelled");
                    return;
                }
                _ = ticker.tick() => {}
            }

            match self.state() {
                TraderState::Running => {}
                TraderState::Paused => continue,
                // Stopping/Stopped/Error: the loop has no business running.
                _ => return,
            }

            if self.trading_duration_exceeded() {
                info!(trader_id = %self.id(), "max trading duration reached");
                let _ = self.transition(TraderState::Stopping);
                let _ = self.transition(TraderState::Stopped);
                self.publish_status();
                return;
            }

            if let Err(e) = self.tick().await {
                // Connector faults were already retried by the connector
                // itself; whatever surfaces here is logged and the trader
                // moves on to the next tick.
                warn!(trader_id = %self.id(), error = %e, "tick failed");
            }
            self.publish_status();
        }
    }

    fn trading_duration_exceeded(&self) -> bool {
        let limit = self.config.lock().max_trading_duration_minutes;
        let Some(minutes) = limit else {
            return false;
        };
        self.metrics.lock().uptime() >= Duration::from_secs(minutes * 60)
    }

    /// One trading decision: fetch, process, evaluate, act.
    async fn tick(&self) -> AppResult<()> {
        let (id, symbol, interval, leverage, stake, exchange) = {
            let config = self.config.lock();
            (
                config.id.clone(),
                config.symbol.clone(),
                config.candlestick_interval,
                config.leverage,
                config.max_stake_amount,
                config.exchange,
            )
        };

        let (required, data_points) = {
            let strategy = self.strategy.lock();
            (strategy.required_indicators(), strategy.required_data_points())
        };

        let candles = self
            .connector
            .get_candlesticks(&symbol, interval, data_points)
            .await?;

        let processed = match self.processor.process(&candles, &required) {
            Ok(processed) => processed,
            Err(ProcessorError::Insufficient { indicator, .. }) => {
                // Warm-up: not enough history yet, hold this tick.
                debug!(trader_id = %id, %indicator, "insufficient data, holding");
                return Ok(());
            }
            Err(e) => {
                warn!(trader_id = %id, error = %e, "market data rejected");
                return Ok(());
            }
        };

        let signal = self.strategy.lock().evaluate(&processed);
        metrics::SIGNALS_TOTAL
            .with_label_values(&[&id, &signal.action.to_string()])
            .inc();
        debug!(
            trader_id = %id,
            action = %signal.action,
            confidence = signal.confidence,
            reason = %signal.reason,
            "signal evaluated"
        );

        let open_position = self.positions.find_by_symbol(&id, &symbol);

        match signal.action {
            SignalAction::Buy | SignalAction::Sell => {
                if open_position.is_some() {
                    return Ok(());
                }
                let side = match signal.action {
                    SignalAction::Buy => TradeSide::Long,
                    _ => TradeSide::Short,
                };

                let price = processed.latest_price;
                let quantity = Qty::new((stake / price.inner()).round_dp(6));
                if !quantity.is_positive() {
                    return Ok(());
                }

                let (stop_loss, take_profit) = protective_levels(
                    side,
                    price,
                    self.stop_loss_percent,
                    self.take_profit_percent,
                );

                let pattern_id = self
                    .best_pattern(&processed, exchange, &symbol)
                    .await;

                let request = OpenOrder {
                    trader_id: id.clone(),
                    symbol: symbol.clone(),
                    side,
                    quantity,
                    leverage,
                    interval,
                    stop_loss: Some(stop_loss),
                    take_profit: Some(take_profit),
                    signal,
                    pattern_id,
                };

                match self.positions.open_position(request).await {
                    Ok(position) => {
                        if self.trailing_stop {
                            if let Err(e) = self
                                .positions
                                .update_stop_loss(position.id, stop_loss, true)
                                .await
                            {
                                warn!(trader_id = %id, error = %e, "failed to arm trailing stop");
                            }
                        }
                        let mut metrics = self.metrics.lock();
                        metrics.signals_executed += 1;
                        metrics.total_trades += 1;
                    }
                    Err(PositionError::RiskDenied { rule, reason }) => {
                        // Denial is final for this tick, never retried.
                        debug!(trader_id = %id, rule, reason, "open denied by risk gate");
                    }
                    Err(e) => {
                        warn!(trader_id = %id, error = %e, "open failed");
                    }
                }
            }
            SignalAction::Close => {
                let Some(position) = open_position else {
                    return Ok(());
                };
                match self.positions.close_position(position.id, ExitReason::Signal).await {
                    Ok(realized) => {
                        let mut metrics = self.metrics.lock();
                        metrics.close_signals_executed += 1;
                        metrics.record_close(realized);
                    }
                    Err(PositionError::AlreadyClosing(_)) => {}
                    Err(e) => {
                        warn!(trader_id = %id, error = %e, "close failed");
                    }
                }
            }
            SignalAction::Hold => {}
        }

        Ok(())
    }

    /// Most relevant stored pattern for the current conditions, if any
    /// clears the tagging floor.
    async fn best_pattern(
        &self,
        processed: &trader_market::ProcessedData,
        exchange: trader_core::Exchange,
        symbol: &str,
    ) -> Option<String> {
        let patterns = self.patterns.as_ref()?;
        let conditions = trader_core::MarketConditions {
            exchange,
            symbol: symbol.to_string(),
            current_price: processed.latest_price,
            indicators: processed.indicators.clone(),
            timestamp: Utc::now(),
        };
        match patterns.find_relevant(&conditions, PATTERN_TAG_RELEVANCE).await {
            Ok(ranked) => ranked.into_iter().next().map(|(p, _)| p.id),
            Err(e) => {
                warn!(error = %e, "pattern lookup failed");
                None
            }
        }
    }

    fn publish_status(&self) {
        let config = self.config.lock();
        let state = *self.state.lock();
        let metrics = self.metrics.lock();
        let sample = StatusSample {
            trader_id: &config.id,
            name: &config.name,
            state,
            symbol: &config.symbol,
            metrics: &metrics,
            net_profit: metrics.net_profit(),
            win_rate: metrics.win_rate(),
            uptime_seconds: metrics.uptime().as_secs(),
        };
        self.telemetry.publish_json(Channel::TraderStatus, &sample);
    }
}

/// Stop-loss and take-profit levels from entry-relative percentages.
fn protective_levels(
    side: TradeSide,
    price: Price,
    stop_percent: Decimal,
    take_percent: Decimal,
) -> (Price, Price) {
    let hundred = Decimal::from(100);
    match side {
        TradeSide::Long => (
            Price::new(price.inner() * (hundred - stop_percent) / hundred),
            Price::new(price.inner() * (hundred + take_percent) / hundred),
        ),
        TradeSide::Short => (
            Price::new(price.inner() * (hundred + stop_percent) / hundred),
            Price::new(price.inner() * (hundred - take_percent) / hundred),
        ),
    }
}
