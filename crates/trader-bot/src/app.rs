//! Application assembly and shutdown.
//!
//! One connector per configured exchange, shared by every trader on that
//! exchange; one position manager (with monitoring loop) per connector;
//! one globally shared telemetry hub, risk manager, and pattern store.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::trader::AITrader;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use trader_core::Exchange;
use trader_exchange::{build_connector, ExchangeConnector};
use trader_patterns::{JournalPatternRepository, PatternStore};
use trader_persistence::JournalTradeRepository;
use trader_position::{MonitorHandle, PositionManager, PositionManagerConfig};
use trader_risk::RiskManager;
use trader_telemetry::TelemetryHub;

pub struct Application {
    config: AppConfig,
    telemetry: Arc<TelemetryHub>,
    risk: Arc<RiskManager>,
    patterns: Arc<PatternStore>,
    connectors: HashMap<Exchange, Arc<dyn ExchangeConnector>>,
    managers: HashMap<Exchange, Arc<PositionManager>>,
    traders: Vec<Arc<AITrader>>,
    monitors: Vec<MonitorHandle>,
    heartbeat_cancel: CancellationToken,
}

impl Application {
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;

        let telemetry = Arc::new(TelemetryHub::new(config.telemetry.replay_limit));
        let risk = Arc::new(RiskManager::new(config.risk.clone(), telemetry.clone()));

        let data_dir = PathBuf::from(&config.data_dir);
        let trades: Arc<dyn trader_persistence::TradeRepository> =
            Arc::new(JournalTradeRepository::open(data_dir.join("trades.jsonl"))?);
        let patterns = Arc::new(PatternStore::new(Arc::new(JournalPatternRepository::open(
            data_dir.join("patterns.jsonl"),
        )?)));

        let mut connectors = HashMap::new();
        let mut managers = HashMap::new();
        for exchange_config in &config.exchanges {
            let exchange = exchange_config.exchange;
            let connector = build_connector(exchange_config.clone())?;
            let manager = PositionManager::new(
                connector.clone(),
                risk.clone(),
                trades.clone(),
                Some(patterns.clone()),
                telemetry.clone(),
                PositionManagerConfig {
                    update_interval: Duration::from_secs(
                        config.position_manager.update_interval_seconds,
                    ),
                    ..Default::default()
                },
            );
            connectors.insert(exchange, connector);
            managers.insert(exchange, manager);
        }

        let mut traders = Vec::new();
        for trader_config in &config.traders {
            let exchange = trader_config.exchange;
            let connector = connectors
                .get(&exchange)
                .expect("validated: exchange configured")
                .clone();
            let manager = managers
                .get(&exchange)
                .expect("validated: exchange configured")
                .clone();

            traders.push(AITrader::new(
                trader_config.clone(),
                connector,
                manager,
                risk.clone(),
                Some(patterns.clone()),
                telemetry.clone(),
                config.stop_loss_percent(trader_config),
                config.take_profit_percent(trader_config),
                config.trailing_stop(trader_config),
            ));
        }

        Ok(Self {
            config,
            telemetry,
            risk,
            patterns,
            connectors,
            managers,
            traders,
            monitors: Vec::new(),
            heartbeat_cancel: CancellationToken::new(),
        })
    }

    /// Periodic liveness event on the system-event channel.
    fn spawn_heartbeat(&self) {
        let telemetry = self.telemetry.clone();
        let period = Duration::from_secs(self.config.telemetry.heartbeat_seconds.max(1));
        let cancel = self.heartbeat_cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        telemetry.publish_json(
                            trader_telemetry::Channel::SystemEvent,
                            &serde_json::json!({
                                "source": "heartbeat",
                                "timestamp": chrono::Utc::now(),
                            }),
                        );
                    }
                }
            }
        });
    }

    pub fn telemetry(&self) -> &Arc<TelemetryHub> {
        &self.telemetry
    }

    pub fn risk(&self) -> &Arc<RiskManager> {
        &self.risk
    }

    pub fn patterns(&self) -> &Arc<PatternStore> {
        &self.patterns
    }

    /// Connect, recover, start everything, then run until SIGINT.
    pub async fn run(&mut self) -> AppResult<()> {
        // Connect every exchange first; a dead exchange is fatal at startup.
        for (exchange, connector) in &self.connectors {
            info!(%exchange, "connecting exchange");
            connector
                .connect()
                .await
                .map_err(|e| AppError::FatalStartup(format!("{exchange}: {e}")))?;
        }

        // Reconcile persisted open trades before any trader acts.
        for (exchange, manager) in &self.managers {
            let recovered = manager.recover_positions().await?;
            info!(%exchange, recovered, "position recovery complete");
        }

        // Monitoring loops own protective exits from here on.
        for manager in self.managers.values() {
            self.monitors.push(MonitorHandle::spawn(manager.clone()));
        }
        self.spawn_heartbeat();

        for trader in &self.traders {
            if let Err(e) = trader.start().await {
                error!(trader_id = %trader.id(), error = %e, "trader failed to start");
            }
        }
        info!(traders = self.traders.len(), "application running");

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| AppError::Config(format!("signal handler: {e}")))?;
        info!("shutdown signal received");

        self.shutdown().await;
        Ok(())
    }

    /// Stop traders, then monitors, then disconnect. Bounded by each
    /// component's own shutdown timeout.
    pub async fn shutdown(&mut self) {
        self.heartbeat_cancel.cancel();
        for trader in &self.traders {
            if let Err(e) = trader.stop().await {
                // A trader that already stopped itself reports an illegal
                // transition; that is fine during shutdown.
                warn!(trader_id = %trader.id(), error = %e, "trader stop reported");
            }
        }
        for monitor in self.monitors.drain(..) {
            monitor.stop().await;
        }
        for (exchange, connector) in &self.connectors {
            connector.disconnect().await;
            info!(%exchange, "disconnected");
        }
        info!("shutdown complete");
    }

    pub fn traders(&self) -> &[Arc<AITrader>] {
        &self.traders
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}
