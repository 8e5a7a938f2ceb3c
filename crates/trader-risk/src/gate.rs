//! Risk gate rules and the exposure ledger behind them.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};
use trader_telemetry::{metrics, Channel, TelemetryHub};

/// Risk limits, configurable per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_leverage")]
    pub max_leverage: u32,
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
    /// Maximum cumulative realized loss over a rolling day, in quote
    /// currency. Positive number.
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: Decimal,
}

fn default_max_leverage() -> u32 {
    10
}

fn default_max_open_positions() -> usize {
    3
}

fn default_max_daily_loss() -> Decimal {
    dec!(1000)
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_leverage: default_max_leverage(),
            max_open_positions: default_max_open_positions(),
            max_daily_loss: default_max_daily_loss(),
        }
    }
}

/// Outcome of the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskDecision {
    Allowed,
    Denied { rule: &'static str, reason: String },
}

impl RiskDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    fn denied(rule: &'static str, reason: String) -> Self {
        Self::Denied { rule, reason }
    }
}

/// One open exposure tracked per trader.
#[derive(Debug, Clone)]
struct OpenExposure {
    symbol: String,
    notional: Decimal,
}

#[derive(Default)]
struct Ledger {
    /// Per-trader notional budget, registered at trader start.
    budgets: HashMap<String, Decimal>,
    /// Open exposures per trader.
    open: HashMap<String, Vec<OpenExposure>>,
    /// Realized P&L entries within the rolling window.
    realized: VecDeque<(DateTime<Utc>, Decimal)>,
}

impl Ledger {
    fn prune_realized(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(24);
        while self.realized.front().is_some_and(|(t, _)| *t < cutoff) {
            self.realized.pop_front();
        }
    }

    fn rolling_realized(&mut self, now: DateTime<Utc>) -> Decimal {
        self.prune_realized(now);
        self.realized.iter().map(|(_, pnl)| *pnl).sum()
    }
}

/// Audit record published per decision.
#[derive(Debug, Serialize)]
struct RiskAuditEvent<'a> {
    source: &'static str,
    trader_id: &'a str,
    symbol: &'a str,
    notional: Decimal,
    leverage: u32,
    allowed: bool,
    rule: Option<&'static str>,
    reason: Option<&'a str>,
    timestamp: DateTime<Utc>,
}

/// The pre-trade gate.
///
/// Injected into the position manager at construction; the reverse
/// dependency never exists.
pub struct RiskManager {
    config: RiskConfig,
    telemetry: Arc<TelemetryHub>,
    ledger: Mutex<Ledger>,
}

impl RiskManager {
    pub fn new(config: RiskConfig, telemetry: Arc<TelemetryHub>) -> Self {
        Self {
            config,
            telemetry,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Register (or update) a trader's notional budget.
    pub fn register_trader(&self, trader_id: &str, budget: Decimal) {
        self.ledger
            .lock()
            .budgets
            .insert(trader_id.to_string(), budget);
    }

    /// Gate an order before submission. The first failing rule denies.
    pub fn can_open_position(
        &self,
        trader_id: &str,
        symbol: &str,
        notional: Decimal,
        leverage: u32,
    ) -> RiskDecision {
        let decision = self.evaluate(trader_id, symbol, notional, leverage);

        if let RiskDecision::Denied { rule, reason } = &decision {
            warn!(trader_id, symbol, rule, reason, "risk gate denied");
            metrics::RISK_DENIED_TOTAL.with_label_values(&[rule]).inc();
        } else {
            debug!(trader_id, symbol, %notional, leverage, "risk gate allowed");
        }

        let (rule, reason) = match &decision {
            RiskDecision::Denied { rule, reason } => (Some(*rule), Some(reason.as_str())),
            RiskDecision::Allowed => (None, None),
        };
        self.telemetry.publish_json(
            Channel::SystemEvent,
            &RiskAuditEvent {
                source: "risk-gate",
                trader_id,
                symbol,
                notional,
                leverage,
                allowed: decision.is_allowed(),
                rule,
                reason,
                timestamp: Utc::now(),
            },
        );

        decision
    }

    fn evaluate(
        &self,
        trader_id: &str,
        symbol: &str,
        notional: Decimal,
        leverage: u32,
    ) -> RiskDecision {
        let mut ledger = self.ledger.lock();

        // Rule 1: leverage cap.
        if leverage > self.config.max_leverage {
            return RiskDecision::denied(
                "leverage",
                format!(
                    "leverage {leverage} exceeds maximum {}",
                    self.config.max_leverage
                ),
            );
        }

        // Rule 2: notional exposure against the trader's budget.
        let open = ledger.open.get(trader_id).cloned();
        let open_notional: Decimal = open
            .as_ref()
            .map(|v| v.iter().map(|e| e.notional).sum())
            .unwrap_or(Decimal::ZERO);
        let budget = ledger.budgets.get(trader_id).copied();
        if let Some(budget) = budget {
            let cap = budget * Decimal::from(self.config.max_leverage);
            if open_notional + notional > cap {
                return RiskDecision::denied(
                    "exposure",
                    format!(
                        "open notional {open_notional} + {notional} exceeds budget cap {cap}"
                    ),
                );
            }
        }

        // Rule 3: open-position count.
        let open_count = open.as_ref().map(Vec::len).unwrap_or(0);
        if open_count >= self.config.max_open_positions {
            return RiskDecision::denied(
                "position-count",
                format!(
                    "{open_count} open positions at or above limit {}",
                    self.config.max_open_positions
                ),
            );
        }

        // Rule 4: rolling-day realized loss floor.
        let realized = ledger.rolling_realized(Utc::now());
        if realized <= -self.config.max_daily_loss {
            return RiskDecision::denied(
                "daily-loss",
                format!(
                    "realized {realized} within the last day breaches -{}",
                    self.config.max_daily_loss
                ),
            );
        }

        // Rule 5: one position per symbol, no hedging.
        if open.is_some_and(|v| v.iter().any(|e| e.symbol == symbol)) {
            return RiskDecision::denied(
                "symbol-exclusive",
                format!("a position on {symbol} is already open"),
            );
        }

        RiskDecision::Allowed
    }

    /// Record a filled open. Called by the position manager after commit.
    pub fn register_open(&self, trader_id: &str, symbol: &str, notional: Decimal) {
        self.ledger
            .lock()
            .open
            .entry(trader_id.to_string())
            .or_default()
            .push(OpenExposure {
                symbol: symbol.to_string(),
                notional,
            });
    }

    /// Record a close and its realized P&L.
    pub fn register_close(&self, trader_id: &str, symbol: &str, realized_pnl: Decimal) {
        let mut ledger = self.ledger.lock();
        if let Some(open) = ledger.open.get_mut(trader_id) {
            if let Some(index) = open.iter().position(|e| e.symbol == symbol) {
                open.remove(index);
            }
        }
        ledger.realized.push_back((Utc::now(), realized_pnl));
    }

    /// Open positions currently tracked for a trader.
    pub fn open_position_count(&self, trader_id: &str) -> usize {
        self.ledger
            .lock()
            .open
            .get(trader_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> RiskManager {
        let hub = Arc::new(TelemetryHub::new(16));
        let manager = RiskManager::new(RiskConfig::default(), hub);
        manager.register_trader("t1", dec!(1000));
        manager
    }

    #[test]
    fn test_allows_within_limits() {
        let m = manager();
        assert!(m.can_open_position("t1", "BTCUSDT", dec!(500), 2).is_allowed());
    }

    #[test]
    fn test_leverage_cap() {
        let m = manager();
        let decision = m.can_open_position("t1", "BTCUSDT", dec!(10), 11);
        assert!(matches!(decision, RiskDecision::Denied { rule: "leverage", .. }));
    }

    #[test]
    fn test_exposure_cap() {
        let m = manager();
        // Budget 1000 * max leverage 10 = 10000 cap.
        m.register_open("t1", "ETHUSDT", dec!(9000));
        let decision = m.can_open_position("t1", "BTCUSDT", dec!(2000), 1);
        assert!(matches!(decision, RiskDecision::Denied { rule: "exposure", .. }));
    }

    #[test]
    fn test_position_count_cap() {
        let m = manager();
        m.register_open("t1", "ETHUSDT", dec!(10));
        m.register_open("t1", "SOLUSDT", dec!(10));
        m.register_open("t1", "XRPUSDT", dec!(10));
        let decision = m.can_open_position("t1", "BTCUSDT", dec!(10), 1);
        assert!(matches!(
            decision,
            RiskDecision::Denied { rule: "position-count", .. }
        ));
    }

    #[test]
    fn test_daily_loss_floor() {
        let m = manager();
        m.register_close("t1", "ETHUSDT", dec!(-600));
        m.register_close("t1", "SOLUSDT", dec!(-500));
        let decision = m.can_open_position("t1", "BTCUSDT", dec!(10), 1);
        assert!(matches!(decision, RiskDecision::Denied { rule: "daily-loss", .. }));
    }

    #[test]
    fn test_profits_offset_losses_in_window() {
        let m = manager();
        m.register_close("t1", "ETHUSDT", dec!(-900));
        m.register_close("t1", "SOLUSDT", dec!(400));
        assert!(m.can_open_position("t1", "BTCUSDT", dec!(10), 1).is_allowed());
    }

    #[test]
    fn test_same_symbol_exclusive() {
        let m = manager();
        m.register_open("t1", "BTCUSDT", dec!(100));
        let decision = m.can_open_position("t1", "BTCUSDT", dec!(100), 1);
        assert!(matches!(
            decision,
            RiskDecision::Denied { rule: "symbol-exclusive", .. }
        ));
        // A different symbol is fine.
        assert!(m.can_open_position("t1", "ETHUSDT", dec!(100), 1).is_allowed());
    }

    #[test]
    fn test_close_releases_exposure() {
        let m = manager();
        m.register_open("t1", "BTCUSDT", dec!(100));
        assert_eq!(m.open_position_count("t1"), 1);
        m.register_close("t1", "BTCUSDT", dec!(25));
        assert_eq!(m.open_position_count("t1"), 0);
        assert!(m.can_open_position("t1", "BTCUSDT", dec!(100), 1).is_allowed());
    }

    #[test]
    fn test_traders_are_isolated() {
        let m = manager();
        m.register_trader("t2", dec!(1000));
        m.register_open("t1", "BTCUSDT", dec!(100));
        assert!(m.can_open_position("t2", "BTCUSDT", dec!(100), 1).is_allowed());
    }

    #[tokio::test]
    async fn test_denial_emits_audit_event() {
        let hub = Arc::new(TelemetryHub::new(16));
        let m = RiskManager::new(RiskConfig::default(), hub.clone());
        m.register_trader("t1", dec!(1000));

        let (_, mut rx) = hub.subscribe(Channel::SystemEvent, false);
        m.can_open_position("t1", "BTCUSDT", dec!(10), 99);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload["allowed"], false);
        assert_eq!(event.payload["rule"], "leverage");
    }
}
