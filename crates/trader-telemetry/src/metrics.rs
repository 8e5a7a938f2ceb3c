//! Prometheus metrics for the trader runtime.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally: a registration failure
//! means duplicate metric names, a fatal configuration error that should
//! crash at startup rather than fail silently. These panics only occur
//! during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_int_gauge, register_int_gauge_vec, Counter,
    CounterVec, IntGauge, IntGaugeVec,
};

/// Total trading signals evaluated, by trader and action.
pub static SIGNALS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "trader_signals_total",
        "Total trading signals evaluated",
        &["trader", "action"]
    )
    .unwrap()
});

/// Total orders submitted, by exchange and terminal status.
pub static ORDERS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "trader_orders_total",
        "Total orders submitted",
        &["exchange", "status"]
    )
    .unwrap()
});

/// Total risk gate denials, by failing rule.
pub static RISK_DENIED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "trader_risk_denied_total",
        "Total risk gate denials",
        &["rule"]
    )
    .unwrap()
});

/// Total positions closed, by exit reason.
pub static POSITIONS_CLOSED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "trader_positions_closed_total",
        "Total positions closed",
        &["reason"]
    )
    .unwrap()
});

/// Currently open positions.
pub static ACTIVE_POSITIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("trader_active_positions", "Currently open positions").unwrap()
});

/// Trader lifecycle state (1 = in this state), by trader and state.
pub static TRADER_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "trader_state",
        "Trader lifecycle state (1=active)",
        &["trader", "state"]
    )
    .unwrap()
});

/// Total websocket reconnection attempts.
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "trader_ws_reconnect_total",
        "Total websocket reconnection attempts",
        &["exchange"]
    )
    .unwrap()
});

/// Cumulative milliseconds spent waiting on the rate limiter.
pub static RATE_LIMIT_WAIT_MS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "trader_rate_limit_wait_ms_total",
        "Cumulative milliseconds spent waiting on the rate limiter"
    )
    .unwrap()
});
