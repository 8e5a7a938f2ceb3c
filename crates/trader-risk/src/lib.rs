//! Pre-trade risk gate.
//!
//! Every order passes through [`RiskManager::can_open_position`] first.
//! Checks run in a fixed order and the first failing rule denies the tick;
//! denials are final, never retried. Each decision emits an audit event on
//! the system-event telemetry channel.

pub mod gate;

pub use gate::{RiskConfig, RiskDecision, RiskManager};
