//! Telemetry for the trader runtime.
//!
//! - Broadcast fan-out with replay buffer ([`TelemetryHub`])
//! - Structured logging with tracing
//! - Prometheus metrics

pub mod error;
pub mod hub;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use hub::{Channel, TelemetryEvent, TelemetryHub};
pub use logging::init_logging;
