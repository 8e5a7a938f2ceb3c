//! Position lifecycle management.
//!
//! The [`PositionManager`] owns every open position: it gates opens through
//! the risk manager, protects them with stop-loss / take-profit / trailing
//! stops, runs a monitoring loop that enforces those protections, keeps the
//! persisted trade rows consistent with runtime state, and recovers open
//! trades after a restart.

pub mod error;
pub mod managed;
pub mod manager;
pub mod monitor;

pub use error::{PositionError, PositionResult};
pub use managed::{ManagedPosition, PositionId};
pub use manager::{OpenOrder, PositionManager, PositionManagerConfig};
pub use monitor::MonitorHandle;
