//! Application and trader lifecycle errors.

use crate::trader::TraderState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection refused or misconfiguration at start; the trader
    /// transitions to ERROR.
    #[error("Fatal startup failure: {0}")]
    FatalStartup(String),

    #[error("Illegal state transition {from:?} -> {to:?}")]
    IllegalTransition { from: TraderState, to: TraderState },

    #[error("Config updates require a stopped trader (state {0:?})")]
    ConfigLocked(TraderState),

    #[error("Trader id is immutable")]
    ConfigIdChange,

    #[error(transparent)]
    Exchange(#[from] trader_core::ExchangeError),

    #[error(transparent)]
    Position(#[from] trader_position::PositionError),

    #[error(transparent)]
    Persistence(#[from] trader_persistence::PersistenceError),

    #[error(transparent)]
    Telemetry(#[from] trader_telemetry::TelemetryError),
}

pub type AppResult<T> = Result<T, AppError>;
