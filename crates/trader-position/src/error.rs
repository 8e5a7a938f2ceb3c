//! Position management errors.

use crate::managed::PositionId;
use thiserror::Error;
use trader_core::{ExchangeError, OrderStatus};
use trader_persistence::PersistenceError;

#[derive(Debug, Error)]
pub enum PositionError {
    /// The risk gate refused the open. Final for this tick.
    #[error("Risk gate denied ({rule}): {reason}")]
    RiskDenied { rule: &'static str, reason: String },

    /// The entry order ended in a state without a fill.
    #[error("Order not filled: status {status:?}")]
    OrderNotFilled { status: OrderStatus },

    #[error("Position {0} not found")]
    NotFound(PositionId),

    /// A close for this position is already in flight or pending operator
    /// action after a failed persistence.
    #[error("Position {0} is already closing")]
    AlreadyClosing(PositionId),

    #[error("Trailing stop refused: {0}")]
    TrailingRefused(String),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

pub type PositionResult<T> = Result<T, PositionError>;
