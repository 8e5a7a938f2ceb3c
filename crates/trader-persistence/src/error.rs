//! Persistence error types.
//!
//! These are non-retryable by the core: a failed persistence call is
//! surfaced upward, never re-attempted blindly.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Trade {0} not found")]
    TradeNotFound(i64),

    #[error("Trade {0} is already closed")]
    AlreadyClosed(i64),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;
