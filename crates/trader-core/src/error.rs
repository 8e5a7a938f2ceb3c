//! Error types shared across the runtime.
//!
//! `ExchangeError` is the connector fault taxonomy consumed by the retry
//! policy, the position manager, and the trader loop. Retryability is a
//! property of the variant, not of the call site.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid quantity: {0}")]
    InvalidQty(String),

    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Order rejection codes that are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OrderErrorCode {
    InvalidParameters,
    OrderNotFound,
    DuplicateOrder,
}

/// Exchange interaction fault taxonomy.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Network or transport failure.
    #[error("Connection error: {message}")]
    Connection { message: String, retryable: bool },

    /// Invalid credentials or signature. Surface to the operator.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Exchange-side throttle. Always retryable after the indicated delay.
    #[error("Rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    /// Cancels the pending open.
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Order rejected or lookup failed.
    #[error("Order error: {message}")]
    Order {
        code: Option<OrderErrorCode>,
        message: String,
    },

    /// Programmer error: the connector does not support this call.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Generic exchange-side error, assumed transient.
    #[error("Exchange error: {0}")]
    Remote(String),
}

impl ExchangeError {
    /// Whether the retry policy may re-attempt the failed call.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { retryable, .. } => *retryable,
            Self::RateLimited { .. } => true,
            Self::Remote(_) => true,
            Self::Order { code, .. } => code.is_none(),
            Self::Authentication(_) | Self::InsufficientFunds(_) | Self::Unsupported(_) => false,
        }
    }

    /// Convenience constructor for retryable transport faults.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            retryable: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ExchangeError::transport("reset by peer").is_retryable());
        assert!(ExchangeError::RateLimited {
            retry_after_ms: Some(500)
        }
        .is_retryable());
        assert!(ExchangeError::Remote("internal".into()).is_retryable());
        assert!(ExchangeError::Order {
            code: None,
            message: "busy".into()
        }
        .is_retryable());

        assert!(!ExchangeError::Authentication("bad sign".into()).is_retryable());
        assert!(!ExchangeError::InsufficientFunds("margin".into()).is_retryable());
        assert!(!ExchangeError::Unsupported("oco".into()).is_retryable());
        assert!(!ExchangeError::Order {
            code: Some(OrderErrorCode::InvalidParameters),
            message: "qty step".into()
        }
        .is_retryable());
        assert!(!ExchangeError::Connection {
            message: "tls handshake".into(),
            retryable: false
        }
        .is_retryable());
    }
}
