//! Exchange connectivity.
//!
//! A connector composes three layers on every call: token-bucket rate
//! limiting, HMAC request signing for private endpoints, and a classified
//! retry policy. Market data additionally flows over a websocket candle
//! feed with automatic reconnection.
//!
//! All interactions target paper/testnet endpoints selected via
//! configuration; live trading endpoints are never the default.

pub mod auth;
pub mod binance;
pub mod bitget;
pub mod config;
pub mod connector;
pub mod rate_limiter;
mod rest;
pub mod retry;
pub mod stream;
pub mod symbol;

pub use auth::{ApiCredentials, HmacAuthenticator};
pub use binance::BinanceConnector;
pub use bitget::BitgetConnector;
pub use config::{ExchangeConfig, RateLimitConfig, RetryConfig};
pub use connector::{CandleStream, ExchangeConnector};
pub use rate_limiter::{RateLimiter, RateLimiterMetrics};
pub use retry::RetryPolicy;

use std::sync::Arc;
use trader_core::{Exchange, ExchangeError};

/// Result alias for connector operations.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Build a connector for the configured exchange.
///
/// One connector instance per exchange is shared by all traders on that
/// exchange; the caller is responsible for the sharing.
pub fn build_connector(config: ExchangeConfig) -> ExchangeResult<Arc<dyn ExchangeConnector>> {
    match config.exchange {
        Exchange::Bitget => Ok(Arc::new(BitgetConnector::new(config)?)),
        Exchange::Binance => Ok(Arc::new(BinanceConnector::new(config)?)),
    }
}
