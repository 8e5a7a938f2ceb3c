//! Core domain types for the trader runtime.
//!
//! Shared by every other crate: decimal price/quantity newtypes, candles,
//! orders, positions, signals, market snapshots, and the exchange error
//! taxonomy.

pub mod candle;
pub mod decimal;
pub mod error;
pub mod market;
pub mod order;
pub mod position;
pub mod signal;

pub use candle::{Candle, Interval};
pub use decimal::{Price, Qty};
pub use error::{CoreError, ExchangeError, OrderErrorCode, Result};
pub use market::{
    Balance, BollingerValue, Exchange, IndicatorId, IndicatorSet, IndicatorValue, MacdValue,
    MarketConditions, Ticker,
};
pub use order::{Order, OrderRequest, OrderStatus, OrderType, TradeSide};
pub use position::{pnl, Position};
pub use signal::{SignalAction, TradingSignal};
