//! Market data snapshots and indicator value types.

use crate::{Price, Qty};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Supported exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Exchange {
    Binance,
    Bitget,
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binance => write!(f, "BINANCE"),
            Self::Bitget => write!(f, "BITGET"),
        }
    }
}

impl FromStr for Exchange {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BINANCE" => Ok(Self::Binance),
            "BITGET" => Ok(Self::Bitget),
            other => Err(crate::CoreError::InvalidConfig(format!(
                "unknown exchange: {other}"
            ))),
        }
    }
}

/// Latest traded price snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: Price,
    pub bid: Price,
    pub ask: Price,
    pub timestamp: DateTime<Utc>,
}

/// Account balance for the quote asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub available: Qty,
    pub frozen: Qty,
}

impl Balance {
    pub fn total(&self) -> Qty {
        self.available + self.frozen
    }
}

/// Identifier for an indicator slot in a processed window.
///
/// Strategies name the indicators they require; the processor keys its
/// output by these ids so the two never disagree on spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IndicatorId {
    SmaShort,
    SmaLong,
    Rsi,
    Macd,
    Bollinger,
}

impl fmt::Display for IndicatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SmaShort => write!(f, "SMA_short"),
            Self::SmaLong => write!(f, "SMA_long"),
            Self::Rsi => write!(f, "RSI"),
            Self::Macd => write!(f, "MACD"),
            Self::Bollinger => write!(f, "BollingerBands"),
        }
    }
}

/// MACD line, signal line, and their difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacdValue {
    pub macd: Decimal,
    pub signal: Decimal,
    pub histogram: Decimal,
}

/// Bollinger band levels for one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BollingerValue {
    pub upper: Price,
    pub middle: Price,
    pub lower: Price,
    /// (upper - lower) / middle.
    pub bandwidth: Decimal,
}

impl BollingerValue {
    /// %B of a price relative to the bands.
    ///
    /// Returns None on a collapsed band (upper == lower).
    pub fn percent_b(&self, price: Price) -> Option<Decimal> {
        let width = self.upper.inner() - self.lower.inner();
        if width.is_zero() {
            return None;
        }
        Some((price.inner() - self.lower.inner()) / width)
    }
}

/// One computed indicator value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndicatorValue {
    Scalar { value: Decimal },
    Macd(MacdValue),
    Bollinger(BollingerValue),
}

impl IndicatorValue {
    pub fn scalar(value: Decimal) -> Self {
        Self::Scalar { value }
    }

    pub fn as_scalar(&self) -> Option<Decimal> {
        match self {
            Self::Scalar { value } => Some(*value),
            _ => None,
        }
    }

    pub fn as_macd(&self) -> Option<&MacdValue> {
        match self {
            Self::Macd(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bollinger(&self) -> Option<&BollingerValue> {
        match self {
            Self::Bollinger(v) => Some(v),
            _ => None,
        }
    }
}

/// Ordered indicator snapshot attached to signals and market conditions.
pub type IndicatorSet = BTreeMap<IndicatorId, IndicatorValue>;

/// Snapshot consumed by the pattern matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketConditions {
    pub exchange: Exchange,
    pub symbol: String,
    pub current_price: Price,
    pub indicators: IndicatorSet,
    pub timestamp: DateTime<Utc>,
}

impl MarketConditions {
    pub fn rsi(&self) -> Option<Decimal> {
        self.indicators.get(&IndicatorId::Rsi)?.as_scalar()
    }

    pub fn macd(&self) -> Option<&MacdValue> {
        self.indicators.get(&IndicatorId::Macd)?.as_macd()
    }
}
