//! Order types and lifecycle states.

use crate::{Price, Qty};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a position or the order opening it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Long,
    Short,
}

impl TradeSide {
    /// The side that closes a position opened on this side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    TakeProfit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

impl OrderStatus {
    /// Whether any quantity has been executed.
    pub fn has_fill(&self) -> bool {
        matches!(self, Self::Filled | Self::PartiallyFilled)
    }

    /// Whether the order can still change state on the exchange.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::New | Self::PartiallyFilled)
    }
}

/// Outbound order parameters, before the exchange has seen them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: TradeSide,
    pub order_type: OrderType,
    pub quantity: Qty,
    /// Required for LIMIT/STOP/TAKE_PROFIT, ignored for MARKET.
    pub price: Option<Price>,
    /// True when this order reduces an existing position.
    pub reduce_only: bool,
    /// Client-chosen id for idempotent submission.
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    /// A market order in the given direction.
    pub fn market(symbol: impl Into<String>, side: TradeSide, quantity: Qty) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            reduce_only: false,
            client_order_id: None,
        }
    }

    /// A market order that closes (part of) an existing position.
    pub fn market_close(symbol: impl Into<String>, open_side: TradeSide, quantity: Qty) -> Self {
        Self {
            symbol: symbol.into(),
            side: open_side.opposite(),
            order_type: OrderType::Market,
            quantity,
            price: None,
            reduce_only: true,
            client_order_id: None,
        }
    }
}

/// An order as acknowledged by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Exchange-assigned order id.
    pub id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub order_type: OrderType,
    pub quantity: Qty,
    pub price: Option<Price>,
    pub status: OrderStatus,
    pub filled_quantity: Qty,
    /// Volume-weighted fill price, when any fill happened.
    pub average_price: Option<Price>,
    /// Exchange-reported fee for the executed quantity, when available.
    pub fee: Option<rust_decimal::Decimal>,
}

impl Order {
    /// The quantity still working on the exchange.
    pub fn remaining_quantity(&self) -> Qty {
        if self.filled_quantity >= self.quantity {
            Qty::ZERO
        } else {
            self.quantity - self.filled_quantity
        }
    }
}
