//! Runtime position state and P&L arithmetic.

use crate::{Price, Qty, TradeSide};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An open position as seen by the runtime.
///
/// Invariant: `quantity > 0`. Direction lives in `side`, never in the sign
/// of the quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: Qty,
    pub entry_price: Price,
    pub current_price: Price,
    pub leverage: u32,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn new(
        symbol: impl Into<String>,
        side: TradeSide,
        quantity: Qty,
        entry_price: Price,
        leverage: u32,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            entry_price,
            current_price: entry_price,
            leverage,
            opened_at: Utc::now(),
        }
    }

    /// Unrealized P&L at `current_price`.
    ///
    /// LONG: `(current - entry) * qty * leverage`; SHORT negated.
    /// Positive means profit.
    pub fn unrealized_pnl(&self) -> Decimal {
        pnl(
            self.side,
            self.entry_price,
            self.current_price,
            self.quantity,
            self.leverage,
        )
    }

    /// Notional exposure at the entry price.
    pub fn notional(&self) -> Decimal {
        self.quantity.notional(self.entry_price)
    }
}

/// Directional P&L between two prices.
///
/// Shared by unrealized (mark) and realized (fill) calculations so the sign
/// convention cannot drift between them.
pub fn pnl(side: TradeSide, entry: Price, exit: Price, quantity: Qty, leverage: u32) -> Decimal {
    let gross = (exit.inner() - entry.inner()) * quantity.inner() * Decimal::from(leverage);
    match side {
        TradeSide::Long => gross,
        TradeSide::Short => -gross,
    }
}
