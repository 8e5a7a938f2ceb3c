//! A runtime position wrapped with protective state.

use crate::error::{PositionError, PositionResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trader_core::{IndicatorSet, Position, Price, TradeSide};
use trader_persistence::TradeId;
use uuid::Uuid;

pub type PositionId = Uuid;

/// A position under management.
///
/// Invariant when trailing is active: `trailing_distance > 0` and the
/// reference price never moves against the position; a trailing update
/// never worsens the stop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedPosition {
    pub id: PositionId,
    pub trader_id: String,
    pub position: Position,
    /// Back-reference to the persisted trade row, when persistence
    /// succeeded.
    pub trade_id: Option<TradeId>,
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
    pub trailing_activated: bool,
    pub trailing_distance: Option<Decimal>,
    pub trailing_reference: Option<Price>,
    /// Indicator snapshot from the opening signal, kept for pattern
    /// learning at close.
    pub entry_indicators: IndicatorSet,
    pub pattern_id: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl ManagedPosition {
    pub fn new(
        trader_id: impl Into<String>,
        position: Position,
        stop_loss: Option<Price>,
        take_profit: Option<Price>,
        entry_indicators: IndicatorSet,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trader_id: trader_id.into(),
            position,
            trade_id: None,
            stop_loss,
            take_profit,
            trailing_activated: false,
            trailing_distance: None,
            trailing_reference: None,
            entry_indicators,
            pattern_id: None,
            last_updated: Utc::now(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.position.symbol
    }

    pub fn side(&self) -> TradeSide {
        self.position.side
    }

    /// Arm the trailing stop.
    ///
    /// Without an explicit distance it derives from the current stop:
    /// `entry - stop` for LONG (mirror for SHORT); that distance must be
    /// positive or trailing is refused. The reference starts at the entry
    /// price.
    pub fn arm_trailing(&mut self, distance: Option<Decimal>) -> PositionResult<()> {
        let distance = match distance {
            Some(d) => d,
            None => {
                let stop = self.stop_loss.ok_or_else(|| {
                    PositionError::TrailingRefused(
                        "no distance given and no stop-loss to derive it from".into(),
                    )
                })?;
                match self.side() {
                    TradeSide::Long => self.position.entry_price.inner() - stop.inner(),
                    TradeSide::Short => stop.inner() - self.position.entry_price.inner(),
                }
            }
        };
        if distance <= Decimal::ZERO {
            return Err(PositionError::TrailingRefused(format!(
                "trailing distance {distance} must be positive"
            )));
        }

        self.trailing_activated = true;
        self.trailing_distance = Some(distance);
        self.trailing_reference = Some(self.position.entry_price);
        Ok(())
    }

    /// Advance the trailing stop for a new price.
    ///
    /// Returns the improved stop when the ratchet moved. The stop only ever
    /// tightens: up for LONG, down for SHORT.
    pub fn apply_trailing(&mut self, current: Price) -> Option<Price> {
        if !self.trailing_activated {
            return None;
        }
        let distance = self.trailing_distance?;
        let reference = self.trailing_reference?;

        match self.side() {
            TradeSide::Long => {
                if current <= reference {
                    return None;
                }
                self.trailing_reference = Some(current);
                let candidate = Price::new(current.inner() - distance);
                if self.stop_loss.is_some_and(|stop| candidate <= stop) {
                    return None;
                }
                self.stop_loss = Some(candidate);
                Some(candidate)
            }
            TradeSide::Short => {
                if current >= reference {
                    return None;
                }
                self.trailing_reference = Some(current);
                let candidate = Price::new(current.inner() + distance);
                if self.stop_loss.is_some_and(|stop| candidate >= stop) {
                    return None;
                }
                self.stop_loss = Some(candidate);
                Some(candidate)
            }
        }
    }

    /// Mark price update; keeps unrealized P&L derivable.
    pub fn update_price(&mut self, current: Price) {
        self.position.current_price = current;
        self.last_updated = Utc::now();
    }

    /// LONG stops fire at or below the stop; SHORT mirror.
    pub fn stop_loss_triggered(&self, price: Price) -> bool {
        let Some(stop) = self.stop_loss else {
            return false;
        };
        match self.side() {
            TradeSide::Long => price <= stop,
            TradeSide::Short => price >= stop,
        }
    }

    /// Take-profit fires on the opposite side of the stop.
    pub fn take_profit_triggered(&self, price: Price) -> bool {
        let Some(tp) = self.take_profit else {
            return false;
        };
        match self.side() {
            TradeSide::Long => price >= tp,
            TradeSide::Short => price <= tp,
        }
    }
}
