//! Persisted trade row and its building blocks.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use trader_core::{pnl, Exchange, Interval, Price, Qty, TradeSide};

/// Opaque handle to a persisted trade row.
pub type TradeId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Open,
    Closed,
}

/// Why a position was exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Signal,
    Manual,
    /// Recovery found no matching position on the exchange.
    Orphaned,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StopLoss => write!(f, "STOP_LOSS"),
            Self::TakeProfit => write!(f, "TAKE_PROFIT"),
            Self::Signal => write!(f, "SIGNAL"),
            Self::Manual => write!(f, "MANUAL"),
            Self::Orphaned => write!(f, "ORPHANED"),
        }
    }
}

/// Indicator values at entry, kept with the trade for pattern learning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub rsi: Option<Decimal>,
    pub macd: Option<Decimal>,
    pub sma_short: Option<Decimal>,
    pub sma_long: Option<Decimal>,
}

/// Parameters for creating a trade row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrade {
    pub trader_id: String,
    pub trade_type: TradeSide,
    pub exchange: Exchange,
    pub trading_pair: String,
    pub timeframe: Interval,
    pub leverage: u32,
    pub entry_price: Price,
    pub entry_amount: Qty,
    pub entry_timestamp: DateTime<Utc>,
    pub entry_order_id: Option<String>,
    pub stop_loss_price: Option<Price>,
    pub take_profit_price: Option<Price>,
    pub fees: Decimal,
    pub indicators: Option<IndicatorSnapshot>,
    pub pattern_id: Option<String>,
}

/// Parameters for closing a trade row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeExit {
    pub exit_price: Price,
    pub exit_amount: Qty,
    pub reason: ExitReason,
    pub exit_order_id: Option<String>,
    pub fees: Decimal,
}

/// One persisted trade.
///
/// Invariant: exit fields are `None` iff `status == Open`; closing populates
/// all of them together with the computed P&L.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: TradeId,
    pub trader_id: String,
    pub trade_type: TradeSide,
    pub exchange: Exchange,
    pub trading_pair: String,
    pub timeframe: Interval,
    pub leverage: u32,
    pub entry_price: Price,
    pub entry_amount: Qty,
    pub entry_timestamp: DateTime<Utc>,
    pub entry_order_id: Option<String>,
    pub exit_price: Option<Price>,
    pub exit_amount: Option<Qty>,
    pub exit_timestamp: Option<DateTime<Utc>>,
    pub exit_order_id: Option<String>,
    pub exit_reason: Option<ExitReason>,
    pub profit_loss: Option<Decimal>,
    pub profit_loss_percent: Option<Decimal>,
    pub fees: Decimal,
    pub stop_loss_price: Option<Price>,
    pub take_profit_price: Option<Price>,
    pub trailing_stop_activated: bool,
    pub indicators: Option<IndicatorSnapshot>,
    pub status: TradeStatus,
    pub pattern_id: Option<String>,
}

impl TradeRecord {
    pub fn from_new(id: TradeId, new: NewTrade) -> Self {
        Self {
            id,
            trader_id: new.trader_id,
            trade_type: new.trade_type,
            exchange: new.exchange,
            trading_pair: new.trading_pair,
            timeframe: new.timeframe,
            leverage: new.leverage,
            entry_price: new.entry_price,
            entry_amount: new.entry_amount,
            entry_timestamp: new.entry_timestamp,
            entry_order_id: new.entry_order_id,
            exit_price: None,
            exit_amount: None,
            exit_timestamp: None,
            exit_order_id: None,
            exit_reason: None,
            profit_loss: None,
            profit_loss_percent: None,
            fees: new.fees,
            stop_loss_price: new.stop_loss_price,
            take_profit_price: new.take_profit_price,
            trailing_stop_activated: false,
            indicators: new.indicators,
            status: TradeStatus::Open,
            pattern_id: new.pattern_id,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    /// Apply a close, computing realized P&L against the entry.
    pub fn apply_exit(&mut self, exit: TradeExit, at: DateTime<Utc>) {
        let realized = pnl(
            self.trade_type,
            self.entry_price,
            exit.exit_price,
            exit.exit_amount,
            self.leverage,
        );
        let notional = self.entry_amount.notional(self.entry_price);
        self.profit_loss_percent = (!notional.is_zero())
            .then(|| realized / notional * Decimal::from(100));
        self.profit_loss = Some(realized);
        self.exit_price = Some(exit.exit_price);
        self.exit_amount = Some(exit.exit_amount);
        self.exit_timestamp = Some(at);
        self.exit_order_id = exit.exit_order_id;
        self.exit_reason = Some(exit.reason);
        self.fees += exit.fees;
        self.status = TradeStatus::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub(crate) fn new_trade() -> NewTrade {
        NewTrade {
            trader_id: "trader-1".into(),
            trade_type: TradeSide::Long,
            exchange: Exchange::Bitget,
            trading_pair: "BTCUSDT".into(),
            timeframe: Interval::OneHour,
            leverage: 1,
            entry_price: Price::new(dec!(50000)),
            entry_amount: Qty::new(dec!(0.1)),
            entry_timestamp: Utc::now(),
            entry_order_id: Some("o-1".into()),
            stop_loss_price: Some(Price::new(dec!(49000))),
            take_profit_price: None,
            fees: Decimal::ZERO,
            indicators: None,
            pattern_id: None,
        }
    }

    #[test]
    fn test_open_record_has_no_exit_fields() {
        let record = TradeRecord::from_new(1, new_trade());
        assert!(record.is_open());
        assert!(record.exit_price.is_none());
        assert!(record.exit_reason.is_none());
        assert!(record.profit_loss.is_none());
    }

    #[test]
    fn test_apply_exit_populates_everything() {
        let mut record = TradeRecord::from_new(1, new_trade());
        record.apply_exit(
            TradeExit {
                exit_price: Price::new(dec!(48900)),
                exit_amount: Qty::new(dec!(0.1)),
                reason: ExitReason::StopLoss,
                exit_order_id: Some("o-2".into()),
                fees: dec!(0.5),
            },
            Utc::now(),
        );

        assert_eq!(record.status, TradeStatus::Closed);
        assert_eq!(record.profit_loss, Some(dec!(-110.0)));
        assert_eq!(record.exit_reason, Some(ExitReason::StopLoss));
        assert!(record.exit_timestamp.is_some());
        assert_eq!(record.fees, dec!(0.5));
        // -110 / 5000 * 100
        assert_eq!(record.profit_loss_percent, Some(dec!(-2.2)));
    }

    #[test]
    fn test_zero_move_zero_pnl() {
        let mut record = TradeRecord::from_new(1, new_trade());
        record.apply_exit(
            TradeExit {
                exit_price: record.entry_price,
                exit_amount: record.entry_amount,
                reason: ExitReason::Signal,
                exit_order_id: None,
                fees: Decimal::ZERO,
            },
            Utc::now(),
        );
        assert_eq!(record.profit_loss, Some(dec!(0)));
        assert_eq!(record.status, TradeStatus::Closed);
    }
}
