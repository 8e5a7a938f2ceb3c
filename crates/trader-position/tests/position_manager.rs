//! Position manager integration tests against a mocked connector and the
//! in-memory repositories.

use mockall::mock;
use mockall::predicate::*;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use trader_core::{
    Balance, Candle, Exchange, Interval, Order, OrderRequest, OrderStatus, OrderType, Position,
    Price, Qty, Ticker, TradeSide, TradingSignal,
};
use trader_exchange::{CandleStream, ExchangeConnector, ExchangeResult};
use trader_patterns::{InMemoryPatternRepository, PatternStore};
use trader_persistence::{ExitReason, InMemoryTradeRepository, TradeRepository, TradeStatus};
use trader_position::{MonitorHandle, OpenOrder, PositionError, PositionManager, PositionManagerConfig};
use trader_risk::{RiskConfig, RiskManager};
use trader_telemetry::TelemetryHub;

mock! {
    pub Connector {}

    #[async_trait::async_trait]
    impl ExchangeConnector for Connector {
        fn exchange(&self) -> Exchange;
        async fn connect(&self) -> ExchangeResult<()>;
        async fn disconnect(&self);
        fn is_connected(&self) -> bool;
        async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker>;
        async fn get_candlesticks(
            &self,
            symbol: &str,
            interval: Interval,
            limit: usize,
        ) -> ExchangeResult<Vec<Candle>>;
        async fn place_order(&self, request: &OrderRequest) -> ExchangeResult<Order>;
        async fn cancel_order(&self, symbol: &str, order_id: &str) -> ExchangeResult<Order>;
        async fn get_order(&self, symbol: &str, order_id: &str) -> ExchangeResult<Order>;
        async fn get_position(&self, symbol: &str) -> ExchangeResult<Option<Position>>;
        async fn get_balance(&self) -> ExchangeResult<Balance>;
        async fn subscribe_candles(
            &self,
            symbol: &str,
            interval: Interval,
        ) -> ExchangeResult<CandleStream>;
    }
}

fn ticker(symbol: &str, price: Decimal) -> Ticker {
    Ticker {
        symbol: symbol.to_string(),
        last_price: Price::new(price),
        bid: Price::new(price),
        ask: Price::new(price),
        timestamp: chrono::Utc::now(),
    }
}

fn filled_order(id: &str, request: &OrderRequest, fill_price: Decimal) -> Order {
    Order {
        id: id.to_string(),
        symbol: request.symbol.clone(),
        side: request.side,
        order_type: OrderType::Market,
        quantity: request.quantity,
        price: None,
        status: OrderStatus::Filled,
        filled_quantity: request.quantity,
        average_price: Some(Price::new(fill_price)),
        fee: None,
    }
}

fn open_order(trader: &str, symbol: &str, side: TradeSide, qty: Decimal) -> OpenOrder {
    OpenOrder {
        trader_id: trader.to_string(),
        symbol: symbol.to_string(),
        side,
        quantity: Qty::new(qty),
        leverage: 1,
        interval: Interval::OneHour,
        stop_loss: None,
        take_profit: None,
        signal: TradingSignal::hold("test", Default::default()),
        pattern_id: None,
    }
}

struct Fixture {
    manager: Arc<PositionManager>,
    trades: Arc<InMemoryTradeRepository>,
    risk: Arc<RiskManager>,
}

fn fixture(connector: MockConnector, config: PositionManagerConfig) -> Fixture {
    let telemetry = Arc::new(TelemetryHub::new(32));
    let risk = Arc::new(RiskManager::new(RiskConfig::default(), telemetry.clone()));
    risk.register_trader("t1", dec!(100000));
    let trades = Arc::new(InMemoryTradeRepository::new());
    let patterns = Arc::new(PatternStore::new(Arc::new(InMemoryPatternRepository::new())));

    let manager = PositionManager::new(
        Arc::new(connector),
        risk.clone(),
        trades.clone(),
        Some(patterns),
        telemetry,
        config,
    );
    Fixture {
        manager,
        trades,
        risk,
    }
}

/// A mock whose ticker walks a price queue (the last price repeats forever)
/// and whose market orders fill at the most recent ticker price.
fn priced_connector(prices: Vec<Decimal>) -> MockConnector {
    let first = prices[0];
    let queue = Arc::new(Mutex::new(VecDeque::from(prices)));
    let last_seen = Arc::new(Mutex::new(first));
    let mut mock = MockConnector::new();
    mock.expect_exchange().return_const(Exchange::Bitget);

    let ticker_queue = queue.clone();
    let ticker_last = last_seen.clone();
    mock.expect_get_ticker().returning(move |symbol| {
        let mut q = ticker_queue.lock();
        let price = if q.len() > 1 {
            q.pop_front().unwrap()
        } else {
            *q.front().expect("price queue must not be empty")
        };
        *ticker_last.lock() = price;
        Ok(ticker(symbol, price))
    });

    mock.expect_place_order().returning(move |request| {
        let price = *last_seen.lock();
        Ok(filled_order("o-1", request, price))
    });
    mock
}

#[tokio::test]
async fn test_open_position_registers_state() {
    let fixture = fixture(priced_connector(vec![dec!(50000)]), Default::default());

    let position = fixture
        .manager
        .open_position(open_order("t1", "BTCUSDT", TradeSide::Long, dec!(0.1)))
        .await
        .unwrap();

    assert_eq!(position.position.entry_price, Price::new(dec!(50000)));
    assert!(position.trade_id.is_some());
    assert_eq!(fixture.manager.active_count(), 1);
    assert_eq!(fixture.risk.open_position_count("t1"), 1);

    let open = fixture.trades.find_open_trades("t1").await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].trading_pair, "BTCUSDT");
}

#[tokio::test]
async fn test_risk_denial_blocks_order_submission() {
    let mut mock = MockConnector::new();
    mock.expect_exchange().return_const(Exchange::Bitget);
    mock.expect_get_ticker()
        .returning(|symbol| Ok(ticker(symbol, dec!(50000))));
    // Any order submission would be a bug.
    mock.expect_place_order().times(0);

    let fixture = fixture(mock, Default::default());
    let mut request = open_order("t1", "BTCUSDT", TradeSide::Long, dec!(0.1));
    request.leverage = 99;

    let result = fixture.manager.open_position(request).await;
    assert!(matches!(
        result,
        Err(PositionError::RiskDenied { rule: "leverage", .. })
    ));
    assert_eq!(fixture.manager.active_count(), 0);
}

#[tokio::test]
async fn test_unfilled_order_yields_error() {
    let mut mock = MockConnector::new();
    mock.expect_exchange().return_const(Exchange::Bitget);
    mock.expect_get_ticker()
        .returning(|symbol| Ok(ticker(symbol, dec!(50000))));
    mock.expect_place_order().returning(|request| {
        let mut order = filled_order("o-1", request, dec!(50000));
        order.status = OrderStatus::Rejected;
        order.filled_quantity = Qty::ZERO;
        order.average_price = None;
        Ok(order)
    });

    let fixture = fixture(mock, Default::default());
    let result = fixture
        .manager
        .open_position(open_order("t1", "BTCUSDT", TradeSide::Long, dec!(0.1)))
        .await;
    assert!(matches!(
        result,
        Err(PositionError::OrderNotFilled {
            status: OrderStatus::Rejected
        })
    ));
    assert_eq!(fixture.manager.active_count(), 0);
}

#[tokio::test]
async fn test_partial_fill_kept_and_remainder_cancelled() {
    let mut mock = MockConnector::new();
    mock.expect_exchange().return_const(Exchange::Bitget);
    mock.expect_get_ticker()
        .returning(|symbol| Ok(ticker(symbol, dec!(50000))));
    mock.expect_place_order().returning(|request| {
        let mut order = filled_order("o-1", request, dec!(50000));
        order.status = OrderStatus::PartiallyFilled;
        order.filled_quantity = Qty::new(dec!(0.04));
        Ok(order)
    });
    mock.expect_cancel_order()
        .with(eq("BTCUSDT"), eq("o-1"))
        .times(1)
        .returning(|symbol, id| {
            Ok(Order {
                id: id.to_string(),
                symbol: symbol.to_string(),
                side: TradeSide::Long,
                order_type: OrderType::Market,
                quantity: Qty::new(dec!(0.1)),
                price: None,
                status: OrderStatus::Canceled,
                filled_quantity: Qty::new(dec!(0.04)),
                average_price: Some(Price::new(dec!(50000))),
                fee: None,
            })
        });

    let fixture = fixture(mock, Default::default());
    let position = fixture
        .manager
        .open_position(open_order("t1", "BTCUSDT", TradeSide::Long, dec!(0.1)))
        .await
        .unwrap();

    // The open position carries only the filled quantity.
    assert_eq!(position.position.quantity, Qty::new(dec!(0.04)));
}

#[tokio::test]
async fn test_open_close_round_trip_zero_pnl() {
    let fixture = fixture(priced_connector(vec![dec!(50000)]), Default::default());

    let position = fixture
        .manager
        .open_position(open_order("t1", "BTCUSDT", TradeSide::Long, dec!(0.1)))
        .await
        .unwrap();
    let realized = fixture
        .manager
        .close_position(position.id, ExitReason::Signal)
        .await
        .unwrap();

    assert_eq!(realized, dec!(0));
    assert_eq!(fixture.manager.active_count(), 0);
    assert_eq!(fixture.manager.history_len(), 1);

    let record = fixture
        .trades
        .find_by_id(position.trade_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, TradeStatus::Closed);
    assert_eq!(record.profit_loss, Some(dec!(0)));
}

#[tokio::test]
async fn test_close_is_not_reentrant() {
    let fixture = fixture(priced_connector(vec![dec!(50000)]), Default::default());
    let position = fixture
        .manager
        .open_position(open_order("t1", "BTCUSDT", TradeSide::Long, dec!(0.1)))
        .await
        .unwrap();

    fixture
        .manager
        .close_position(position.id, ExitReason::Signal)
        .await
        .unwrap();
    // The position is gone; a second close cannot find it.
    let again = fixture
        .manager
        .close_position(position.id, ExitReason::Signal)
        .await;
    assert!(matches!(again, Err(PositionError::NotFound(_))));
}

#[tokio::test]
async fn test_monitor_fires_stop_loss() {
    // Scenario: open LONG 0.1 @ 50000 with stop 49000; prices walk
    // 50000 -> 49500 -> 48900; the monitor must close with STOP_LOSS and
    // realized (48900 - 50000) * 0.1 = -110.
    let connector = priced_connector(vec![dec!(50000), dec!(49500), dec!(48900)]);
    let fixture = fixture(
        connector,
        PositionManagerConfig {
            update_interval: Duration::from_millis(20),
            ..Default::default()
        },
    );

    let mut request = open_order("t1", "BTCUSDT", TradeSide::Long, dec!(0.1));
    request.stop_loss = Some(Price::new(dec!(49000)));
    let position = fixture.manager.open_position(request).await.unwrap();

    let monitor = MonitorHandle::spawn(fixture.manager.clone());
    // Three cycles walk the price queue down to the trigger.
    tokio::time::sleep(Duration::from_millis(200)).await;
    monitor.stop().await;

    assert_eq!(fixture.manager.active_count(), 0, "stop-loss should have closed");
    let record = fixture
        .trades
        .find_by_id(position.trade_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.exit_reason, Some(ExitReason::StopLoss));
    assert_eq!(record.profit_loss, Some(dec!(-110.0)));
}

#[tokio::test]
async fn test_monitor_fires_take_profit() {
    let connector = priced_connector(vec![dec!(50000), dec!(50500), dec!(51000)]);
    let fixture = fixture(
        connector,
        PositionManagerConfig {
            update_interval: Duration::from_millis(20),
            ..Default::default()
        },
    );

    let mut request = open_order("t1", "BTCUSDT", TradeSide::Long, dec!(0.1));
    request.take_profit = Some(Price::new(dec!(51000)));
    let position = fixture.manager.open_position(request).await.unwrap();

    let monitor = MonitorHandle::spawn(fixture.manager.clone());
    tokio::time::sleep(Duration::from_millis(200)).await;
    monitor.stop().await;

    let record = fixture
        .trades
        .find_by_id(position.trade_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.exit_reason, Some(ExitReason::TakeProfit));
    assert_eq!(record.profit_loss, Some(dec!(100.0)));
}

#[tokio::test]
async fn test_monitor_tolerates_connector_faults() {
    let mut mock = MockConnector::new();
    mock.expect_exchange().return_const(Exchange::Bitget);
    let call = Arc::new(Mutex::new(0u32));
    let call_in = call.clone();
    mock.expect_get_ticker().returning(move |symbol| {
        let mut n = call_in.lock();
        *n += 1;
        if *n == 2 {
            Err(trader_core::ExchangeError::transport("blip"))
        } else {
            Ok(ticker(symbol, dec!(50000)))
        }
    });
    mock.expect_place_order()
        .returning(|request| Ok(filled_order("o-1", request, dec!(50000))));

    let fixture = fixture(
        mock,
        PositionManagerConfig {
            update_interval: Duration::from_millis(20),
            ..Default::default()
        },
    );
    fixture
        .manager
        .open_position(open_order("t1", "BTCUSDT", TradeSide::Long, dec!(0.1)))
        .await
        .unwrap();

    let monitor = MonitorHandle::spawn(fixture.manager.clone());
    tokio::time::sleep(Duration::from_millis(150)).await;
    monitor.stop().await;

    // The transient fault neither closed nor dropped the position.
    assert_eq!(fixture.manager.active_count(), 1);
    assert!(*call.lock() > 2, "monitor kept polling after the fault");
}

#[tokio::test]
async fn test_update_stop_loss_persists_and_arms_trailing() {
    let fixture = fixture(priced_connector(vec![dec!(100)]), Default::default());
    let position = fixture
        .manager
        .open_position(open_order("t1", "BTCUSDT", TradeSide::Long, dec!(1)))
        .await
        .unwrap();

    fixture
        .manager
        .update_stop_loss(position.id, Price::new(dec!(95)), true)
        .await
        .unwrap();

    let live = fixture.manager.get(position.id).unwrap();
    assert!(live.trailing_activated);
    assert_eq!(live.trailing_distance, Some(dec!(5)));

    let record = fixture
        .trades
        .find_by_id(position.trade_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.stop_loss_price, Some(Price::new(dec!(95))));
    assert!(record.trailing_stop_activated);
}

#[tokio::test]
async fn test_trailing_advance_persisted_through_update() {
    let fixture = fixture(priced_connector(vec![dec!(100)]), Default::default());
    let position = fixture
        .manager
        .open_position(open_order("t1", "BTCUSDT", TradeSide::Long, dec!(1)))
        .await
        .unwrap();
    fixture
        .manager
        .update_stop_loss(position.id, Price::new(dec!(95)), true)
        .await
        .unwrap();

    // Price moves in favor; the stop ratchets and persists.
    fixture
        .manager
        .update_position(position.id, Some(Price::new(dec!(105))))
        .await
        .unwrap();

    let live = fixture.manager.get(position.id).unwrap();
    assert_eq!(live.stop_loss, Some(Price::new(dec!(100))));
    let record = fixture
        .trades
        .find_by_id(position.trade_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.stop_loss_price, Some(Price::new(dec!(100))));
}

#[tokio::test]
async fn test_recovery_reconciles_against_exchange() {
    // Two OPEN trades persisted; the exchange only knows about BTC.
    let trades = Arc::new(InMemoryTradeRepository::new());
    seed_open_trade(&trades, "t1", "BTCUSDT").await;
    seed_open_trade(&trades, "t1", "ETHUSDT").await;

    let mut mock = MockConnector::new();
    mock.expect_exchange().return_const(Exchange::Bitget);
    mock.expect_get_position().returning(|symbol| {
        if symbol == "BTCUSDT" {
            Ok(Some(Position::new(
                "BTCUSDT",
                TradeSide::Long,
                Qty::new(dec!(0.1)),
                Price::new(dec!(50000)),
                1,
            )))
        } else {
            Ok(None)
        }
    });

    let telemetry = Arc::new(TelemetryHub::new(32));
    let risk = Arc::new(RiskManager::new(RiskConfig::default(), telemetry.clone()));
    let manager = PositionManager::new(
        Arc::new(mock),
        risk,
        trades.clone(),
        None,
        telemetry,
        Default::default(),
    );

    let recovered = manager.recover_positions().await.unwrap();
    assert_eq!(recovered, 1);
    assert_eq!(manager.active_count(), 1);
    assert!(manager.find_by_symbol("t1", "BTCUSDT").is_some());

    // The ETH trade was closed as orphaned at its entry price.
    let all_open = trades.find_all_open_trades().await.unwrap();
    assert!(all_open.is_empty());
    let eth = trades
        .find_closed_trades_by_symbol("ETHUSDT", 1)
        .await
        .unwrap();
    assert_eq!(eth[0].exit_reason, Some(ExitReason::Orphaned));
    assert_eq!(eth[0].exit_price, Some(eth[0].entry_price));

    // Idempotence: running recovery again changes nothing.
    let again = manager.recover_positions().await.unwrap();
    assert_eq!(again, 0);
    assert_eq!(manager.active_count(), 1);
}

async fn seed_open_trade(repo: &Arc<InMemoryTradeRepository>, trader: &str, symbol: &str) {
    repo.create(trader_persistence::NewTrade {
        trader_id: trader.to_string(),
        trade_type: TradeSide::Long,
        exchange: Exchange::Bitget,
        trading_pair: symbol.to_string(),
        timeframe: Interval::OneHour,
        leverage: 1,
        entry_price: Price::new(dec!(50000)),
        entry_amount: Qty::new(dec!(0.1)),
        entry_timestamp: chrono::Utc::now(),
        entry_order_id: None,
        stop_loss_price: Some(Price::new(dec!(49000))),
        take_profit_price: None,
        fees: Decimal::ZERO,
        indicators: None,
        pattern_id: None,
    })
    .await
    .unwrap();
}
