//! Trader lifecycle and tick loop tests against a mocked connector.

use mockall::mock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use trader_bot::{AITrader, AITraderConfig, AppError, TraderState};
use trader_core::{
    Balance, Candle, Exchange, Interval, Order, OrderRequest, OrderStatus, OrderType, Position,
    Price, Qty, Ticker, TradeSide,
};
use trader_exchange::{CandleStream, ExchangeConnector, ExchangeResult};
use trader_patterns::{InMemoryPatternRepository, PatternStore};
use trader_persistence::{InMemoryTradeRepository, TradeRepository};
use trader_position::{PositionManager, PositionManagerConfig};
use trader_risk::{RiskConfig, RiskManager};
use trader_strategy::StrategyKind;
use trader_telemetry::{Channel, TelemetryHub};

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

fn rising_candles(symbol: &str, count: usize) -> Vec<Candle> {
    let t0 = chrono::Utc::now() - chrono::Duration::hours(count as i64);
    (0..count)
        .map(|i| {
            let close = Decimal::from(100 + i as u64);
            Candle {
                symbol: symbol.to_string(),
                interval: Interval::OneHour,
                open_time: t0 + chrono::Duration::hours(i as i64),
                close_time: t0 + chrono::Duration::hours(i as i64 + 1),
                open: Price::new(close),
                high: Price::new(close),
                low: Price::new(close),
                close: Price::new(close),
                volume: Qty::ONE,
                quote_volume: Qty::new(close),
            }
        })
        .collect()
}

fn trader_config(id: &str) -> AITraderConfig {
    AITraderConfig {
        id: id.to_string(),
        name: "test trader".to_string(),
        exchange: Exchange::Bitget,
        symbol: "BTCUSDT".to_string(),
        virtual_money: dec!(10000),
        max_stake_amount: dec!(500),
        max_risk_level: 5,
        max_trading_duration_minutes: None,
        min_return_percent: dec!(1),
        strategy: StrategyKind::TrendFollowing,
        candlestick_interval: Interval::OneHour,
        leverage: 1,
        stop_loss_percent: None,
        take_profit_percent: None,
        trailing_stop: None,
        tick_seconds: Some(1),
    }
}

fn build_trader(mock: MockConnector, config: AITraderConfig) -> (Arc<AITrader>, Arc<PositionManager>, Arc<InMemoryTradeRepository>, Arc<TelemetryHub>) {
    let telemetry = Arc::new(TelemetryHub::new(64));
    let risk = Arc::new(RiskManager::new(RiskConfig::default(), telemetry.clone()));
    let trades = Arc::new(InMemoryTradeRepository::new());
    let patterns = Arc::new(PatternStore::new(Arc::new(InMemoryPatternRepository::new())));
    let connector: Arc<dyn ExchangeConnector> = Arc::new(mock);

    let manager = PositionManager::new(
        connector.clone(),
        risk.clone(),
        trades.clone(),
        Some(patterns.clone()),
        telemetry.clone(),
        PositionManagerConfig::default(),
    );

    let trader = AITrader::new(
        config,
        connector,
        manager.clone(),
        risk,
        Some(patterns),
        telemetry.clone(),
        dec!(2),
        dec!(4),
        false,
    );
    (trader, manager, trades, telemetry)
}

fn connected_mock() -> MockConnector {
    let mut mock = MockConnector::new();
    mock.expect_exchange().return_const(Exchange::Bitget);
    mock.expect_is_connected().return_const(true);
    mock
}

#[tokio::test(start_paused = true)]
async fn test_rising_market_opens_long_position() {
    let mut mock = connected_mock();
    mock.expect_get_candlesticks()
        .returning(|symbol, _, limit| Ok(rising_candles(symbol, limit)));
    mock.expect_get_ticker().returning(|symbol| {
        Ok(Ticker {
            symbol: symbol.to_string(),
            last_price: Price::new(dec!(150)),
            bid: Price::new(dec!(150)),
            ask: Price::new(dec!(150)),
            timestamp: chrono::Utc::now(),
        })
    });
    mock.expect_place_order().returning(|request| {
        Ok(Order {
            id: "o-1".to_string(),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: OrderType::Market,
            quantity: request.quantity,
            price: None,
            status: OrderStatus::Filled,
            filled_quantity: request.quantity,
            average_price: Some(Price::new(dec!(150))),
            fee: None,
        })
    });

    let (trader, manager, trades, _telemetry) = build_trader(mock, trader_config("t1"));

    trader.start().await.unwrap();
    assert_eq!(trader.state(), TraderState::Running);

    // Let a few ticks run under paused (auto-advancing) time.
    tokio::time::sleep(Duration::from_secs(3)).await;

    // The rising market produced exactly one LONG position; subsequent BUY
    // signals found the symbol occupied.
    assert_eq!(manager.active_count(), 1);
    let position = manager.find_by_symbol("t1", "BTCUSDT").unwrap();
    assert_eq!(position.side(), TradeSide::Long);
    assert!(position.stop_loss.is_some());
    assert!(position.take_profit.is_some());

    let metrics = trader.metrics();
    assert_eq!(metrics.total_trades, 1);
    assert_eq!(metrics.signals_executed, 1);

    let open = trades.find_open_trades("t1").await.unwrap();
    assert_eq!(open.len(), 1);

    trader.stop().await.unwrap();
    assert_eq!(trader.state(), TraderState::Stopped);
}

#[tokio::test]
async fn test_start_is_idempotent_failure_when_running() {
    let mut mock = connected_mock();
    mock.expect_get_candlesticks()
        .returning(|symbol, _, limit| Ok(rising_candles(symbol, limit)));
    mock.expect_get_ticker().returning(|symbol| {
        Ok(Ticker {
            symbol: symbol.to_string(),
            last_price: Price::new(dec!(150)),
            bid: Price::new(dec!(150)),
            ask: Price::new(dec!(150)),
            timestamp: chrono::Utc::now(),
        })
    });
    mock.expect_place_order().returning(|request| {
        Ok(Order {
            id: "o-1".to_string(),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: OrderType::Market,
            quantity: request.quantity,
            price: None,
            status: OrderStatus::Filled,
            filled_quantity: request.quantity,
            average_price: Some(Price::new(dec!(150))),
            fee: None,
        })
    });

    let (trader, _, _, _) = build_trader(mock, trader_config("t1"));

    trader.start().await.unwrap();
    let second = trader.start().await;
    assert!(matches!(second, Err(AppError::IllegalTransition { .. })));
    assert_eq!(trader.state(), TraderState::Running);

    trader.stop().await.unwrap();
}

#[tokio::test]
async fn test_pause_resume_cycle() {
    let mut mock = connected_mock();
    mock.expect_get_candlesticks()
        .returning(|symbol, _, limit| Ok(rising_candles(symbol, limit)));
    mock.expect_get_ticker().returning(|symbol| {
        Ok(Ticker {
            symbol: symbol.to_string(),
            last_price: Price::new(dec!(150)),
            bid: Price::new(dec!(150)),
            ask: Price::new(dec!(150)),
            timestamp: chrono::Utc::now(),
        })
    });
    mock.expect_place_order().returning(|request| {
        Ok(Order {
            id: "o-1".to_string(),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: OrderType::Market,
            quantity: request.quantity,
            price: None,
            status: OrderStatus::Filled,
            filled_quantity: request.quantity,
            average_price: Some(Price::new(dec!(150))),
            fee: None,
        })
    });

    let (trader, _, _, _) = build_trader(mock, trader_config("t1"));

    trader.start().await.unwrap();
    trader.pause().unwrap();
    assert_eq!(trader.state(), TraderState::Paused);
    // Resuming from paused is legal; pausing twice is not.
    assert!(trader.pause().is_err());
    trader.resume().unwrap();
    assert_eq!(trader.state(), TraderState::Running);

    trader.stop().await.unwrap();
    assert_eq!(trader.state(), TraderState::Stopped);
}

#[tokio::test]
async fn test_failed_connect_enters_error_state() {
    let mut mock = MockConnector::new();
    mock.expect_exchange().return_const(Exchange::Bitget);
    mock.expect_is_connected().return_const(false);
    mock.expect_connect().returning(|| {
        Err(trader_core::ExchangeError::Connection {
            message: "connection refused".into(),
            retryable: false,
        })
    });

    let (trader, _, _, _) = build_trader(mock, trader_config("t1"));

    let result = trader.start().await;
    assert!(matches!(result, Err(AppError::FatalStartup(_))));
    assert_eq!(trader.state(), TraderState::Error);
}

#[tokio::test]
async fn test_update_config_rules() {
    let mock = connected_mock();
    let (trader, _, _, _) = build_trader(mock, trader_config("t1"));

    // Legal while Idle.
    let mut updated = trader_config("t1");
    updated.max_stake_amount = dec!(250);
    trader.update_config(updated.clone()).unwrap();

    // Id changes are rejected.
    let mut renamed = trader_config("t2");
    renamed.max_stake_amount = dec!(250);
    assert!(matches!(
        trader.update_config(renamed),
        Err(AppError::ConfigIdChange)
    ));
}

#[tokio::test]
async fn test_update_config_locked_while_running() {
    let mut mock = connected_mock();
    mock.expect_get_candlesticks()
        .returning(|symbol, _, limit| Ok(rising_candles(symbol, limit)));
    mock.expect_get_ticker().returning(|symbol| {
        Ok(Ticker {
            symbol: symbol.to_string(),
            last_price: Price::new(dec!(150)),
            bid: Price::new(dec!(150)),
            ask: Price::new(dec!(150)),
            timestamp: chrono::Utc::now(),
        })
    });
    mock.expect_place_order().returning(|request| {
        Ok(Order {
            id: "o-1".to_string(),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: OrderType::Market,
            quantity: request.quantity,
            price: None,
            status: OrderStatus::Filled,
            filled_quantity: request.quantity,
            average_price: Some(Price::new(dec!(150))),
            fee: None,
        })
    });

    let (trader, _, _, _) = build_trader(mock, trader_config("t1"));
    trader.start().await.unwrap();

    assert!(matches!(
        trader.update_config(trader_config("t1")),
        Err(AppError::ConfigLocked(TraderState::Running))
    ));

    trader.stop().await.unwrap();
    trader.update_config(trader_config("t1")).unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_status_telemetry_published_on_lifecycle_edges() {
    let mut mock = connected_mock();
    mock.expect_get_candlesticks()
        .returning(|symbol, _, limit| Ok(rising_candles(symbol, limit)));
    mock.expect_get_ticker().returning(|symbol| {
        Ok(Ticker {
            symbol: symbol.to_string(),
            last_price: Price::new(dec!(150)),
            bid: Price::new(dec!(150)),
            ask: Price::new(dec!(150)),
            timestamp: chrono::Utc::now(),
        })
    });
    mock.expect_place_order().returning(|request| {
        Ok(Order {
            id: "o-1".to_string(),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: OrderType::Market,
            quantity: request.quantity,
            price: None,
            status: OrderStatus::Filled,
            filled_quantity: request.quantity,
            average_price: Some(Price::new(dec!(150))),
            fee: None,
        })
    });

    let (trader, _, _, telemetry) = build_trader(mock, trader_config("t1"));
    let (_, mut rx) = telemetry.subscribe(Channel::TraderStatus, false);

    trader.start().await.unwrap();
    let event = rx.recv().await.unwrap();
    assert_eq!(event.payload["trader_id"], "t1");
    assert_eq!(event.payload["state"], "RUNNING");

    trader.stop().await.unwrap();
}
