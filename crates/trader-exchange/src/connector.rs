//! The uniform connector contract over a concrete exchange.

use crate::ExchangeResult;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use trader_core::{
    Balance, Candle, Exchange, Interval, Order, OrderRequest, Position, Ticker,
};

/// Uniform capability set over a concrete exchange.
///
/// Every call rate-limits with its endpoint weight, signs when private, and
/// retries classified transient faults. Implementations normalize symbol
/// formats at the edge.
#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    fn exchange(&self) -> Exchange;

    /// Verify connectivity and credentials. Idempotent.
    async fn connect(&self) -> ExchangeResult<()>;

    /// Mark the connector disconnected. Streams spawned earlier keep their
    /// own lifecycle and are closed by their owners.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker>;

    /// Most recent candles, oldest first, at most `limit`.
    async fn get_candlesticks(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> ExchangeResult<Vec<Candle>>;

    async fn place_order(&self, request: &OrderRequest) -> ExchangeResult<Order>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> ExchangeResult<Order>;

    async fn get_order(&self, symbol: &str, order_id: &str) -> ExchangeResult<Order>;

    /// The open position on `symbol`, if any.
    async fn get_position(&self, symbol: &str) -> ExchangeResult<Option<Position>>;

    async fn get_balance(&self) -> ExchangeResult<Balance>;

    /// Live candle stream, ordered by open time with duplicates dropped.
    ///
    /// The stream reconnects on its own with backoff and never replays
    /// history; callers bootstrap from [`Self::get_candlesticks`].
    async fn subscribe_candles(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> ExchangeResult<CandleStream>;
}

/// Handle to a live candle subscription.
///
/// Dropping the stream cancels the reader task; `close` additionally waits
/// for it to finish so no socket outlives the owner.
pub struct CandleStream {
    rx: mpsc::Receiver<Candle>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CandleStream {
    /// Public so test doubles can assemble a stream from a plain channel.
    pub fn new(
        rx: mpsc::Receiver<Candle>,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            rx,
            cancel,
            task: Some(task),
        }
    }

    /// Next candle, or `None` once the stream is closed.
    pub async fn next(&mut self) -> Option<Candle> {
        self.rx.recv().await
    }

    /// Cancel the reader and wait for it to exit.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for CandleStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
