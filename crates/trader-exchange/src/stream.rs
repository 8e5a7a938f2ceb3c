//! Websocket candle feed runner, shared by all exchange dialects.
//!
//! The reader task connects, subscribes, and forwards parsed candles in
//! open-time order with duplicates dropped. On any transport fault it
//! reconnects with the fixed backoff ladder; it never replays history.
//! Cancellation is observed at every suspension point so a cancelled reader
//! cannot leak its socket.

use crate::connector::CandleStream;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trader_core::{Candle, Exchange, Interval};

/// Reconnection backoff ladder, capped at the last entry.
const BACKOFF_LADDER: [Duration; 5] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

/// No message for this long means the connection is dead.
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

/// Ping cadence while the connection is quiet.
const PING_INTERVAL: Duration = Duration::from_secs(15);

const CHANNEL_CAPACITY: usize = 256;

/// Exchange-specific websocket behavior.
pub(crate) trait WsDialect: Send + Sync + 'static {
    fn exchange(&self) -> Exchange;

    fn url(&self) -> String;

    fn subscribe_message(&self, symbol: &str, interval: Interval) -> String;

    /// Application-level ping payload, when the exchange expects one
    /// instead of (or besides) protocol pings.
    fn ping_message(&self) -> Option<String> {
        None
    }

    /// Whether a text frame is an application-level pong to swallow.
    fn is_pong(&self, _text: &str) -> bool {
        false
    }

    /// Candles contained in a text frame, possibly empty.
    fn parse_candles(&self, text: &str, symbol: &str, interval: Interval) -> Vec<Candle>;
}

/// Spawn the reader task for one subscription.
pub(crate) fn spawn_candle_feed(
    dialect: Arc<dyn WsDialect>,
    symbol: String,
    interval: Interval,
) -> CandleStream {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();

    let task = tokio::spawn(async move {
        run_feed(dialect, symbol, interval, tx, task_cancel).await;
    });

    CandleStream::new(rx, cancel, task)
}

async fn run_feed(
    dialect: Arc<dyn WsDialect>,
    symbol: String,
    interval: Interval,
    tx: mpsc::Sender<Candle>,
    cancel: CancellationToken,
) {
    let exchange = dialect.exchange();
    let mut attempt = 0usize;
    // Dropped-duplicate guard; also enforces open-time ordering.
    let mut last_open_time = None;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = run_connection(
                dialect.as_ref(),
                &symbol,
                interval,
                &tx,
                &cancel,
                &mut last_open_time,
            ) => result,
        };

        match connected {
            ConnectionEnd::Cancelled | ConnectionEnd::ReceiverGone => return,
            ConnectionEnd::Lost => {}
        }

        trader_telemetry::metrics::WS_RECONNECT_TOTAL
            .with_label_values(&[&exchange.to_string()])
            .inc();
        let delay = BACKOFF_LADDER[attempt.min(BACKOFF_LADDER.len() - 1)];
        attempt += 1;
        warn!(%exchange, %symbol, attempt, delay_ms = delay.as_millis() as u64, "candle feed reconnecting");

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

enum ConnectionEnd {
    /// Transport failed; reconnect.
    Lost,
    /// The owner cancelled the stream.
    Cancelled,
    /// Nobody is listening anymore.
    ReceiverGone,
}

async fn run_connection(
    dialect: &dyn WsDialect,
    symbol: &str,
    interval: Interval,
    tx: &mpsc::Sender<Candle>,
    cancel: &CancellationToken,
    last_open_time: &mut Option<chrono::DateTime<chrono::Utc>>,
) -> ConnectionEnd {
    let url = dialect.url();
    info!(%symbol, %interval, %url, "connecting candle feed");

    let (ws, _response) = match connect_async(&url).await {
        Ok(ok) => ok,
        Err(e) => {
            warn!(%symbol, error = %e, "candle feed connect failed");
            return ConnectionEnd::Lost;
        }
    };
    let (mut write, mut read) = ws.split();

    let subscribe = dialect.subscribe_message(symbol, interval);
    if let Err(e) = write.send(Message::Text(subscribe)).await {
        warn!(%symbol, error = %e, "candle feed subscribe failed");
        return ConnectionEnd::Lost;
    }
    debug!(%symbol, "candle feed subscribed");

    let mut last_message = Instant::now();
    let mut ping_timer = tokio::time::interval(PING_INTERVAL);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ping_timer.reset();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return ConnectionEnd::Cancelled,

            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        last_message = Instant::now();
                        if dialect.is_pong(&text) {
                            continue;
                        }
                        for candle in dialect.parse_candles(&text, symbol, interval) {
                            // Ordered by open time; duplicates dropped.
                            if last_open_time.is_some_and(|t| candle.open_time <= t) {
                                continue;
                            }
                            *last_open_time = Some(candle.open_time);
                            if tx.send(candle).await.is_err() {
                                debug!(%symbol, "candle receiver dropped");
                                return ConnectionEnd::ReceiverGone;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_message = Instant::now();
                        if write.send(Message::Pong(data)).await.is_err() {
                            return ConnectionEnd::Lost;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_message = Instant::now();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        warn!(%symbol, ?frame, "candle feed closed by server");
                        return ConnectionEnd::Lost;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(%symbol, error = %e, "candle feed read error");
                        return ConnectionEnd::Lost;
                    }
                    None => {
                        warn!(%symbol, "candle feed stream ended");
                        return ConnectionEnd::Lost;
                    }
                }
            }

            _ = ping_timer.tick() => {
                if last_message.elapsed() > HEARTBEAT_TIMEOUT {
                    warn!(%symbol, "candle feed heartbeat timeout");
                    return ConnectionEnd::Lost;
                }
                let ping = match dialect.ping_message() {
                    Some(text) => Message::Text(text),
                    None => Message::Ping(Vec::new()),
                };
                if write.send(ping).await.is_err() {
                    return ConnectionEnd::Lost;
                }
            }
        }
    }
}
