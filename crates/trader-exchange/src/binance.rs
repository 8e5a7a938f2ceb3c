//! Binance USDT-margined futures connector.
//!
//! Private requests use the query-signed HMAC dialect: the query string
//! (with timestamp and recvWindow) is signed and the hex digest appended as
//! `signature`, with the API key in the `X-MBX-APIKEY` header. `testnet`
//! selects the Binance futures testnet base URLs.

use crate::auth::HmacAuthenticator;
use crate::config::ExchangeConfig;
use crate::connector::{CandleStream, ExchangeConnector};
use crate::rate_limiter::RateLimiter;
use crate::rest::{self, dec, dec_field, ms, ms_to_datetime, ORDER_TIMEOUT};
use crate::retry::RetryPolicy;
use crate::stream::{spawn_candle_feed, WsDialect};
use crate::{symbol, ExchangeResult};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use trader_core::{
    Balance, Candle, Exchange, ExchangeError, Interval, Order, OrderErrorCode, OrderRequest,
    OrderStatus, OrderType, Position, Price, Qty, Ticker, TradeSide,
};

const PROD_BASE_URL: &str = "https://fapi.binance.com";
const TESTNET_BASE_URL: &str = "https://testnet.binancefuture.com";
const PROD_WS_URL: &str = "wss://fstream.binance.com/ws";
const TESTNET_WS_URL: &str = "wss://stream.binancefuture.com/ws";

/// Tolerated clock drift against the exchange, milliseconds.
const RECV_WINDOW: u64 = 5000;

mod weight {
    pub const MARKET: u32 = 1;
    pub const KLINES: u32 = 2;
    pub const ACCOUNT: u32 = 5;
    pub const ORDER: u32 = 1;
}

pub struct BinanceConnector {
    base_url: String,
    ws_url: String,
    http: reqwest::Client,
    auth: HmacAuthenticator,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    connected: AtomicBool,
}

impl BinanceConnector {
    pub fn new(config: ExchangeConfig) -> ExchangeResult<Self> {
        let auth = HmacAuthenticator::new(config.credentials())?;
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limits.requests_per_second,
            config.rate_limits.burst_capacity,
            config.rate_limits.per_endpoint,
        ));

        let default_base = if config.testnet {
            TESTNET_BASE_URL
        } else {
            PROD_BASE_URL
        };
        let default_ws = if config.testnet {
            TESTNET_WS_URL
        } else {
            PROD_WS_URL
        };

        Ok(Self {
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| default_base.to_string()),
            ws_url: config
                .ws_url
                .clone()
                .unwrap_or_else(|| default_ws.to_string()),
            http: rest::http_client()?,
            auth,
            limiter,
            retry: config.retry.to_policy(),
            connected: AtomicBool::new(false),
        })
    }

    fn interval_str(interval: Interval) -> &'static str {
        match interval {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::OneHour => "1h",
            Interval::FourHours => "4h",
            Interval::OneDay => "1d",
        }
    }

    async fn get_public(&self, name: &str, path: &str, query: &str, weight: u32) -> ExchangeResult<Value> {
        self.limiter.acquire(Some(name), weight).await;
        let url = format!("{}{}?{}", self.base_url, path, query);
        self.retry
            .execute(name, || async {
                let response = self
                    .http
                    .get(&url)
                    .send()
                    .await
                    .map_err(rest::transport_error)?;
                Self::unwrap_response(response).await
            })
            .await
    }

    /// A signed request; `query` must not yet contain timestamp or signature.
    async fn signed(
        &self,
        name: &str,
        method: Method,
        path: &str,
        query: &str,
        weight: u32,
        order_timeout: bool,
    ) -> ExchangeResult<Value> {
        self.limiter.acquire(Some(name), weight).await;
        self.retry
            .execute(name, || async {
                let timestamp = HmacAuthenticator::timestamp_ms();
                let base = if query.is_empty() {
                    format!("timestamp={timestamp}&recvWindow={RECV_WINDOW}")
                } else {
                    format!("{query}&timestamp={timestamp}&recvWindow={RECV_WINDOW}")
                };
                let signature = self.auth.sign_query(&base);
                let url = format!("{}{}?{}&signature={}", self.base_url, path, base, signature);

                let mut request = self
                    .http
                    .request(method.clone(), &url)
                    .header("X-MBX-APIKEY", self.auth.api_key());
                if order_timeout {
                    request = request.timeout(ORDER_TIMEOUT);
                }
                let response = request.send().await.map_err(rest::transport_error)?;
                Self::unwrap_response(response).await
            })
            .await
    }

    async fn unwrap_response(response: reqwest::Response) -> ExchangeResult<Value> {
        let status = response.status();
        let body: Value = response.json().await.map_err(rest::transport_error)?;

        if status.is_success() {
            return Ok(body);
        }

        let code = body["code"].as_i64().unwrap_or_default();
        let msg = body["msg"].as_str().unwrap_or("unknown error").to_string();
        Err(Self::classify(status, code, msg))
    }

    fn classify(status: StatusCode, code: i64, msg: String) -> ExchangeError {
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::IM_A_TEAPOT {
            return ExchangeError::RateLimited {
                retry_after_ms: Some(1000),
            };
        }
        match code {
            -1002 | -1022 | -2014 | -2015 => ExchangeError::Authentication(msg),
            -1003 | -1015 => ExchangeError::RateLimited {
                retry_after_ms: Some(1000),
            },
            -2018 | -2019 | -4046 => ExchangeError::InsufficientFunds(msg),
            -1100 | -1102 | -1106 | -1111 | -1121 | -4164 => ExchangeError::Order {
                code: Some(OrderErrorCode::InvalidParameters),
                message: msg,
            },
            -2011 | -2013 => ExchangeError::Order {
                code: Some(OrderErrorCode::OrderNotFound),
                message: msg,
            },
            -4015 => ExchangeError::Order {
                code: Some(OrderErrorCode::DuplicateOrder),
                message: msg,
            },
            _ if status.is_server_error() => ExchangeError::Remote(msg),
            _ => ExchangeError::Remote(format!("binance code {code}: {msg}")),
        }
    }

    fn parse_order(data: &Value, symbol_hint: &str) -> ExchangeResult<Order> {
        let status = match data["status"].as_str().unwrap_or("NEW") {
            "NEW" => OrderStatus::New,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" | "EXPIRED" => OrderStatus::Canceled,
            "REJECTED" => OrderStatus::Rejected,
            other => {
                warn!(status = other, "unknown binance order status, treating as NEW");
                OrderStatus::New
            }
        };

        let side = match data["side"].as_str().unwrap_or("BUY") {
            "SELL" => TradeSide::Short,
            _ => TradeSide::Long,
        };

        let order_id = if let Some(id) = data["orderId"].as_i64() {
            id.to_string()
        } else {
            data["orderId"]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| ExchangeError::Remote("order response missing orderId".into()))?
        };

        Ok(Order {
            id: order_id,
            symbol: data["symbol"]
                .as_str()
                .map(symbol::normalize)
                .unwrap_or_else(|| symbol_hint.to_string()),
            side,
            order_type: match data["type"].as_str().unwrap_or("MARKET") {
                "LIMIT" => OrderType::Limit,
                "STOP" | "STOP_MARKET" => OrderType::Stop,
                "TAKE_PROFIT" | "TAKE_PROFIT_MARKET" => OrderType::TakeProfit,
                _ => OrderType::Market,
            },
            quantity: Qty::new(dec_field(data, "origQty")?),
            price: dec(&data["price"]).filter(|p| !p.is_zero()).map(Price::new),
            status,
            filled_quantity: dec(&data["executedQty"]).map(Qty::new).unwrap_or(Qty::ZERO),
            average_price: dec(&data["avgPrice"]).filter(|p| !p.is_zero()).map(Price::new),
            // Futures order responses do not itemize commission; fills do.
            fee: None,
        })
    }
}

#[async_trait]
impl ExchangeConnector for BinanceConnector {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    #[instrument(skip(self), name = "binance::connect")]
    async fn connect(&self) -> ExchangeResult<()> {
        self.get_public("ping", "/fapi/v1/ping", "", weight::MARKET)
            .await?;
        self.get_balance().await?;
        self.connected.store(true, Ordering::SeqCst);
        info!(base_url = %self.base_url, "binance connector ready");
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    #[instrument(skip(self), name = "binance::get_ticker")]
    async fn get_ticker(&self, symbol_raw: &str) -> ExchangeResult<Ticker> {
        let sym = symbol::normalize(symbol_raw);
        let book = self
            .get_public(
                "book-ticker",
                "/fapi/v1/ticker/bookTicker",
                &format!("symbol={sym}"),
                weight::MARKET,
            )
            .await?;
        let last = self
            .get_public(
                "price-ticker",
                "/fapi/v1/ticker/price",
                &format!("symbol={sym}"),
                weight::MARKET,
            )
            .await?;

        Ok(Ticker {
            symbol: sym,
            last_price: Price::new(dec_field(&last, "price")?),
            bid: Price::new(dec_field(&book, "bidPrice")?),
            ask: Price::new(dec_field(&book, "askPrice")?),
            timestamp: ms(&book["time"])
                .map(ms_to_datetime)
                .unwrap_or_else(chrono::Utc::now),
        })
    }

    #[instrument(skip(self), name = "binance::get_candlesticks")]
    async fn get_candlesticks(
        &self,
        symbol_raw: &str,
        interval: Interval,
        limit: usize,
    ) -> ExchangeResult<Vec<Candle>> {
        let sym = symbol::normalize(symbol_raw);
        let query = format!(
            "symbol={sym}&interval={}&limit={limit}",
            Self::interval_str(interval)
        );
        let data = self
            .get_public("klines", "/fapi/v1/klines", &query, weight::KLINES)
            .await?;

        let rows = data
            .as_array()
            .ok_or_else(|| ExchangeError::Remote("klines response is not an array".into()))?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            // [openTime, open, high, low, close, volume, closeTime, quoteVolume, ...]
            let open_time = ms(&row[0])
                .map(ms_to_datetime)
                .ok_or_else(|| ExchangeError::Remote("kline row missing open time".into()))?;
            candles.push(Candle {
                symbol: sym.clone(),
                interval,
                open_time,
                close_time: ms(&row[6])
                    .map(ms_to_datetime)
                    .unwrap_or(open_time + interval.duration()),
                open: Price::new(dec(&row[1]).unwrap_or_default()),
                high: Price::new(dec(&row[2]).unwrap_or_default()),
                low: Price::new(dec(&row[3]).unwrap_or_default()),
                close: Price::new(dec(&row[4]).unwrap_or_default()),
                volume: Qty::new(dec(&row[5]).unwrap_or_default()),
                quote_volume: Qty::new(dec(&row[7]).unwrap_or_default()),
            });
        }
        candles.sort_by_key(|c| c.open_time);
        debug!(symbol = %sym, count = candles.len(), "fetched klines");
        Ok(candles)
    }

    #[instrument(skip(self, request), name = "binance::place_order")]
    async fn place_order(&self, request: &OrderRequest) -> ExchangeResult<Order> {
        let sym = symbol::normalize(&request.symbol);
        let side = match request.side {
            TradeSide::Long => "BUY",
            TradeSide::Short => "SELL",
        };
        let mut query = format!(
            "symbol={sym}&side={side}&quantity={}&newOrderRespType=RESULT",
            request.quantity
        );
        match request.order_type {
            OrderType::Market => query.push_str("&type=MARKET"),
            OrderType::Limit => {
                let price = request.price.ok_or_else(|| ExchangeError::Order {
                    code: Some(OrderErrorCode::InvalidParameters),
                    message: "limit order without price".into(),
                })?;
                query.push_str(&format!("&type=LIMIT&timeInForce=GTC&price={price}"));
            }
            OrderType::Stop | OrderType::TakeProfit => {
                return Err(ExchangeError::Unsupported(
                    "conditional orders are managed by the position monitor".into(),
                ));
            }
        }
        if request.reduce_only {
            query.push_str("&reduceOnly=true");
        }
        if let Some(cid) = &request.client_order_id {
            query.push_str(&format!("&newClientOrderId={cid}"));
        }

        let data = self
            .signed("order", Method::POST, "/fapi/v1/order", &query, weight::ORDER, true)
            .await?;
        Self::parse_order(&data, &sym)
    }

    #[instrument(skip(self), name = "binance::cancel_order")]
    async fn cancel_order(&self, symbol_raw: &str, order_id: &str) -> ExchangeResult<Order> {
        let sym = symbol::normalize(symbol_raw);
        let query = format!("symbol={sym}&orderId={order_id}");
        let data = self
            .signed("cancel", Method::DELETE, "/fapi/v1/order", &query, weight::ORDER, true)
            .await?;
        Self::parse_order(&data, &sym)
    }

    #[instrument(skip(self), name = "binance::get_order")]
    async fn get_order(&self, symbol_raw: &str, order_id: &str) -> ExchangeResult<Order> {
        let sym = symbol::normalize(symbol_raw);
        let query = format!("symbol={sym}&orderId={order_id}");
        let data = self
            .signed("order-query", Method::GET, "/fapi/v1/order", &query, weight::ORDER, false)
            .await?;
        Self::parse_order(&data, &sym)
    }

    #[instrument(skip(self), name = "binance::get_position")]
    async fn get_position(&self, symbol_raw: &str) -> ExchangeResult<Option<Position>> {
        let sym = symbol::normalize(symbol_raw);
        let query = format!("symbol={sym}");
        let data = self
            .signed(
                "position-risk",
                Method::GET,
                "/fapi/v2/positionRisk",
                &query,
                weight::ACCOUNT,
                false,
            )
            .await?;

        let rows = data
            .as_array()
            .ok_or_else(|| ExchangeError::Remote("positionRisk response is not an array".into()))?;

        // One-way mode: a single row whose positionAmt sign encodes the side.
        let Some(entry) = rows
            .iter()
            .find(|row| dec(&row["positionAmt"]).is_some_and(|amt| !amt.is_zero()))
        else {
            return Ok(None);
        };

        let amount = dec_field(entry, "positionAmt")?;
        let side = if amount.is_sign_negative() {
            TradeSide::Short
        } else {
            TradeSide::Long
        };
        let entry_price = Price::new(dec_field(entry, "entryPrice")?);
        let current = dec(&entry["markPrice"]).map(Price::new).unwrap_or(entry_price);
        let leverage = dec(&entry["leverage"])
            .and_then(|l| rust_decimal::prelude::ToPrimitive::to_u32(&l))
            .unwrap_or(1);

        let mut position = Position::new(sym, side, Qty::new(amount.abs()), entry_price, leverage);
        position.current_price = current;
        if let Some(ts) = ms(&entry["updateTime"]) {
            position.opened_at = ms_to_datetime(ts);
        }
        Ok(Some(position))
    }

    #[instrument(skip(self), name = "binance::get_balance")]
    async fn get_balance(&self) -> ExchangeResult<Balance> {
        let data = self
            .signed("balance", Method::GET, "/fapi/v2/balance", "", weight::ACCOUNT, false)
            .await?;

        let rows = data
            .as_array()
            .ok_or_else(|| ExchangeError::Remote("balance response is not an array".into()))?;
        let usdt = rows
            .iter()
            .find(|row| row["asset"].as_str() == Some("USDT"))
            .ok_or_else(|| ExchangeError::Remote("no USDT balance entry".into()))?;

        let total = dec_field(usdt, "balance")?;
        let available = dec_field(usdt, "availableBalance")?;
        Ok(Balance {
            asset: "USDT".to_string(),
            available: Qty::new(available),
            frozen: Qty::new((total - available).max(rust_decimal::Decimal::ZERO)),
        })
    }

    async fn subscribe_candles(
        &self,
        symbol_raw: &str,
        interval: Interval,
    ) -> ExchangeResult<CandleStream> {
        let dialect = Arc::new(BinanceWsDialect {
            base_url: self.ws_url.clone(),
        });
        Ok(spawn_candle_feed(
            dialect,
            symbol::normalize(symbol_raw),
            interval,
        ))
    }
}

struct BinanceWsDialect {
    base_url: String,
}

impl WsDialect for BinanceWsDialect {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    fn url(&self) -> String {
        self.base_url.clone()
    }

    fn subscribe_message(&self, sym: &str, interval: Interval) -> String {
        serde_json::json!({
            "method": "SUBSCRIBE",
            "params": [format!(
                "{}@kline_{}",
                symbol::lowercase(sym),
                BinanceConnector::interval_str(interval)
            )],
            "id": 1,
        })
        .to_string()
    }

    /// Only closed klines become candles; in-progress updates are skipped so
    /// the stream stays strictly increasing in open time.
    fn parse_candles(&self, text: &str, sym: &str, interval: Interval) -> Vec<Candle> {
        let Ok(frame) = serde_json::from_str::<Value>(text) else {
            return Vec::new();
        };
        if frame["e"].as_str() != Some("kline") {
            return Vec::new();
        }
        let k = &frame["k"];
        if k["x"].as_bool() != Some(true) {
            return Vec::new();
        }

        let Some(open_time) = ms(&k["t"]).map(ms_to_datetime) else {
            return Vec::new();
        };
        let candle = (|| {
            Some(Candle {
                symbol: sym.to_string(),
                interval,
                open_time,
                close_time: ms(&k["T"]).map(ms_to_datetime)?,
                open: Price::new(dec(&k["o"])?),
                high: Price::new(dec(&k["h"])?),
                low: Price::new(dec(&k["l"])?),
                close: Price::new(dec(&k["c"])?),
                volume: Qty::new(dec(&k["v"])?),
                quote_volume: Qty::new(dec(&k["q"])?),
            })
        })();
        candle.into_iter().collect()
    }
}
