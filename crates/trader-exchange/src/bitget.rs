//! Bitget USDT-margined futures connector.
//!
//! Private requests carry the header-signed HMAC dialect (ACCESS-* headers).
//! With `testnet` enabled every request also carries the `paptrading` header
//! so it lands on the demo-trading environment.

use crate::auth::HmacAuthenticator;
use crate::config::ExchangeConfig;
use crate::connector::{CandleStream, ExchangeConnector};
use crate::rate_limiter::RateLimiter;
use crate::rest::{self, dec, dec_field, ms, ms_to_datetime, ORDER_TIMEOUT};
use crate::retry::RetryPolicy;
use crate::stream::{spawn_candle_feed, WsDialect};
use crate::{symbol, ExchangeResult};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use trader_core::{
    Balance, Candle, Exchange, ExchangeError, Interval, Order, OrderErrorCode, OrderRequest,
    OrderStatus, OrderType, Position, Price, Qty, Ticker, TradeSide,
};

const PROD_BASE_URL: &str = "https://api.bitget.com";
const PROD_WS_URL: &str = "wss://ws.bitget.com/v2/ws/public";

/// Endpoint weights against the token bucket.
mod weight {
    pub const MARKET: u32 = 1;
    pub const ACCOUNT: u32 = 2;
    pub const ORDER: u32 = 2;
}

pub struct BitgetConnector {
    base_url: String,
    ws_url: String,
    product_type: &'static str,
    paper: bool,
    http: reqwest::Client,
    auth: HmacAuthenticator,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    connected: AtomicBool,
}

impl BitgetConnector {
    pub fn new(config: ExchangeConfig) -> ExchangeResult<Self> {
        let auth = HmacAuthenticator::new(config.credentials())?;
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limits.requests_per_second,
            config.rate_limits.burst_capacity,
            config.rate_limits.per_endpoint,
        ));

        Ok(Self {
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| PROD_BASE_URL.to_string()),
            ws_url: config
                .ws_url
                .clone()
                .unwrap_or_else(|| PROD_WS_URL.to_string()),
            product_type: if config.testnet {
                "SUSDT-FUTURES"
            } else {
                "USDT-FUTURES"
            },
            paper: config.testnet,
            http: rest::http_client()?,
            auth,
            limiter,
            retry: config.retry.to_policy(),
            connected: AtomicBool::new(false),
        })
    }

    fn granularity(interval: Interval) -> &'static str {
        match interval {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::OneHour => "1H",
            Interval::FourHours => "4H",
            Interval::OneDay => "1D",
        }
    }

    /// GET a public endpoint; `path_and_query` includes the query string.
    async fn get_public(&self, name: &str, path_and_query: &str, weight: u32) -> ExchangeResult<Value> {
        self.limiter.acquire(Some(name), weight).await;
        let url = format!("{}{}", self.base_url, path_and_query);
        self.retry
            .execute(name, || async {
                let response = self
                    .http
                    .get(&url)
                    .send()
                    .await
                    .map_err(rest::transport_error)?;
                Self::unwrap_envelope(response).await
            })
            .await
    }

    /// GET a private (signed) endpoint.
    async fn get_private(&self, name: &str, path_and_query: &str, weight: u32) -> ExchangeResult<Value> {
        self.limiter.acquire(Some(name), weight).await;
        let url = format!("{}{}", self.base_url, path_and_query);
        self.retry
            .execute(name, || async {
                let headers = self.auth.headers("GET", path_and_query, "")?;
                let mut request = self.http.get(&url).headers(headers);
                if self.paper {
                    request = request.header("paptrading", "1");
                }
                let response = request.send().await.map_err(rest::transport_error)?;
                Self::unwrap_envelope(response).await
            })
            .await
    }

    /// POST a private (signed) endpoint with a JSON body.
    async fn post_private(
        &self,
        name: &str,
        path: &str,
        body: &Value,
        weight: u32,
    ) -> ExchangeResult<Value> {
        self.limiter.acquire(Some(name), weight).await;
        let url = format!("{}{}", self.base_url, path);
        let body_text = body.to_string();
        self.retry
            .execute(name, || async {
                let headers = self.auth.headers("POST", path, &body_text)?;
                let mut request = self
                    .http
                    .post(&url)
                    .headers(headers)
                    .timeout(ORDER_TIMEOUT)
                    .body(body_text.clone());
                if self.paper {
                    request = request.header("paptrading", "1");
                }
                let response = request.send().await.map_err(rest::transport_error)?;
                Self::unwrap_envelope(response).await
            })
            .await
    }

    /// Unwrap the `{code, msg, data}` envelope, classifying failures.
    async fn unwrap_envelope(response: reqwest::Response) -> ExchangeResult<Value> {
        let status = response.status();
        let mut body: Value = response.json().await.map_err(rest::transport_error)?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ExchangeError::RateLimited {
                retry_after_ms: None,
            });
        }

        let code = body["code"].as_str().unwrap_or_default();
        if code == "00000" {
            return Ok(body["data"].take());
        }

        let msg = body["msg"].as_str().unwrap_or("unknown error").to_string();
        Err(Self::classify(status, code, msg))
    }

    fn classify(status: StatusCode, code: &str, msg: String) -> ExchangeError {
        match code {
            // Signature, key, passphrase, timestamp window.
            "40001" | "40002" | "40006" | "40009" | "40011" | "40037" => {
                ExchangeError::Authentication(msg)
            }
            // Throttle.
            "30007" | "429" => ExchangeError::RateLimited {
                retry_after_ms: Some(1000),
            },
            // Margin/balance.
            "40754" | "40762" | "43012" => ExchangeError::InsufficientFunds(msg),
            // Order parameter validation.
            "40007" | "40808" | "45110" | "45111" => ExchangeError::Order {
                code: Some(OrderErrorCode::InvalidParameters),
                message: msg,
            },
            // Unknown order id.
            "40109" | "43001" => ExchangeError::Order {
                code: Some(OrderErrorCode::OrderNotFound),
                message: msg,
            },
            // Duplicate client order id.
            "40786" => ExchangeError::Order {
                code: Some(OrderErrorCode::DuplicateOrder),
                message: msg,
            },
            _ if status.is_server_error() => ExchangeError::Remote(msg),
            _ => ExchangeError::Remote(format!("bitget code {code}: {msg}")),
        }
    }

    fn parse_order(&self, data: &Value, symbol_hint: &str) -> ExchangeResult<Order> {
        let status = match data["state"].as_str().unwrap_or("live") {
            "live" | "new" | "init" => OrderStatus::New,
            "partially_filled" => OrderStatus::PartiallyFilled,
            "filled" | "full_fill" => OrderStatus::Filled,
            "cancelled" | "canceled" => OrderStatus::Canceled,
            "rejected" => OrderStatus::Rejected,
            other => {
                warn!(state = other, "unknown bitget order state, treating as NEW");
                OrderStatus::New
            }
        };

        let side = match data["side"].as_str().unwrap_or_default() {
            "sell" => TradeSide::Short,
            _ => TradeSide::Long,
        };

        Ok(Order {
            id: data["orderId"]
                .as_str()
                .map(str::to_string)
                .or_else(|| data["orderId"].as_i64().map(|v| v.to_string()))
                .ok_or_else(|| ExchangeError::Remote("order response missing orderId".into()))?,
            symbol: data["symbol"]
                .as_str()
                .map(symbol::normalize)
                .unwrap_or_else(|| symbol_hint.to_string()),
            side,
            order_type: match data["orderType"].as_str().unwrap_or("market") {
                "limit" => OrderType::Limit,
                _ => OrderType::Market,
            },
            quantity: Qty::new(dec_field(data, "size")?),
            price: dec(&data["price"]).map(Price::new),
            status,
            filled_quantity: dec(&data["baseVolume"])
                .map(Qty::new)
                .unwrap_or(Qty::ZERO),
            average_price: dec(&data["priceAvg"]).filter(|p| !p.is_zero()).map(Price::new),
            fee: dec(&data["fee"]).map(|f| f.abs()),
        })
    }
}

#[async_trait]
impl ExchangeConnector for BitgetConnector {
    fn exchange(&self) -> Exchange {
        Exchange::Bitget
    }

    #[instrument(skip(self), name = "bitget::connect")]
    async fn connect(&self) -> ExchangeResult<()> {
        // Transport first, then credentials.
        self.get_public("time", "/api/v2/public/time", weight::MARKET)
            .await?;
        self.get_balance().await?;
        self.connected.store(true, Ordering::SeqCst);
        info!(product_type = self.product_type, "bitget connector ready");
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    #[instrument(skip(self), name = "bitget::get_ticker")]
    async fn get_ticker(&self, symbol_raw: &str) -> ExchangeResult<Ticker> {
        let sym = symbol::normalize(symbol_raw);
        let path = format!(
            "/api/v2/mix/market/ticker?symbol={sym}&productType={}",
            self.product_type
        );
        let data = self.get_public("ticker", &path, weight::MARKET).await?;
        // v2 wraps single tickers in a one-element array.
        let entry = data.get(0).unwrap_or(&data);

        Ok(Ticker {
            symbol: sym,
            last_price: Price::new(dec_field(entry, "lastPr")?),
            bid: Price::new(dec_field(entry, "bidPr")?),
            ask: Price::new(dec_field(entry, "askPr")?),
            timestamp: ms(&entry["ts"])
                .map(ms_to_datetime)
                .unwrap_or_else(chrono::Utc::now),
        })
    }

    #[instrument(skip(self), name = "bitget::get_candlesticks")]
    async fn get_candlesticks(
        &self,
        symbol_raw: &str,
        interval: Interval,
        limit: usize,
    ) -> ExchangeResult<Vec<Candle>> {
        let sym = symbol::normalize(symbol_raw);
        let path = format!(
            "/api/v2/mix/market/candles?symbol={sym}&productType={}&granularity={}&limit={limit}",
            self.product_type,
            Self::granularity(interval),
        );
        let data = self.get_public("candles", &path, weight::MARKET).await?;

        let rows = data
            .as_array()
            .ok_or_else(|| ExchangeError::Remote("candles response is not an array".into()))?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            // [ts, open, high, low, close, baseVolume, quoteVolume]
            let open_time = ms(&row[0])
                .map(ms_to_datetime)
                .ok_or_else(|| ExchangeError::Remote("candle row missing timestamp".into()))?;
            candles.push(Candle {
                symbol: sym.clone(),
                interval,
                open_time,
                close_time: open_time + interval.duration(),
                open: Price::new(dec(&row[1]).unwrap_or_default()),
                high: Price::new(dec(&row[2]).unwrap_or_default()),
                low: Price::new(dec(&row[3]).unwrap_or_default()),
                close: Price::new(dec(&row[4]).unwrap_or_default()),
                volume: Qty::new(dec(&row[5]).unwrap_or_default()),
                quote_volume: Qty::new(dec(&row[6]).unwrap_or_default()),
            });
        }
        // Oldest first, regardless of what the exchange returned.
        candles.sort_by_key(|c| c.open_time);
        debug!(symbol = %sym, count = candles.len(), "fetched candles");
        Ok(candles)
    }

    #[instrument(skip(self, request), name = "bitget::place_order")]
    async fn place_order(&self, request: &OrderRequest) -> ExchangeResult<Order> {
        let sym = symbol::normalize(&request.symbol);
        let mut body = json!({
            "symbol": sym,
            "productType": self.product_type,
            "marginMode": "crossed",
            "marginCoin": "USDT",
            "size": request.quantity.to_string(),
            "side": match request.side {
                TradeSide::Long => "buy",
                TradeSide::Short => "sell",
            },
            "orderType": match request.order_type {
                OrderType::Market => "market",
                OrderType::Limit => "limit",
                OrderType::Stop | OrderType::TakeProfit => {
                    return Err(ExchangeError::Unsupported(
                        "conditional orders are managed by the position monitor".into(),
                    ))
                }
            },
            "reduceOnly": if request.reduce_only { "YES" } else { "NO" },
        });
        if let Some(price) = request.price {
            body["price"] = json!(price.to_string());
        }
        if let Some(cid) = &request.client_order_id {
            body["clientOid"] = json!(cid);
        }

        let placed = self
            .post_private("place-order", "/api/v2/mix/order/place-order", &body, weight::ORDER)
            .await?;
        let order_id = placed["orderId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ExchangeError::Remote("place-order response missing orderId".into()))?;

        // The acknowledgement carries no fill data; read the detail back.
        match self.get_order(&sym, &order_id).await {
            Ok(order) => Ok(order),
            Err(e) => {
                warn!(order_id, error = %e, "order placed but detail fetch failed");
                Ok(Order {
                    id: order_id,
                    symbol: sym,
                    side: request.side,
                    order_type: request.order_type,
                    quantity: request.quantity,
                    price: request.price,
                    status: OrderStatus::New,
                    filled_quantity: Qty::ZERO,
                    average_price: None,
                    fee: None,
                })
            }
        }
    }

    #[instrument(skip(self), name = "bitget::cancel_order")]
    async fn cancel_order(&self, symbol_raw: &str, order_id: &str) -> ExchangeResult<Order> {
        let sym = symbol::normalize(symbol_raw);
        let body = json!({
            "symbol": sym,
            "productType": self.product_type,
            "orderId": order_id,
        });
        self.post_private("cancel-order", "/api/v2/mix/order/cancel-order", &body, weight::ORDER)
            .await?;
        self.get_order(&sym, order_id).await
    }

    #[instrument(skip(self), name = "bitget::get_order")]
    async fn get_order(&self, symbol_raw: &str, order_id: &str) -> ExchangeResult<Order> {
        let sym = symbol::normalize(symbol_raw);
        let path = format!(
            "/api/v2/mix/order/detail?symbol={sym}&productType={}&orderId={order_id}",
            self.product_type
        );
        let data = self.get_private("order-detail", &path, weight::ORDER).await?;
        self.parse_order(&data, &sym)
    }

    #[instrument(skip(self), name = "bitget::get_position")]
    async fn get_position(&self, symbol_raw: &str) -> ExchangeResult<Option<Position>> {
        let sym = symbol::normalize(symbol_raw);
        let path = format!(
            "/api/v2/mix/position/single-position?symbol={sym}&productType={}&marginCoin=USDT",
            self.product_type
        );
        let data = self.get_private("position", &path, weight::ACCOUNT).await?;

        let Some(entry) = data.as_array().and_then(|rows| {
            rows.iter()
                .find(|row| dec(&row["total"]).is_some_and(|t| !t.is_zero()))
        }) else {
            return Ok(None);
        };

        let side = match entry["holdSide"].as_str().unwrap_or_default() {
            "short" => TradeSide::Short,
            _ => TradeSide::Long,
        };
        let quantity = Qty::new(dec_field(entry, "total")?);
        let entry_price = Price::new(dec_field(entry, "openPriceAvg")?);
        let current = dec(&entry["markPrice"]).map(Price::new).unwrap_or(entry_price);
        let leverage = dec(&entry["leverage"])
            .and_then(|l| rust_decimal::prelude::ToPrimitive::to_u32(&l))
            .unwrap_or(1);

        let mut position = Position::new(sym, side, quantity, entry_price, leverage);
        position.current_price = current;
        if let Some(ts) = ms(&entry["cTime"]) {
            position.opened_at = ms_to_datetime(ts);
        }
        Ok(Some(position))
    }

    #[instrument(skip(self), name = "bitget::get_balance")]
    async fn get_balance(&self) -> ExchangeResult<Balance> {
        let path = format!(
            "/api/v2/mix/account/account?symbol=BTCUSDT&productType={}&marginCoin=USDT",
            self.product_type
        );
        let data = self.get_private("account", &path, weight::ACCOUNT).await?;

        Ok(Balance {
            asset: data["marginCoin"].as_str().unwrap_or("USDT").to_string(),
            available: Qty::new(dec_field(&data, "available")?),
            frozen: dec(&data["locked"]).map(Qty::new).unwrap_or(Qty::ZERO),
        })
    }

    async fn subscribe_candles(
        &self,
        symbol_raw: &str,
        interval: Interval,
    ) -> ExchangeResult<CandleStream> {
        let dialect = Arc::new(BitgetWsDialect {
            url: self.ws_url.clone(),
            product_type: self.product_type,
        });
        Ok(spawn_candle_feed(
            dialect,
            symbol::normalize(symbol_raw),
            interval,
        ))
    }
}

struct BitgetWsDialect {
    url: String,
    product_type: &'static str,
}

impl WsDialect for BitgetWsDialect {
    fn exchange(&self) -> Exchange {
        Exchange::Bitget
    }

    fn url(&self) -> String {
        self.url.clone()
    }

    fn subscribe_message(&self, symbol: &str, interval: Interval) -> String {
        json!({
            "op": "subscribe",
            "args": [{
                "instType": self.product_type,
                "channel": format!("candle{}", BitgetConnector::granularity(interval)),
                "instId": symbol,
            }]
        })
        .to_string()
    }

    fn ping_message(&self) -> Option<String> {
        Some("ping".to_string())
    }

    fn is_pong(&self, text: &str) -> bool {
        text == "pong"
    }

    fn parse_candles(&self, text: &str, symbol: &str, interval: Interval) -> Vec<Candle> {
        let Ok(frame) = serde_json::from_str::<Value>(text) else {
            return Vec::new();
        };
        if !frame["arg"]["channel"]
            .as_str()
            .is_some_and(|c| c.starts_with("candle"))
        {
            return Vec::new();
        }

        let Some(rows) = frame["data"].as_array() else {
            return Vec::new();
        };

        rows.iter()
            .filter_map(|row| {
                let open_time = ms(&row[0]).map(ms_to_datetime)?;
                Some(Candle {
                    symbol: symbol.to_string(),
                    interval,
                    open_time,
                    close_time: open_time + interval.duration(),
                    open: Price::new(dec(&row[1])?),
                    high: Price::new(dec(&row[2])?),
                    low: Price::new(dec(&row[3])?),
                    close: Price::new(dec(&row[4])?),
                    volume: Qty::new(dec(&row[5]).unwrap_or_default()),
                    quote_volume: Qty::new(dec(&row[6]).unwrap_or_default()),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec as d;

    fn connector() -> BitgetConnector {
        BitgetConnector::new(ExchangeConfig {
            exchange: Exchange::Bitget,
            api_key: "key".into(),
            api_secret: "secret".into(),
            passphrase: Some("phrase".into()),
            testnet: true,
            base_url: None,
            ws_url: None,
            rate_limits: Default::default(),
            retry: Default::default(),
        })
        .unwrap()
    }

    #[test]
    fn test_testnet_selects_demo_product_type() {
        assert_eq!(connector().product_type, "SUSDT-FUTURES");
    }

    #[test]
    fn test_classify_codes() {
        use StatusCode as S;
        assert!(matches!(
            BitgetConnector::classify(S::OK, "40009", "sign".into()),
            ExchangeError::Authentication(_)
        ));
        assert!(matches!(
            BitgetConnector::classify(S::OK, "43012", "margin".into()),
            ExchangeError::InsufficientFunds(_)
        ));
        assert!(matches!(
            BitgetConnector::classify(S::OK, "30007", "rate".into()),
            ExchangeError::RateLimited { .. }
        ));
        assert!(matches!(
            BitgetConnector::classify(S::OK, "40109", "missing".into()),
            ExchangeError::Order {
                code: Some(OrderErrorCode::OrderNotFound),
                ..
            }
        ));
        assert!(BitgetConnector::classify(S::OK, "99999", "other".into()).is_retryable());
    }

    #[test]
    fn test_parse_order_states() {
        let conn = connector();
        let data = serde_json::json!({
            "orderId": "123",
            "symbol": "BTCUSDT",
            "side": "buy",
            "orderType": "market",
            "state": "filled",
            "size": "0.5",
            "baseVolume": "0.5",
            "priceAvg": "50000",
            "fee": "-0.3",
        });
        let order = conn.parse_order(&data, "BTCUSDT").unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.side, TradeSide::Long);
        assert_eq!(order.filled_quantity, Qty::new(d!(0.5)));
        assert_eq!(order.average_price, Some(Price::new(d!(50000))));
        assert_eq!(order.fee, Some(d!(0.3)));
    }

    #[test]
    fn test_ws_subscribe_message_shape() {
        let dialect = BitgetWsDialect {
            url: PROD_WS_URL.into(),
            product_type: "SUSDT-FUTURES",
        };
        let msg = dialect.subscribe_message("BTCUSDT", Interval::OneHour);
        let value: Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(value["op"], "subscribe");
        assert_eq!(value["args"][0]["channel"], "candle1H");
        assert_eq!(value["args"][0]["instId"], "BTCUSDT");
    }

    #[test]
    fn test_ws_parse_candles() {
        let dialect = BitgetWsDialect {
            url: PROD_WS_URL.into(),
            product_type: "SUSDT-FUTURES",
        };
        let frame = serde_json::json!({
            "action": "snapshot",
            "arg": {"instType": "SUSDT-FUTURES", "channel": "candle1H", "instId": "BTCUSDT"},
            "data": [["1700000000000", "50000", "50100", "49900", "50050", "12", "600600"]],
        })
        .to_string();
        let candles = dialect.parse_candles(&frame, "BTCUSDT", Interval::OneHour);
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, Price::new(d!(50050)));
        assert_eq!(
            candles[0].close_time - candles[0].open_time,
            chrono::Duration::hours(1)
        );
    }

    #[test]
    fn test_ws_pong_detection() {
        let dialect = BitgetWsDialect {
            url: PROD_WS_URL.into(),
            product_type: "USDT-FUTURES",
        };
        assert!(dialect.is_pong("pong"));
        assert!(!dialect.is_pong("{\"data\":[]}"));
    }
}
