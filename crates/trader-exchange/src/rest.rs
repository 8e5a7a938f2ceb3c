//! Shared REST plumbing for connector implementations.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use trader_core::ExchangeError;

/// Default per-call HTTP timeout.
pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Order submission gets a longer budget.
pub(crate) const ORDER_TIMEOUT: Duration = Duration::from_secs(15);

pub(crate) fn http_client() -> Result<reqwest::Client, ExchangeError> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| ExchangeError::Connection {
            message: format!("failed to build HTTP client: {e}"),
            retryable: false,
        })
}

/// Map reqwest transport failures into the taxonomy.
pub(crate) fn transport_error(e: reqwest::Error) -> ExchangeError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        ExchangeError::Connection {
            message: e.to_string(),
            retryable: true,
        }
    } else {
        ExchangeError::Connection {
            message: e.to_string(),
            retryable: false,
        }
    }
}

/// Decimal from a JSON string or number field.
pub(crate) fn dec(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

/// Decimal field of an object, with a typed error naming the field.
pub(crate) fn dec_field(obj: &Value, field: &str) -> Result<Decimal, ExchangeError> {
    dec(&obj[field]).ok_or_else(|| ExchangeError::Remote(format!("missing decimal field {field}")))
}

/// Millisecond timestamp from a JSON string or number field.
pub(crate) fn ms(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

pub(crate) fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec as d;
    use serde_json::json;

    #[test]
    fn test_dec_from_string_and_number() {
        assert_eq!(dec(&json!("123.45")).unwrap(), d!(123.45));
        assert_eq!(dec(&json!(7)).unwrap(), d!(7));
        assert!(dec(&json!(null)).is_none());
        assert!(dec(&json!("abc")).is_none());
    }

    #[test]
    fn test_ms_parsing() {
        assert_eq!(ms(&json!("1700000000000")).unwrap(), 1_700_000_000_000);
        assert_eq!(ms(&json!(1_700_000_000_000i64)).unwrap(), 1_700_000_000_000);
    }

    #[test]
    fn test_ms_to_datetime() {
        let dt = ms_to_datetime(0);
        assert_eq!(dt.timestamp(), 0);
    }
}
