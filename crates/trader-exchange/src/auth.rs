//! HMAC request signing.
//!
//! The header dialect (Bitget-style) signs
//! `timestamp + METHOD + requestPath + body` with HMAC-SHA256 and encodes
//! the raw digest as Base64. The query dialect (Binance-style) signs the
//! query string and encodes as hex. Secret material is zeroized on drop and
//! never logged.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use sha2::Sha256;
use std::fmt;
use trader_core::ExchangeError;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// A secret that redacts itself in Debug output and zeroizes on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(***)")
    }
}

/// API credentials for one exchange account.
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: Secret,
    pub passphrase: Option<Secret>,
}

impl ApiCredentials {
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        passphrase: Option<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: Secret::new(api_secret),
            passphrase: passphrase.map(Secret::new),
        }
    }
}

/// Signs private requests for one exchange account.
pub struct HmacAuthenticator {
    credentials: ApiCredentials,
}

impl HmacAuthenticator {
    /// Fails when the key or secret is missing or empty.
    pub fn new(credentials: ApiCredentials) -> Result<Self, ExchangeError> {
        if credentials.api_key.trim().is_empty() {
            return Err(ExchangeError::Authentication("API key is empty".into()));
        }
        if credentials.api_secret.is_empty() {
            return Err(ExchangeError::Authentication("API secret is empty".into()));
        }
        Ok(Self { credentials })
    }

    pub fn api_key(&self) -> &str {
        &self.credentials.api_key
    }

    /// Current UNIX timestamp in milliseconds, as sent on the wire.
    pub fn timestamp_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Base64 HMAC-SHA256 over `timestamp + METHOD + requestPath + body`.
    pub fn sign(&self, timestamp_ms: i64, method: &str, request_path: &str, body: &str) -> String {
        let canonical = format!("{timestamp_ms}{}{request_path}{body}", method.to_uppercase());
        let mut mac = HmacSha256::new_from_slice(self.credentials.api_secret.expose().as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(canonical.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    /// Hex HMAC-SHA256 over a query string (Binance dialect).
    pub fn sign_query(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.credentials.api_secret.expose().as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Headers for a header-signed private request.
    pub fn headers(
        &self,
        method: &str,
        request_path: &str,
        body: &str,
    ) -> Result<HeaderMap, ExchangeError> {
        let timestamp = Self::timestamp_ms();
        let signature = self.sign(timestamp, method, request_path, body);

        let mut headers = HeaderMap::new();
        insert(&mut headers, "ACCESS-KEY", &self.credentials.api_key)?;
        insert(&mut headers, "ACCESS-SIGN", &signature)?;
        insert(&mut headers, "ACCESS-TIMESTAMP", &timestamp.to_string())?;
        if let Some(passphrase) = &self.credentials.passphrase {
            insert(&mut headers, "ACCESS-PASSPHRASE", passphrase.expose())?;
        }
        insert(&mut headers, "Content-Type", "application/json")?;
        Ok(headers)
    }
}

impl fmt::Debug for HmacAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacAuthenticator")
            .field("api_key", &self.credentials.api_key)
            .finish_non_exhaustive()
    }
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<(), ExchangeError> {
    let name: HeaderName = name
        .parse()
        .map_err(|_| ExchangeError::Authentication(format!("invalid header name {name}")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|_| ExchangeError::Authentication(format!("invalid header value for {name}")))?;
    headers.insert(name, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator() -> HmacAuthenticator {
        HmacAuthenticator::new(ApiCredentials::new(
            "key-123",
            "secret-456",
            Some("phrase".to_string()),
        ))
        .unwrap()
    }

    #[test]
    fn test_empty_credentials_rejected() {
        assert!(HmacAuthenticator::new(ApiCredentials::new("", "secret", None)).is_err());
        assert!(HmacAuthenticator::new(ApiCredentials::new("key", "", None)).is_err());
        assert!(HmacAuthenticator::new(ApiCredentials::new("  ", "secret", None)).is_err());
    }

    #[test]
    fn test_signature_is_deterministic() {
        let auth = authenticator();
        let a = auth.sign(1700000000000, "GET", "/api/v2/mix/account/account", "");
        let b = auth.sign(1700000000000, "GET", "/api/v2/mix/account/account", "");
        assert_eq!(a, b);
        // Base64 of a 32-byte digest is 44 chars.
        assert_eq!(a.len(), 44);
    }

    #[test]
    fn test_signature_covers_every_component() {
        let auth = authenticator();
        let base = auth.sign(1700000000000, "GET", "/path", "");
        assert_ne!(base, auth.sign(1700000000001, "GET", "/path", ""));
        assert_ne!(base, auth.sign(1700000000000, "POST", "/path", ""));
        assert_ne!(base, auth.sign(1700000000000, "GET", "/other", ""));
        assert_ne!(base, auth.sign(1700000000000, "GET", "/path", "{}"));
    }

    #[test]
    fn test_method_uppercased_in_canonical_string() {
        let auth = authenticator();
        assert_eq!(
            auth.sign(1, "get", "/path", ""),
            auth.sign(1, "GET", "/path", "")
        );
    }

    #[test]
    fn test_headers_contain_required_fields() {
        let auth = authenticator();
        let headers = auth.headers("POST", "/api/v2/mix/order/place-order", "{}").unwrap();
        assert_eq!(headers.get("ACCESS-KEY").unwrap(), "key-123");
        assert!(headers.contains_key("ACCESS-SIGN"));
        assert!(headers.contains_key("ACCESS-TIMESTAMP"));
        assert_eq!(headers.get("ACCESS-PASSPHRASE").unwrap(), "phrase");
        assert_eq!(headers.get("Content-Type").unwrap(), "application/json");
    }

    #[test]
    fn test_no_passphrase_header_without_passphrase() {
        let auth = HmacAuthenticator::new(ApiCredentials::new("k", "s", None)).unwrap();
        let headers = auth.headers("GET", "/x", "").unwrap();
        assert!(!headers.contains_key("ACCESS-PASSPHRASE"));
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new("super-secret");
        assert_eq!(format!("{secret:?}"), "Secret(***)");
        let auth = authenticator();
        let debug = format!("{auth:?}");
        assert!(!debug.contains("secret-456"));
        assert!(!debug.contains("phrase"));
    }

    #[test]
    fn test_query_signature_is_hex() {
        let auth = authenticator();
        let sig = auth.sign_query("symbol=BTCUSDT&timestamp=1700000000000");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
