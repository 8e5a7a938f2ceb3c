//! Symbol normalization.
//!
//! The runtime uses the compact uppercase form ("BTCUSDT") everywhere;
//! connectors translate to and from each exchange dialect at the edge.

/// Normalize any dialect ("btc_usdt", "BTC-USDT", "BTCUSDT") to the compact
/// uppercase form.
pub fn normalize(symbol: &str) -> String {
    symbol
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Lowercase compact form, as Binance websocket stream names want it.
pub fn lowercase(symbol: &str) -> String {
    normalize(symbol).to_ascii_lowercase()
}
