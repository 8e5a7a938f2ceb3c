//! Connector configuration.

use crate::auth::ApiCredentials;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use trader_core::Exchange;

/// Token bucket shape for one exchange.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,
    #[serde(default = "default_burst_capacity")]
    pub burst_capacity: u32,
    #[serde(default)]
    pub per_endpoint: bool,
}

fn default_requests_per_second() -> f64 {
    10.0
}

fn default_burst_capacity() -> u32 {
    20
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst_capacity: default_burst_capacity(),
            per_endpoint: false,
        }
    }
}

/// Retry schedule, as configured.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_exponential")]
    pub exponential_backoff: bool,
    #[serde(default = "default_jitter")]
    pub jitter_factor: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_exponential() -> bool {
    true
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            exponential_backoff: default_exponential(),
            jitter_factor: default_jitter(),
        }
    }
}

impl RetryConfig {
    pub fn to_policy(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            exponential: self.exponential_backoff,
            jitter_factor: self.jitter_factor.clamp(0.0, 0.99),
        }
    }
}

/// Full configuration for one exchange connection.
///
/// `testnet` defaults to true: every order goes to a paper/demo endpoint
/// unless the operator explicitly opts out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub exchange: Exchange,
    pub api_key: String,
    pub api_secret: String,
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default = "default_testnet")]
    pub testnet: bool,
    /// Override the REST base URL (testnet selection otherwise picks it).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Override the websocket URL.
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_testnet() -> bool {
    true
}

impl ExchangeConfig {
    pub fn credentials(&self) -> ApiCredentials {
        ApiCredentials::new(
            self.api_key.clone(),
            self.api_secret.clone(),
            self.passphrase.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_toml() {
        let config: ExchangeConfig = toml::from_str(
            r#"
            exchange = "BITGET"
            api_key = "k"
            api_secret = "s"
            "#,
        )
        .unwrap();
        assert_eq!(config.exchange, Exchange::Bitget);
        assert!(config.testnet);
        assert_eq!(config.rate_limits.burst_capacity, 20);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_exchange_settings_round_trip() {
        let config = ExchangeConfig {
            exchange: Exchange::Bitget,
            api_key: "key-abc".into(),
            api_secret: "secret-xyz".into(),
            passphrase: Some("phrase-123".into()),
            testnet: true,
            base_url: Some("https://api.example.test".into()),
            ws_url: Some("wss://ws.example.test".into()),
            rate_limits: RateLimitConfig::default(),
            retry: RetryConfig::default(),
        };

        let text = toml::to_string(&config).unwrap();
        let back: ExchangeConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.api_key, "key-abc");
        assert_eq!(back.api_secret, "secret-xyz");
        assert_eq!(back.passphrase.as_deref(), Some("phrase-123"));
        assert!(back.testnet);
    }

    #[test]
    fn test_retry_config_to_policy() {
        let policy = RetryConfig {
            max_retries: 5,
            base_delay_ms: 500,
            max_delay_ms: 60_000,
            exponential_backoff: true,
            jitter_factor: 0.2,
        }
        .to_policy();
        assert_eq!(policy, RetryPolicy::AGGRESSIVE);
    }
}
