//! Market data provider boundary
//!
//! Wire types returned by the exchange-data API and the trait the collectors
//! talk to. `CoinGeckoClient` is the HTTP implementation.

mod coingecko;

pub use coingecko::CoinGeckoClient;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

/// Failure talking to the provider. Every variant is scoped to one call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error on {endpoint}: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned status {status}")]
    Status { endpoint: String, status: u16 },
    #[error("{endpoint} timed out after {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u64 },
    #[error("Malformed response from {endpoint}: {reason}")]
    Malformed { endpoint: String, reason: String },
}

impl ProviderError {
    pub fn malformed(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }
}

/// Entry of the exchange directory
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExchangeInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub trade_volume_24h_btc: Option<f64>,
}

/// Ticker entry as reported for one exchange
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TickerEntry {
    pub base: String,
    pub target: String,
    #[serde(default)]
    pub last: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub bid_ask_spread_percentage: Option<f64>,
    /// ISO-8601 UTC timestamp
    #[serde(default)]
    pub last_traded_at: Option<String>,
}

/// One `[timestamp_ms, volume]` sample of the volume chart, volume in BTC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSample {
    pub timestamp_ms: i64,
    pub volume: Decimal,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RateEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    pub value: f64,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// BTC-denominated exchange rates keyed by lowercase currency code
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExchangeRates {
    pub rates: HashMap<String, RateEntry>,
}

impl ExchangeRates {
    /// Units of `currency` per BTC, if the provider knows the code
    pub fn rate_for(&self, currency: &str) -> Option<Decimal> {
        self.rates
            .get(&currency.to_lowercase())
            .and_then(|entry| decimal_from_f64(entry.value))
    }
}

/// Provider API used by the collectors
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// One page of the exchange directory
    async fn exchanges(&self, per_page: u32, page: u32)
        -> Result<Vec<ExchangeInfo>, ProviderError>;

    /// Current tickers listed by an exchange, in provider order
    async fn exchange_tickers(&self, exchange_id: &str) -> Result<Vec<TickerEntry>, ProviderError>;

    /// Trailing volume chart for an exchange
    async fn volume_chart(
        &self,
        exchange_id: &str,
        days: u32,
    ) -> Result<Vec<VolumeSample>, ProviderError>;

    /// Current BTC exchange rates
    async fn exchange_rates(&self) -> Result<ExchangeRates, ProviderError>;
}

/// Converts a JSON float to a decimal through its shortest textual form so
/// `0.1` stays `0.1`.
pub fn decimal_from_f64(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_str(&value.to_string()).ok()
}
