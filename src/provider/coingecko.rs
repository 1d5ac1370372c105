//! CoinGecko REST client
//!
//! Thin HTTP adapter over the public exchange endpoints. Every non-200
//! response is reported as a `ProviderError::Status`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT},
    Client, StatusCode,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use super::{
    decimal_from_f64, ExchangeInfo, ExchangeRates, MarketDataProvider, ProviderError,
    TickerEntry, VolumeSample,
};
use rust_decimal::Decimal;
use std::str::FromStr;

const API_KEY_HEADER: &str = "x-cg-demo-api-key";

#[derive(Debug, Deserialize)]
struct TickersResponse {
    tickers: Vec<TickerEntry>,
}

/// REST client for the exchange-data provider
pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
}

impl CoinGeckoClient {
    pub fn new(base_url: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
            let value = HeaderValue::from_str(key.trim()).context("Invalid provider API key")?;
            headers.insert(API_KEY_HEADER, value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.base_url, endpoint);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|source| ProviderError::Http {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ProviderError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::malformed(endpoint, e.to_string()))
    }
}

#[async_trait]
impl MarketDataProvider for CoinGeckoClient {
    async fn exchanges(
        &self,
        per_page: u32,
        page: u32,
    ) -> Result<Vec<ExchangeInfo>, ProviderError> {
        let query = [("per_page", per_page.to_string()), ("page", page.to_string())];
        let exchanges: Vec<ExchangeInfo> = self.get_json("/exchanges", &query).await?;
        tracing::debug!(count = exchanges.len(), page, "Fetched exchange directory page");
        Ok(exchanges)
    }

    async fn exchange_tickers(&self, exchange_id: &str) -> Result<Vec<TickerEntry>, ProviderError> {
        let endpoint = format!("/exchanges/{}/tickers", exchange_id);
        let response: TickersResponse = self.get_json(&endpoint, &[]).await?;
        Ok(response.tickers)
    }

    async fn volume_chart(
        &self,
        exchange_id: &str,
        days: u32,
    ) -> Result<Vec<VolumeSample>, ProviderError> {
        let endpoint = format!("/exchanges/{}/volume_chart", exchange_id);
        let rows: Vec<Vec<serde_json::Value>> = self
            .get_json(&endpoint, &[("days", days.to_string())])
            .await?;

        rows.iter()
            .map(|row| {
                parse_volume_row(row).ok_or_else(|| {
                    ProviderError::malformed(&endpoint, format!("bad volume sample {:?}", row))
                })
            })
            .collect()
    }

    async fn exchange_rates(&self) -> Result<ExchangeRates, ProviderError> {
        self.get_json("/exchange_rates", &[]).await
    }
}

/// Parses `[timestamp_ms, volume]`; the volume arrives as a string or a number.
fn parse_volume_row(row: &[serde_json::Value]) -> Option<VolumeSample> {
    if row.len() < 2 {
        return None;
    }

    let timestamp_ms = row[0]
        .as_i64()
        .or_else(|| row[0].as_f64().map(|t| t as i64))?;

    let volume = match &row[1] {
        serde_json::Value::String(s) => Decimal::from_str(s.trim()).ok()?,
        serde_json::Value::Number(n) => decimal_from_f64(n.as_f64()?)?,
        _ => return None,
    };

    Some(VolumeSample {
        timestamp_ms,
        volume,
    })
}
