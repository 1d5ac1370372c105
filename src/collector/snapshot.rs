//! Ticker snapshot fetcher
//!
//! Pulls one exchange's ticker list and keeps the first entry matching the
//! tracked pair. "No such pair" is a normal outcome, not an error.

use std::sync::Arc;
use std::time::Duration;

use crate::collector::with_timeout;
use crate::provider::{decimal_from_f64, MarketDataProvider, ProviderError, TickerEntry};
use crate::timezone::TimezoneNormalizer;
use crate::types::{CurrencyPair, TickerObservation};

/// Result of a successful ticker lookup
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotOutcome {
    Found(TickerObservation),
    /// The exchange does not list the pair right now
    NotFound,
}

pub struct SnapshotFetcher {
    provider: Arc<dyn MarketDataProvider>,
    normalizer: Arc<dyn TimezoneNormalizer>,
    timeout: Duration,
}

impl SnapshotFetcher {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        normalizer: Arc<dyn TimezoneNormalizer>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            normalizer,
            timeout,
        }
    }

    /// Fetch the current ticker for `pair` on one exchange
    pub async fn fetch(
        &self,
        exchange_id: &str,
        pair: &CurrencyPair,
    ) -> Result<SnapshotOutcome, ProviderError> {
        let endpoint = format!("/exchanges/{}/tickers", exchange_id);
        let tickers = with_timeout(
            self.timeout,
            endpoint.as_str(),
            self.provider.exchange_tickers(exchange_id),
        )
        .await?;

        let Some(entry) = tickers.iter().find(|t| pair.matches(&t.base, &t.target)) else {
            tracing::debug!(exchange = %exchange_id, pair = %pair, "No matching ticker");
            return Ok(SnapshotOutcome::NotFound);
        };

        self.to_observation(exchange_id, entry)
            .map(SnapshotOutcome::Found)
            .ok_or_else(|| {
                ProviderError::malformed(
                    endpoint,
                    format!("ticker {}/{} is missing required fields", entry.base, entry.target),
                )
            })
    }

    fn to_observation(&self, exchange_id: &str, entry: &TickerEntry) -> Option<TickerObservation> {
        Some(TickerObservation {
            exchange_id: exchange_id.to_string(),
            last_price: decimal_from_f64(entry.last?)?,
            last_volume: decimal_from_f64(entry.volume?)?,
            bid_ask_spread_pct: decimal_from_f64(entry.bid_ask_spread_percentage?)?,
            trade_time: self.normalizer.normalize(entry.last_traded_at.as_deref()?)?,
        })
    }
}
