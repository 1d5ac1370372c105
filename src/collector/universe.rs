//! Exchange universe discovery
//!
//! Pulls one page of the exchange directory, keeps the exchanges registered in
//! the target country and ranks them by 24h BTC volume. Built once per run,
//! as soon as the directory answers.

use std::cmp::Ordering;
use std::time::Duration;
use tracing::info;

use crate::collector::with_timeout;
use crate::provider::{ExchangeInfo, MarketDataProvider, ProviderError};

/// Which directory page to read and how to narrow it down
#[derive(Debug, Clone)]
pub struct UniverseFilter {
    pub country: String,
    pub per_page: u32,
    pub page: u32,
    /// 0 keeps every matching exchange
    pub max_exchanges: usize,
}

/// Ranked exchanges polled every tick
#[derive(Debug, Clone, Default)]
pub struct ExchangeUniverse {
    exchanges: Vec<ExchangeInfo>,
}

impl ExchangeUniverse {
    /// Fetch the directory and rank it; the call is bounded by `timeout`
    pub async fn discover(
        provider: &dyn MarketDataProvider,
        filter: &UniverseFilter,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let directory = with_timeout(
            timeout,
            "/exchanges",
            provider.exchanges(filter.per_page, filter.page),
        )
        .await?;
        let listed = directory.len();
        let universe = Self::from_directory(directory, filter);

        info!(
            country = %filter.country,
            listed,
            selected = universe.len(),
            "Exchange universe ready"
        );
        Ok(universe)
    }

    /// Country filter plus descending-volume ranking; exchanges without a
    /// reported volume go last, ties keep directory order.
    pub fn from_directory(directory: Vec<ExchangeInfo>, filter: &UniverseFilter) -> Self {
        let mut exchanges: Vec<ExchangeInfo> = directory
            .into_iter()
            .filter(|e| e.country.as_deref() == Some(filter.country.as_str()))
            .collect();

        exchanges.sort_by(|a, b| match (a.trade_volume_24h_btc, b.trade_volume_24h_btc) {
            (Some(va), Some(vb)) => vb.total_cmp(&va),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });

        if filter.max_exchanges > 0 {
            exchanges.truncate(filter.max_exchanges);
        }

        Self { exchanges }
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.exchanges.iter().map(|e| e.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockMarketDataProvider;

    fn exchange(id: &str, country: Option<&str>, volume: Option<f64>) -> ExchangeInfo {
        ExchangeInfo {
            id: id.to_string(),
            name: id.to_uppercase(),
            country: country.map(str::to_string),
            trade_volume_24h_btc: volume,
        }
    }

    fn filter(max_exchanges: usize) -> UniverseFilter {
        UniverseFilter {
            country: "United States".to_string(),
            per_page: 250,
            page: 1,
            max_exchanges,
        }
    }

    fn directory() -> Vec<ExchangeInfo> {
        vec![
            exchange("gemini", Some("United States"), Some(900.0)),
            exchange("upbit", Some("South Korea"), Some(50_000.0)),
            exchange("quiet", Some("United States"), None),
            exchange("coinbase", Some("United States"), Some(30_000.0)),
            exchange("kraken", Some("United States"), Some(8_000.0)),
            exchange("nowhere", None, Some(99_999.0)),
        ]
    }

    #[test]
    fn test_filters_by_country_and_ranks_by_volume() {
        let universe = ExchangeUniverse::from_directory(directory(), &filter(0));
        let ids: Vec<&str> = universe.ids().collect();
        assert_eq!(ids, vec!["coinbase", "kraken", "gemini", "quiet"]);
    }

    #[test]
    fn test_cap_keeps_top_ranked() {
        let universe = ExchangeUniverse::from_directory(directory(), &filter(2));
        let ids: Vec<&str> = universe.ids().collect();
        assert_eq!(ids, vec!["coinbase", "kraken"]);
    }

    #[tokio::test]
    async fn test_discover_requests_configured_page() {
        let mut provider = MockMarketDataProvider::new();
        provider
            .expect_exchanges()
            .withf(|per_page, page| *per_page == 250 && *page == 1)
            .times(1)
            .returning(|_, _| Ok(directory()));

        let universe = ExchangeUniverse::discover(&provider, &filter(0), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(universe.len(), 4);
    }

    struct SlowDirectory;

    #[async_trait::async_trait]
    impl MarketDataProvider for SlowDirectory {
        async fn exchanges(&self, _: u32, _: u32) -> Result<Vec<ExchangeInfo>, ProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(directory())
        }

        async fn exchange_tickers(
            &self,
            _: &str,
        ) -> Result<Vec<crate::provider::TickerEntry>, ProviderError> {
            Ok(Vec::new())
        }

        async fn volume_chart(
            &self,
            _: &str,
            _: u32,
        ) -> Result<Vec<crate::provider::VolumeSample>, ProviderError> {
            Ok(Vec::new())
        }

        async fn exchange_rates(&self) -> Result<crate::provider::ExchangeRates, ProviderError> {
            Ok(Default::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_discover_times_out() {
        let result =
            ExchangeUniverse::discover(&SlowDirectory, &filter(0), Duration::from_secs(2)).await;
        assert!(matches!(
            result,
            Err(ProviderError::Timeout { timeout_ms: 2000, .. })
        ));
    }
}
