//! Exchange volume history and smoothed baseline
//!
//! The provider reports daily volume in BTC. When the run tracks another
//! base currency the series is converted with the current BTC rate; if no rate
//! is available the native values are kept and the series is flagged.

use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::collector::with_timeout;
use crate::provider::{MarketDataProvider, ProviderError, VolumeSample};
use crate::timezone::TimezoneNormalizer;
use crate::types::{VolumePoint, VolumeSeries};

/// Unit the provider reports exchange volume in
pub const NATIVE_VOLUME_UNIT: &str = "BTC";

/// Samples in the trailing rolling mean
pub const SMA_WINDOW: usize = 7;

/// Multiplier from the native volume unit into the run's base currency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeConversion {
    pub rate: Decimal,
    /// No rate was available, values stay in `NATIVE_VOLUME_UNIT`
    pub unit_fallback: bool,
}

impl VolumeConversion {
    pub const NATIVE: Self = Self {
        rate: Decimal::ONE,
        unit_fallback: false,
    };

    const FALLBACK: Self = Self {
        rate: Decimal::ONE,
        unit_fallback: true,
    };
}

pub struct VolumeHistoryFetcher {
    provider: Arc<dyn MarketDataProvider>,
    normalizer: Arc<dyn TimezoneNormalizer>,
    timeout: Duration,
}

impl VolumeHistoryFetcher {
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

    /// Resolve the BTC rate for `base_currency`. Never fails: a missing rate
    /// keeps the native unit and flags it.
    pub async fn conversion(&self, base_currency: &str) -> VolumeConversion {
        if base_currency.eq_ignore_ascii_case(NATIVE_VOLUME_UNIT) {
            return VolumeConversion::NATIVE;
        }

        let rate = match with_timeout(self.timeout, "/exchange_rates", self.provider.exchange_rates())
            .await
        {
            Ok(rates) => rates.rate_for(base_currency),
            Err(e) => {
                warn!(currency = %base_currency, error = %e, "Exchange rate lookup failed");
                None
            }
        };

        match rate {
            Some(rate) => VolumeConversion {
                rate,
                unit_fallback: false,
            },
            None => {
                warn!(
                    currency = %base_currency,
                    unit = NATIVE_VOLUME_UNIT,
                    "No exchange rate found, volume reported in native unit"
                );
                VolumeConversion::FALLBACK
            }
        }
    }

    /// Fetch `days` of volume for one exchange, expressed in `base_currency`
    pub async fn fetch(
        &self,
        exchange_id: &str,
        days: u32,
        base_currency: &str,
    ) -> Result<VolumeSeries, ProviderError> {
        let conversion = self.conversion(base_currency).await;
        self.fetch_converted(exchange_id, days, conversion).await
    }

    /// Like `fetch`, with the rate already resolved. Used when several
    /// exchanges share one lookup.
    pub async fn fetch_converted(
        &self,
        exchange_id: &str,
        days: u32,
        conversion: VolumeConversion,
    ) -> Result<VolumeSeries, ProviderError> {
        let samples = with_timeout(
            self.timeout,
            format!("/exchanges/{}/volume_chart", exchange_id),
            self.provider.volume_chart(exchange_id, days),
        )
        .await?;

        Ok(build_series(
            exchange_id,
            &samples,
            conversion.rate,
            conversion.unit_fallback,
            self.normalizer.as_ref(),
        ))
    }
}

/// Builds a most-recent-first series with a trailing `SMA_WINDOW` mean.
///
/// Samples are ordered oldest to newest before smoothing. Several samples on
/// the same date are all kept.
pub fn build_series(
    exchange_id: &str,
    samples: &[VolumeSample],
    rate: Decimal,
    unit_fallback: bool,
    normalizer: &dyn TimezoneNormalizer,
) -> VolumeSeries {
    let mut ordered: Vec<&VolumeSample> = samples.iter().collect();
    ordered.sort_by_key(|s| s.timestamp_ms);

    let mut window = RollingMean::new(SMA_WINDOW);
    let mut points = Vec::with_capacity(ordered.len());
    for sample in ordered {
        let Some(date) = normalizer.local_date(sample.timestamp_ms) else {
            debug!(exchange = %exchange_id, ts = sample.timestamp_ms, "Skipping unrepresentable timestamp");
            continue;
        };
        let volume = sample.volume * rate;
        points.push(VolumePoint {
            timestamp_ms: sample.timestamp_ms,
            date,
            volume,
            volume_sma: window.update(volume),
        });
    }

    points.reverse();

    VolumeSeries {
        exchange_id: exchange_id.to_string(),
        points,
        unit_fallback,
    }
}

#[derive(Debug, Clone)]
struct RollingMean {
    window: usize,
    buf: VecDeque<Decimal>,
    sum: Decimal,
}

impl RollingMean {
    fn new(window: usize) -> Self {
        Self {
            window,
            buf: VecDeque::with_capacity(window),
            sum: Decimal::ZERO,
        }
    }

    fn update(&mut self, value: Decimal) -> Option<Decimal> {
        if self.window == 0 {
            return None;
        }

        self.buf.push_back(value);
        self.sum += value;
        while self.buf.len() > self.window {
            if let Some(front) = self.buf.pop_front() {
                self.sum -= front;
            }
        }

        if self.buf.len() == self.window {
            Some(self.sum / Decimal::from(self.window as u64))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ExchangeRates, MockMarketDataProvider, RateEntry};
    use crate::timezone::ZoneNormalizer;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    const DAY_MS: i64 = 86_400_000;
    // 2024-04-01T00:00:00Z
    const START_MS: i64 = 1_711_929_600_000;

    fn daily(volumes: &[Decimal]) -> Vec<VolumeSample> {
        volumes
            .iter()
            .enumerate()
            .map(|(i, v)| VolumeSample {
                timestamp_ms: START_MS + i as i64 * DAY_MS,
                volume: *v,
            })
            .collect()
    }

    fn rates(code: &str, value: f64) -> ExchangeRates {
        let mut map = HashMap::new();
        map.insert(
            code.to_string(),
            RateEntry {
                name: None,
                unit: None,
                value,
                kind: None,
            },
        );
        ExchangeRates { rates: map }
    }

    #[test]
    fn test_sma_over_seven_samples() {
        let samples = daily(&[
            dec!(10),
            dec!(20),
            dec!(30),
            dec!(40),
            dec!(50),
            dec!(60),
            dec!(70),
        ]);
        let series = build_series(
            "kraken",
            &samples,
            Decimal::ONE,
            false,
            &ZoneNormalizer::utc(),
        );

        assert_eq!(series.points.len(), 7);
        // Most recent first
        assert_eq!(series.points[0].volume, dec!(70));
        assert_eq!(series.points[0].volume_sma, Some(dec!(40)));
        assert_eq!(series.latest_sma(), Some(dec!(40)));
        assert!(series.points[1..].iter().all(|p| p.volume_sma.is_none()));
        assert_eq!(
            series.points[0].date,
            NaiveDate::from_ymd_opt(2024, 4, 7).unwrap()
        );
    }

    #[test]
    fn test_sma_slides_and_input_order_is_irrelevant() {
        let mut samples = daily(&[
            dec!(10),
            dec!(20),
            dec!(30),
            dec!(40),
            dec!(50),
            dec!(60),
            dec!(70),
            dec!(80),
        ]);
        samples.reverse();
        let series = build_series(
            "kraken",
            &samples,
            Decimal::ONE,
            false,
            &ZoneNormalizer::utc(),
        );

        assert_eq!(series.points[0].volume_sma, Some(dec!(50)));
        assert_eq!(series.points[1].volume_sma, Some(dec!(40)));
        assert_eq!(series.points[2].volume_sma, None);
    }

    #[test]
    fn test_short_series_has_no_baseline() {
        let series = build_series(
            "kraken",
            &daily(&[dec!(1), dec!(2), dec!(3)]),
            Decimal::ONE,
            false,
            &ZoneNormalizer::utc(),
        );
        assert_eq!(series.latest_sma(), None);
    }

    fn fetcher(provider: MockMarketDataProvider) -> VolumeHistoryFetcher {
        VolumeHistoryFetcher::new(
            Arc::new(provider),
            Arc::new(ZoneNormalizer::utc()),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_native_unit_skips_rate_lookup() {
        let mut provider = MockMarketDataProvider::new();
        provider
            .expect_volume_chart()
            .returning(|_, _| Ok(daily(&[dec!(1); 7])));
        provider.expect_exchange_rates().never();

        let volume = fetcher(provider);
        let conversion = volume.conversion("btc").await;
        assert_eq!(conversion, VolumeConversion::NATIVE);

        let series = volume.fetch_converted("kraken", 30, conversion).await.unwrap();
        assert!(!series.unit_fallback);
        assert_eq!(series.latest_sma(), Some(dec!(1)));
    }

    #[tokio::test]
    async fn test_volume_converted_with_rate() {
        let mut provider = MockMarketDataProvider::new();
        provider
            .expect_volume_chart()
            .returning(|_, _| Ok(daily(&[dec!(2); 7])));
        provider
            .expect_exchange_rates()
            .times(1)
            .returning(|| Ok(rates("eth", 20.0)));

        let volume = fetcher(provider);
        let conversion = volume.conversion("ETH").await;
        assert_eq!(conversion.rate, dec!(20));

        let series = volume.fetch_converted("kraken", 30, conversion).await.unwrap();
        assert!(!series.unit_fallback);
        assert_eq!(series.points[0].volume, dec!(40));
        assert_eq!(series.latest_sma(), Some(dec!(40)));
    }

    #[tokio::test]
    async fn test_unknown_currency_falls_back_to_native_unit() {
        let mut provider = MockMarketDataProvider::new();
        provider
            .expect_volume_chart()
            .returning(|_, _| Ok(daily(&[dec!(2); 7])));
        provider
            .expect_exchange_rates()
            .returning(|| Ok(rates("usd", 65000.0)));

        let volume = fetcher(provider);
        let conversion = volume.conversion("DOGE").await;
        let series = volume.fetch_converted("kraken", 30, conversion).await.unwrap();
        assert!(series.unit_fallback);
        assert_eq!(series.points[0].volume, dec!(2));
    }

    #[tokio::test]
    async fn test_rate_outage_falls_back_to_native_unit() {
        let mut provider = MockMarketDataProvider::new();
        provider
            .expect_volume_chart()
            .returning(|_, _| Ok(daily(&[dec!(3); 7])));
        provider.expect_exchange_rates().times(1).returning(|| {
            Err(ProviderError::Status {
                endpoint: "/exchange_rates".to_string(),
                status: 503,
            })
        });

        let series = fetcher(provider).fetch("kraken", 30, "ETH").await.unwrap();
        assert!(series.unit_fallback);
        assert_eq!(series.points[0].volume, dec!(3));
        assert_eq!(series.latest_sma(), Some(dec!(3)));
    }

    #[tokio::test]
    async fn test_chart_failure_propagates() {
        let mut provider = MockMarketDataProvider::new();
        provider.expect_volume_chart().returning(|id, _| {
            Err(ProviderError::Status {
                endpoint: format!("/exchanges/{}/volume_chart", id),
                status: 500,
            })
        });

        let result = fetcher(provider).fetch("kraken", 30, "BTC").await;
        assert!(result.is_err());
    }
}
