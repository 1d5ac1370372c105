//! Core types used throughout ArbScout
//!
//! Defines ticker observations, volume series and the per-exchange summaries
//! produced every collection tick.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Trading pair being tracked (e.g. ETH/USDT)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    /// Token of interest
    pub base: String,
    /// Quote currency the user trades in
    pub target: String,
}

impl CurrencyPair {
    pub fn new(base: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            target: target.into().to_uppercase(),
        }
    }

    /// Whether a provider ticker's base/target matches this pair
    pub fn matches(&self, base: &str, target: &str) -> bool {
        self.base.eq_ignore_ascii_case(base) && self.target.eq_ignore_ascii_case(target)
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.target)
    }
}

/// One exchange's quote for the tracked pair at one collection instant.
///
/// Equality and hashing cover every field, so the observation itself is its
/// dedup key: two observations are duplicates only when the whole tuple matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TickerObservation {
    pub exchange_id: String,
    pub last_price: Decimal,
    pub last_volume: Decimal,
    /// Liquidity proxy, lower is better
    pub bid_ask_spread_pct: Decimal,
    /// Source-reported trade time, normalized to the configured zone
    pub trade_time: DateTime<FixedOffset>,
}

/// One point of an exchange's volume history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumePoint {
    pub timestamp_ms: i64,
    /// Local calendar date of the sample
    pub date: NaiveDate,
    /// Volume in the reference currency (or native unit on fallback)
    pub volume: Decimal,
    /// Trailing rolling mean, absent until the window is full
    pub volume_sma: Option<Decimal>,
}

/// Trailing volume history for one exchange, most recent first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSeries {
    pub exchange_id: String,
    pub points: Vec<VolumePoint>,
    /// Set when no conversion rate resolved and volumes stayed in native units
    pub unit_fallback: bool,
}

impl VolumeSeries {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Smoothed volume of the most recent sample
    pub fn latest_sma(&self) -> Option<Decimal> {
        self.points.first().and_then(|p| p.volume_sma)
    }
}

/// Aggregated statistics for one exchange over everything collected so far
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeSummary {
    pub exchange_id: String,
    pub earliest_observation_time: DateTime<FixedOffset>,
    pub latest_observation_time: DateTime<FixedOffset>,
    pub observation_span: Duration,
    pub mean_price: Decimal,
    pub mean_volume: Decimal,
    pub mean_spread_pct: Decimal,
    pub observation_count: usize,
    /// Mean volume as a percentage of the 30-day smoothed baseline
    pub volume_share_pct: Option<Decimal>,
    /// Baseline was computed in the provider's native unit
    pub volume_unit_fallback: bool,
}

/// Cheapest and most expensive exchange by mean price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceDispersion {
    pub lowest_exchange: String,
    pub lowest_mean_price: Decimal,
    pub highest_exchange: String,
    pub highest_mean_price: Decimal,
    /// (highest - lowest) / lowest * 100
    pub gap_pct: Decimal,
}

/// Everything handed to a sink for one tick
#[derive(Debug, Clone)]
pub struct SummaryBatch {
    pub run_id: Uuid,
    pub tick: u64,
    pub generated_at: DateTime<Utc>,
    pub pair: CurrencyPair,
    pub summaries: Vec<ExchangeSummary>,
    pub dispersion: Option<PriceDispersion>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_pair_is_uppercased_and_matches_case_insensitively() {
        let pair = CurrencyPair::new("eth", "usdt");
        assert_eq!(pair.to_string(), "ETH/USDT");
        assert!(pair.matches("ETH", "USDT"));
        assert!(pair.matches("eth", "Usdt"));
        assert!(!pair.matches("ETH", "USD"));
    }

    #[test]
    fn test_latest_sma_reads_first_point() {
        let date = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        let series = VolumeSeries {
            exchange_id: "kraken".to_string(),
            points: vec![
                VolumePoint {
                    timestamp_ms: 2,
                    date,
                    volume: dec!(5),
                    volume_sma: Some(dec!(4)),
                },
                VolumePoint {
                    timestamp_ms: 1,
                    date,
                    volume: dec!(3),
                    volume_sma: None,
                },
            ],
            unit_fallback: false,
        };
        assert_eq!(series.latest_sma(), Some(dec!(4)));
    }
}
