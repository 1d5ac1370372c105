//! Aggregator - per-exchange statistics over the observation store
//!
//! Reduces every exchange's stored observations to one summary row and
//! attaches the exchange's share of its smoothed 30-day volume. A missing
//! volume baseline only blanks the share; the rest of the row is still built.

use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::collector::{VolumeConversion, VolumeHistoryFetcher};
use crate::store::ObservationStore;
use crate::types::{ExchangeSummary, PriceDispersion, TickerObservation};

/// Lookback used for the volume baseline
pub const VOLUME_LOOKBACK_DAYS: u32 = 30;

/// Outcome of one baseline lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeBaseline {
    Available { sma: Decimal, unit_fallback: bool },
    Unavailable,
}

impl VolumeBaseline {
    /// `mean_volume` as a percentage of the baseline
    pub fn share_of(&self, mean_volume: Decimal) -> Option<Decimal> {
        match self {
            Self::Available { sma, .. } => mean_volume
                .checked_div(*sma)
                .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED)),
            Self::Unavailable => None,
        }
    }

    pub fn unit_fallback(&self) -> bool {
        matches!(self, Self::Available { unit_fallback: true, .. })
    }
}

pub struct Aggregator {
    volume: Arc<VolumeHistoryFetcher>,
}

impl Aggregator {
    pub fn new(volume: Arc<VolumeHistoryFetcher>) -> Self {
        Self { volume }
    }

    /// One summary per exchange present in the store, in exchange id order.
    /// Never mutates the store.
    pub async fn aggregate(
        &self,
        store: &ObservationStore,
        reference_currency: &str,
    ) -> Vec<ExchangeSummary> {
        let partitions = store.by_exchange();
        let stats: Vec<PartitionStats> = partitions
            .iter()
            .filter_map(|(exchange_id, observations)| {
                PartitionStats::compute(exchange_id, observations)
            })
            .collect();

        if stats.is_empty() {
            return Vec::new();
        }

        // Every exchange shares the same BTC rate
        let conversion = self.volume.conversion(reference_currency).await;
        let baselines = join_all(
            stats
                .iter()
                .map(|s| self.baseline(&s.exchange_id, conversion)),
        )
        .await;

        stats
            .into_iter()
            .zip(baselines)
            .map(|(stats, baseline)| stats.into_summary(baseline))
            .collect()
    }

    async fn baseline(&self, exchange_id: &str, conversion: VolumeConversion) -> VolumeBaseline {
        match self
            .volume
            .fetch_converted(exchange_id, VOLUME_LOOKBACK_DAYS, conversion)
            .await
        {
            Ok(series) => match series.latest_sma() {
                Some(sma) if !sma.is_zero() => VolumeBaseline::Available {
                    sma,
                    unit_fallback: series.unit_fallback,
                },
                _ => {
                    debug!(
                        exchange = %exchange_id,
                        points = series.points.len(),
                        "Volume history too short for a baseline"
                    );
                    VolumeBaseline::Unavailable
                }
            },
            Err(e) => {
                warn!(exchange = %exchange_id, error = %e, "Volume history unavailable");
                VolumeBaseline::Unavailable
            }
        }
    }
}

/// Statistics that depend only on stored observations
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionStats {
    pub exchange_id: String,
    pub earliest: chrono::DateTime<chrono::FixedOffset>,
    pub latest: chrono::DateTime<chrono::FixedOffset>,
    pub mean_price: Decimal,
    pub mean_volume: Decimal,
    pub mean_spread_pct: Decimal,
    pub count: usize,
}

impl PartitionStats {
    /// `None` for an empty partition
    pub fn compute(exchange_id: &str, observations: &[&TickerObservation]) -> Option<Self> {
        let first = observations.first()?;
        let mut earliest = first.trade_time;
        let mut latest = first.trade_time;
        let mut price_sum = Decimal::ZERO;
        let mut volume_sum = Decimal::ZERO;
        let mut spread_sum = Decimal::ZERO;

        for obs in observations {
            earliest = earliest.min(obs.trade_time);
            latest = latest.max(obs.trade_time);
            price_sum += obs.last_price;
            volume_sum += obs.last_volume;
            spread_sum += obs.bid_ask_spread_pct;
        }

        let n = Decimal::from(observations.len() as u64);
        Some(Self {
            exchange_id: exchange_id.to_string(),
            earliest,
            latest,
            mean_price: price_sum / n,
            mean_volume: volume_sum / n,
            mean_spread_pct: spread_sum / n,
            count: observations.len(),
        })
    }

    pub fn into_summary(self, baseline: VolumeBaseline) -> ExchangeSummary {
        ExchangeSummary {
            observation_span: self.latest - self.earliest,
            volume_share_pct: baseline.share_of(self.mean_volume),
            volume_unit_fallback: baseline.unit_fallback(),
            exchange_id: self.exchange_id,
            earliest_observation_time: self.earliest,
            latest_observation_time: self.latest,
            mean_price: self.mean_price,
            mean_volume: self.mean_volume,
            mean_spread_pct: self.mean_spread_pct,
            observation_count: self.count,
        }
    }
}

/// Cheapest vs. most expensive venue by mean price.
/// Needs at least two exchanges and a positive lowest price.
pub fn price_dispersion(summaries: &[ExchangeSummary]) -> Option<PriceDispersion> {
    if summaries.len() < 2 {
        return None;
    }

    let lowest = summaries.iter().min_by_key(|s| s.mean_price)?;
    let highest = summaries.iter().max_by_key(|s| s.mean_price)?;
    if lowest.mean_price <= Decimal::ZERO {
        return None;
    }

    let gap_pct = (highest.mean_price - lowest.mean_price)
        .checked_div(lowest.mean_price)?
        .checked_mul(Decimal::ONE_HUNDRED)?;

    Some(PriceDispersion {
        lowest_exchange: lowest.exchange_id.clone(),
        lowest_mean_price: lowest.mean_price,
        highest_exchange: highest.exchange_id.clone(),
        highest_mean_price: highest.mean_price,
        gap_pct,
    })
}
