//! Summary sinks
//!
//! Every tick's batch is published to a `SummarySink`. Publishing never fails
//! from the scheduler's point of view: sinks log their own errors.

mod csv_writer;

pub use csv_writer::CsvSink;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::SinkConfig;
use crate::types::{ExchangeSummary, SummaryBatch};

/// Decimal places used when summaries leave the process
pub const OUTPUT_DECIMALS: u32 = 2;

/// Presentation rounding; stored values keep full precision
pub fn round_output(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(OUTPUT_DECIMALS, RoundingStrategy::MidpointAwayFromZero)
}

/// Receives one summary batch per tick
#[async_trait]
pub trait SummarySink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn publish(&self, batch: &SummaryBatch);
}

/// Flat, rounded row for CSV and log output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub tick: u64,
    pub generated_at: String,
    pub exchange: String,
    pub trade_time_earliest: String,
    pub trade_time_latest: String,
    pub trade_time_span_secs: i64,
    pub last_price_mean: Decimal,
    pub last_vol_mean: Decimal,
    pub spread_mean: Decimal,
    pub num_observations: usize,
    pub last_vol_pct: Option<Decimal>,
    pub vol_unit_fallback: bool,
}

impl SummaryRecord {
    pub fn from_summary(batch: &SummaryBatch, summary: &ExchangeSummary) -> Self {
        Self {
            tick: batch.tick,
            generated_at: batch.generated_at.to_rfc3339(),
            exchange: summary.exchange_id.clone(),
            trade_time_earliest: summary.earliest_observation_time.to_rfc3339(),
            trade_time_latest: summary.latest_observation_time.to_rfc3339(),
            trade_time_span_secs: summary.observation_span.num_seconds(),
            last_price_mean: round_output(summary.mean_price),
            last_vol_mean: round_output(summary.mean_volume),
            spread_mean: round_output(summary.mean_spread_pct),
            num_observations: summary.observation_count,
            last_vol_pct: summary.volume_share_pct.map(round_output),
            vol_unit_fallback: summary.volume_unit_fallback,
        }
    }

    pub fn from_batch(batch: &SummaryBatch) -> Vec<Self> {
        batch
            .summaries
            .iter()
            .map(|s| Self::from_summary(batch, s))
            .collect()
    }
}

/// Writes each batch to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl SummarySink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn publish(&self, batch: &SummaryBatch) {
        for record in SummaryRecord::from_batch(batch) {
            info!(
                tick = record.tick,
                exchange = %record.exchange,
                price = %record.last_price_mean,
                volume = %record.last_vol_mean,
                spread = %record.spread_mean,
                observations = record.num_observations,
                volume_pct = ?record.last_vol_pct,
                "Exchange summary"
            );
        }

        if let Some(d) = &batch.dispersion {
            info!(
                tick = batch.tick,
                pair = %batch.pair,
                buy = %d.lowest_exchange,
                buy_price = %round_output(d.lowest_mean_price),
                sell = %d.highest_exchange,
                sell_price = %round_output(d.highest_mean_price),
                gap_pct = %round_output(d.gap_pct),
                "Price dispersion"
            );
        }
    }
}

/// Publishes to several sinks in order
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn SummarySink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log output always, plus a per-run CSV file when enabled
    pub fn from_config(config: &SinkConfig, run_id: Uuid) -> Result<Self> {
        let mut sinks = Self::new().with(Arc::new(LogSink));
        if config.csv_enabled {
            let csv = CsvSink::new(&config.data_dir, run_id)
                .context("Failed to initialize CSV sink")?;
            info!(path = %csv.path().display(), "Writing summaries to CSV");
            sinks = sinks.with(Arc::new(csv));
        }
        Ok(sinks)
    }

    pub fn with(mut self, sink: Arc<dyn SummarySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl SummarySink for FanoutSink {
    fn name(&self) -> &'static str {
        "fanout"
    }

    async fn publish(&self, batch: &SummaryBatch) {
        for sink in &self.sinks {
            sink.publish(batch).await;
        }
    }
}
