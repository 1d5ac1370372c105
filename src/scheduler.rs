//! Collection scheduler
//!
//! Drives the periodic collection loop: fan out ticker fetches across the
//! exchange universe, merge into the observation store, aggregate, publish.
//! Ticks never overlap, and a cancelled scheduler stops before its next
//! fetch phase.

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregator::{price_dispersion, Aggregator};
use crate::collector::{ExchangeUniverse, SnapshotFetcher, SnapshotOutcome, UniverseFilter};
use crate::provider::{MarketDataProvider, ProviderError};
use crate::sink::SummarySink;
use crate::store::ObservationStore;
use crate::types::{CurrencyPair, SummaryBatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub pair: CurrencyPair,
    pub universe: UniverseFilter,
    pub interval: Duration,
    /// Bound on the exchange directory call
    pub discovery_timeout: Duration,
    /// Upper bound on in-flight ticker requests within one tick
    pub max_concurrent_fetches: usize,
}

/// Counters for one collection pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub observed: usize,
    pub not_found: usize,
    pub failed: usize,
    pub inserted: usize,
    pub stored: usize,
    pub summaries: usize,
}

pub struct CollectionScheduler {
    provider: Arc<dyn MarketDataProvider>,
    snapshots: SnapshotFetcher,
    aggregator: Aggregator,
    store: ObservationStore,
    sink: Arc<dyn SummarySink>,
    settings: SchedulerSettings,
    run_id: Uuid,
    ticks: u64,
    state_tx: watch::Sender<SchedulerState>,
}

impl CollectionScheduler {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        snapshots: SnapshotFetcher,
        aggregator: Aggregator,
        sink: Arc<dyn SummarySink>,
        settings: SchedulerSettings,
        run_id: Uuid,
    ) -> Self {
        let (state_tx, _) = watch::channel(SchedulerState::Idle);
        Self {
            provider,
            snapshots,
            aggregator,
            store: ObservationStore::new(),
            sink,
            settings,
            run_id,
            ticks: 0,
            state_tx,
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state_tx.borrow()
    }

    /// Observe state changes from outside the loop
    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state_tx.subscribe()
    }

    pub fn store(&self) -> &ObservationStore {
        &self.store
    }

    /// Collect immediately and every `interval` until `shutdown` turns true
    /// (or its sender is dropped).
    ///
    /// Nothing here is fatal. The exchange universe is discovered on the
    /// first tick and retried on every later tick until the directory
    /// answers; per-exchange failures are logged and skipped inside each tick.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        if *shutdown.borrow_and_update() {
            info!("Shutdown requested before start");
            return;
        }

        self.set_state(SchedulerState::Running);
        info!(
            run_id = %self.run_id,
            pair = %self.settings.pair,
            country = %self.settings.universe.country,
            interval_secs = self.settings.interval.as_secs_f64(),
            "Collection started"
        );

        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut universe: Option<ExchangeUniverse> = None;

        loop {
            // The first tick completes immediately.
            tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => break,
                _ = interval.tick() => {}
            }

            if *shutdown.borrow() {
                break;
            }

            if universe.is_none() {
                universe = tokio::select! {
                    biased;
                    _ = cancelled(&mut shutdown) => break,
                    result = ExchangeUniverse::discover(
                        self.provider.as_ref(),
                        &self.settings.universe,
                        self.settings.discovery_timeout,
                    ) => match result {
                        Ok(found) => {
                            if found.is_empty() {
                                warn!(
                                    country = %self.settings.universe.country,
                                    "No exchanges matched; ticks will publish empty batches"
                                );
                            }
                            Some(found)
                        }
                        Err(e) => {
                            warn!(error = %e, "Exchange discovery failed, retrying next tick");
                            None
                        }
                    },
                };
            }

            if let Some(universe) = &universe {
                self.collect_once(universe).await;
            }
        }

        self.set_state(SchedulerState::Idle);
        info!(run_id = %self.run_id, ticks = self.ticks, stored = self.store.len(), "Collection stopped");
    }

    /// One full pass: fetch all, merge, aggregate, publish
    pub async fn collect_once(&mut self, universe: &ExchangeUniverse) -> TickReport {
        self.ticks += 1;
        let mut report = TickReport {
            tick: self.ticks,
            ..TickReport::default()
        };

        let snapshots = &self.snapshots;
        let pair = &self.settings.pair;
        let mut fetches = Vec::with_capacity(universe.len());
        for id in universe.ids() {
            fetches.push(async move { (id, snapshots.fetch(id, pair).await) });
        }
        let results: Vec<(&str, Result<SnapshotOutcome, ProviderError>)> =
            stream::iter(fetches)
                .buffer_unordered(self.settings.max_concurrent_fetches.max(1))
                .collect()
                .await;

        let mut observations = Vec::with_capacity(results.len());
        for (exchange_id, result) in results {
            match result {
                Ok(SnapshotOutcome::Found(obs)) => observations.push(obs),
                Ok(SnapshotOutcome::NotFound) => report.not_found += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(tick = report.tick, exchange = %exchange_id, error = %e, "Ticker fetch failed, skipping");
                }
            }
        }
        report.observed = observations.len();

        report.inserted = self.store.merge(observations);
        report.stored = self.store.len();

        let summaries = self
            .aggregator
            .aggregate(&self.store, &self.settings.pair.base)
            .await;
        report.summaries = summaries.len();

        let batch = SummaryBatch {
            run_id: self.run_id,
            tick: report.tick,
            generated_at: Utc::now(),
            pair: self.settings.pair.clone(),
            dispersion: price_dispersion(&summaries),
            summaries,
        };
        self.sink.publish(&batch).await;
        debug!(tick = report.tick, sink = self.sink.name(), "Batch published");

        info!(
            tick = report.tick,
            observed = report.observed,
            not_found = report.not_found,
            failed = report.failed,
            inserted = report.inserted,
            stored = report.stored,
            summaries = report.summaries,
            "Tick complete"
        );
        report
    }

    fn set_state(&self, state: SchedulerState) {
        self.state_tx.send_replace(state);
    }
}

/// Resolves once the shutdown flag is set or its sender goes away
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancelled_on_flag() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        cancelled(&mut rx).await;
    }

    #[tokio::test]
    async fn test_cancelled_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        cancelled(&mut rx).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_cancelled_while_flag_false() {
        let (_tx, mut rx) = watch::channel(false);
        let result =
            tokio::time::timeout(Duration::from_secs(5), cancelled(&mut rx)).await;
        assert!(result.is_err());
    }
}
