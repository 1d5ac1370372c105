//! Collector module - per-exchange fetches against the market data provider
//!
//! Snapshot fetches feed the observation store every tick, volume history
//! feeds the aggregator's baseline, and the universe decides which exchanges
//! are polled at all.

mod snapshot;
mod universe;
mod volume;

pub use snapshot::{SnapshotFetcher, SnapshotOutcome};
pub use universe::{ExchangeUniverse, UniverseFilter};
pub use volume::{
    build_series, VolumeConversion, VolumeHistoryFetcher, NATIVE_VOLUME_UNIT, SMA_WINDOW,
};

use std::future::Future;
use std::time::Duration;

use crate::provider::ProviderError;

/// Bounds a provider call; running past `limit` counts as a fetch failure.
pub(crate) async fn with_timeout<T, F>(
    limit: Duration,
    endpoint: impl Into<String>,
    call: F,
) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout {
            endpoint: endpoint.into(),
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}
