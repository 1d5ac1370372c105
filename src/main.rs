//! ArbScout - collect tickers across exchanges and publish arbitrage stats

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use arbscout::aggregator::Aggregator;
use arbscout::collector::{SnapshotFetcher, VolumeHistoryFetcher};
use arbscout::config::AppConfig;
use arbscout::provider::{CoinGeckoClient, MarketDataProvider};
use arbscout::scheduler::CollectionScheduler;
use arbscout::sink::{FanoutSink, SummarySink};
use arbscout::timezone::{TimezoneNormalizer, ZoneNormalizer};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(config.logging.json);

    info!(config = %config, "Starting ArbScout v{}", env!("CARGO_PKG_VERSION"));

    let run_id = Uuid::new_v4();
    let provider: Arc<dyn MarketDataProvider> = Arc::new(CoinGeckoClient::new(
        &config.provider.base_url,
        config.provider.api_key.as_deref(),
        config.request_timeout(),
    )?);
    let normalizer: Arc<dyn TimezoneNormalizer> =
        Arc::new(ZoneNormalizer::parse(&config.timezone.zone)?);

    let snapshots = SnapshotFetcher::new(
        provider.clone(),
        normalizer.clone(),
        config.fetch_timeout(),
    );
    let volume = VolumeHistoryFetcher::new(provider.clone(), normalizer, config.fetch_timeout());
    let aggregator = Aggregator::new(Arc::new(volume));

    let sink: Arc<dyn SummarySink> = Arc::new(FanoutSink::from_config(&config.sink, run_id)?);

    let mut scheduler = CollectionScheduler::new(
        provider,
        snapshots,
        aggregator,
        sink,
        config.scheduler_settings(),
        run_id,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            // Dropping the sender would stop the scheduler, so hold it.
            error!(error = %e, "Failed to listen for Ctrl-C, running until killed");
            std::future::pending::<()>().await;
        }
        info!("Ctrl-C received, finishing current tick");
        let _ = shutdown_tx.send(true);
    });

    scheduler.run(shutdown_rx).await;

    info!(run_id = %run_id, "ArbScout stopped");
    Ok(())
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
