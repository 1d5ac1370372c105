//! Configuration management for ArbScout
//!
//! Loads from optional config files + environment variables via .env

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::collector::UniverseFilter;
use crate::scheduler::SchedulerSettings;
use crate::timezone::ZoneNormalizer;
use crate::types::CurrencyPair;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub collection: CollectionConfig,
    pub timezone: TimezoneConfig,
    pub sink: SinkConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// API root, e.g. https://api.coingecko.com/api/v3
    pub base_url: String,
    /// Demo API key; falls back to COINGECKO_API_KEY
    #[serde(default)]
    pub api_key: Option<String>,
    /// Transport-level timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Exchange directory page size
    pub exchanges_per_page: u32,
    /// Exchange directory page to read
    pub exchanges_page: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    /// Country the exchanges must be registered in
    pub country: String,
    /// Token of interest
    pub base_currency: String,
    /// User currency
    pub target_currency: String,
    /// Seconds between collection passes
    pub interval_secs: u64,
    /// Per-call bound for ticker and volume requests
    pub fetch_timeout_ms: u64,
    /// Keep only the top N exchanges by volume (0 = all)
    pub max_exchanges: usize,
    /// In-flight ticker requests per tick
    pub max_concurrent_fetches: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimezoneConfig {
    /// IANA zone or fixed offset trade times are normalized to, e.g.
    /// "Asia/Singapore" or "+08:00"; TIMEZONE overrides it
    pub zone: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    pub csv_enabled: bool,
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human-readable text
    pub json: bool,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::builder()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (ARBSCOUT__*)
            .add_source(Environment::with_prefix("ARBSCOUT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let mut app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.resolve_env();
        app_config.validate()?;
        Ok(app_config)
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(Config::builder()
            // Provider defaults
            .set_default("provider.base_url", "https://api.coingecko.com/api/v3")?
            .set_default("provider.request_timeout_ms", 30_000)?
            .set_default("provider.exchanges_per_page", 250)?
            .set_default("provider.exchanges_page", 1)?
            // Collection defaults
            .set_default("collection.country", "United States")?
            .set_default("collection.base_currency", "ETH")?
            .set_default("collection.target_currency", "USDT")?
            .set_default("collection.interval_secs", 60)?
            .set_default("collection.fetch_timeout_ms", 10_000)?
            .set_default("collection.max_exchanges", 0)?
            .set_default("collection.max_concurrent_fetches", 16)?
            // Timezone defaults
            .set_default("timezone.zone", "Asia/Singapore")?
            // Sink defaults
            .set_default("sink.csv_enabled", true)?
            .set_default("sink.data_dir", "./data")?
            // Logging defaults
            .set_default("logging.json", false)?)
    }

    /// Fill settings that conventionally live in plain environment variables
    fn resolve_env(&mut self) {
        let configured = self
            .provider
            .api_key
            .as_deref()
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false);
        if !configured {
            self.provider.api_key = std::env::var("COINGECKO_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty());
        }

        if let Ok(url) = std::env::var("COINGECKO_API_URL") {
            if !url.trim().is_empty() {
                self.provider.base_url = url;
            }
        }

        if let Ok(zone) = std::env::var("TIMEZONE") {
            if !zone.trim().is_empty() {
                self.timezone.zone = zone.trim().to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.collection.base_currency.trim().is_empty()
            || self.collection.target_currency.trim().is_empty()
        {
            bail!("collection.base_currency and collection.target_currency must be set");
        }
        if self.collection.country.trim().is_empty() {
            bail!("collection.country must be set");
        }
        if self.collection.interval_secs == 0 {
            bail!("collection.interval_secs must be positive");
        }
        if self.collection.fetch_timeout_ms == 0 || self.provider.request_timeout_ms == 0 {
            bail!("Timeouts must be positive");
        }
        if self.provider.exchanges_per_page == 0 || self.provider.exchanges_page == 0 {
            bail!("provider.exchanges_per_page and provider.exchanges_page must be positive");
        }
        ZoneNormalizer::parse(&self.timezone.zone).context("Invalid timezone.zone")?;
        Ok(())
    }

    pub fn pair(&self) -> CurrencyPair {
        CurrencyPair::new(
            self.collection.base_currency.trim(),
            self.collection.target_currency.trim(),
        )
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.collection.fetch_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.provider.request_timeout_ms)
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            pair: self.pair(),
            universe: UniverseFilter {
                country: self.collection.country.clone(),
                per_page: self.provider.exchanges_per_page,
                page: self.provider.exchanges_page,
                max_exchanges: self.collection.max_exchanges,
            },
            interval: Duration::from_secs(self.collection.interval_secs),
            discovery_timeout: self.fetch_timeout(),
            max_concurrent_fetches: self.collection.max_concurrent_fetches,
        }
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "pair={} country={:?} interval={}s fetch_timeout={}ms tz={} api_key={} csv={}",
            self.pair(),
            self.collection.country,
            self.collection.interval_secs,
            self.collection.fetch_timeout_ms,
            self.timezone.zone,
            if self.provider.api_key.is_some() { "set" } else { "unset" },
            self.sink.csv_enabled
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> AppConfig {
        AppConfig::builder()
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let cfg = defaults();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.pair(), CurrencyPair::new("ETH", "USDT"));
        assert_eq!(cfg.collection.interval_secs, 60);
        assert_eq!(cfg.provider.exchanges_per_page, 250);

        let settings = cfg.scheduler_settings();
        assert_eq!(settings.interval, Duration::from_secs(60));
        assert_eq!(settings.universe.country, "United States");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut cfg = defaults();
        cfg.collection.interval_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = defaults();
        cfg.timezone.zone = "Atlantis/Capital".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = defaults();
        cfg.collection.base_currency = " ".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_timezone_env_accepts_named_zone() {
        let mut cfg = defaults();
        assert_eq!(cfg.timezone.zone, "Asia/Singapore");

        std::env::set_var("TIMEZONE", "America/New_York");
        cfg.resolve_env();
        std::env::remove_var("TIMEZONE");

        assert_eq!(cfg.timezone.zone, "America/New_York");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_digest_hides_api_key() {
        let mut cfg = defaults();
        cfg.provider.api_key = Some("CG-secret".to_string());
        let digest = cfg.to_string();
        assert!(digest.contains("api_key=set"));
        assert!(!digest.contains("CG-secret"));
    }
}
