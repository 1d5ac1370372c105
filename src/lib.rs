//! ArbScout Library
//!
//! Continuous cross-exchange ticker collection, deduplication and per-exchange
//! statistics for spotting arbitrage opportunities.

pub mod aggregator;
pub mod collector;
pub mod config;
pub mod provider;
pub mod scheduler;
pub mod sink;
pub mod store;
pub mod timezone;
pub mod types;
