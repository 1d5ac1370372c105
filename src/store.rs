//! Observation store - deduplicated log of collected tickers
//!
//! Owned by one collection run and written only from the scheduler loop.
//! Semantically a set: an observation is kept once per distinct field tuple,
//! so a venue that repeats an unchanged quote across ticks is counted once.

use std::collections::{BTreeMap, HashSet};

use crate::types::TickerObservation;

#[derive(Debug, Clone, Default)]
pub struct ObservationStore {
    observations: HashSet<TickerObservation>,
}

impl ObservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every observation whose full tuple is not stored yet.
    /// Returns how many were new.
    pub fn merge<I>(&mut self, batch: I) -> usize
    where
        I: IntoIterator<Item = TickerObservation>,
    {
        batch
            .into_iter()
            .filter(|obs| self.observations.insert(obs.clone()))
            .count()
    }

    pub fn contains(&self, observation: &TickerObservation) -> bool {
        self.observations.contains(observation)
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TickerObservation> {
        self.observations.iter()
    }

    /// Observations grouped by exchange, exchanges in id order
    pub fn by_exchange(&self) -> BTreeMap<&str, Vec<&TickerObservation>> {
        let mut partitions: BTreeMap<&str, Vec<&TickerObservation>> = BTreeMap::new();
        for obs in &self.observations {
            partitions
                .entry(obs.exchange_id.as_str())
                .or_default()
                .push(obs);
        }
        partitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, FixedOffset};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn at(ts: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(ts).unwrap()
    }

    fn obs(exchange: &str, price: Decimal, time: &str) -> TickerObservation {
        TickerObservation {
            exchange_id: exchange.to_string(),
            last_price: price,
            last_volume: dec!(5),
            bid_ask_spread_pct: dec!(0.1),
            trade_time: at(time),
        }
    }

    #[test]
    fn test_merge_is_idempotent() {
        let batch = vec![
            obs("A", dec!(100), "2024-04-01T10:00:00+08:00"),
            obs("B", dec!(101), "2024-04-01T10:00:00+08:00"),
        ];

        let mut once = ObservationStore::new();
        assert_eq!(once.merge(batch.clone()), 2);

        let mut twice = ObservationStore::new();
        twice.merge(batch.clone());
        assert_eq!(twice.merge(batch), 0);

        assert_eq!(once.len(), twice.len());
        assert!(once.iter().all(|o| twice.contains(o)));
    }

    #[test]
    fn test_exchange_is_part_of_the_key() {
        let mut store = ObservationStore::new();
        store.merge(vec![
            obs("A", dec!(100), "2024-04-01T10:00:00+08:00"),
            obs("B", dec!(100), "2024-04-01T10:00:00+08:00"),
        ]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_identical_observations_collapse() {
        let mut store = ObservationStore::new();
        let o = obs("A", dec!(100), "2024-04-01T10:00:00+08:00");
        assert_eq!(store.merge(vec![o.clone(), o.clone()]), 1);
        assert_eq!(store.merge(vec![o]), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_same_quote_at_new_time_is_kept() {
        let mut store = ObservationStore::new();
        store.merge(vec![obs("A", dec!(100), "2024-04-01T10:00:00+08:00")]);
        store.merge(vec![obs("A", dec!(100), "2024-04-01T10:01:00+08:00")]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_by_exchange_partitions() {
        let mut store = ObservationStore::new();
        store.merge(vec![
            obs("kraken", dec!(100), "2024-04-01T10:00:00+08:00"),
            obs("coinbase", dec!(101), "2024-04-01T10:00:00+08:00"),
            obs("kraken", dec!(102), "2024-04-01T10:01:00+08:00"),
        ]);

        let parts = store.by_exchange();
        let keys: Vec<&str> = parts.keys().copied().collect();
        assert_eq!(keys, vec!["coinbase", "kraken"]);
        assert_eq!(parts["kraken"].len(), 2);
    }
}
