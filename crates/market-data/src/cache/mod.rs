//! Time-boxed result cache.
//!
//! One entry per `(DataType, key)`, holding the last successful payload and
//! the provider that produced it. Entries are only visible while
//! `now - stored_at < ttl`; expired entries are removed on read.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::debug;
use serde::Serialize;
use tokio::time::Instant;

use crate::models::{DataKey, DataPayload, DataType, ProviderId, ProviderResult};

#[derive(Clone, Debug)]
struct CacheEntry {
    payload: DataPayload,
    source: ProviderId,
    fetched_at: DateTime<Utc>,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub total: usize,
    pub by_type: BTreeMap<DataType, usize>,
    pub by_source: BTreeMap<String, usize>,
}

#[derive(Default)]
pub struct ResultCache {
    entries: DashMap<(DataType, DataKey), CacheEntry>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh entry as a cached [`ProviderResult`], or `None`.
    pub fn get(&self, data_type: DataType, key: &str) -> Option<ProviderResult> {
        self.get_at(data_type, key, Instant::now())
    }

    pub fn get_at(&self, data_type: DataType, key: &str, now: Instant) -> Option<ProviderResult> {
        let map_key = (data_type, key.to_string());
        if let Some(entry) = self.entries.get(&map_key) {
            if entry.is_fresh(now) {
                return Some(ProviderResult {
                    source: entry.source.clone(),
                    cached: true,
                    fetched_at: entry.fetched_at,
                    outcome: Ok(entry.payload.clone()),
                });
            }
        }
        // The read guard is released above; removing while holding it would deadlock.
        if self
            .entries
            .remove_if(&map_key, |_, entry| !entry.is_fresh(now))
            .is_some()
        {
            debug!("Cache: expired {} entry for {} removed", data_type, key);
        }
        None
    }

    /// Store a success, replacing any previous entry. A zero TTL stores nothing.
    pub fn put(
        &self,
        data_type: DataType,
        key: &str,
        payload: DataPayload,
        source: ProviderId,
        fetched_at: DateTime<Utc>,
        ttl: Duration,
    ) {
        self.put_at(data_type, key, payload, source, fetched_at, ttl, Instant::now());
    }

    #[allow(clippy::too_many_arguments)]
    pub fn put_at(
        &self,
        data_type: DataType,
        key: &str,
        payload: DataPayload,
        source: ProviderId,
        fetched_at: DateTime<Utc>,
        ttl: Duration,
        now: Instant,
    ) {
        if ttl.is_zero() {
            return;
        }
        self.entries.insert(
            (data_type, key.to_string()),
            CacheEntry {
                payload,
                source,
                fetched_at,
                stored_at: now,
                ttl,
            },
        );
    }

    /// Remove entries matching the filters. `None` matches everything.
    ///
    /// Returns the number of entries removed.
    pub fn clear(&self, data_type: Option<DataType>, key: Option<&str>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(dt, k), _| {
            let type_matches = data_type.map_or(true, |d| d == *dt);
            let key_matches = key.map_or(true, |wanted| wanted == k);
            !(type_matches && key_matches)
        });
        let removed = before.saturating_sub(self.entries.len());
        debug!("Cache: cleared {} entries", removed);
        removed
    }

    pub fn stats(&self) -> CacheStats {
        self.stats_at(Instant::now())
    }

    pub fn stats_at(&self, now: Instant) -> CacheStats {
        let mut stats = CacheStats::default();
        for item in self.entries.iter() {
            let entry = item.value();
            if !entry.is_fresh(now) {
                continue;
            }
            stats.total += 1;
            *stats.by_type.entry(item.key().0).or_insert(0) += 1;
            *stats.by_source.entry(entry.source.to_string()).or_insert(0) += 1;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceData;
    use rust_decimal_macros::dec;
    use std::borrow::Cow;

    fn price(ticker: &str) -> DataPayload {
        DataPayload::Price(PriceData::new(ticker, dec!(10), "USD"))
    }

    fn put(
        cache: &ResultCache,
        dt: DataType,
        key: &str,
        source: &'static str,
        ttl: u64,
        now: Instant,
    ) {
        cache.put_at(
            dt,
            key,
            price(key),
            Cow::Borrowed(source),
            Utc::now(),
            Duration::from_secs(ttl),
            now,
        );
    }

    #[test]
    fn test_ttl_boundaries() {
        let cache = ResultCache::new();
        let t0 = Instant::now();
        put(&cache, DataType::Price, "AAPL", "yfinance", 300, t0);

        let hit = cache
            .get_at(DataType::Price, "AAPL", t0 + Duration::from_secs(200))
            .unwrap();
        assert!(hit.cached);
        assert_eq!(hit.source, "yfinance");

        assert!(cache
            .get_at(DataType::Price, "AAPL", t0 + Duration::from_secs(300))
            .is_none());
        // Expired entry was pruned on read
        assert_eq!(cache.entries.len(), 0);
    }

    #[test]
    fn test_types_are_separate_buckets() {
        let cache = ResultCache::new();
        let t0 = Instant::now();
        put(&cache, DataType::Price, "AAPL", "yfinance", 300, t0);
        assert!(cache.get_at(DataType::Eps, "AAPL", t0).is_none());
    }

    #[test]
    fn test_put_replaces_entry() {
        let cache = ResultCache::new();
        let t0 = Instant::now();
        put(&cache, DataType::Price, "AAPL", "yfinance", 300, t0);
        put(&cache, DataType::Price, "AAPL", "fmp", 300, t0 + Duration::from_secs(250));

        let hit = cache
            .get_at(DataType::Price, "AAPL", t0 + Duration::from_secs(400))
            .unwrap();
        assert_eq!(hit.source, "fmp");
    }

    #[test]
    fn test_zero_ttl_stores_nothing() {
        let cache = ResultCache::new();
        let t0 = Instant::now();
        put(&cache, DataType::Price, "AAPL", "yfinance", 0, t0);
        assert!(cache.get_at(DataType::Price, "AAPL", t0).is_none());
    }

    #[test]
    fn test_clear_filters() {
        let cache = ResultCache::new();
        let t0 = Instant::now();
        put(&cache, DataType::Price, "AAPL", "yfinance", 300, t0);
        put(&cache, DataType::Price, "MSFT", "yfinance", 300, t0);
        put(&cache, DataType::Eps, "AAPL", "sec_edgar", 300, t0);
        put(&cache, DataType::Dividend, "KO", "yfinance", 300, t0);

        assert_eq!(cache.clear(Some(DataType::Price), Some("AAPL")), 1);
        assert_eq!(cache.clear(None, Some("AAPL")), 1);
        assert_eq!(cache.clear(Some(DataType::Dividend), None), 1);
        assert_eq!(cache.clear(None, None), 1);
        assert_eq!(cache.clear(None, None), 0);
    }

    #[test]
    fn test_stats_skip_expired() {
        let cache = ResultCache::new();
        let t0 = Instant::now();
        put(&cache, DataType::Price, "AAPL", "yfinance", 300, t0);
        put(&cache, DataType::Price, "MSFT", "fmp", 10, t0);
        put(&cache, DataType::Eps, "AAPL", "sec_edgar", 300, t0);

        let stats = cache.stats_at(t0 + Duration::from_secs(60));
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_type.get(&DataType::Price), Some(&1));
        assert_eq!(stats.by_type.get(&DataType::Eps), Some(&1));
        assert_eq!(stats.by_source.get("yfinance"), Some(&1));
        assert_eq!(stats.by_source.get("fmp"), None);
    }
}
