//! Static provider metadata.
//!
//! Identity, realtime-ness, batching and the provider's own pacing needs.
//! Built once per provider and never changed afterwards.

use std::time::Duration;

use crate::models::DataType;

/// Describes a data provider to the registry.
///
/// The registry uses `realtime` and `supports_batch` for ordering, and the
/// pacing fields as defaults when configuration has no override.
#[derive(Clone, Debug)]
pub struct ProviderMetadata {
    /// Unique identifier, e.g. "yfinance". Used in configuration,
    /// cache attribution and breaker tracking.
    pub id: &'static str,

    /// Human-readable name for status output.
    pub display_name: &'static str,

    /// Quotes reflect the live market rather than a delayed snapshot.
    pub realtime: bool,

    /// The provider exposes a batch capability.
    pub supports_batch: bool,

    /// The provider is a primary source (e.g. regulatory filings) whose data
    /// should be trusted over derived sources.
    pub authoritative: bool,

    /// Minimum spacing the provider asks for between requests.
    pub min_interval: Duration,

    /// Largest chunk one batch call may carry.
    pub batch_size: usize,

    /// Pause between consecutive batch chunks.
    pub batch_delay: Duration,

    /// Chunking that differs from the defaults above for one data type.
    pub batch_plans: Vec<BatchPlan>,
}

/// Chunk size and inter-chunk pause for one batched data type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchPlan {
    pub data_type: DataType,
    pub size: usize,
    pub delay: Duration,
}

impl ProviderMetadata {
    pub const DEFAULT_BATCH_SIZE: usize = 50;

    pub fn new(id: &'static str, display_name: &'static str) -> Self {
        Self {
            id,
            display_name,
            realtime: false,
            supports_batch: false,
            authoritative: false,
            min_interval: Duration::ZERO,
            batch_size: Self::DEFAULT_BATCH_SIZE,
            batch_delay: Duration::ZERO,
            batch_plans: Vec::new(),
        }
    }

    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn authoritative(mut self, authoritative: bool) -> Self {
        self.authoritative = authoritative;
        self
    }

    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Mark the provider as batch-capable with the given chunking.
    pub fn batch(mut self, batch_size: usize, batch_delay: Duration) -> Self {
        self.supports_batch = true;
        self.batch_size = batch_size.max(1);
        self.batch_delay = batch_delay;
        self
    }

    /// Mark the provider as batch-capable and chunk `data_type` its own way.
    pub fn batch_for(mut self, data_type: DataType, size: usize, delay: Duration) -> Self {
        self.supports_batch = true;
        self.batch_plans.retain(|plan| plan.data_type != data_type);
        self.batch_plans.push(BatchPlan {
            data_type,
            size: size.max(1),
            delay,
        });
        self
    }

    /// Chunk size and delay for `data_type`, falling back to the defaults.
    pub fn batch_plan(&self, data_type: DataType) -> (usize, Duration) {
        self.batch_plans
            .iter()
            .find(|plan| plan.data_type == data_type)
            .map(|plan| (plan.size, plan.delay))
            .unwrap_or((self.batch_size.max(1), self.batch_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let meta = ProviderMetadata::new("sec_edgar", "SEC EDGAR");
        assert!(!meta.realtime);
        assert!(!meta.supports_batch);
        assert_eq!(meta.min_interval, Duration::ZERO);
        assert_eq!(meta.batch_size, ProviderMetadata::DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_batch_size_is_at_least_one() {
        let meta = ProviderMetadata::new("fmp", "FMP").batch(0, Duration::from_millis(200));
        assert!(meta.supports_batch);
        assert_eq!(meta.batch_size, 1);
        assert_eq!(meta.batch_delay, Duration::from_millis(200));
    }

    #[test]
    fn test_batch_plan_per_data_type() {
        let meta = ProviderMetadata::new("yfinance", "Yahoo Finance")
            .batch_for(DataType::Price, 50, Duration::from_secs(1))
            .batch_for(DataType::PriceHistory, 100, Duration::from_secs(2))
            .batch_for(DataType::PriceHistory, 0, Duration::from_secs(3));

        assert!(meta.supports_batch);
        assert_eq!(meta.batch_plan(DataType::Price), (50, Duration::from_secs(1)));
        assert_eq!(meta.batch_plan(DataType::PriceHistory), (1, Duration::from_secs(3)));
        assert_eq!(
            meta.batch_plan(DataType::Dividend),
            (ProviderMetadata::DEFAULT_BATCH_SIZE, Duration::ZERO)
        );
    }
}
