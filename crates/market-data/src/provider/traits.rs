//! Data provider trait definitions.
//!
//! A provider implements the base [`DataProvider`] trait plus any subset of
//! the narrow capability traits. The registry discovers capabilities through
//! the `as_*` lookups, so a provider that lacks one is never asked for it.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::MarketDataError;
use crate::models::{
    split_history_key, DataKey, DataPayload, DataType, DividendData, EpsData, HistoryPeriod,
    PriceData, PriceHistoryData, StockInfoData,
};

use super::capabilities::ProviderMetadata;

/// Latest price lookup.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    async fn fetch_price(&self, ticker: &str) -> Result<PriceData, MarketDataError>;
}

/// Daily close series over a lookback period.
#[async_trait]
pub trait PriceHistoryProvider: Send + Sync {
    async fn fetch_price_history(
        &self,
        ticker: &str,
        period: HistoryPeriod,
    ) -> Result<PriceHistoryData, MarketDataError>;
}

/// Yearly earnings per share.
#[async_trait]
pub trait EpsProvider: Send + Sync {
    async fn fetch_eps(&self, ticker: &str) -> Result<EpsData, MarketDataError>;
}

/// Dividend payments and trailing annual dividend.
#[async_trait]
pub trait DividendProvider: Send + Sync {
    async fn fetch_dividends(&self, ticker: &str) -> Result<DividendData, MarketDataError>;
}

/// Company metadata and snapshot ratios.
#[async_trait]
pub trait StockInfoProvider: Send + Sync {
    async fn fetch_stock_info(&self, ticker: &str) -> Result<StockInfoData, MarketDataError>;
}

/// Multi-key fetch for one chunk of keys.
///
/// The orchestrator chunks requests by [`ProviderMetadata::batch_plan`] and
/// paces the chunks; implementations issue one upstream call per chunk.
/// A whole-chunk failure is an `Err`; per-key failures go in the map.
/// Keys missing from the returned map are treated as failed.
#[async_trait]
pub trait BatchProvider: Send + Sync {
    /// Data types this provider can serve in batches.
    fn batch_data_types(&self) -> &'static [DataType];

    async fn fetch_batch(
        &self,
        data_type: DataType,
        keys: &[DataKey],
    ) -> Result<HashMap<DataKey, Result<DataPayload, MarketDataError>>, MarketDataError>;
}

/// Base trait for all data providers.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use fairvalue_market_data::provider::{DataProvider, PriceProvider, ProviderMetadata};
///
/// struct MyProvider {
///     metadata: ProviderMetadata,
/// }
///
/// impl DataProvider for MyProvider {
///     fn metadata(&self) -> &ProviderMetadata {
///         &self.metadata
///     }
///
///     fn as_price(&self) -> Option<&dyn PriceProvider> {
///         Some(self)
///     }
/// }
///
/// #[async_trait]
/// impl PriceProvider for MyProvider {
///     // ...
/// }
/// ```
#[async_trait]
pub trait DataProvider: Send + Sync {
    fn metadata(&self) -> &ProviderMetadata;

    fn id(&self) -> &'static str {
        self.metadata().id
    }

    /// Whether the provider can serve requests at all (credentials present,
    /// local gateway reachable). Unavailable providers are never attempted.
    fn is_available(&self) -> bool {
        true
    }

    fn as_price(&self) -> Option<&dyn PriceProvider> {
        None
    }

    fn as_price_history(&self) -> Option<&dyn PriceHistoryProvider> {
        None
    }

    fn as_eps(&self) -> Option<&dyn EpsProvider> {
        None
    }

    fn as_dividend(&self) -> Option<&dyn DividendProvider> {
        None
    }

    fn as_stock_info(&self) -> Option<&dyn StockInfoProvider> {
        None
    }

    fn as_batch(&self) -> Option<&dyn BatchProvider> {
        None
    }

    fn supports(&self, data_type: DataType) -> bool {
        match data_type {
            DataType::Price => self.as_price().is_some(),
            DataType::PriceHistory => self.as_price_history().is_some(),
            DataType::Eps => self.as_eps().is_some(),
            DataType::Dividend => self.as_dividend().is_some(),
            DataType::StockInfo => self.as_stock_info().is_some(),
        }
    }

    /// Batch-capable for this particular data type.
    fn supports_batch_for(&self, data_type: DataType) -> bool {
        self.metadata().supports_batch
            && self
                .as_batch()
                .is_some_and(|b| b.batch_data_types().contains(&data_type))
    }

    fn supported_data_types(&self) -> Vec<DataType> {
        DataType::ALL
            .into_iter()
            .filter(|dt| self.supports(*dt))
            .collect()
    }

    /// Fetch one key through the matching capability.
    ///
    /// `PriceHistory` keys may carry a period suffix (`AAPL@1Y`); bare tickers
    /// use `default_period`.
    async fn fetch_one(
        &self,
        data_type: DataType,
        key: &str,
        default_period: HistoryPeriod,
    ) -> Result<DataPayload, MarketDataError> {
        let missing = || MarketDataError::InvalidRequest {
            message: format!("{} does not provide {}", self.id(), data_type),
        };
        match data_type {
            DataType::Price => {
                let p = self.as_price().ok_or_else(missing)?;
                p.fetch_price(key).await.map(DataPayload::Price)
            }
            DataType::PriceHistory => {
                let p = self.as_price_history().ok_or_else(missing)?;
                let (ticker, period) = split_history_key(key, default_period)?;
                p.fetch_price_history(&ticker, period)
                    .await
                    .map(DataPayload::PriceHistory)
            }
            DataType::Eps => {
                let p = self.as_eps().ok_or_else(missing)?;
                p.fetch_eps(key).await.map(DataPayload::Eps)
            }
            DataType::Dividend => {
                let p = self.as_dividend().ok_or_else(missing)?;
                p.fetch_dividends(key).await.map(DataPayload::Dividend)
            }
            DataType::StockInfo => {
                let p = self.as_stock_info().ok_or_else(missing)?;
                p.fetch_stock_info(key).await.map(DataPayload::StockInfo)
            }
        }
    }
}
