//! FairValue Market Data Crate
//!
//! Resilient fetching of stock market data from several interchangeable
//! providers. One call to the [`DataOrchestrator`] returns a single answer
//! for a ticker, transparently routing around slow, failing or
//! rate-limited sources.
//!
//! # Overview
//!
//! - Data types: latest price, price history, yearly EPS, dividends, stock info
//! - Providers: Yahoo Finance, Financial Modeling Prep, or any [`DataProvider`]
//! - Per-provider circuit breaking, rate limiting and timeouts
//! - Configurable per-data-type provider order
//! - TTL result cache and batch fetching
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |   Orchestrator   |  fetch(data_type, key) -> ProviderResult
//! +------------------+
//!     |          |
//!     v          v
//! +-------+  +------------------+
//! | Cache |  |     Registry     |  ordering, breaker, limiter
//! +-------+  +------------------+
//!                    |
//!                    v
//!            +------------------+
//!            |    Providers     |  (Yahoo, FMP, etc.)
//!            +------------------+
//! ```
//!
//! # Core Types
//!
//! - [`DataType`] - The closed set of fetchable data types
//! - [`DataPayload`] - Type-specific payload returned by providers
//! - [`ProviderResult`] - Tagged outcome of one fetch
//! - [`FetchConfig`] - Ordering, timeouts, breaker and cache settings
//! - [`MarketDataError`] - Error type for every fallible operation
//!
//! # Type Aliases
//!
//! - [`ProviderId`] - Provider identifier (e.g., "yfinance", "fmp")
//! - [`DataKey`] - Normalized request key (e.g., "AAPL", "AAPL@1Y")

pub mod cache;
pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod provider;
pub mod registry;
pub mod secrets;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheStats, ResultCache};
pub use config::{ConfigSource, FetchConfig, FileConfigSource, StaticConfigSource};
pub use errors::{ErrorKind, MarketDataError, RetryClass};
pub use models::{
    DataKey, DataPayload, DataType, DividendData, EpsData, HistoryPeriod, PriceData,
    PriceHistoryData, ProviderId, ProviderResult, StockInfoData,
};
pub use orchestrator::{DataOrchestrator, FetchOptions};
pub use provider::{DataProvider, ProviderMetadata};
pub use registry::{FetchDiagnostics, ProviderStatus, SkipReason};
pub use secrets::{EnvSecretStore, FileSecretStore, SecretStore};
