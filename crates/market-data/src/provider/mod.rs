//! Data provider abstractions and implementations.
//!
//! This module contains:
//! - The base `DataProvider` trait and the narrow capability traits
//! - Static provider metadata
//! - Concrete providers (Yahoo Finance, Financial Modeling Prep)
//!
//! Providers never touch the cache, the breakers or the registry. They turn a
//! key into a typed payload or a classified [`MarketDataError`](crate::errors::MarketDataError).

mod capabilities;
mod traits;

pub mod fmp;
pub mod yahoo;

use std::sync::Arc;

use crate::errors::MarketDataError;
use crate::secrets::SecretStore;

pub use capabilities::{BatchPlan, ProviderMetadata};
pub use fmp::FmpProvider;
pub use traits::{
    BatchProvider, DataProvider, DividendProvider, EpsProvider, PriceHistoryProvider,
    PriceProvider, StockInfoProvider,
};
pub use yahoo::YahooProvider;

/// The providers that ship with this crate, in default registration order.
pub fn bundled_providers(
    secrets: &dyn SecretStore,
) -> Result<Vec<Arc<dyn DataProvider>>, MarketDataError> {
    let yahoo: Arc<dyn DataProvider> = Arc::new(YahooProvider::new()?);
    let fmp: Arc<dyn DataProvider> = Arc::new(FmpProvider::from_secrets(secrets));
    Ok(vec![yahoo, fmp])
}
