//! Market data models
//!
//! - `types` - Identifier aliases and key normalization
//! - `data_type` - The closed set of fetchable data types
//! - `period` - Price history periods and `TICKER@period` keys
//! - `payload` - Type-specific payloads (PriceData, EpsData, ...)
//! - `result` - ProviderResult, the tagged outcome of a fetch

mod data_type;
mod payload;
mod period;
mod result;
mod types;

pub use data_type::DataType;
pub use payload::{
    DailyClose, DataPayload, DividendData, DividendPayment, EpsData, EpsEntry, PriceData,
    PriceHistoryData, StockInfoData,
};
pub use period::{history_key, split_history_key, HistoryPeriod};
pub use result::{ProviderResult, ORCHESTRATOR_SOURCE};
pub use types::{normalize_key, DataKey, ProviderId};
