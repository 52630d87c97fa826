use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::MarketDataError;

/// Kinds of market data a provider can supply.
///
/// Drives which providers are eligible for a request and which
/// cache bucket and TTL apply to the result.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Price,
    PriceHistory,
    Eps,
    Dividend,
    StockInfo,
}

impl DataType {
    /// All data types, in declaration order.
    pub const ALL: [DataType; 5] = [
        DataType::Price,
        DataType::PriceHistory,
        DataType::Eps,
        DataType::Dividend,
        DataType::StockInfo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::PriceHistory => "price_history",
            Self::Eps => "eps",
            Self::Dividend => "dividend",
            Self::StockInfo => "stock_info",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        DataType::ALL
            .iter()
            .copied()
            .find(|dt| dt.as_str() == normalized)
            .ok_or_else(|| MarketDataError::InvalidRequest {
                message: format!("Unknown data type: {}", s),
            })
    }
}
