//! Price history periods and `TICKER@period` keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::MarketDataError;

/// Lookback window for a price history request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum HistoryPeriod {
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
    #[serde(rename = "6mo")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
    #[serde(rename = "5y")]
    FiveYears,
}

impl HistoryPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMonth => "1mo",
            Self::ThreeMonths => "3mo",
            Self::SixMonths => "6mo",
            Self::OneYear => "1y",
            Self::TwoYears => "2y",
            Self::FiveYears => "5y",
        }
    }

    /// Approximate length in calendar days.
    pub fn days(&self) -> i64 {
        match self {
            Self::OneMonth => 31,
            Self::ThreeMonths => 92,
            Self::SixMonths => 183,
            Self::OneYear => 366,
            Self::TwoYears => 731,
            Self::FiveYears => 1827,
        }
    }
}

impl Default for HistoryPeriod {
    fn default() -> Self {
        Self::ThreeMonths
    }
}

impl fmt::Display for HistoryPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryPeriod {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1mo" => Ok(Self::OneMonth),
            "3mo" => Ok(Self::ThreeMonths),
            "6mo" => Ok(Self::SixMonths),
            "1y" => Ok(Self::OneYear),
            "2y" => Ok(Self::TwoYears),
            "5y" => Ok(Self::FiveYears),
            other => Err(MarketDataError::InvalidRequest {
                message: format!("Unknown history period: {}", other),
            }),
        }
    }
}

/// Split a normalized history key into ticker and period.
///
/// `AAPL@1Y` yields `("AAPL", OneYear)`; a bare ticker uses `default_period`.
pub fn split_history_key(
    key: &str,
    default_period: HistoryPeriod,
) -> Result<(String, HistoryPeriod), MarketDataError> {
    match key.split_once('@') {
        Some((ticker, period)) if !ticker.is_empty() => Ok((ticker.to_string(), period.parse()?)),
        Some(_) => Err(MarketDataError::InvalidRequest {
            message: format!("Missing ticker in key: {}", key),
        }),
        None => Ok((key.to_string(), default_period)),
    }
}

/// Canonical cache key for a ticker/period pair.
pub fn history_key(ticker: &str, period: HistoryPeriod) -> String {
    format!("{}@{}", ticker, period.as_str().to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_history_key() {
        let (ticker, period) = split_history_key("AAPL@1Y", HistoryPeriod::ThreeMonths).unwrap();
        assert_eq!(ticker, "AAPL");
        assert_eq!(period, HistoryPeriod::OneYear);

        let (ticker, period) = split_history_key("MSFT", HistoryPeriod::SixMonths).unwrap();
        assert_eq!(ticker, "MSFT");
        assert_eq!(period, HistoryPeriod::SixMonths);

        assert!(split_history_key("@1Y", HistoryPeriod::OneYear).is_err());
        assert!(split_history_key("AAPL@10Y", HistoryPeriod::OneYear).is_err());
    }

    #[test]
    fn test_history_key_round_trips_through_split() {
        let key = history_key("KO", HistoryPeriod::FiveYears);
        assert_eq!(key, "KO@5Y");
        let (ticker, period) = split_history_key(&key, HistoryPeriod::OneMonth).unwrap();
        assert_eq!((ticker.as_str(), period), ("KO", HistoryPeriod::FiveYears));
    }
}
