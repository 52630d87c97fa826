use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::data_type::DataType;
use super::period::HistoryPeriod;

/// Latest price for a ticker
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceData {
    pub ticker: String,

    /// Last traded or closing price (required, must be positive)
    pub price: Decimal,

    pub currency: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u64>,

    pub timestamp: DateTime<Utc>,
}

impl PriceData {
    /// Create a price with minimal required fields
    pub fn new(ticker: impl Into<String>, price: Decimal, currency: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            price,
            currency: currency.into(),
            change: None,
            change_percent: None,
            volume: None,
            timestamp: Utc::now(),
        }
    }
}

/// One daily close in a price history
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailyClose {
    pub date: NaiveDate,
    pub close: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryData {
    pub ticker: String,
    pub period: HistoryPeriod,

    /// Daily closes, oldest first
    pub closes: Vec<DailyClose>,

    pub current_price: Decimal,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_1m_ago: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_3m_ago: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_1m_pct: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_3m_pct: Option<Decimal>,
}

impl PriceHistoryData {
    /// Build a history from daily closes, deriving the 1m/3m reference points.
    ///
    /// Returns `None` when `closes` is empty.
    pub fn from_closes(
        ticker: impl Into<String>,
        period: HistoryPeriod,
        mut closes: Vec<DailyClose>,
    ) -> Option<Self> {
        closes.sort_by_key(|c| c.date);
        let last = closes.last()?;
        let current_price = last.close;
        let last_date = last.date;

        let price_1m_ago = close_on_or_before(&closes, last_date - Duration::days(30));
        let price_3m_ago = close_on_or_before(&closes, last_date - Duration::days(91));

        Some(Self {
            ticker: ticker.into(),
            period,
            current_price,
            change_1m_pct: price_1m_ago.and_then(|p| pct_change(p, current_price)),
            change_3m_pct: price_3m_ago.and_then(|p| pct_change(p, current_price)),
            price_1m_ago,
            price_3m_ago,
            closes,
        })
    }
}

fn close_on_or_before(closes: &[DailyClose], date: NaiveDate) -> Option<Decimal> {
    closes
        .iter()
        .rev()
        .find(|c| c.date <= date)
        .map(|c| c.close)
}

fn pct_change(from: Decimal, to: Decimal) -> Option<Decimal> {
    if from.is_zero() {
        return None;
    }
    Some(((to - from) / from * Decimal::ONE_HUNDRED).round_dp(2))
}

/// EPS for one fiscal year
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpsEntry {
    pub year: i32,
    pub eps: Decimal,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub filed: Option<NaiveDate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_end: Option<NaiveDate>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpsData {
    pub ticker: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,

    /// Yearly entries, most recent first
    pub entries: Vec<EpsEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DividendPayment {
    pub date: NaiveDate,
    pub amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DividendData {
    pub ticker: String,

    /// Sum of payments in the trailing twelve months
    pub annual_dividend: Decimal,

    /// Payments, oldest first
    pub payments: Vec<DividendPayment>,
}

impl DividendData {
    /// Build from a payment list, summing the year before `as_of`.
    pub fn from_payments(
        ticker: impl Into<String>,
        mut payments: Vec<DividendPayment>,
        as_of: NaiveDate,
    ) -> Self {
        payments.sort_by_key(|p| p.date);
        let cutoff = as_of - Duration::days(365);
        let annual_dividend = payments
            .iter()
            .filter(|p| p.date > cutoff && p.date <= as_of)
            .map(|p| p.amount)
            .sum();
        Self {
            ticker: ticker.into(),
            annual_dividend,
            payments,
        }
    }
}

/// Company metadata and snapshot ratios
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StockInfoData {
    pub ticker: String,
    pub company_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fifty_two_week_high: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fifty_two_week_low: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pe_ratio: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dividend_yield: Option<Decimal>,
}

/// Type-specific payload of a successful fetch
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataPayload {
    Price(PriceData),
    PriceHistory(PriceHistoryData),
    Eps(EpsData),
    Dividend(DividendData),
    StockInfo(StockInfoData),
}

impl DataPayload {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Price(_) => DataType::Price,
            Self::PriceHistory(_) => DataType::PriceHistory,
            Self::Eps(_) => DataType::Eps,
            Self::Dividend(_) => DataType::Dividend,
            Self::StockInfo(_) => DataType::StockInfo,
        }
    }

    pub fn ticker(&self) -> &str {
        match self {
            Self::Price(d) => &d.ticker,
            Self::PriceHistory(d) => &d.ticker,
            Self::Eps(d) => &d.ticker,
            Self::Dividend(d) => &d.ticker,
            Self::StockInfo(d) => &d.ticker,
        }
    }

    pub fn as_price(&self) -> Option<&PriceData> {
        match self {
            Self::Price(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_price_history(&self) -> Option<&PriceHistoryData> {
        match self {
            Self::PriceHistory(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_eps(&self) -> Option<&EpsData> {
        match self {
            Self::Eps(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_dividend(&self) -> Option<&DividendData> {
        match self {
            Self::Dividend(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_stock_info(&self) -> Option<&StockInfoData> {
        match self {
            Self::StockInfo(d) => Some(d),
            _ => None,
        }
    }
}
