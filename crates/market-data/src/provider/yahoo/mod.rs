//! Yahoo Finance market data provider.
//!
//! Uses the Yahoo Finance chart API (through `yahoo_finance_api`) for:
//! - Latest prices, with change against the previous close
//! - Daily close history over a [`HistoryPeriod`]
//! - Dividend payments
//! - Prices and histories for many symbols at once, as concurrent chart calls
//!
//! Stock info comes from the quoteSummary API, which needs a cookie/crumb
//! pair. No credentials are required.

mod models;

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use futures::stream::{self, StreamExt};
use num_traits::FromPrimitive;
use reqwest::header;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tracing::{debug, warn};
use urlencoding::encode;
use yahoo_finance_api as yahoo;

use crate::errors::MarketDataError;
use crate::models::{
    split_history_key, DailyClose, DataKey, DataPayload, DataType, DividendData,
    DividendPayment, HistoryPeriod, PriceData, PriceHistoryData, StockInfoData,
};
use crate::provider::{
    BatchProvider, DataProvider, DividendProvider, PriceHistoryProvider, PriceProvider,
    ProviderMetadata, StockInfoProvider,
};

use models::{raw, YahooQuoteSummaryResponse, YahooQuoteSummaryResult};

pub const PROVIDER_ID: &str = "yfinance";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const QUOTE_SUMMARY_URL: &str = "https://query1.finance.yahoo.com/v10/finance/quoteSummary";
const QUOTE_SUMMARY_MODULES: &str = "price,summaryProfile,summaryDetail";

/// Days of chart data requested for dividends. A bit over a year so the
/// trailing-twelve-month sum is complete.
const DIVIDEND_LOOKBACK_DAYS: i64 = 400;

/// Chart range for a latest-price lookup; enough to find the previous close.
const PRICE_RANGE: &str = "5d";

const PRICE_BATCH_SIZE: usize = 50;
const PRICE_BATCH_DELAY: Duration = Duration::from_secs(1);
const HISTORY_BATCH_SIZE: usize = 100;
const HISTORY_BATCH_DELAY: Duration = Duration::from_secs(2);

/// Chart requests in flight at once while serving one batch chunk.
const BATCH_CONCURRENCY: usize = 8;

// ============================================================================
// Crumb/Cookie Authentication
// ============================================================================

#[derive(Debug, Clone)]
struct CrumbData {
    cookie: String,
    crumb: String,
}

// ============================================================================
// Yahoo Provider
// ============================================================================

/// Yahoo Finance data provider.
pub struct YahooProvider {
    metadata: ProviderMetadata,
    connector: yahoo::YahooConnector,
    client: reqwest::Client,
    crumb: RwLock<Option<CrumbData>>,
}

/// One daily bar reduced to what the payloads use.
#[derive(Clone, Copy, Debug)]
struct Bar {
    timestamp: i64,
    close: f64,
    volume: u64,
}

impl From<&yahoo::Quote> for Bar {
    fn from(q: &yahoo::Quote) -> Self {
        Self {
            timestamp: q.timestamp as i64,
            close: q.close,
            volume: q.volume,
        }
    }
}

impl YahooProvider {
    pub fn new() -> Result<Self, MarketDataError> {
        let connector = yahoo::YahooConnector::new().map_err(|e| {
            MarketDataError::remote(
                PROVIDER_ID,
                format!("Failed to initialize Yahoo connector: {}", e),
            )
        })?;
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                MarketDataError::remote(PROVIDER_ID, format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            metadata: ProviderMetadata::new(PROVIDER_ID, "Yahoo Finance")
                .realtime(true)
                .min_interval(Duration::from_millis(200))
                .batch_for(DataType::Price, PRICE_BATCH_SIZE, PRICE_BATCH_DELAY)
                .batch_for(DataType::PriceHistory, HISTORY_BATCH_SIZE, HISTORY_BATCH_DELAY),
            connector,
            client,
            crumb: RwLock::new(None),
        })
    }

    // ========================================================================
    // Chart API
    // ========================================================================

    async fn fetch_bars(&self, symbol: &str, range: &str) -> Result<Vec<Bar>, MarketDataError> {
        let response = self
            .connector
            .get_quote_range(symbol, "1d", range)
            .await
            .map_err(|e| map_yahoo_error(symbol, e))?;
        let quotes = response.quotes().map_err(|e| map_yahoo_error(symbol, e))?;
        Ok(quotes.iter().map(Bar::from).collect())
    }

    async fn fetch_chart(
        &self,
        data_type: DataType,
        key: &str,
    ) -> Result<DataPayload, MarketDataError> {
        let request = ChartRequest::parse(data_type, key)?;
        let bars = self.fetch_bars(request.symbol(), request.range()).await?;
        request.payload(&bars)
    }

    // ========================================================================
    // Crumb/Cookie Authentication
    // ========================================================================

    fn read_crumb(&self) -> RwLockReadGuard<'_, Option<CrumbData>> {
        self.crumb.read().unwrap_or_else(|poisoned| {
            warn!("Yahoo crumb lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_crumb(&self) -> RwLockWriteGuard<'_, Option<CrumbData>> {
        self.crumb.write().unwrap_or_else(|poisoned| {
            warn!("Yahoo crumb lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    async fn ensure_crumb(&self) -> Result<CrumbData, MarketDataError> {
        if let Some(crumb) = self.read_crumb().as_ref() {
            return Ok(crumb.clone());
        }
        self.fetch_crumb().await
    }

    async fn fetch_crumb(&self) -> Result<CrumbData, MarketDataError> {
        // Step 1: cookie from fc.yahoo.com
        let response = self
            .client
            .get("https://fc.yahoo.com")
            .send()
            .await
            .map_err(|e| {
                MarketDataError::remote(PROVIDER_ID, format!("Failed to get cookie: {}", e))
            })?;

        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.split_once(';').map(|(v, _)| v.to_string()))
            .ok_or_else(|| MarketDataError::remote(PROVIDER_ID, "Failed to parse Yahoo cookie"))?;

        // Step 2: crumb for that cookie
        let crumb = self
            .client
            .get("https://query1.finance.yahoo.com/v1/test/getcrumb")
            .header(header::COOKIE, &cookie)
            .send()
            .await
            .map_err(|e| {
                MarketDataError::remote(PROVIDER_ID, format!("Failed to get crumb: {}", e))
            })?
            .text()
            .await
            .map_err(|e| {
                MarketDataError::remote(PROVIDER_ID, format!("Failed to read crumb: {}", e))
            })?;

        let crumb_data = CrumbData { cookie, crumb };
        *self.write_crumb() = Some(crumb_data.clone());
        Ok(crumb_data)
    }

    fn clear_crumb(&self) {
        *self.write_crumb() = None;
    }

    async fn fetch_quote_summary(
        &self,
        symbol: &str,
    ) -> Result<YahooQuoteSummaryResult, MarketDataError> {
        let crumb = self.ensure_crumb().await?;
        let url = format!(
            "{}/{}?modules={}&crumb={}",
            QUOTE_SUMMARY_URL,
            encode(symbol),
            QUOTE_SUMMARY_MODULES,
            encode(&crumb.crumb)
        );

        let response = self
            .client
            .get(&url)
            .header(header::COOKIE, &crumb.cookie)
            .send()
            .await
            .map_err(|e| {
                MarketDataError::remote(PROVIDER_ID, format!("quoteSummary request failed: {}", e))
            })?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            self.clear_crumb();
            return Err(MarketDataError::remote(
                PROVIDER_ID,
                "Yahoo authentication expired",
            ));
        }
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(MarketDataError::remote(
                PROVIDER_ID,
                format!("No data for {}", symbol),
            ));
        }

        let data: YahooQuoteSummaryResponse = response.json().await.map_err(|e| {
            MarketDataError::malformed(
                PROVIDER_ID,
                format!("Failed to parse quoteSummary response: {}", e),
            )
        })?;

        data.quote_summary
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| MarketDataError::remote(PROVIDER_ID, format!("No data for {}", symbol)))
    }
}

// ============================================================================
// Capability Implementations
// ============================================================================

impl DataProvider for YahooProvider {
    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    fn as_price(&self) -> Option<&dyn PriceProvider> {
        Some(self)
    }

    fn as_price_history(&self) -> Option<&dyn PriceHistoryProvider> {
        Some(self)
    }

    fn as_dividend(&self) -> Option<&dyn DividendProvider> {
        Some(self)
    }

    fn as_stock_info(&self) -> Option<&dyn StockInfoProvider> {
        Some(self)
    }

    fn as_batch(&self) -> Option<&dyn BatchProvider> {
        Some(self)
    }
}

#[async_trait]
impl PriceProvider for YahooProvider {
    async fn fetch_price(&self, ticker: &str) -> Result<PriceData, MarketDataError> {
        debug!("Fetching latest price for {} from Yahoo", ticker);
        let bars = self.fetch_bars(ticker, PRICE_RANGE).await?;
        price_from_bars(ticker, &bars)
    }
}

#[async_trait]
impl PriceHistoryProvider for YahooProvider {
    async fn fetch_price_history(
        &self,
        ticker: &str,
        period: HistoryPeriod,
    ) -> Result<PriceHistoryData, MarketDataError> {
        debug!("Fetching {} history for {} from Yahoo", period, ticker);
        let bars = self.fetch_bars(ticker, period.as_str()).await?;
        history_from_bars(ticker, period, &bars)
    }
}

#[async_trait]
impl DividendProvider for YahooProvider {
    async fn fetch_dividends(&self, ticker: &str) -> Result<DividendData, MarketDataError> {
        debug!("Fetching dividends for {} from Yahoo", ticker);
        let end = OffsetDateTime::now_utc();
        let start = end - time::Duration::days(DIVIDEND_LOOKBACK_DAYS);

        let response = self
            .connector
            .get_quote_history(ticker, start, end)
            .await
            .map_err(|e| map_yahoo_error(ticker, e))?;

        // A stock that pays nothing has no dividend events; that is a valid answer
        let events: Vec<(i64, f64)> = match response.dividends() {
            Ok(dividends) => dividends
                .iter()
                .map(|d| (d.date as i64, d.amount))
                .collect(),
            Err(yahoo::YahooError::NoQuotes) | Err(yahoo::YahooError::NoResult) => Vec::new(),
            Err(e) => return Err(map_yahoo_error(ticker, e)),
        };

        Ok(dividends_from_events(ticker, &events, Utc::now().date_naive()))
    }
}

#[async_trait]
impl StockInfoProvider for YahooProvider {
    async fn fetch_stock_info(&self, ticker: &str) -> Result<StockInfoData, MarketDataError> {
        debug!("Fetching stock info for {} from Yahoo", ticker);
        let result = self.fetch_quote_summary(ticker).await?;
        Ok(map_quote_summary(ticker, &result))
    }
}

#[async_trait]
impl BatchProvider for YahooProvider {
    fn batch_data_types(&self) -> &'static [DataType] {
        &[DataType::Price, DataType::PriceHistory]
    }

    async fn fetch_batch(
        &self,
        data_type: DataType,
        keys: &[DataKey],
    ) -> Result<HashMap<DataKey, Result<DataPayload, MarketDataError>>, MarketDataError> {
        if !self.batch_data_types().contains(&data_type) {
            return Err(MarketDataError::InvalidRequest {
                message: format!("Yahoo batches only prices and histories, got {}", data_type),
            });
        }

        let results: HashMap<DataKey, Result<DataPayload, MarketDataError>> = stream::iter(keys.iter().cloned())
            .map(|key: DataKey| {
                async move {
                    let result = self.fetch_chart(data_type, &key).await;
                    (key, result)
                }
            })
            .buffer_unordered(BATCH_CONCURRENCY)
            .collect()
            .await;

        debug!(
            "Yahoo {} batch resolved {} of {} symbols",
            data_type,
            results.values().filter(|r| r.is_ok()).count(),
            keys.len()
        );
        Ok(results)
    }
}

/// One batch key turned into a chart call.
#[derive(Clone, Debug, PartialEq, Eq)]
enum ChartRequest {
    Price(String),
    History(String, HistoryPeriod),
}

impl ChartRequest {
    fn parse(data_type: DataType, key: &str) -> Result<Self, MarketDataError> {
        match data_type {
            DataType::Price => Ok(Self::Price(key.to_string())),
            DataType::PriceHistory => {
                let (ticker, period) = split_history_key(key, HistoryPeriod::default())?;
                Ok(Self::History(ticker, period))
            }
            other => Err(MarketDataError::InvalidRequest {
                message: format!("No chart request for {}", other),
            }),
        }
    }

    fn symbol(&self) -> &str {
        match self {
            Self::Price(symbol) | Self::History(symbol, _) => symbol,
        }
    }

    fn range(&self) -> &'static str {
        match self {
            Self::Price(_) => PRICE_RANGE,
            Self::History(_, period) => period.as_str(),
        }
    }

    fn payload(&self, bars: &[Bar]) -> Result<DataPayload, MarketDataError> {
        match self {
            Self::Price(symbol) => price_from_bars(symbol, bars).map(DataPayload::Price),
            Self::History(symbol, period) => {
                history_from_bars(symbol, *period, bars).map(DataPayload::PriceHistory)
            }
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn map_yahoo_error(symbol: &str, e: yahoo::YahooError) -> MarketDataError {
    if matches!(e, yahoo::YahooError::NoQuotes | yahoo::YahooError::NoResult) {
        MarketDataError::remote(PROVIDER_ID, format!("No data for {}", symbol))
    } else {
        MarketDataError::remote(PROVIDER_ID, e.to_string())
    }
}

fn to_decimal(value: f64, dp: u32) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value).map(|d| d.round_dp(dp))
}

fn bar_date(timestamp: i64) -> Option<NaiveDate> {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .map(|dt| dt.date_naive())
}

/// Latest bar as a price, with change against the bar before it.
fn price_from_bars(ticker: &str, bars: &[Bar]) -> Result<PriceData, MarketDataError> {
    let usable: Vec<&Bar> = bars.iter().filter(|b| b.close.is_finite()).collect();
    let last = usable
        .last()
        .ok_or_else(|| MarketDataError::remote(PROVIDER_ID, format!("No data for {}", ticker)))?;
    let price = to_decimal(last.close, 4).ok_or_else(|| {
        MarketDataError::malformed(PROVIDER_ID, format!("Unusable close {}", last.close))
    })?;

    let mut data = PriceData::new(ticker, price, "USD");
    data.volume = Some(last.volume);
    data.timestamp = Utc
        .timestamp_opt(last.timestamp, 0)
        .single()
        .unwrap_or_else(Utc::now);

    if let Some(prev) = usable
        .len()
        .checked_sub(2)
        .and_then(|i| usable.get(i))
        .and_then(|b| to_decimal(b.close, 4))
        .filter(|p| !p.is_zero())
    {
        let change = price - prev;
        data.change = Some(change);
        data.change_percent = Some((change / prev * Decimal::ONE_HUNDRED).round_dp(2));
    }
    Ok(data)
}

/// One close per calendar day; a later bar for the same day wins.
fn history_from_bars(
    ticker: &str,
    period: HistoryPeriod,
    bars: &[Bar],
) -> Result<PriceHistoryData, MarketDataError> {
    let by_day: BTreeMap<NaiveDate, Decimal> = bars
        .iter()
        .filter_map(|b| Some((bar_date(b.timestamp)?, to_decimal(b.close, 4)?)))
        .collect();
    let closes = by_day
        .into_iter()
        .map(|(date, close)| DailyClose { date, close })
        .collect();

    PriceHistoryData::from_closes(ticker, period, closes).ok_or_else(|| {
        MarketDataError::remote(PROVIDER_ID, format!("No history for {}", ticker))
    })
}

fn dividends_from_events(ticker: &str, events: &[(i64, f64)], as_of: NaiveDate) -> DividendData {
    let payments = events
        .iter()
        .filter_map(|&(ts, amount)| {
            Some(DividendPayment {
                date: bar_date(ts)?,
                amount: to_decimal(amount, 6)?,
            })
        })
        .collect();
    DividendData::from_payments(ticker, payments, as_of)
}

fn map_quote_summary(ticker: &str, result: &YahooQuoteSummaryResult) -> StockInfoData {
    let price = result.price.as_ref();
    let profile = result.summary_profile.as_ref();
    let detail = result.summary_detail.as_ref();

    let company_name = price
        .and_then(|p| p.long_name.as_deref().or(p.short_name.as_deref()))
        .map(|n| n.replace("&amp;", "&"))
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| ticker.to_string());

    let market_cap = detail
        .and_then(|d| raw(&d.market_cap))
        .or_else(|| price.and_then(|p| raw(&p.market_cap)))
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u64);

    StockInfoData {
        ticker: ticker.to_string(),
        company_name,
        fifty_two_week_high: detail
            .and_then(|d| raw(&d.fifty_two_week_high))
            .and_then(|v| to_decimal(v, 4)),
        fifty_two_week_low: detail
            .and_then(|d| raw(&d.fifty_two_week_low))
            .and_then(|v| to_decimal(v, 4)),
        market_cap,
        sector: profile.and_then(|p| p.sector.as_deref()).map(format_sector),
        industry: profile.and_then(|p| p.industry.clone()),
        pe_ratio: detail
            .and_then(|d| raw(&d.trailing_pe).or(raw(&d.forward_pe)))
            .and_then(|v| to_decimal(v, 2)),
        // Yahoo reports a fraction; payloads carry percent
        dividend_yield: detail
            .and_then(|d| raw(&d.dividend_yield))
            .and_then(|v| to_decimal(v * 100.0, 2)),
    }
}

/// Convert snake_case sector to Title Case.
fn format_sector(sector: &str) -> String {
    sector
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().chain(chars).collect(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Tests
// ============================================================================
