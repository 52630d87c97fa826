//! Financial Modeling Prep (FMP) data provider.
//!
//! Endpoints used (stable API):
//! - `/quote` for prices, one symbol or a comma-separated batch
//! - `/income-statement` for yearly EPS
//! - `/profile` for stock info
//!
//! Requires `FMP_API_KEY`. Without it the provider reports itself
//! unavailable and is never called.
//! API documentation: https://site.financialmodelingprep.com/developer/docs

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use num_traits::FromPrimitive;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::MarketDataError;
use crate::models::{DataKey, DataPayload, DataType, EpsData, EpsEntry, PriceData, StockInfoData};
use crate::provider::{
    BatchProvider, DataProvider, EpsProvider, PriceProvider, ProviderMetadata, StockInfoProvider,
};
use crate::secrets::SecretStore;

const BASE_URL: &str = "https://financialmodelingprep.com/stable";
pub const PROVIDER_ID: &str = "fmp";
pub const API_KEY_SECRET: &str = "FMP_API_KEY";

/// Max tickers per batch quote request
const BATCH_SIZE: usize = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const EPS_YEARS: &str = "10";

// ============================================================================
// API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FmpQuote {
    symbol: String,
    price: Option<f64>,
    change: Option<f64>,
    #[serde(alias = "changesPercentage")]
    change_percentage: Option<f64>,
    volume: Option<f64>,
    timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FmpIncomeStatement {
    date: Option<NaiveDate>,
    #[serde(alias = "calendarYear")]
    fiscal_year: Option<String>,
    eps: Option<f64>,
    eps_diluted: Option<f64>,
    filing_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FmpProfile {
    company_name: Option<String>,
    market_cap: Option<f64>,
    sector: Option<String>,
    industry: Option<String>,
    /// 52 week range, `"124.17-199.62"`
    range: Option<String>,
}

/// `{"Error Message": "..."}`, returned with HTTP 200 for bad requests.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(rename = "Error Message")]
    error_message: String,
}

// ============================================================================
// FmpProvider
// ============================================================================

pub struct FmpProvider {
    metadata: ProviderMetadata,
    client: Client,
    api_key: Option<String>,
}

impl FmpProvider {
    pub fn new(api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            metadata: ProviderMetadata::new(PROVIDER_ID, "Financial Modeling Prep")
                .min_interval(Duration::from_millis(100))
                .batch(BATCH_SIZE, Duration::from_millis(100)),
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    /// Read the API key from `secrets`. A lookup failure leaves the
    /// provider unavailable.
    pub fn from_secrets(secrets: &dyn SecretStore) -> Self {
        let api_key = match secrets.get_secret(API_KEY_SECRET) {
            Ok(key) => key,
            Err(e) => {
                warn!("Could not read {}: {}", API_KEY_SECRET, e);
                None
            }
        };
        if api_key.is_none() {
            debug!("{} not set, FMP provider disabled", API_KEY_SECRET);
        }
        Self::new(api_key)
    }

    /// GET `endpoint` for `symbol` and decode the JSON body.
    async fn fetch<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        symbol: &str,
        params: &[(&str, &str)],
    ) -> Result<T, MarketDataError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| MarketDataError::unavailable(PROVIDER_ID, "FMP_API_KEY not set"))?;

        let url = format!("{}/{}", BASE_URL, endpoint);
        debug!("FMP request: /{} for {}", endpoint, symbol);

        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol), ("apikey", api_key)])
            .query(params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MarketDataError::Timeout {
                        provider: PROVIDER_ID.to_string(),
                        after: REQUEST_TIMEOUT,
                    }
                } else {
                    MarketDataError::remote(PROVIDER_ID, format!("Request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            MarketDataError::remote(PROVIDER_ID, format!("Failed to read response: {}", e))
        })?;
        decode_response(endpoint, status, &body)
    }

    async fn fetch_quotes(&self, symbols: &str) -> Result<Vec<FmpQuote>, MarketDataError> {
        self.fetch("quote", symbols, &[]).await
    }
}

fn decode_response<T: DeserializeOwned>(
    endpoint: &str,
    status: StatusCode,
    body: &str,
) -> Result<T, MarketDataError> {
    match status {
        StatusCode::UNAUTHORIZED => {
            return Err(MarketDataError::unavailable(
                PROVIDER_ID,
                "Invalid or missing API key",
            ))
        }
        StatusCode::FORBIDDEN => {
            return Err(MarketDataError::remote(
                PROVIDER_ID,
                format!("Subscription does not include /{}", endpoint),
            ))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            return Err(MarketDataError::remote(PROVIDER_ID, "FMP rate limit exceeded"))
        }
        s if !s.is_success() => {
            return Err(MarketDataError::remote(
                PROVIDER_ID,
                format!("FMP API error: {}", s.as_u16()),
            ))
        }
        _ => {}
    }

    if let Ok(error) = serde_json::from_str::<ErrorResponse>(body) {
        return Err(MarketDataError::remote(PROVIDER_ID, error.error_message));
    }

    serde_json::from_str(body).map_err(|e| {
        MarketDataError::malformed(PROVIDER_ID, format!("Failed to parse /{}: {}", endpoint, e))
    })
}

fn to_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value).map(|d| d.round_dp(4))
}

fn quote_to_price(quote: &FmpQuote) -> Result<PriceData, MarketDataError> {
    let symbol = quote.symbol.to_uppercase();
    let price = quote
        .price
        .and_then(to_decimal)
        .ok_or_else(|| {
            MarketDataError::malformed(PROVIDER_ID, format!("No price for {}", symbol))
        })?;

    let mut data = PriceData::new(symbol, price, "USD");
    data.change = quote.change.and_then(to_decimal);
    data.change_percent = quote
        .change_percentage
        .and_then(to_decimal)
        .map(|d| d.round_dp(2));
    data.volume = quote
        .volume
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u64);
    if let Some(ts) = quote.timestamp.and_then(|t| Utc.timestamp_opt(t, 0).single()) {
        data.timestamp = ts;
    }
    Ok(data)
}

/// Match each requested key against the batch response.
fn batch_prices(
    keys: &[DataKey],
    quotes: &[FmpQuote],
) -> HashMap<DataKey, Result<DataPayload, MarketDataError>> {
    let by_symbol: HashMap<String, &FmpQuote> = quotes
        .iter()
        .map(|q| (q.symbol.to_uppercase(), q))
        .collect();

    keys.iter()
        .map(|key| {
            let outcome = match by_symbol.get(&key.to_uppercase()) {
                Some(quote) => quote_to_price(quote).map(DataPayload::Price),
                None => Err(MarketDataError::remote(
                    PROVIDER_ID,
                    format!("{} not in batch response", key),
                )),
            };
            (key.clone(), outcome)
        })
        .collect()
}

fn eps_from_statements(ticker: &str, statements: &[FmpIncomeStatement]) -> EpsData {
    let mut entries: Vec<EpsEntry> = statements
        .iter()
        .filter_map(|s| {
            let year = s
                .fiscal_year
                .as_deref()
                .and_then(|y| y.trim().parse::<i32>().ok())
                .or_else(|| s.date.map(|d| chrono::Datelike::year(&d)))?;
            let eps = s.eps_diluted.or(s.eps).and_then(to_decimal)?;
            Some(EpsEntry {
                year,
                eps,
                filed: s.filing_date,
                period_end: s.date,
            })
        })
        .collect();
    entries.sort_by(|a, b| b.year.cmp(&a.year));
    entries.dedup_by_key(|e| e.year);

    EpsData {
        ticker: ticker.to_string(),
        company_name: None,
        entries,
    }
}

/// `"124.17-199.62"` into (low, high).
fn parse_range(range: &str) -> Option<(Decimal, Decimal)> {
    let (low, high) = range.split_once('-')?;
    let low = low.trim().parse::<f64>().ok().and_then(to_decimal)?;
    let high = high.trim().parse::<f64>().ok().and_then(to_decimal)?;
    Some((low, high))
}

fn profile_to_stock_info(ticker: &str, profile: &FmpProfile) -> StockInfoData {
    let range = profile.range.as_deref().and_then(parse_range);
    StockInfoData {
        ticker: ticker.to_string(),
        company_name: profile
            .company_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| ticker.to_string()),
        fifty_two_week_low: range.map(|(low, _)| low),
        fifty_two_week_high: range.map(|(_, high)| high),
        market_cap: profile
            .market_cap
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v as u64),
        sector: profile.sector.clone().filter(|s| !s.is_empty()),
        industry: profile.industry.clone().filter(|s| !s.is_empty()),
        pe_ratio: None,
        dividend_yield: None,
    }
}

// ============================================================================
// Capability Implementations
// ============================================================================

impl DataProvider for FmpProvider {
    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn as_price(&self) -> Option<&dyn PriceProvider> {
        Some(self)
    }

    fn as_eps(&self) -> Option<&dyn EpsProvider> {
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
impl PriceProvider for FmpProvider {
    async fn fetch_price(&self, ticker: &str) -> Result<PriceData, MarketDataError> {
        let quotes = self.fetch_quotes(ticker).await?;
        let quote = quotes
            .iter()
            .find(|q| q.symbol.eq_ignore_ascii_case(ticker))
            .ok_or_else(|| {
                MarketDataError::remote(PROVIDER_ID, format!("No data for {}", ticker))
            })?;
        quote_to_price(quote)
    }
}

#[async_trait]
impl BatchProvider for FmpProvider {
    fn batch_data_types(&self) -> &'static [DataType] {
        &[DataType::Price]
    }

    async fn fetch_batch(
        &self,
        data_type: DataType,
        keys: &[DataKey],
    ) -> Result<HashMap<DataKey, Result<DataPayload, MarketDataError>>, MarketDataError> {
        if data_type != DataType::Price {
            return Err(MarketDataError::InvalidRequest {
                message: format!("FMP batches only prices, got {}", data_type),
            });
        }
        let quotes = self.fetch_quotes(&keys.join(",")).await?;
        debug!(
            "FMP batch quote returned {} of {} symbols",
            quotes.len(),
            keys.len()
        );
        Ok(batch_prices(keys, &quotes))
    }
}

#[async_trait]
impl EpsProvider for FmpProvider {
    async fn fetch_eps(&self, ticker: &str) -> Result<EpsData, MarketDataError> {
        let statements: Vec<FmpIncomeStatement> = self
            .fetch(
                "income-statement",
                ticker,
                &[("period", "annual"), ("limit", EPS_YEARS)],
            )
            .await?;
        let data = eps_from_statements(ticker, &statements);
        if data.entries.is_empty() {
            return Err(MarketDataError::remote(
                PROVIDER_ID,
                format!("No EPS data for {}", ticker),
            ));
        }
        Ok(data)
    }
}

#[async_trait]
impl StockInfoProvider for FmpProvider {
    async fn fetch_stock_info(&self, ticker: &str) -> Result<StockInfoData, MarketDataError> {
        let profiles: Vec<FmpProfile> = self.fetch("profile", ticker, &[]).await?;
        let profile = profiles
            .first()
            .ok_or_else(|| {
                MarketDataError::remote(PROVIDER_ID, format!("No data for {}", ticker))
            })?;
        Ok(profile_to_stock_info(ticker, profile))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct MapSecrets(Option<&'static str>);

    impl SecretStore for MapSecrets {
        fn get_secret(&self, _key: &str) -> Result<Option<String>, MarketDataError> {
            Ok(self.0.map(str::to_string))
        }
    }

    #[test]
    fn test_availability_follows_api_key() {
        assert!(FmpProvider::from_secrets(&MapSecrets(Some("abc"))).is_available());
        assert!(!FmpProvider::from_secrets(&MapSecrets(None)).is_available());
        assert!(!FmpProvider::new(Some("  ".to_string())).is_available());
    }

    #[test]
    fn test_capabilities() {
        let provider = FmpProvider::new(Some("abc".to_string()));
        assert_eq!(
            provider.supported_data_types(),
            vec![DataType::Price, DataType::Eps, DataType::StockInfo]
        );
        assert!(provider.supports_batch_for(DataType::Price));
        assert!(!provider.supports_batch_for(DataType::Eps));
        assert_eq!(provider.metadata().batch_size, 100);
    }

    #[tokio::test]
    async fn test_missing_key_is_unavailable_without_request() {
        let provider = FmpProvider::new(None);
        let err = provider.fetch_price("AAPL").await.unwrap_err();
        assert!(matches!(err, MarketDataError::Unavailable { .. }));
    }

    #[test]
    fn test_decode_status_mapping() {
        let err = decode_response::<Vec<FmpQuote>>("quote", StatusCode::UNAUTHORIZED, "")
            .unwrap_err();
        assert!(matches!(err, MarketDataError::Unavailable { .. }));

        let err = decode_response::<Vec<FmpQuote>>("quote", StatusCode::TOO_MANY_REQUESTS, "")
            .unwrap_err();
        assert!(matches!(err, MarketDataError::RemoteError { .. }));

        let err = decode_response::<Vec<FmpQuote>>(
            "quote",
            StatusCode::OK,
            r#"{"Error Message": "Invalid symbol"}"#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Remote error: fmp - Invalid symbol");

        let err = decode_response::<Vec<FmpQuote>>("quote", StatusCode::OK, "not json")
            .unwrap_err();
        assert!(matches!(err, MarketDataError::MalformedResponse { .. }));
    }

    #[test]
    fn test_batch_prices_isolates_missing_symbols() {
        let body = r#"[
            {"symbol": "AAPL", "price": 190.5, "change": 1.5, "changePercentage": 0.7937, "volume": 51000000, "timestamp": 1772409600},
            {"symbol": "MSFT", "price": null}
        ]"#;
        let quotes = decode_response::<Vec<FmpQuote>>("quote", StatusCode::OK, body).unwrap();
        let keys = vec!["AAPL".to_string(), "MSFT".to_string(), "NOPE".to_string()];
        let results = batch_prices(&keys, &quotes);

        let aapl = results["AAPL"].as_ref().unwrap().as_price().unwrap();
        assert_eq!(aapl.price, dec!(190.5));
        assert_eq!(aapl.change_percent, Some(dec!(0.79)));
        assert_eq!(aapl.volume, Some(51_000_000));
        assert_eq!(aapl.timestamp.timestamp(), 1_772_409_600);
        assert!(matches!(
            results["MSFT"],
            Err(MarketDataError::MalformedResponse { .. })
        ));
        assert!(matches!(
            results["NOPE"],
            Err(MarketDataError::RemoteError { .. })
        ));
    }

    #[test]
    fn test_eps_from_statements() {
        let body = r#"[
            {"date": "2024-09-28", "fiscalYear": "2024", "eps": 6.11, "epsDiluted": 6.08, "filingDate": "2024-11-01"},
            {"date": "2025-09-27", "fiscalYear": "2025", "eps": 7.49, "epsDiluted": 7.46, "filingDate": "2025-10-31"},
            {"date": "2023-09-30", "calendarYear": "2023", "eps": 6.16},
            {"date": "2022-09-24", "fiscalYear": "2022", "eps": null}
        ]"#;
        let statements =
            decode_response::<Vec<FmpIncomeStatement>>("income-statement", StatusCode::OK, body)
                .unwrap();
        let data = eps_from_statements("AAPL", &statements);

        let years: Vec<i32> = data.entries.iter().map(|e| e.year).collect();
        assert_eq!(years, vec![2025, 2024, 2023]);
        assert_eq!(data.entries[0].eps, dec!(7.46));
        assert_eq!(data.entries[2].eps, dec!(6.16));
        assert_eq!(
            data.entries[0].filed,
            NaiveDate::from_ymd_opt(2025, 10, 31)
        );
    }

    #[test]
    fn test_profile_to_stock_info() {
        let body = r#"[{
            "symbol": "AAPL",
            "companyName": "Apple Inc.",
            "marketCap": 2850000000000,
            "sector": "Technology",
            "industry": "Consumer Electronics",
            "range": "164.08-260.1"
        }]"#;
        let profiles =
            decode_response::<Vec<FmpProfile>>("profile", StatusCode::OK, body).unwrap();
        let info = profile_to_stock_info("AAPL", &profiles[0]);

        assert_eq!(info.company_name, "Apple Inc.");
        assert_eq!(info.market_cap, Some(2_850_000_000_000));
        assert_eq!(info.fifty_two_week_low, Some(dec!(164.08)));
        assert_eq!(info.fifty_two_week_high, Some(dec!(260.1)));
        assert_eq!(parse_range("n/a"), None);
    }
}
