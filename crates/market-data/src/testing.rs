//! Scriptable provider for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use rust_decimal::Decimal;
use tokio::time::Instant;

use crate::errors::MarketDataError;
use crate::models::{
    split_history_key, DailyClose, DataKey, DataPayload, DataType, DividendData, DividendPayment,
    EpsData, EpsEntry, HistoryPeriod, PriceData, PriceHistoryData, StockInfoData,
};
use crate::provider::{
    BatchProvider, DataProvider, DividendProvider, EpsProvider, PriceHistoryProvider,
    PriceProvider, ProviderMetadata, StockInfoProvider,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum MockCall {
    Single(String),
    Batch(Vec<String>),
}

#[derive(Clone, Debug)]
pub(crate) struct CallRecord {
    pub call: MockCall,
    pub at: Instant,
}

pub(crate) struct MockProvider {
    metadata: ProviderMetadata,
    data_types: Vec<DataType>,
    batch_types: &'static [DataType],
    available: bool,
    unavailable_on_call: bool,
    malformed: bool,
    fail_all: AtomicBool,
    batch_call_fails: AtomicBool,
    latency_ms: AtomicU64,
    failing_keys: Mutex<HashSet<String>>,
    price: Decimal,
    calls: Mutex<Vec<CallRecord>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockProvider {
    pub fn new(id: &'static str) -> Self {
        Self {
            metadata: ProviderMetadata::new(id, id),
            data_types: DataType::ALL.to_vec(),
            batch_types: &[DataType::Price],
            available: true,
            unavailable_on_call: false,
            malformed: false,
            fail_all: AtomicBool::new(false),
            batch_call_fails: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            failing_keys: Mutex::new(HashSet::new()),
            price: Decimal::ONE_HUNDRED,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_data_types(mut self, data_types: &[DataType]) -> Self {
        self.data_types = data_types.to_vec();
        self
    }

    pub fn realtime(mut self) -> Self {
        self.metadata = self.metadata.realtime(true);
        self
    }

    pub fn batch(mut self, batch_size: usize) -> Self {
        self.metadata = self.metadata.batch(batch_size, Duration::ZERO);
        self
    }

    pub fn batch_delay(mut self, delay: Duration) -> Self {
        let size = self.metadata.batch_size;
        self.metadata = self.metadata.batch(size, delay);
        self
    }

    /// Batch `data_type` in chunks of `size`, pausing `delay` between chunks.
    pub fn batch_for(mut self, data_type: DataType, size: usize, delay: Duration) -> Self {
        self.metadata = self.metadata.batch_for(data_type, size, delay);
        self
    }

    pub fn batch_types(mut self, data_types: &'static [DataType]) -> Self {
        self.batch_types = data_types;
        self
    }

    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.metadata = self.metadata.min_interval(interval);
        self
    }

    /// `is_available()` reports false.
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// `is_available()` is true but every call returns `Unavailable`.
    pub fn unavailable_on_call(mut self) -> Self {
        self.unavailable_on_call = true;
        self
    }

    /// Prices come back as zero.
    pub fn malformed(mut self) -> Self {
        self.malformed = true;
        self
    }

    pub fn latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    pub fn failing(self) -> Self {
        self.set_failing(true);
        self
    }

    pub fn failing_keys(self, keys: &[&str]) -> Self {
        if let Ok(mut set) = self.failing_keys.lock() {
            set.extend(keys.iter().map(|k| k.to_string()));
        }
        self
    }

    pub fn failing_batches(self) -> Self {
        self.batch_call_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_all.store(failing, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    pub fn single_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|r| match r.call {
                MockCall::Single(key) => Some(key),
                MockCall::Batch(_) => None,
            })
            .collect()
    }

    pub fn batch_calls(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|r| match r.call {
                MockCall::Batch(keys) => Some(keys),
                MockCall::Single(_) => None,
            })
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: MockCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(CallRecord {
                call,
                at: Instant::now(),
            });
        }
    }

    fn key_fails(&self, key: &str) -> bool {
        self.fail_all.load(Ordering::SeqCst)
            || self
                .failing_keys
                .lock()
                .map(|set| set.contains(key))
                .unwrap_or(false)
    }

    async fn simulate(&self, call: MockCall) -> Result<(), MarketDataError> {
        self.record(call);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = Duration::from_millis(self.latency_ms.load(Ordering::SeqCst));
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.unavailable_on_call {
            return Err(MarketDataError::unavailable(self.id(), "credentials revoked"));
        }
        Ok(())
    }

    async fn respond<T>(&self, key: &str, build: impl FnOnce() -> T) -> Result<T, MarketDataError> {
        self.simulate(MockCall::Single(key.to_string())).await?;
        if self.key_fails(key) {
            return Err(MarketDataError::remote(self.id(), format!("No data for {}", key)));
        }
        Ok(build())
    }

    fn price_for(&self, ticker: &str) -> PriceData {
        let price = if self.malformed {
            Decimal::ZERO
        } else {
            self.price
        };
        PriceData::new(ticker, price, "USD")
    }

    fn history_for(&self, ticker: &str, period: HistoryPeriod) -> PriceHistoryData {
        let start = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap_or_default();
        let closes = (0..5)
            .map(|i| DailyClose {
                date: start + ChronoDuration::days(i),
                close: self.price + Decimal::from(i),
            })
            .collect();
        PriceHistoryData::from_closes(ticker, period, closes).unwrap_or_else(|| PriceHistoryData {
            ticker: ticker.to_string(),
            period,
            closes: Vec::new(),
            current_price: self.price,
            price_1m_ago: None,
            price_3m_ago: None,
            change_1m_pct: None,
            change_3m_pct: None,
        })
    }
}

impl DataProvider for MockProvider {
    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn as_price(&self) -> Option<&dyn PriceProvider> {
        self.data_types.contains(&DataType::Price).then_some(self as &dyn PriceProvider)
    }

    fn as_price_history(&self) -> Option<&dyn PriceHistoryProvider> {
        self.data_types
            .contains(&DataType::PriceHistory)
            .then_some(self as &dyn PriceHistoryProvider)
    }

    fn as_eps(&self) -> Option<&dyn EpsProvider> {
        self.data_types.contains(&DataType::Eps).then_some(self as &dyn EpsProvider)
    }

    fn as_dividend(&self) -> Option<&dyn DividendProvider> {
        self.data_types.contains(&DataType::Dividend).then_some(self as &dyn DividendProvider)
    }

    fn as_stock_info(&self) -> Option<&dyn StockInfoProvider> {
        self.data_types.contains(&DataType::StockInfo).then_some(self as &dyn StockInfoProvider)
    }

    fn as_batch(&self) -> Option<&dyn BatchProvider> {
        self.metadata.supports_batch.then_some(self as &dyn BatchProvider)
    }
}

#[async_trait]
impl PriceProvider for MockProvider {
    async fn fetch_price(&self, ticker: &str) -> Result<PriceData, MarketDataError> {
        self.respond(ticker, || self.price_for(ticker)).await
    }
}

#[async_trait]
impl PriceHistoryProvider for MockProvider {
    async fn fetch_price_history(
        &self,
        ticker: &str,
        period: HistoryPeriod,
    ) -> Result<PriceHistoryData, MarketDataError> {
        self.respond(ticker, || self.history_for(ticker, period)).await
    }
}

#[async_trait]
impl EpsProvider for MockProvider {
    async fn fetch_eps(&self, ticker: &str) -> Result<EpsData, MarketDataError> {
        self.respond(ticker, || EpsData {
            ticker: ticker.to_string(),
            company_name: None,
            entries: vec![EpsEntry {
                year: 2025,
                eps: Decimal::new(612, 2),
                filed: None,
                period_end: None,
            }],
        })
        .await
    }
}

#[async_trait]
impl DividendProvider for MockProvider {
    async fn fetch_dividends(&self, ticker: &str) -> Result<DividendData, MarketDataError> {
        self.respond(ticker, || {
            let as_of = NaiveDate::from_ymd_opt(2026, 6, 30).unwrap_or_default();
            DividendData::from_payments(
                ticker,
                vec![DividendPayment {
                    date: as_of - ChronoDuration::days(30),
                    amount: Decimal::ONE,
                }],
                as_of,
            )
        })
        .await
    }
}

#[async_trait]
impl StockInfoProvider for MockProvider {
    async fn fetch_stock_info(&self, ticker: &str) -> Result<StockInfoData, MarketDataError> {
        self.respond(ticker, || StockInfoData {
            ticker: ticker.to_string(),
            company_name: format!("{} Corp", ticker),
            ..Default::default()
        })
        .await
    }
}

#[async_trait]
impl BatchProvider for MockProvider {
    fn batch_data_types(&self) -> &'static [DataType] {
        self.batch_types
    }

    async fn fetch_batch(
        &self,
        data_type: DataType,
        keys: &[DataKey],
    ) -> Result<HashMap<DataKey, Result<DataPayload, MarketDataError>>, MarketDataError> {
        self.simulate(MockCall::Batch(keys.to_vec())).await?;
        if self.batch_call_fails.load(Ordering::SeqCst) {
            return Err(MarketDataError::remote(self.id(), "batch endpoint failed"));
        }
        if !self.batch_types.contains(&data_type) {
            return Err(MarketDataError::InvalidRequest {
                message: format!("mock does not batch {}", data_type),
            });
        }
        Ok(keys
            .iter()
            .map(|key| {
                let outcome = if self.key_fails(key) {
                    Err(MarketDataError::remote(self.id(), format!("No data for {}", key)))
                } else if data_type == DataType::PriceHistory {
                    split_history_key(key, HistoryPeriod::default()).map(|(ticker, period)| {
                        DataPayload::PriceHistory(self.history_for(&ticker, period))
                    })
                } else {
                    Ok(DataPayload::Price(self.price_for(key)))
                };
                (key.clone(), outcome)
            })
            .collect())
    }
}
