//! Data orchestrator.
//!
//! Answers `fetch(data_type, key)` with a single [`ProviderResult`]:
//!
//! 1. Normalize the key and consult the cache
//! 2. Walk the registry's ordered providers, strictly one at a time
//! 3. For each: circuit breaker admission, rate limit, bounded call, validation
//! 4. First success is cached and returned; otherwise an aggregated
//!    `NoProviderAvailable` carrying every attempt
//!
//! Provider calls run as spawned tasks. When the timeout fires the task is
//! abandoned: it finishes in the background and its result is dropped.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info, warn};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::cache::{CacheStats, ResultCache};
use crate::config::{ConfigSource, FetchConfig};
use crate::errors::{MarketDataError, RetryClass};
use crate::models::{
    history_key, normalize_key, split_history_key, DataKey, DataPayload, DataType, DividendData,
    EpsData, HistoryPeriod, PriceData, PriceHistoryData, ProviderResult, StockInfoData,
};
use crate::provider::DataProvider;
use crate::registry::{
    FetchDiagnostics, PayloadValidator, ProviderEntry, ProviderRegistry, ProviderStatsSnapshot,
    ProviderStatus, SkipReason,
};


/// Keys per timeout unit for batch chunks.
const BATCH_TIMEOUT_UNIT: usize = 50;

#[derive(Clone, Copy, Debug, Default)]
pub struct FetchOptions {
    /// Ignore cached entries. Fresh results are still stored.
    pub skip_cache: bool,
}

/// A normalized request key.
#[derive(Clone, Debug)]
struct RequestKey {
    /// Cache and result key (`AAPL`, `AAPL@1Y`)
    key: DataKey,
    /// Bare ticker used for payload validation
    ticker: String,
}

/// Outcome of one provider attempt inside a walk.
enum Attempt {
    Success(ProviderResult),
    Failed,
    /// Stop walking; the error applies to every provider.
    Abort(MarketDataError),
}

pub struct DataOrchestrator {
    registry: ProviderRegistry,
    cache: ResultCache,
    validator: PayloadValidator,
}

impl DataOrchestrator {
    pub fn new(providers: Vec<Arc<dyn DataProvider>>, config: FetchConfig) -> Self {
        Self {
            registry: ProviderRegistry::new(providers, config),
            cache: ResultCache::new(),
            validator: PayloadValidator::new(),
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn config(&self) -> Arc<FetchConfig> {
        self.registry.config()
    }

    fn request_key(
        &self,
        data_type: DataType,
        raw: &str,
        config: &FetchConfig,
    ) -> Result<RequestKey, MarketDataError> {
        let key = normalize_key(raw).ok_or_else(|| MarketDataError::InvalidRequest {
            message: "Key must not be empty".to_string(),
        })?;
        if data_type == DataType::PriceHistory {
            let (ticker, period) = split_history_key(&key, config.history_period)?;
            return Ok(RequestKey {
                key: history_key(&ticker, period),
                ticker,
            });
        }
        Ok(RequestKey {
            ticker: key.clone(),
            key,
        })
    }

    /// Fetch one data point, cache first.
    pub async fn fetch(&self, data_type: DataType, key: &str) -> ProviderResult {
        self.fetch_with_options(data_type, key, FetchOptions::default())
            .await
    }

    pub async fn fetch_with_options(
        &self,
        data_type: DataType,
        key: &str,
        options: FetchOptions,
    ) -> ProviderResult {
        let config = self.registry.config();
        let request = match self.request_key(data_type, key, &config) {
            Ok(request) => request,
            Err(e) => return ProviderResult::orchestrator_failure(e),
        };

        if !options.skip_cache {
            if let Some(hit) = self.cache.get(data_type, &request.key) {
                debug!("Cache hit for {} {} (from {})", data_type, request.key, hit.source);
                return hit;
            }
        }

        let selection = self.registry.ordered_providers(data_type);
        let mut diagnostics = FetchDiagnostics::new();
        for (id, reason) in selection.excluded {
            diagnostics.record_skip(id, reason);
        }

        self.walk(&selection.eligible, data_type, &request, &config, diagnostics)
            .await
    }

    /// Try `providers` in order for one key until one succeeds.
    async fn walk(
        &self,
        providers: &[Arc<ProviderEntry>],
        data_type: DataType,
        request: &RequestKey,
        config: &FetchConfig,
        mut diagnostics: FetchDiagnostics,
    ) -> ProviderResult {
        for entry in providers {
            match self
                .attempt(entry, data_type, request, config, &mut diagnostics)
                .await
            {
                Attempt::Success(result) => {
                    self.store(data_type, &request.key, &result, config);
                    return result;
                }
                Attempt::Failed => continue,
                Attempt::Abort(e) => return ProviderResult::failure(entry.provider_id(), e),
            }
        }

        warn!(
            "No provider could serve {} {}: {}",
            data_type, request.key, diagnostics
        );
        ProviderResult::orchestrator_failure(MarketDataError::NoProviderAvailable {
            data_type,
            key: request.key.clone(),
            diagnostics: Box::new(diagnostics),
        })
    }

    async fn attempt(
        &self,
        entry: &Arc<ProviderEntry>,
        data_type: DataType,
        request: &RequestKey,
        config: &FetchConfig,
        diagnostics: &mut FetchDiagnostics,
    ) -> Attempt {
        let id = entry.id();
        let Some(permit) = entry.breaker().try_acquire() else {
            debug!("Circuit breaker open for provider '{}', skipping", id);
            entry.stats().record_skip();
            diagnostics.record_skip(entry.provider_id(), SkipReason::CircuitOpen);
            return Attempt::Failed;
        };

        entry.limiter().acquire().await;
        entry.stats().record_attempt();

        let timeout = config.timeout_for(id);
        let started = Instant::now();
        let provider = Arc::clone(entry.provider());
        let key = request.key.clone();
        let period = config.history_period;
        let outcome = call_with_timeout(id, &request.key, timeout, async move {
            provider.fetch_one(data_type, &key, period).await
        })
        .await
        .and_then(|payload| {
            self.validator
                .validate(id, data_type, &request.ticker, &payload)
                .map(|()| payload)
        });
        let elapsed = started.elapsed();

        match outcome {
            Ok(payload) => {
                permit.succeed();
                entry.stats().record_success();
                diagnostics.record_success(entry.provider_id(), elapsed);
                debug!(
                    "Provider '{}' served {} {} in {:?}",
                    id, data_type, request.key, elapsed
                );
                Attempt::Success(ProviderResult::success(entry.provider_id(), payload))
            }
            Err(e) => {
                entry
                    .stats()
                    .record_failure(matches!(e, MarketDataError::Timeout { .. }));
                diagnostics.record_error(entry.provider_id(), &e, elapsed);
                match e.retry_class() {
                    RetryClass::FailoverWithPenalty => {
                        warn!(
                            "Provider '{}' failed for {} {}: {}, recorded circuit breaker failure",
                            id, data_type, request.key, e
                        );
                        permit.fail();
                        Attempt::Failed
                    }
                    RetryClass::NextProvider => {
                        entry.mark_unavailable(&e.to_string());
                        drop(permit);
                        Attempt::Failed
                    }
                    RetryClass::Never => {
                        info!(
                            "Terminal error from '{}' for {} {}: {}, not retrying",
                            id, data_type, request.key, e
                        );
                        drop(permit);
                        Attempt::Abort(e)
                    }
                }
            }
        }
    }

    fn store(&self, data_type: DataType, key: &str, result: &ProviderResult, config: &FetchConfig) {
        if let Some(payload) = result.data() {
            self.cache.put(
                data_type,
                key,
                payload.clone(),
                result.source.clone(),
                result.fetched_at,
                config.cache_ttl(data_type),
            );
        }
    }

    /// Fetch many keys of one data type.
    ///
    /// Batch-capable providers serve chunks; keys a chunk could not serve
    /// move on. Once the walk reaches a provider without batching, the
    /// remaining keys go through the rest of the list one key at a time,
    /// concurrently across keys. Every input key gets an entry.
    pub async fn fetch_many<S: AsRef<str>>(
        &self,
        data_type: DataType,
        keys: &[S],
    ) -> HashMap<DataKey, ProviderResult> {
        let config = self.registry.config();
        let mut results: HashMap<DataKey, ProviderResult> = HashMap::new();
        let mut remaining: Vec<RequestKey> = Vec::new();
        let mut seen: HashSet<DataKey> = HashSet::new();

        for raw in keys {
            let raw = raw.as_ref();
            match self.request_key(data_type, raw, &config) {
                Ok(request) => {
                    if !seen.insert(request.key.clone()) {
                        continue;
                    }
                    match self.cache.get(data_type, &request.key) {
                        Some(hit) => {
                            results.insert(request.key, hit);
                        }
                        None => remaining.push(request),
                    }
                }
                Err(e) => {
                    results.insert(raw.to_string(), ProviderResult::orchestrator_failure(e));
                }
            }
        }

        if remaining.is_empty() {
            return results;
        }

        let selection = self.registry.ordered_providers(data_type);
        let mut diagnostics: HashMap<DataKey, FetchDiagnostics> = remaining
            .iter()
            .map(|r| {
                let mut diag = FetchDiagnostics::new();
                for (id, reason) in &selection.excluded {
                    diag.record_skip(id.clone(), reason.clone());
                }
                (r.key.clone(), diag)
            })
            .collect();

        for (index, entry) in selection.eligible.iter().enumerate() {
            if remaining.is_empty() {
                break;
            }

            if entry.provider().supports_batch_for(data_type) {
                self.run_batches(
                    entry,
                    data_type,
                    &mut remaining,
                    &mut results,
                    &mut diagnostics,
                    &config,
                )
                .await;
                continue;
            }

            let rest = &selection.eligible[index..];
            debug!(
                "Fetching {} remaining {} keys one by one from {} providers",
                remaining.len(),
                data_type,
                rest.len()
            );
            let walks = remaining.drain(..).map(|request| {
                let diag = diagnostics.remove(&request.key).unwrap_or_default();
                let config = &config;
                async move {
                    let result = self.walk(rest, data_type, &request, config, diag).await;
                    (request.key, result)
                }
            });
            results.extend(join_all(walks).await);
        }

        // Only batch providers were eligible and they left these keys unserved
        for request in remaining {
            let diag = diagnostics.remove(&request.key).unwrap_or_default();
            warn!(
                "No provider could serve {} {}: {}",
                data_type, request.key, diag
            );
            results.insert(
                request.key.clone(),
                ProviderResult::orchestrator_failure(MarketDataError::NoProviderAvailable {
                    data_type,
                    key: request.key,
                    diagnostics: Box::new(diag),
                }),
            );
        }

        results
    }

    /// Serve as many `remaining` keys as possible from one batch provider.
    async fn run_batches(
        &self,
        entry: &Arc<ProviderEntry>,
        data_type: DataType,
        remaining: &mut Vec<RequestKey>,
        results: &mut HashMap<DataKey, ProviderResult>,
        diagnostics: &mut HashMap<DataKey, FetchDiagnostics>,
        config: &FetchConfig,
    ) {
        let id = entry.id();
        let meta = entry.provider().metadata();
        let (batch_size, batch_delay) = meta.batch_plan(data_type);
        let base_timeout = config.timeout_for(id);
        let mut served: HashSet<DataKey> = HashSet::new();

        let requests: Vec<RequestKey> = remaining.clone();
        for (chunk_index, chunk) in requests.chunks(batch_size).enumerate() {
            if chunk_index > 0 && !batch_delay.is_zero() {
                tokio::time::sleep(batch_delay).await;
            }

            let Some(permit) = entry.breaker().try_acquire() else {
                debug!("Circuit breaker open for provider '{}', skipping chunk", id);
                entry.stats().record_skip();
                for request in chunk {
                    if let Some(diag) = diagnostics.get_mut(&request.key) {
                        diag.record_skip(entry.provider_id(), SkipReason::CircuitOpen);
                    }
                }
                continue;
            };

            entry.limiter().acquire().await;
            entry.stats().record_attempt();

            let timeout = chunk_timeout(base_timeout, chunk.len());
            let keys: Vec<DataKey> = chunk.iter().map(|r| r.key.clone()).collect();
            let provider = Arc::clone(entry.provider());
            let label = format!("batch of {}", keys.len());
            let started = Instant::now();
            let outcome = call_with_timeout(id, &label, timeout, async move {
                match provider.as_batch() {
                    Some(batch) => batch.fetch_batch(data_type, &keys).await,
                    None => Err(MarketDataError::InvalidRequest {
                        message: format!("{} does not support batch fetches", provider.id()),
                    }),
                }
            })
            .await;
            let elapsed = started.elapsed();

            match outcome {
                Ok(mut payloads) => {
                    let mut any_ok = false;
                    for request in chunk {
                        let checked = match payloads.remove(&request.key) {
                            Some(Ok(payload)) => self
                                .validator
                                .validate(id, data_type, &request.ticker, &payload)
                                .map(|()| payload),
                            Some(Err(e)) => Err(e),
                            None => Err(MarketDataError::malformed(
                                id,
                                format!("{} missing from batch response", request.key),
                            )),
                        };
                        let diag = diagnostics.entry(request.key.clone()).or_default();
                        match checked {
                            Ok(payload) => {
                                any_ok = true;
                                diag.record_success(entry.provider_id(), elapsed);
                                let result = ProviderResult::success(entry.provider_id(), payload);
                                self.store(data_type, &request.key, &result, config);
                                served.insert(request.key.clone());
                                results.insert(request.key.clone(), result);
                            }
                            Err(e) => diag.record_error(entry.provider_id(), &e, elapsed),
                        }
                    }

                    if any_ok {
                        permit.succeed();
                        entry.stats().record_success();
                    } else {
                        warn!(
                            "Provider '{}' served none of {} {} keys in chunk",
                            id,
                            chunk.len(),
                            data_type
                        );
                        permit.fail();
                        entry.stats().record_failure(false);
                    }
                }
                Err(e) => {
                    entry
                        .stats()
                        .record_failure(matches!(e, MarketDataError::Timeout { .. }));
                    for request in chunk {
                        if let Some(diag) = diagnostics.get_mut(&request.key) {
                            diag.record_error(entry.provider_id(), &e, elapsed);
                        }
                    }
                    match e.retry_class() {
                        RetryClass::FailoverWithPenalty => {
                            warn!("Batch call to '{}' failed: {}", id, e);
                            permit.fail();
                        }
                        RetryClass::NextProvider => {
                            entry.mark_unavailable(&e.to_string());
                            drop(permit);
                            break;
                        }
                        RetryClass::Never => {
                            info!("Batch call to '{}' rejected: {}", id, e);
                            drop(permit);
                            break;
                        }
                    }
                }
            }
        }

        remaining.retain(|r| !served.contains(&r.key));
        debug!(
            "Provider '{}' served {} {} keys by batch, {} remaining",
            id,
            served.len(),
            data_type,
            remaining.len()
        );
    }

    fn expect_payload<T>(
        result: ProviderResult,
        extract: impl FnOnce(DataPayload) -> Option<T>,
    ) -> Result<T, MarketDataError> {
        let source = result.source.clone();
        let payload = result.into_outcome()?;
        let data_type = payload.data_type();
        extract(payload).ok_or_else(|| {
            MarketDataError::malformed(source, format!("unexpected {} payload", data_type))
        })
    }

    pub async fn fetch_price(&self, ticker: &str) -> Result<PriceData, MarketDataError> {
        let result = self.fetch(DataType::Price, ticker).await;
        Self::expect_payload(result, |p| match p {
            DataPayload::Price(d) => Some(d),
            _ => None,
        })
    }

    /// Latest prices for many tickers, batching where providers allow.
    pub async fn fetch_prices<S: AsRef<str>>(
        &self,
        tickers: &[S],
    ) -> HashMap<DataKey, ProviderResult> {
        self.fetch_many(DataType::Price, tickers).await
    }

    /// Price history; `None` uses the configured default period.
    pub async fn fetch_price_history(
        &self,
        ticker: &str,
        period: Option<HistoryPeriod>,
    ) -> Result<PriceHistoryData, MarketDataError> {
        let key = match period {
            Some(period) => format!("{}@{}", ticker.trim(), period),
            None => ticker.to_string(),
        };
        let result = self.fetch(DataType::PriceHistory, &key).await;
        Self::expect_payload(result, |p| match p {
            DataPayload::PriceHistory(d) => Some(d),
            _ => None,
        })
    }

    /// Histories for many tickers over one period, batched where a provider
    /// allows it. Results are keyed by `TICKER@PERIOD`.
    pub async fn fetch_price_histories<S: AsRef<str>>(
        &self,
        tickers: &[S],
        period: Option<HistoryPeriod>,
    ) -> HashMap<DataKey, ProviderResult> {
        let keys: Vec<String> = tickers
            .iter()
            .map(|ticker| match period {
                Some(period) => format!("{}@{}", ticker.as_ref().trim(), period),
                None => ticker.as_ref().to_string(),
            })
            .collect();
        self.fetch_many(DataType::PriceHistory, &keys).await
    }

    pub async fn fetch_eps(&self, ticker: &str) -> Result<EpsData, MarketDataError> {
        let result = self.fetch(DataType::Eps, ticker).await;
        Self::expect_payload(result, |p| match p {
            DataPayload::Eps(d) => Some(d),
            _ => None,
        })
    }

    pub async fn fetch_dividends(&self, ticker: &str) -> Result<DividendData, MarketDataError> {
        let result = self.fetch(DataType::Dividend, ticker).await;
        Self::expect_payload(result, |p| match p {
            DataPayload::Dividend(d) => Some(d),
            _ => None,
        })
    }

    pub async fn fetch_stock_info(&self, ticker: &str) -> Result<StockInfoData, MarketDataError> {
        let result = self.fetch(DataType::StockInfo, ticker).await;
        Self::expect_payload(result, |p| match p {
            DataPayload::StockInfo(d) => Some(d),
            _ => None,
        })
    }

    pub fn reset_breaker(&self, provider: &str) -> Result<(), MarketDataError> {
        self.registry.reset_breaker(provider)
    }

    pub fn reset_all_breakers(&self) {
        self.registry.reset_all_breakers();
    }

    pub fn toggle_provider(&self, provider: &str, enabled: bool) -> Result<(), MarketDataError> {
        self.registry.toggle_provider(provider, enabled)
    }

    pub fn reload(&self, config: FetchConfig) -> Result<(), MarketDataError> {
        config.validate()?;
        self.registry.reload(config);
        Ok(())
    }

    pub fn reload_from(&self, source: &dyn ConfigSource) -> Result<(), MarketDataError> {
        self.reload(source.load()?)
    }

    pub fn clear_cache(&self, data_type: Option<DataType>, key: Option<&str>) -> usize {
        let key = key.and_then(normalize_key);
        self.cache.clear(data_type, key.as_deref())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        self.registry.provider_status()
    }

    pub fn provider_stats(&self) -> HashMap<String, ProviderStatsSnapshot> {
        self.registry
            .entries()
            .iter()
            .map(|e| (e.id().to_string(), e.stats().snapshot()))
            .collect()
    }
}

/// Base timeout scaled by chunk size, one unit per 50 keys.
fn chunk_timeout(base: Duration, keys: usize) -> Duration {
    let units = keys.div_ceil(BATCH_TIMEOUT_UNIT).max(1) as u32;
    base * units
}

/// Run `call` as its own task and wait at most `timeout` for it.
///
/// A late result is logged and dropped by the task itself.
async fn call_with_timeout<T, F>(
    provider: &'static str,
    label: &str,
    timeout: Duration,
    call: F,
) -> Result<T, MarketDataError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, MarketDataError>> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let late_label = label.to_string();
    tokio::spawn(async move {
        let result = call.await;
        if tx.send(result).is_err() {
            debug!(
                "Late result from '{}' for {} dropped after timeout",
                provider, late_label
            );
        }
    });

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(MarketDataError::remote(
            provider,
            "provider task ended without a result",
        )),
        Err(_) => {
            warn!(
                "Provider '{}' timed out after {:?} for {}",
                provider, timeout, label
            );
            Err(MarketDataError::Timeout {
                provider: provider.to_string(),
                after: timeout,
            })
        }
    }
}
