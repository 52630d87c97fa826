//! Provider registry.
//!
//! Holds every registered provider together with its breaker, rate limiter
//! and counters, plus the live [`FetchConfig`]. For each data type it answers
//! "which providers, in which order" without side effects:
//!
//! 1. Providers implementing the capability, in configured order, with
//!    unmentioned ones appended in registration order
//! 2. Disabled and unavailable providers excluded (and reported)
//! 3. Realtime providers first for realtime-first data types
//! 4. Batch-capable providers first within each partition when `prefer_batch`

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use log::{debug, info, warn};
use serde::Serialize;

use super::circuit_breaker::{CircuitBreaker, CircuitSnapshot};
use super::diagnostics::SkipReason;
use super::rate_limiter::RateLimiter;
use crate::config::FetchConfig;
use crate::errors::MarketDataError;
use crate::models::{DataType, ProviderId};
use crate::provider::DataProvider;

/// Per-provider counters, monotonically increasing.
#[derive(Debug, Default)]
pub struct ProviderStats {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    skips: AtomicU64,
}

impl ProviderStats {
    pub(crate) fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self, timed_out: bool) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_skip(&self) {
        self.skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProviderStatsSnapshot {
        ProviderStatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            skips: self.skips.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProviderStatsSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    /// Calls refused by the circuit breaker.
    pub skips: u64,
}

/// One registered provider and its runtime state.
pub struct ProviderEntry {
    provider: Arc<dyn DataProvider>,
    breaker: Arc<CircuitBreaker>,
    limiter: RateLimiter,
    stats: ProviderStats,
    /// Set when a call returned `Unavailable`; never cleared.
    latched_unavailable: AtomicBool,
}

impl ProviderEntry {
    pub fn id(&self) -> &'static str {
        self.provider.id()
    }

    pub fn provider_id(&self) -> ProviderId {
        Cow::Borrowed(self.provider.id())
    }

    pub fn provider(&self) -> &Arc<dyn DataProvider> {
        &self.provider
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn stats(&self) -> &ProviderStats {
        &self.stats
    }

    pub fn is_available(&self) -> bool {
        !self.latched_unavailable.load(Ordering::Relaxed) && self.provider.is_available()
    }

    /// Exclude this provider for the rest of the process.
    pub(crate) fn mark_unavailable(&self, reason: &str) {
        if !self.latched_unavailable.swap(true, Ordering::Relaxed) {
            warn!(
                "Provider '{}' marked unavailable for this session: {}",
                self.id(),
                reason
            );
        }
    }

    fn apply_config(&self, config: &FetchConfig) {
        let id = self.id();
        self.breaker.update_config(config.breaker_for(id));
        self.limiter
            .set_min_interval(config.min_interval_for(id, self.provider.metadata().min_interval));
    }
}

/// Ordered eligible providers for one data type, plus the excluded ones.
pub struct ProviderSelection {
    pub eligible: Vec<Arc<ProviderEntry>>,
    pub excluded: Vec<(ProviderId, SkipReason)>,
}

impl ProviderSelection {
    pub fn ids(&self) -> Vec<&'static str> {
        self.eligible.iter().map(|e| e.id()).collect()
    }
}

/// Serializable status for one provider.
#[derive(Clone, Debug, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub display_name: String,
    pub available: bool,
    pub enabled: bool,
    pub realtime: bool,
    pub supports_batch: bool,
    pub authoritative: bool,
    pub data_types: Vec<DataType>,
    pub circuit: CircuitSnapshot,
    pub stats: ProviderStatsSnapshot,
    pub timeout_ms: u64,
    pub min_interval_ms: u64,
}

/// Provider registry with live, reloadable configuration.
pub struct ProviderRegistry {
    entries: Vec<Arc<ProviderEntry>>,
    config: RwLock<Arc<FetchConfig>>,
    breakers_enabled: Arc<AtomicBool>,
}

impl ProviderRegistry {
    /// Create a registry. Registration order breaks ties for providers the
    /// configuration does not mention. Duplicate ids keep the first provider.
    pub fn new(providers: Vec<Arc<dyn DataProvider>>, config: FetchConfig) -> Self {
        let breakers_enabled = Arc::new(AtomicBool::new(config.circuit_breaker.enabled));
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(providers.len());

        for provider in providers {
            let id = provider.id();
            if !seen.insert(id) {
                warn!("Provider '{}' registered twice, keeping the first", id);
                continue;
            }
            let display_name = provider.metadata().display_name;
            let declared_interval = provider.metadata().min_interval;
            let entry = ProviderEntry {
                breaker: Arc::new(CircuitBreaker::with_switch(
                    id,
                    config.breaker_for(id),
                    Arc::clone(&breakers_enabled),
                )),
                limiter: RateLimiter::new(id, config.min_interval_for(id, declared_interval)),
                stats: ProviderStats::default(),
                latched_unavailable: AtomicBool::new(false),
                provider,
            };
            info!(
                "Registered provider '{}' ({}) for {:?}",
                id,
                display_name,
                entry.provider.supported_data_types()
            );
            entries.push(Arc::new(entry));
        }

        let registry = Self {
            entries,
            config: RwLock::new(Arc::new(config)),
            breakers_enabled,
        };
        registry.log_unknown_names(&registry.config());
        registry
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<FetchConfig> {
        match self.config.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => {
                warn!("Registry config lock was poisoned, recovering");
                Arc::clone(&*poisoned.into_inner())
            }
        }
    }

    /// Exclusive access to the live configuration. Every writer goes through
    /// this guard so concurrent edits and reloads apply one after another.
    fn config_write(&self) -> RwLockWriteGuard<'_, Arc<FetchConfig>> {
        self.config.write().unwrap_or_else(|poisoned| {
            warn!("Registry config lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Default orders list providers this build may not register, so an
    /// unknown name is only worth a debug line.
    fn log_unknown_names(&self, config: &FetchConfig) {
        for dt in DataType::ALL {
            for name in config.order_for(dt) {
                if self.entry(name).is_none() {
                    debug!(
                        "Configured {} provider '{}' is not registered, ignoring",
                        dt, name
                    );
                }
            }
        }
    }

    /// Swap in a new configuration and push per-provider settings into the
    /// live breakers and limiters. Breaker state is kept.
    pub fn reload(&self, config: FetchConfig) {
        self.log_unknown_names(&config);
        let mut guard = self.config_write();
        self.breakers_enabled
            .store(config.circuit_breaker.enabled, Ordering::Relaxed);
        for entry in &self.entries {
            entry.apply_config(&config);
        }
        *guard = Arc::new(config);
        drop(guard);
        info!("Fetch configuration reloaded");
    }

    /// Enable or disable a provider in the live configuration.
    pub fn toggle_provider(&self, name: &str, enabled: bool) -> Result<(), MarketDataError> {
        if self.entry(name).is_none() {
            return Err(MarketDataError::InvalidRequest {
                message: format!("Unknown provider: {}", name),
            });
        }
        {
            let mut guard = self.config_write();
            let next = guard.with_provider_enabled(name, enabled);
            *guard = Arc::new(next);
        }
        info!(
            "Provider '{}' {}",
            name,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    pub fn reset_breaker(&self, name: &str) -> Result<(), MarketDataError> {
        let entry = self.entry(name).ok_or_else(|| MarketDataError::InvalidRequest {
            message: format!("Unknown provider: {}", name),
        })?;
        entry.breaker.reset();
        Ok(())
    }

    pub fn reset_all_breakers(&self) {
        for entry in &self.entries {
            entry.breaker.reset();
        }
    }

    pub fn entry(&self, name: &str) -> Option<&Arc<ProviderEntry>> {
        self.entries.iter().find(|e| e.id() == name)
    }

    pub fn entries(&self) -> &[Arc<ProviderEntry>] {
        &self.entries
    }

    /// Ordered eligible providers for `data_type`.
    pub fn ordered_providers(&self, data_type: DataType) -> ProviderSelection {
        let config = self.config();

        let capable: Vec<&Arc<ProviderEntry>> = self
            .entries
            .iter()
            .filter(|e| e.provider.supports(data_type))
            .collect();

        let mut ordered: Vec<&Arc<ProviderEntry>> = Vec::with_capacity(capable.len());
        for name in config.order_for(data_type) {
            if let Some(&entry) = capable.iter().find(|e| e.id() == name.as_str()) {
                if !ordered.iter().any(|o| o.id() == entry.id()) {
                    ordered.push(entry);
                }
            }
        }
        for &entry in &capable {
            if !ordered.iter().any(|o| o.id() == entry.id()) {
                ordered.push(entry);
            }
        }

        let mut eligible = Vec::with_capacity(ordered.len());
        let mut excluded = Vec::new();
        for entry in ordered {
            if config.is_disabled(entry.id()) {
                excluded.push((entry.provider_id(), SkipReason::Disabled));
            } else if !entry.is_available() {
                excluded.push((entry.provider_id(), SkipReason::Unavailable));
            } else {
                eligible.push(Arc::clone(entry));
            }
        }

        if config.is_realtime_first(data_type) {
            eligible = stable_partition(eligible, |e| e.provider.metadata().realtime);
        }
        if config.prefer_batch {
            eligible = prefer_batch_within_partitions(eligible, data_type);
        }

        debug!(
            "Provider order for {}: {:?} (excluded: {:?})",
            data_type,
            eligible.iter().map(|e| e.id()).collect::<Vec<_>>(),
            excluded
        );

        ProviderSelection { eligible, excluded }
    }

    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        let config = self.config();
        self.entries
            .iter()
            .map(|entry| {
                let meta = entry.provider.metadata();
                ProviderStatus {
                    name: meta.id.to_string(),
                    display_name: meta.display_name.to_string(),
                    available: entry.is_available(),
                    enabled: !config.is_disabled(meta.id),
                    realtime: meta.realtime,
                    supports_batch: meta.supports_batch,
                    authoritative: meta.authoritative,
                    data_types: entry.provider.supported_data_types(),
                    circuit: entry.breaker.snapshot(),
                    stats: entry.stats.snapshot(),
                    timeout_ms: config.timeout_for(meta.id).as_millis() as u64,
                    min_interval_ms: entry.limiter.min_interval().as_millis() as u64,
                }
            })
            .collect()
    }
}

/// Elements matching `first` move ahead; relative order is kept on both sides.
fn stable_partition<T>(items: Vec<T>, first: impl Fn(&T) -> bool) -> Vec<T> {
    let (mut front, back): (Vec<T>, Vec<T>) = items.into_iter().partition(|i| first(i));
    front.extend(back);
    front
}

fn prefer_batch_within_partitions(
    items: Vec<Arc<ProviderEntry>>,
    data_type: DataType,
) -> Vec<Arc<ProviderEntry>> {
    let (realtime, other): (Vec<_>, Vec<_>) = items
        .into_iter()
        .partition(|e| e.provider.metadata().realtime);
    let batch_first = |e: &Arc<ProviderEntry>| e.provider.supports_batch_for(data_type);
    let mut result = stable_partition(realtime, batch_first);
    result.extend(stable_partition(other, batch_first));
    result
}
