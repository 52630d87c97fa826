//! Fetch configuration.
//!
//! [`FetchConfig`] holds provider ordering, the disabled set, timeouts,
//! breaker settings and cache TTLs. It is read from TOML through a
//! [`ConfigSource`] and pushed into the registry with an explicit reload.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::errors::MarketDataError;
use crate::models::{DataType, HistoryPeriod};
use crate::registry::CircuitBreakerConfig;

/// Provider order per data type. First entry is tried first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderOrder {
    pub price: Vec<String>,
    pub price_history: Vec<String>,
    pub eps: Vec<String>,
    pub dividend: Vec<String>,
    pub stock_info: Vec<String>,
}

impl ProviderOrder {
    pub fn get(&self, data_type: DataType) -> &[String] {
        match data_type {
            DataType::Price => &self.price,
            DataType::PriceHistory => &self.price_history,
            DataType::Eps => &self.eps,
            DataType::Dividend => &self.dividend,
            DataType::StockInfo => &self.stock_info,
        }
    }

    pub fn set(&mut self, data_type: DataType, order: Vec<String>) {
        let slot = match data_type {
            DataType::Price => &mut self.price,
            DataType::PriceHistory => &mut self.price_history,
            DataType::Eps => &mut self.eps,
            DataType::Dividend => &mut self.dividend,
            DataType::StockInfo => &mut self.stock_info,
        };
        *slot = order;
    }
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for ProviderOrder {
    fn default() -> Self {
        Self {
            price: names(&["ibkr", "yfinance", "alpaca", "fmp", "defeatbeta"]),
            price_history: names(&["yfinance", "defeatbeta"]),
            eps: names(&["sec_edgar", "yfinance", "defeatbeta"]),
            dividend: names(&["yfinance"]),
            stock_info: names(&["yfinance", "fmp"]),
        }
    }
}

/// Circuit breaker defaults, applied to every provider without an override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub failure_window_secs: u64,
    pub cooldown_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 3,
            failure_window_secs: 120,
            cooldown_secs: 120,
        }
    }
}

/// Cache TTLs per data type. Zero disables caching for that type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub price_ttl_secs: u64,
    pub price_history_ttl_secs: u64,
    pub eps_ttl_secs: u64,
    pub dividend_ttl_secs: u64,
    pub stock_info_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            price_ttl_secs: 300,
            price_history_ttl_secs: 3600,
            eps_ttl_secs: 86_400,
            dividend_ttl_secs: 86_400,
            stock_info_ttl_secs: 86_400,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self, data_type: DataType) -> Duration {
        let secs = match data_type {
            DataType::Price => self.price_ttl_secs,
            DataType::PriceHistory => self.price_history_ttl_secs,
            DataType::Eps => self.eps_ttl_secs,
            DataType::Dividend => self.dividend_ttl_secs,
            DataType::StockInfo => self.stock_info_ttl_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Per-provider overrides, `[providers.<name>]` in TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderOverride {
    pub timeout_ms: Option<u64>,
    pub min_interval_ms: Option<u64>,
    pub failure_threshold: Option<u32>,
    pub failure_window_secs: Option<u64>,
    pub cooldown_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub order: ProviderOrder,
    pub disabled: BTreeSet<String>,
    /// Data types for which realtime providers are tried before the others.
    pub realtime_first: Vec<DataType>,
    /// Move batch-capable providers ahead within each realtime partition.
    pub prefer_batch: bool,
    /// Period used for history keys without an `@period` suffix.
    pub history_period: HistoryPeriod,
    pub provider_timeout_ms: u64,
    pub circuit_breaker: BreakerSettings,
    pub cache: CacheSettings,
    pub providers: BTreeMap<String, ProviderOverride>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            order: ProviderOrder::default(),
            disabled: BTreeSet::new(),
            realtime_first: vec![DataType::Price],
            prefer_batch: false,
            history_period: HistoryPeriod::default(),
            provider_timeout_ms: 10_000,
            circuit_breaker: BreakerSettings::default(),
            cache: CacheSettings::default(),
            providers: BTreeMap::new(),
        }
    }
}

impl FetchConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, MarketDataError> {
        let config: FetchConfig = toml::from_str(content).map_err(|e| MarketDataError::Config {
            message: format!("Failed to parse configuration: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, MarketDataError> {
        toml::to_string_pretty(self).map_err(|e| MarketDataError::Config {
            message: format!("Failed to serialize configuration: {}", e),
        })
    }

    /// Reject settings that would make the orchestrator unusable.
    pub fn validate(&self) -> Result<(), MarketDataError> {
        if self.provider_timeout_ms == 0 {
            return Err(MarketDataError::Config {
                message: "provider_timeout_ms must be greater than zero".to_string(),
            });
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(MarketDataError::Config {
                message: "circuit_breaker.failure_threshold must be at least 1".to_string(),
            });
        }
        if self.circuit_breaker.failure_window_secs == 0 {
            return Err(MarketDataError::Config {
                message: "circuit_breaker.failure_window_secs must be at least 1".to_string(),
            });
        }
        for (name, o) in &self.providers {
            if o.timeout_ms == Some(0) {
                return Err(MarketDataError::Config {
                    message: format!("providers.{}.timeout_ms must be greater than zero", name),
                });
            }
            if o.failure_threshold == Some(0) {
                return Err(MarketDataError::Config {
                    message: format!("providers.{}.failure_threshold must be at least 1", name),
                });
            }
            if o.failure_window_secs == Some(0) {
                return Err(MarketDataError::Config {
                    message: format!("providers.{}.failure_window_secs must be at least 1", name),
                });
            }
        }
        Ok(())
    }

    pub fn order_for(&self, data_type: DataType) -> &[String] {
        self.order.get(data_type)
    }

    pub fn is_disabled(&self, provider: &str) -> bool {
        self.disabled.contains(provider)
    }

    pub fn is_realtime_first(&self, data_type: DataType) -> bool {
        self.realtime_first.contains(&data_type)
    }

    pub fn cache_ttl(&self, data_type: DataType) -> Duration {
        self.cache.ttl(data_type)
    }

    pub fn timeout_for(&self, provider: &str) -> Duration {
        let ms = self
            .providers
            .get(provider)
            .and_then(|o| o.timeout_ms)
            .unwrap_or(self.provider_timeout_ms);
        Duration::from_millis(ms)
    }

    /// Configured interval, or the provider's own when not overridden.
    pub fn min_interval_for(&self, provider: &str, declared: Duration) -> Duration {
        self.providers
            .get(provider)
            .and_then(|o| o.min_interval_ms)
            .map(Duration::from_millis)
            .unwrap_or(declared)
    }

    pub fn breaker_for(&self, provider: &str) -> CircuitBreakerConfig {
        let defaults = &self.circuit_breaker;
        let o = self.providers.get(provider);
        CircuitBreakerConfig {
            failure_threshold: o
                .and_then(|o| o.failure_threshold)
                .unwrap_or(defaults.failure_threshold),
            failure_window: Duration::from_secs(
                o.and_then(|o| o.failure_window_secs)
                    .unwrap_or(defaults.failure_window_secs),
            ),
            cooldown: Duration::from_secs(
                o.and_then(|o| o.cooldown_secs)
                    .unwrap_or(defaults.cooldown_secs),
            ),
        }
    }

    /// Copy with `provider` added to or removed from the disabled set.
    pub fn with_provider_enabled(&self, provider: &str, enabled: bool) -> Self {
        let mut next = self.clone();
        if enabled {
            next.disabled.remove(provider);
        } else {
            next.disabled.insert(provider.to_string());
        }
        next
    }
}

/// Where configuration comes from. Re-read on every reload.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<FetchConfig, MarketDataError>;
}

/// TOML file source. A missing file yields the defaults.
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `config` back to the file.
    pub fn save(&self, config: &FetchConfig) -> Result<(), MarketDataError> {
        let content = config.to_toml_string()?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| MarketDataError::Config {
                message: format!("Failed to create {}: {}", parent.display(), e),
            })?;
        }
        std::fs::write(&self.path, content).map_err(|e| MarketDataError::Config {
            message: format!("Failed to write {}: {}", self.path.display(), e),
        })?;
        info!("Saved fetch configuration to {}", self.path.display());
        Ok(())
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<FetchConfig, MarketDataError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                debug!("Loading fetch configuration from {}", self.path.display());
                FetchConfig::from_toml_str(&content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "No configuration at {}, using defaults",
                    self.path.display()
                );
                Ok(FetchConfig::default())
            }
            Err(e) => Err(MarketDataError::Config {
                message: format!("Failed to read {}: {}", self.path.display(), e),
            }),
        }
    }
}

/// Fixed in-memory configuration.
pub struct StaticConfigSource(pub FetchConfig);

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> Result<FetchConfig, MarketDataError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FetchConfig::default();
        assert_eq!(
            config.order_for(DataType::Price),
            ["ibkr", "yfinance", "alpaca", "fmp", "defeatbeta"]
        );
        assert_eq!(
            config.order_for(DataType::Eps),
            ["sec_edgar", "yfinance", "defeatbeta"]
        );
        assert_eq!(config.order_for(DataType::Dividend), ["yfinance"]);
        assert!(config.disabled.is_empty());
        assert_eq!(config.timeout_for("yfinance"), Duration::from_secs(10));
        assert_eq!(config.cache_ttl(DataType::Price), Duration::from_secs(300));
        assert_eq!(
            config.cache_ttl(DataType::PriceHistory),
            Duration::from_secs(3600)
        );
        assert_eq!(config.cache_ttl(DataType::Eps), Duration::from_secs(86_400));
        assert!(config.is_realtime_first(DataType::Price));
        assert!(!config.is_realtime_first(DataType::Eps));
        assert!(!config.prefer_batch);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = FetchConfig::from_toml_str(
            r#"
            disabled = ["fmp"]
            prefer_batch = true
            history_period = "1y"

            [order]
            price = ["yfinance", "fmp"]

            [circuit_breaker]
            failure_threshold = 5

            [providers.fmp]
            timeout_ms = 2500
            min_interval_ms = 250
            cooldown_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.order_for(DataType::Price), ["yfinance", "fmp"]);
        // Untouched lists keep their defaults
        assert_eq!(config.order_for(DataType::Dividend), ["yfinance"]);
        assert!(config.is_disabled("fmp"));
        assert!(config.prefer_batch);
        assert_eq!(config.history_period, HistoryPeriod::OneYear);

        assert_eq!(config.timeout_for("fmp"), Duration::from_millis(2500));
        assert_eq!(config.timeout_for("yfinance"), Duration::from_secs(10));
        assert_eq!(
            config.min_interval_for("fmp", Duration::from_millis(100)),
            Duration::from_millis(250)
        );
        assert_eq!(
            config.min_interval_for("yfinance", Duration::from_millis(100)),
            Duration::from_millis(100)
        );

        let breaker = config.breaker_for("fmp");
        assert_eq!(breaker.failure_threshold, 5);
        assert_eq!(breaker.failure_window, Duration::from_secs(120));
        assert_eq!(breaker.cooldown, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(FetchConfig::from_toml_str("provider_timeout_ms = 0").is_err());
        assert!(FetchConfig::from_toml_str("[circuit_breaker]\nfailure_threshold = 0").is_err());
        assert!(FetchConfig::from_toml_str("realtime_first = [\"quotes\"]").is_err());
        assert!(FetchConfig::from_toml_str("order = 3").is_err());
    }

    #[test]
    fn test_zero_failure_window_rejected() {
        let err = FetchConfig::from_toml_str("[circuit_breaker]\nfailure_window_secs = 0")
            .unwrap_err();
        assert!(err.to_string().contains("circuit_breaker.failure_window_secs"));

        let err = FetchConfig::from_toml_str("[providers.fmp]\nfailure_window_secs = 0")
            .unwrap_err();
        assert!(err.to_string().contains("providers.fmp.failure_window_secs"));

        let mut config = FetchConfig::default();
        config.circuit_breaker.failure_window_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_provider_enabled_is_copy_on_write() {
        let config = FetchConfig::default();
        let disabled = config.with_provider_enabled("fmp", false);
        assert!(disabled.is_disabled("fmp"));
        assert!(!config.is_disabled("fmp"));

        let enabled = disabled.with_provider_enabled("fmp", true);
        assert!(!enabled.is_disabled("fmp"));
    }

    #[test]
    fn test_file_source_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileConfigSource::new(dir.path().join("absent.toml"));
        assert_eq!(source.load().unwrap(), FetchConfig::default());
    }

    #[test]
    fn test_file_source_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileConfigSource::new(dir.path().join("conf").join("fairvalue.toml"));

        let mut config = FetchConfig::default();
        config
            .order
            .set(DataType::Price, vec!["fmp".to_string(), "yfinance".to_string()]);
        config.providers.insert(
            "fmp".to_string(),
            ProviderOverride {
                timeout_ms: Some(1500),
                ..Default::default()
            },
        );
        source.save(&config).unwrap();

        assert_eq!(source.load().unwrap(), config);
    }

    #[test]
    fn test_file_source_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "prefer_batch = \"sometimes\"").unwrap();
        let err = FileConfigSource::new(&path).load().unwrap_err();
        assert!(matches!(err, MarketDataError::Config { .. }));
    }
}
