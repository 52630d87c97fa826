//! Credential lookup for providers.
//!
//! Providers receive an `Arc<dyn SecretStore>` and read their keys at
//! construction. Empty values are treated as absent.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use log::debug;

use crate::errors::MarketDataError;

pub trait SecretStore: Send + Sync {
    fn get_secret(&self, key: &str) -> Result<Option<String>, MarketDataError>;

    fn has_secret(&self, key: &str) -> bool {
        matches!(self.get_secret(key), Ok(Some(_)))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn secret_error(message: impl Into<String>) -> MarketDataError {
    MarketDataError::Config {
        message: message.into(),
    }
}

/// Reads secrets from the process environment.
#[derive(Debug, Default)]
pub struct EnvSecretStore;

impl SecretStore for EnvSecretStore {
    fn get_secret(&self, key: &str) -> Result<Option<String>, MarketDataError> {
        Ok(non_empty(std::env::var(key).ok()))
    }
}

/// JSON map file (`{ "FMP_API_KEY": "..." }`) with environment fallback.
///
/// The file is read on every lookup so edits apply without a restart.
/// A missing file behaves like an empty one.
#[derive(Debug)]
pub struct FileSecretStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn with_store<F>(&self, op: F) -> Result<(), MarketDataError>
    where
        F: FnOnce(&mut HashMap<String, String>),
    {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| secret_error("Secret store lock poisoned"))?;
        let mut store = self.load_store_locked()?;
        op(&mut store);
        self.persist_store_locked(&store)
    }

    fn read_store(&self) -> Result<HashMap<String, String>, MarketDataError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| secret_error("Secret store lock poisoned"))?;
        self.load_store_locked()
    }

    fn load_store_locked(&self) -> Result<HashMap<String, String>, MarketDataError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let raw = fs::read(&self.path).map_err(|e| {
            secret_error(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        if raw.is_empty() {
            return Ok(HashMap::new());
        }

        serde_json::from_slice(&raw).map_err(|e| {
            secret_error(format!("Failed to parse {}: {}", self.path.display(), e))
        })
    }

    fn persist_store_locked(&self, store: &HashMap<String, String>) -> Result<(), MarketDataError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| {
                    secret_error(format!("Failed to create {}: {}", parent.display(), e))
                })?;
        }
        let json = serde_json::to_string_pretty(store)
            .map_err(|e| secret_error(format!("Failed to serialize secrets: {}", e)))?;
        fs::write(&self.path, json).map_err(|e| {
            secret_error(format!("Failed to write {}: {}", self.path.display(), e))
        })
    }

    pub fn set_secret(&self, key: &str, value: &str) -> Result<(), MarketDataError> {
        self.with_store(|store| {
            store.insert(key.to_string(), value.to_string());
        })
    }

    pub fn delete_secret(&self, key: &str) -> Result<(), MarketDataError> {
        self.with_store(|store| {
            store.remove(key);
        })
    }
}

impl SecretStore for FileSecretStore {
    fn get_secret(&self, key: &str) -> Result<Option<String>, MarketDataError> {
        let store = self.read_store()?;
        if let Some(value) = non_empty(store.get(key).cloned()) {
            return Ok(Some(value));
        }
        debug!("Secret {} not in {}, checking environment", key, self.path.display());
        EnvSecretStore.get_secret(key)
    }
}
