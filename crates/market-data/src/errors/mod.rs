//! Error types and retry classification for the market data crate.
//!
//! This module provides:
//! - [`MarketDataError`]: The main error enum for all market data operations
//! - [`RetryClass`]: Classification for determining failover behavior
//! - [`ErrorKind`]: Compact, serializable error tag for reporting

mod retry;

pub use retry::RetryClass;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::DataType;
use crate::registry::FetchDiagnostics;

/// Errors that can occur during market data operations.
///
/// Provider-level variants (`Unavailable`, `Timeout`, `RemoteError`,
/// `MalformedResponse`) are recovered inside the orchestrator. Callers only
/// see `NoProviderAvailable` plus request and configuration errors.
#[derive(Error, Debug, Clone)]
pub enum MarketDataError {
    /// The provider cannot serve any request (missing or revoked credentials).
    /// It is skipped for the rest of the process.
    #[error("Provider unavailable: {provider} - {reason}")]
    Unavailable { provider: String, reason: String },

    /// The provider did not answer within its timeout.
    #[error("Timeout: {provider} after {}ms", after.as_millis())]
    Timeout { provider: String, after: Duration },

    /// The provider answered with an error (not found, HTTP failure,
    /// remote rate limit, network error).
    #[error("Remote error: {provider} - {message}")]
    RemoteError { provider: String, message: String },

    /// The provider answered but the payload could not be used.
    #[error("Malformed response: {provider} - {message}")]
    MalformedResponse { provider: String, message: String },

    /// Every eligible provider was skipped or failed.
    #[error("No provider available for {data_type} {key}: {diagnostics}")]
    NoProviderAvailable {
        data_type: DataType,
        key: String,
        diagnostics: Box<FetchDiagnostics>,
    },

    /// The request could not be interpreted (empty key, unknown type).
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Configuration could not be read or parsed.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl MarketDataError {
    pub fn unavailable(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn remote(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemoteError {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn malformed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Returns the retry classification for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use fairvalue_market_data::errors::{MarketDataError, RetryClass};
    ///
    /// let error = MarketDataError::remote("fmp", "HTTP 500");
    /// assert_eq!(error.retry_class(), RetryClass::FailoverWithPenalty);
    ///
    /// let error = MarketDataError::unavailable("fmp", "FMP_API_KEY not set");
    /// assert_eq!(error.retry_class(), RetryClass::NextProvider);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Timeout { .. } | Self::RemoteError { .. } | Self::MalformedResponse { .. } => {
                RetryClass::FailoverWithPenalty
            }
            Self::Unavailable { .. } => RetryClass::NextProvider,
            Self::NoProviderAvailable { .. }
            | Self::InvalidRequest { .. }
            | Self::Config { .. } => RetryClass::Never,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::RemoteError { .. } => ErrorKind::RemoteError,
            Self::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Self::NoProviderAvailable { .. } => ErrorKind::NoProviderAvailable,
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::Config { .. } => ErrorKind::Config,
        }
    }
}

/// Compact tag for an error, used in diagnostics and status output.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unavailable,
    Timeout,
    RemoteError,
    MalformedResponse,
    NoProviderAvailable,
    InvalidRequest,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unavailable => "unavailable",
            Self::Timeout => "timeout",
            Self::RemoteError => "remote_error",
            Self::MalformedResponse => "malformed_response",
            Self::NoProviderAvailable => "no_provider_available",
            Self::InvalidRequest => "invalid_request",
            Self::Config => "config",
        };
        f.write_str(s)
    }
}
