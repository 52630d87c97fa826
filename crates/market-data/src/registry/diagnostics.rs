//! Attempt tracking for provider selection diagnostics.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::errors::{ErrorKind, MarketDataError};
use crate::models::ProviderId;

/// Why a provider was not called during a fetch.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Listed in the configured disabled set.
    Disabled,

    /// Provider reports it cannot serve requests (credentials missing,
    /// revoked, or latched after an earlier call-time failure).
    Unavailable,

    /// Circuit breaker is open, or a half-open trial is already in flight.
    CircuitOpen,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::CircuitOpen => write!(f, "circuit open"),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Skipped { reason: SkipReason },
    Failed { kind: ErrorKind, message: String },
}

/// Record of a single provider attempt during a fetch.
#[derive(Clone, Debug, Serialize)]
pub struct ProviderAttempt {
    pub provider_id: ProviderId,
    pub outcome: AttemptOutcome,
    /// Wall time spent inside the provider call (zero for skips).
    pub elapsed: Duration,
}

/// Every provider considered for one key, in the order they were considered.
#[derive(Clone, Debug, Default, Serialize)]
pub struct FetchDiagnostics {
    pub attempts: Vec<ProviderAttempt>,
}

impl FetchDiagnostics {
    pub fn new() -> Self {
        Self {
            attempts: Vec::new(),
        }
    }

    pub fn record_skip(&mut self, provider_id: ProviderId, reason: SkipReason) {
        self.attempts.push(ProviderAttempt {
            provider_id,
            outcome: AttemptOutcome::Skipped { reason },
            elapsed: Duration::ZERO,
        });
    }

    pub fn record_error(
        &mut self,
        provider_id: ProviderId,
        error: &MarketDataError,
        elapsed: Duration,
    ) {
        self.attempts.push(ProviderAttempt {
            provider_id,
            outcome: AttemptOutcome::Failed {
                kind: error.kind(),
                message: error.to_string(),
            },
            elapsed,
        });
    }

    pub fn record_success(&mut self, provider_id: ProviderId, elapsed: Duration) {
        self.attempts.push(ProviderAttempt {
            provider_id,
            outcome: AttemptOutcome::Success,
            elapsed,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Summary for logging/debugging.
    pub fn summary(&self) -> String {
        if self.attempts.is_empty() {
            return "no providers configured".to_string();
        }
        self.attempts
            .iter()
            .map(|a| match &a.outcome {
                AttemptOutcome::Success => format!("{}: SUCCESS", a.provider_id),
                AttemptOutcome::Skipped { reason } => {
                    format!("{}: SKIPPED ({})", a.provider_id, reason)
                }
                AttemptOutcome::Failed { message, .. } => {
                    format!("{}: ERROR ({})", a.provider_id, message)
                }
            })
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// Providers that were actually called.
    pub fn attempted(&self) -> Vec<&ProviderId> {
        self.attempts
            .iter()
            .filter(|a| !matches!(a.outcome, AttemptOutcome::Skipped { .. }))
            .map(|a| &a.provider_id)
            .collect()
    }

    /// Get all skip reasons.
    pub fn skip_reasons(&self) -> Vec<(&ProviderId, &SkipReason)> {
        self.attempts
            .iter()
            .filter_map(|a| match &a.outcome {
                AttemptOutcome::Skipped { reason } => Some((&a.provider_id, reason)),
                _ => None,
            })
            .collect()
    }

    /// Get all errors.
    pub fn errors(&self) -> Vec<(&ProviderId, ErrorKind)> {
        self.attempts
            .iter()
            .filter_map(|a| match &a.outcome {
                AttemptOutcome::Failed { kind, .. } => Some((&a.provider_id, *kind)),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for FetchDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}
