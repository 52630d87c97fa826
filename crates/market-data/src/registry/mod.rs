//! Provider registry module.
//!
//! This module provides the per-provider machinery the orchestrator drives:
//! - Provider registration and configurable per-datatype ordering
//! - Minimum-interval rate limiting per provider
//! - Circuit breaking for fault tolerance
//! - Payload validation
//! - Attempt diagnostics

mod circuit_breaker;
mod diagnostics;
mod rate_limiter;
mod registry;
mod validator;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitPermit, CircuitSnapshot, CircuitState,
    DEFAULT_COOLDOWN, DEFAULT_FAILURE_THRESHOLD, DEFAULT_FAILURE_WINDOW,
};
pub use diagnostics::{AttemptOutcome, FetchDiagnostics, ProviderAttempt, SkipReason};
pub use rate_limiter::RateLimiter;
pub use registry::{
    ProviderEntry, ProviderRegistry, ProviderSelection, ProviderStats, ProviderStatsSnapshot,
    ProviderStatus,
};
pub use validator::{PayloadValidator, ValidationIssue, ValidationSeverity, ValidatorConfig};
