use chrono::{DateTime, Utc};

use super::payload::DataPayload;
use super::types::ProviderId;
use crate::errors::MarketDataError;

/// Source recorded on results the orchestrator itself produced
/// (aggregated failures, rejected requests).
pub const ORCHESTRATOR_SOURCE: &str = "orchestrator";

/// Tagged outcome of one provider attempt or one orchestrated fetch.
#[derive(Clone, Debug)]
pub struct ProviderResult {
    /// Provider that produced the outcome
    pub source: ProviderId,

    /// True when served from cache
    pub cached: bool,

    /// When the data was produced. Cache hits keep the original time.
    pub fetched_at: DateTime<Utc>,

    pub outcome: Result<DataPayload, MarketDataError>,
}

impl ProviderResult {
    pub fn success(source: ProviderId, payload: DataPayload) -> Self {
        Self {
            source,
            cached: false,
            fetched_at: Utc::now(),
            outcome: Ok(payload),
        }
    }

    pub fn failure(source: ProviderId, error: MarketDataError) -> Self {
        Self {
            source,
            cached: false,
            fetched_at: Utc::now(),
            outcome: Err(error),
        }
    }

    pub fn orchestrator_failure(error: MarketDataError) -> Self {
        Self::failure(ProviderId::Borrowed(ORCHESTRATOR_SOURCE), error)
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn data(&self) -> Option<&DataPayload> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&MarketDataError> {
        self.outcome.as_ref().err()
    }

    pub fn into_outcome(self) -> Result<DataPayload, MarketDataError> {
        self.outcome
    }
}
