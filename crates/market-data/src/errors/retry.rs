/// Classification that decides failover and breaker accounting.
///
/// | Class | Try Next Provider? | Record Circuit Breaker Failure? |
/// |-------|-------------------|--------------------------------|
/// | `Never` | No | No |
/// | `FailoverWithPenalty` | Yes | Yes |
/// | `NextProvider` | Yes | No |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// The request itself is invalid; no provider can help.
    Never,

    /// Failover to the next provider and record a breaker failure.
    ///
    /// Used for timeouts, remote errors and malformed payloads. Enough of
    /// these inside the breaker window open the circuit for the provider.
    FailoverWithPenalty,

    /// Try the next provider without a penalty.
    ///
    /// Used when the provider is unusable for reasons the breaker cannot fix
    /// (missing or revoked credentials).
    NextProvider,
}

impl RetryClass {
    pub fn tries_next_provider(&self) -> bool {
        !matches!(self, Self::Never)
    }

    pub fn penalizes_provider(&self) -> bool {
        matches!(self, Self::FailoverWithPenalty)
    }
}
