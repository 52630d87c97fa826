//! Payload validation.
//!
//! Checks provider payloads before the orchestrator accepts them:
//! - The payload variant and ticker match the request
//! - Prices are positive
//! - Histories and EPS lists are non-empty
//!
//! Hard issues turn the attempt into a `MalformedResponse` failure. Soft
//! issues are logged and the payload is accepted.

use log::warn;
use rust_decimal::Decimal;

use crate::errors::MarketDataError;
use crate::models::{DataPayload, DataType, PriceData, PriceHistoryData};

/// Validation severity levels.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValidationSeverity {
    /// Hard failure - reject payload, try next provider.
    Hard,
    /// Soft warning - accept payload but log warning.
    Soft,
}

#[derive(Clone, Debug)]
pub struct ValidationIssue {
    pub severity: ValidationSeverity,
    pub message: String,
}

impl ValidationIssue {
    fn hard(message: impl Into<String>) -> Self {
        Self {
            severity: ValidationSeverity::Hard,
            message: message.into(),
        }
    }

    fn soft(message: impl Into<String>) -> Self {
        Self {
            severity: ValidationSeverity::Soft,
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ValidatorConfig {
    /// Prices above this are logged as suspicious.
    pub max_price: Option<Decimal>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_price: Some(Decimal::from(1_000_000_000i64)), // 1 billion as sanity check
        }
    }
}

pub struct PayloadValidator {
    config: ValidatorConfig,
}

impl PayloadValidator {
    pub fn new() -> Self {
        Self {
            config: ValidatorConfig::default(),
        }
    }

    pub fn with_config(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Validate a payload returned by `provider` for `ticker`.
    ///
    /// `ticker` is the bare ticker (history keys already split).
    pub fn validate(
        &self,
        provider: &str,
        data_type: DataType,
        ticker: &str,
        payload: &DataPayload,
    ) -> Result<(), MarketDataError> {
        let mut issues: Vec<ValidationIssue> = Vec::new();

        if payload.data_type() != data_type {
            issues.push(ValidationIssue::hard(format!(
                "Expected {} payload, got {}",
                data_type,
                payload.data_type()
            )));
        }
        if !payload.ticker().eq_ignore_ascii_case(ticker) {
            issues.push(ValidationIssue::hard(format!(
                "Payload for {} returned for request {}",
                payload.ticker(),
                ticker
            )));
        }

        match payload {
            DataPayload::Price(data) => self.validate_price(data, &mut issues),
            DataPayload::PriceHistory(data) => self.validate_history(data, &mut issues),
            DataPayload::Eps(data) => {
                if data.entries.is_empty() {
                    issues.push(ValidationIssue::hard("No EPS entries"));
                }
            }
            DataPayload::Dividend(data) => {
                if data.annual_dividend < Decimal::ZERO
                    || data.payments.iter().any(|p| p.amount < Decimal::ZERO)
                {
                    issues.push(ValidationIssue::hard("Negative dividend amount"));
                }
            }
            DataPayload::StockInfo(data) => {
                if let (Some(high), Some(low)) = (data.fifty_two_week_high, data.fifty_two_week_low)
                {
                    if high < low {
                        issues.push(ValidationIssue::soft(format!(
                            "52-week high ({}) is less than low ({})",
                            high, low
                        )));
                    }
                }
            }
        }

        let errors: Vec<_> = issues
            .iter()
            .filter(|i| i.severity == ValidationSeverity::Hard)
            .map(|i| i.message.as_str())
            .collect();

        if !errors.is_empty() {
            return Err(MarketDataError::malformed(provider, errors.join("; ")));
        }

        for issue in issues.iter().filter(|i| i.severity == ValidationSeverity::Soft) {
            warn!(
                "Payload validation warning for {} from {}: {}",
                ticker, provider, issue.message
            );
        }

        Ok(())
    }

    fn validate_price(&self, data: &PriceData, issues: &mut Vec<ValidationIssue>) {
        if data.price <= Decimal::ZERO {
            issues.push(ValidationIssue::hard(format!(
                "Non-positive price: {}",
                data.price
            )));
        }
        if let Some(max_price) = self.config.max_price {
            if data.price > max_price {
                issues.push(ValidationIssue::soft(format!(
                    "Price ({}) exceeds max threshold ({})",
                    data.price, max_price
                )));
            }
        }
        if data.volume == Some(0) {
            issues.push(ValidationIssue::soft("Zero volume"));
        }
    }

    fn validate_history(&self, data: &PriceHistoryData, issues: &mut Vec<ValidationIssue>) {
        if data.closes.is_empty() {
            issues.push(ValidationIssue::hard("Empty price history"));
            return;
        }
        if data.current_price <= Decimal::ZERO {
            issues.push(ValidationIssue::hard(format!(
                "Non-positive current price: {}",
                data.current_price
            )));
        }
        if data.closes.iter().any(|c| c.close < Decimal::ZERO) {
            issues.push(ValidationIssue::hard("Negative close in history"));
        }
    }
}

impl Default for PayloadValidator {
    fn default() -> Self {
        Self::new()
    }
}
